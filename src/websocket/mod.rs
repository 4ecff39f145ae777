pub mod dispatch;
pub mod handler;
pub mod msg_edit_handler;
pub mod msg_ping_handler;
pub mod msg_relay_handler;
pub mod session;

pub use handler::websocket_handler;
