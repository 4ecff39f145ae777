//! Real-time relay for collaborative document editing.
//!
//! Clients connect over WebSocket per document; events are published to a
//! shared pub/sub bus and fanned back out to every process holding sessions
//! for that document.

pub mod bus;
pub mod clients;
pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod websocket;
pub mod ws;

pub use state::AppState;
