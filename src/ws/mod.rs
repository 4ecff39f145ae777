pub mod bridge;
pub mod rooms;
pub mod tasks;
