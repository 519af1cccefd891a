//! WebSocket sessions, heartbeat, and broadcasting.

pub mod broadcast;
pub mod connection;
pub mod session;
