//! # blitz-server
//!
//! Axum HTTP + `WebSocket` server for the Blitz daemon.
//!
//! - `WebSocket` gateway: per-client sessions with bounded outbound queues
//! - [`BroadcastHub`](websocket::broadcast::BroadcastHub): non-blocking fan-out
//!   with drop-on-full backpressure
//! - [`poller`]: periodic snapshot polling tied to the shutdown token
//! - [`dispatch`]: allowlisted command resolution and execution
//! - HTTP endpoints: health check, Prometheus metrics, static assets
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod health;
pub mod metrics;
pub mod poller;
pub mod server;
pub mod shutdown;
pub mod websocket;
