//! Core library for the laserctl service.
//!
//! This library turns the half-duplex, unframed serial protocol of a
//! pulsed-laser illumination device into a safe asynchronous
//! request/response API, and layers a connection-oriented device session
//! with cached configuration and change notification on top of it. The
//! binary in `src/main.rs` exposes the session over HTTP and WebSocket.

pub mod bridge;
pub mod config;
pub mod error;
pub mod notify;
pub mod ports;
pub mod serial;
pub mod server;
pub mod session;

pub use error::{AppResult, LaserError};
