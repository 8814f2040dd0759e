//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → interceptor request phase (node + destination list)
//!     → forward to destinations in order until one answers
//!     → interceptor response phase (counters, health, session binding)
//!     → Send to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
