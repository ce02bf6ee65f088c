//! HTTP and WebSocket surface.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum router, request IDs, tracing)
//!     → websocket.rs (upgrade, connection limit, relay loop)
//!     → gateway::RelayConnection
//! ```

pub mod server;
pub mod websocket;

pub use server::{AppState, RelayServer};
