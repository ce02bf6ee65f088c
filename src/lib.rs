//! Realtime session relay between browser clients and a generative
//! streaming backend.
//!
//! ```text
//! client ⇄ http::websocket ⇄ gateway::relay ⇄ session ⇄ upstream ⇄ backend
//!                                  └── gateway::demux ◀── upstream events
//! ```

pub mod admin;
pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod upstream;

pub use config::schema::RelayConfig;
pub use http::RelayServer;
pub use lifecycle::Shutdown;
