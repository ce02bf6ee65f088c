//! Upstream connection management.
//!
//! # Data Flow
//! ```text
//! setup frame
//!     → setup.rs (merge client options over configured defaults)
//!     → connector.rs (dial backend, send setup, spawn pump task)
//!     → handle.rs (UpstreamHandle + ordered UpstreamEvent stream)
//!
//! Pump task:
//!     UpstreamCommand::Send  → socket
//!     socket frame           → ServerMessage → UpstreamEvent::Message
//!     socket error / close   → one terminal UpstreamEvent
//! ```
//!
//! # Design Decisions
//! - One connection per session, exclusively owned through its handle
//! - Sends on a closed handle are logged and dropped, never fatal
//! - The outbound queue is bounded; a full queue rejects the frame
//! - Close is idempotent and never produces a second terminal event

pub mod connector;
pub mod handle;
pub mod setup;

pub use connector::{GeminiConnector, UpstreamConnector, UpstreamError};
pub use handle::{SendError, UpstreamCommand, UpstreamCommands, UpstreamEvent, UpstreamHandle, UpstreamLink};
pub use setup::{build_setup, SetupDefaults};
