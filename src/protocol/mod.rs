//! Wire formats on both sides of the relay.
//!
//! # Data Flow
//! ```text
//! client text frame
//!     → client.rs (envelope → ClientFrame, validation, defaults)
//!     → upstream.rs (UpstreamFrame → backend JSON)
//!
//! backend frame
//!     → upstream.rs (ServerMessage)
//!     → [gateway::demux]
//!     → server.rs (ServerEvent → client JSON)
//! ```
//!
//! # Design Decisions
//! - Pure data transformation, no state
//! - Media payloads stay base64 strings; the relay never decodes them
//! - Error codes are a closed enum (error.rs)

pub mod client;
pub mod error;
pub mod server;
pub mod upstream;

pub use client::{ClientFrame, ClientFrameKind, SetupRequest};
pub use error::{DecodeError, ErrorCode, ErrorPayload};
pub use server::{ServerEvent, SessionStatus};
pub use upstream::{ServerMessage, UpstreamFrame, UpstreamSetup};
