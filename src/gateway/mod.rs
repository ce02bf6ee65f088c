//! Client-facing relay gateway.
//!
//! # Data Flow
//! ```text
//! client frame  → relay.rs (decode, state check) → session upstream handle
//! upstream event → relay.rs → demux.rs (classify) → client events
//! ```

pub mod demux;
pub mod relay;

pub use relay::RelayConnection;
