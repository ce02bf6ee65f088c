//! Network layer subsystem.
//!
//! Every accepted client socket is counted in `connection.rs` so that
//! shutdown can wait for relays to finish.

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionTracker};
