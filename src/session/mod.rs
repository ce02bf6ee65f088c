//! Session state shared between the gateway and the admin API.
//!
//! # Data Flow
//! ```text
//! client connects      → registry.create(id)   (CONNECTED)
//! setup                → session.attach_upstream (AWAITING_SETUP)
//! upstream ack         → session.mark_setup_complete (READY)
//! upstream close/error → session.reset           (CONNECTED)
//! client disconnects   → registry.remove(id)   (CLOSED, upstream closed)
//! ```
//!
//! # Design Decisions
//! - The registry is the only structure shared across sessions
//! - A session is only mutated by the task serving its connection
//! - Removal is idempotent; the first caller performs the teardown

pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;

pub use registry::SessionRegistry;
pub use session::{RelayState, Session, SessionId};
