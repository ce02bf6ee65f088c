//! The session aggregate.
//!
//! # Responsibilities
//! - Own at most one upstream handle at a time
//! - Track setup completion, negotiated model and resumption handle
//! - Derive the relay state the gateway enforces
//!
//! Only the relay task that owns the client connection mutates a
//! session. Other tasks read snapshots or ask for eviction.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::protocol::server::SessionStatus;
use crate::protocol::upstream::UpstreamFrame;
use crate::upstream::{SendError, UpstreamHandle};

/// Identity of a client connection, and of the session bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Relay state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayState {
    /// No upstream connection yet (or it ended); a `setup` is expected.
    Connected,
    /// Setup sent upstream, acknowledgement pending.
    AwaitingSetup,
    /// Upstream acknowledged setup; realtime frames are forwarded.
    Ready,
    /// Terminal.
    Closed,
}

/// One live conversational relay.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: SystemTime,
    upstream: ArcSwapOption<UpstreamHandle>,
    model: ArcSwapOption<String>,
    setup_complete: AtomicBool,
    resumption_handle: ArcSwapOption<String>,
    closed: AtomicBool,
    eviction: Notify,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: SystemTime::now(),
            upstream: ArcSwapOption::empty(),
            model: ArcSwapOption::empty(),
            setup_complete: AtomicBool::new(false),
            resumption_handle: ArcSwapOption::empty(),
            closed: AtomicBool::new(false),
            eviction: Notify::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn state(&self) -> RelayState {
        if self.closed.load(Ordering::Acquire) {
            RelayState::Closed
        } else if self.upstream.load().is_none() {
            RelayState::Connected
        } else if !self.setup_complete.load(Ordering::Acquire) {
            RelayState::AwaitingSetup
        } else {
            RelayState::Ready
        }
    }

    /// Bind a freshly opened upstream connection. Any previous connection
    /// is closed first, so at most one is ever held.
    pub fn attach_upstream(&self, handle: UpstreamHandle, model: String) {
        self.setup_complete.store(false, Ordering::Release);
        self.model.store(Some(Arc::new(model)));
        if let Some(previous) = self.upstream.swap(Some(Arc::new(handle))) {
            previous.close();
        }
    }

    /// Close and drop the current upstream connection, if any.
    /// Returns true when a connection was actually closed by this call.
    pub fn close_upstream(&self) -> bool {
        match self.upstream.swap(None) {
            Some(handle) => handle.close(),
            None => false,
        }
    }

    /// ID of the held upstream handle.
    pub fn upstream_id(&self) -> Option<u64> {
        let guard = self.upstream.load();
        Option::as_ref(&*guard).map(|handle| handle.id())
    }

    /// Forward a frame on the held upstream connection.
    pub fn send_upstream(&self, frame: &UpstreamFrame) -> Result<(), SendError> {
        let guard = self.upstream.load();
        match Option::as_ref(&*guard) {
            Some(handle) => handle.send(frame),
            None => Err(SendError::Closed),
        }
    }

    pub fn mark_setup_complete(&self) {
        self.setup_complete.store(true, Ordering::Release);
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.load(Ordering::Acquire)
    }

    pub fn model(&self) -> Option<String> {
        self.model.load_full().map(|model| model.as_ref().clone())
    }

    pub fn set_resumption_handle(&self, handle: String) {
        self.resumption_handle.store(Some(Arc::new(handle)));
    }

    pub fn resumption_handle(&self) -> Option<String> {
        self.resumption_handle
            .load_full()
            .map(|handle| handle.as_ref().clone())
    }

    /// Clear session content after the upstream connection ended, keeping
    /// the record (and the resumption handle) for a later `setup`.
    pub fn reset(&self) {
        self.close_upstream();
        self.setup_complete.store(false, Ordering::Release);
        self.model.store(None);
    }

    /// Terminal teardown. Returns true only for the first call.
    pub fn destroy(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_upstream();
        true
    }

    /// Ask the owning relay task to tear this session down.
    pub fn request_eviction(&self) {
        self.eviction.notify_one();
    }

    /// Resolves once eviction has been requested.
    pub async fn evicted(&self) {
        self.eviction.notified().await
    }

    pub fn status(&self) -> SessionStatus {
        let created_at_ms = self
            .created_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let upstream = self.upstream.load();
        let connected = Option::as_ref(&*upstream).is_some_and(|handle| !handle.is_closed());

        SessionStatus {
            session_id: self.id.clone(),
            state: self.state(),
            connected,
            setup_complete: self.is_setup_complete(),
            model: self.model(),
            session_handle: self.resumption_handle(),
            created_at_ms,
        }
    }
}
