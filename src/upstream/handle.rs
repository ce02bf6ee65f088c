//! Handle to one upstream connection.
//!
//! # Responsibilities
//! - Queue outbound frames in the order they were sent, up to a bound
//! - Make close idempotent and visible to the task even while it dials
//! - Carry the typed inbound event stream back to the session owner

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

use crate::protocol::upstream::{ServerMessage, UpstreamFrame};

/// Global atomic counter for handle IDs.
/// Only uniqueness matters, so relaxed ordering is enough.
static HANDLE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Instruction for the task that owns the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCommand {
    /// An encoded frame to write.
    Send(String),
    /// Close the socket and stop.
    Close,
}

/// Something that happened on the upstream connection, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// A decoded backend frame.
    Message(ServerMessage),
    /// Transport failure. Terminal for the connection.
    Error(String),
    /// The backend closed the connection. Terminal for the connection.
    Closed { code: u16, reason: String },
}

/// Why a frame was not queued upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection already ended. The terminal event reports it.
    #[error("upstream connection is closed")]
    Closed,

    /// The outbound queue is at capacity.
    #[error("upstream send queue is full")]
    Full,

    #[error("frame could not be encoded")]
    Encode,
}

/// Close state shared by both ends of one connection.
#[derive(Debug, Default)]
struct CloseState {
    closed: AtomicBool,
    requested: Notify,
}

/// Sending side of one upstream connection.
#[derive(Debug)]
pub struct UpstreamHandle {
    id: u64,
    commands: mpsc::Sender<UpstreamCommand>,
    state: Arc<CloseState>,
}

/// Receiving side of [`UpstreamHandle`], held by the connection task.
#[derive(Debug)]
pub struct UpstreamCommands {
    rx: mpsc::Receiver<UpstreamCommand>,
    state: Arc<CloseState>,
}

/// An opened upstream connection: the handle plus its event stream.
#[derive(Debug)]
pub struct UpstreamLink {
    pub handle: UpstreamHandle,
    pub events: mpsc::Receiver<UpstreamEvent>,
}

impl UpstreamHandle {
    /// Create a handle and the command stream it feeds. At most
    /// `capacity` frames wait for the socket at once.
    pub fn channel(capacity: usize) -> (Self, UpstreamCommands) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let state = Arc::new(CloseState::default());
        let handle = Self {
            id: HANDLE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            commands: tx,
            state: Arc::clone(&state),
        };
        (handle, UpstreamCommands { rx, state })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Queue a frame for the backend without waiting.
    ///
    /// A closed connection yields [`SendError::Closed`], logged only; the
    /// terminal event on the event stream reports the closure.
    pub fn send(&self, frame: &UpstreamFrame) -> Result<(), SendError> {
        if self.is_closed() {
            tracing::debug!(upstream_id = self.id, kind = frame.label(), "Upstream closed, dropping frame");
            return Err(SendError::Closed);
        }

        let encoded = frame.encode().map_err(|e| {
            tracing::error!(upstream_id = self.id, kind = frame.label(), error = %e, "Failed to encode upstream frame");
            SendError::Encode
        })?;

        match self.commands.try_send(UpstreamCommand::Send(encoded)) {
            Ok(()) => {
                tracing::debug!(upstream_id = self.id, kind = frame.label(), "Frame queued upstream");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(upstream_id = self.id, kind = frame.label(), "Upstream send queue full, rejecting frame");
                Err(SendError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.state.closed.store(true, Ordering::Release);
                tracing::debug!(upstream_id = self.id, kind = frame.label(), "Upstream task gone, dropping frame");
                Err(SendError::Closed)
            }
        }
    }

    /// Close the connection. Returns true only for the call that closed it.
    ///
    /// The task is woken even when the queue is full or it is still
    /// dialing the backend.
    pub fn close(&self) -> bool {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.commands.try_send(UpstreamCommand::Close);
        self.state.requested.notify_one();
        tracing::debug!(upstream_id = self.id, "Upstream close requested");
        true
    }
}

impl UpstreamCommands {
    pub async fn recv(&mut self) -> Option<UpstreamCommand> {
        self.rx.recv().await
    }

    /// Resolves once the handle side asked for the connection to close.
    /// The future does not borrow `self`, so it can race `recv`.
    pub fn close_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let state = Arc::clone(&self.state);
        async move { state.requested.notified().await }
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Record that the connection ended on its own.
    pub fn mark_closed(&self) {
        self.state.closed.store(true, Ordering::Release);
    }

    pub fn try_recv(&mut self) -> Option<UpstreamCommand> {
        self.rx.try_recv().ok()
    }
}
