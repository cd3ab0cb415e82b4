//! Seam between [`Connection`](crate::peer::connection::Connection) and
//! whatever actually moves bytes between peers.
//!
//! An [`Engine`] allocates [`EngineHandle`]s. A handle is one native
//! peer connection: it produces and consumes SDP, carries text messages
//! once negotiation completes and reports readiness through a `watch`
//! channel. Handles know nothing about the offer/answer ordering rules;
//! `Connection` enforces those before forwarding a call.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::peer::types::SessionDescription;

/// Readiness as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    Pending,
    /// The data channel is open; messages can flow.
    Ready,
    Failed(String),
    /// The remote side went away.
    Closed,
}

impl EngineSignal {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineSignal::Failed(_) | EngineSignal::Closed)
    }
}

/// Publishes `next` unless a terminal signal was already published.
pub fn raise(tx: &watch::Sender<EngineSignal>, next: EngineSignal) {
    tx.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no connection resource available: {0}")]
    Unavailable(String),
    /// The engine refused a remote description.
    #[error("description rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn allocate(&self) -> Result<Box<dyn EngineHandle>, EngineError>;
}

#[async_trait]
pub trait EngineHandle: Send {
    /// Returns the local offer SDP, ready to hand to the peer.
    async fn create_offer(&mut self) -> Result<String, EngineError>;

    /// Returns the local answer SDP; a remote offer has been applied.
    async fn create_answer(&mut self) -> Result<String, EngineError>;

    async fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), EngineError>;

    /// Queues one message; does not wait for delivery.
    async fn send_message(&mut self, text: &str) -> Result<(), EngineError>;

    /// Everything received since the previous call, oldest first.
    fn drain_messages(&mut self) -> Vec<String>;

    fn signal(&self) -> watch::Receiver<EngineSignal>;

    /// Releases the native resource. Must not block.
    fn destroy(self: Box<Self>);
}
