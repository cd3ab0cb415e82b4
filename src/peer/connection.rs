use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::peer::engine::{Engine, EngineError, EngineHandle, EngineSignal};
use crate::peer::state::{Negotiation, SessionState};
use crate::peer::types::{Role, SdpType, SessionDescription};
use crate::utils::random_id;

/// Typed handle over one engine connection.
///
/// Calls are serialized through an internal mutex, so a `Connection` can
/// be shared between tasks behind an `Arc`. The engine handle is released
/// exactly once, by [`Connection::close`] or on drop, whichever comes
/// first.
pub struct Connection {
    id: String,
    inner: Mutex<Inner>,
    signal: watch::Receiver<EngineSignal>,
    /// Flipped by `close` so waiters return without the lock.
    closed: watch::Sender<bool>,
}

struct Inner {
    handle: Option<Box<dyn EngineHandle>>,
    negotiation: Negotiation,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
}

impl Inner {
    /// Folds the latest engine signal into the state machine.
    fn sync(&mut self, signal: &watch::Receiver<EngineSignal>, id: &str) {
        let latest = signal.borrow().clone();
        match latest {
            EngineSignal::Pending => {}
            EngineSignal::Ready => {
                if self.negotiation.engine_ready() {
                    info!(connection = %id, "peer connection ready");
                }
            }
            EngineSignal::Failed(reason) => {
                if !self.negotiation.state().is_terminal() {
                    warn!(connection = %id, %reason, "engine reported failure");
                    self.negotiation.fail(reason);
                }
            }
            EngineSignal::Closed => {
                if !self.negotiation.state().is_terminal() {
                    match self.negotiation.peer_closed() {
                        None => info!(connection = %id, "remote peer closed the data channel"),
                        Some(err) => {
                            warn!(connection = %id, error = %err, "remote peer left during negotiation")
                        }
                    }
                }
            }
        }
    }

    fn handle(&mut self, operation: &'static str) -> Result<&mut Box<dyn EngineHandle>> {
        let state = self.negotiation.state().clone();
        self.handle
            .as_mut()
            .ok_or(Error::InvalidState { operation, state })
    }

    /// Engine-level failures are terminal for the session.
    fn engine_failure(&mut self, id: &str, err: EngineError) -> Error {
        warn!(connection = %id, error = %err, "engine call failed");
        match err {
            EngineError::Rejected(reason) => {
                self.negotiation.fail(format!("remote description rejected: {reason}"));
                Error::MalformedDescription(reason)
            }
            EngineError::Unavailable(reason) | EngineError::Transport(reason) => {
                self.negotiation.fail(reason)
            }
        }
    }
}

impl Connection {
    /// Allocates one engine resource.
    pub async fn create(engine: &dyn Engine) -> Result<Self> {
        let handle = engine
            .allocate()
            .await
            .map_err(|err| Error::EngineUnavailable(err.to_string()))?;
        let signal = handle.signal();
        let id = random_id();
        info!(connection = %id, "peer connection allocated");
        Ok(Self {
            id,
            inner: Mutex::new(Inner {
                handle: Some(handle),
                negotiation: Negotiation::new(),
                local: None,
                remote: None,
            }),
            signal,
            closed: watch::channel(false).0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    async fn locked(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().await;
        inner.sync(&self.signal, &self.id);
        inner
    }

    pub async fn state(&self) -> SessionState {
        self.locked().await.negotiation.state().clone()
    }

    pub async fn role(&self) -> Option<Role> {
        self.locked().await.negotiation.role()
    }

    pub async fn local_description(&self) -> Option<SessionDescription> {
        self.inner.lock().await.local.clone()
    }

    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.lock().await.remote.clone()
    }

    pub async fn create_offer(&self) -> Result<SessionDescription> {
        self.create_local(SdpType::Offer).await
    }

    pub async fn create_answer(&self) -> Result<SessionDescription> {
        self.create_local(SdpType::Answer).await
    }

    async fn create_local(&self, kind: SdpType) -> Result<SessionDescription> {
        let mut inner = self.locked().await;
        inner.negotiation.expect_local(kind)?;
        debug!(connection = %self.id, %kind, "creating local description");

        let handle = inner.handle("create_local_description")?;
        let result = match kind {
            SdpType::Offer => handle.create_offer().await,
            SdpType::Answer => handle.create_answer().await,
        };
        let sdp = match result {
            Ok(sdp) => sdp,
            Err(err) => return Err(inner.engine_failure(&self.id, err)),
        };

        let description = SessionDescription::new(kind, sdp);
        inner.negotiation.local_applied(kind);
        inner.local = Some(description.clone());
        info!(
            connection = %self.id,
            %kind,
            fingerprint = %description.fingerprint(),
            "local description set"
        );
        Ok(description)
    }

    pub async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut inner = self.locked().await;
        inner.negotiation.expect_remote(description.kind())?;
        if description.sdp().trim().is_empty() {
            return Err(Error::MalformedDescription("empty description".into()));
        }

        let handle = inner.handle("set_remote_description")?;
        if let Err(err) = handle.set_remote_description(&description).await {
            return Err(inner.engine_failure(&self.id, err));
        }

        inner.negotiation.remote_applied(description.kind());
        info!(
            connection = %self.id,
            kind = %description.kind(),
            fingerprint = %description.fingerprint(),
            "remote description set"
        );
        inner.remote = Some(description);
        // readiness may already have been signalled
        inner.sync(&self.signal, &self.id);
        Ok(())
    }

    pub async fn send_message(&self, text: &str) -> Result<()> {
        let mut inner = self.locked().await;
        inner.negotiation.expect_connected()?;
        let handle = inner.handle("send_message")?;
        if let Err(err) = handle.send_message(text).await {
            return Err(inner.engine_failure(&self.id, err));
        }
        debug!(connection = %self.id, len = text.len(), "message sent");
        Ok(())
    }

    /// Returns and forgets every message received since the last drain.
    pub async fn drain_inbound_messages(&self) -> Result<Vec<String>> {
        let mut inner = self.locked().await;
        inner.negotiation.expect_open("drain_inbound_messages")?;
        let messages = inner.handle("drain_inbound_messages")?.drain_messages();
        if !messages.is_empty() {
            debug!(connection = %self.id, count = messages.len(), "drained inbound messages");
        }
        Ok(messages)
    }

    /// Waits for the engine to report readiness. Expiry of `limit` is a
    /// negotiation failure.
    ///
    /// The internal lock is not held while waiting, so `close` from
    /// another task proceeds immediately.
    pub async fn wait_connected(&self, limit: Duration) -> Result<()> {
        {
            let inner = self.locked().await;
            match inner.negotiation.state() {
                SessionState::Connected => return Ok(()),
                SessionState::Failed(reason) => return Err(Error::Failed(reason.clone())),
                state @ (SessionState::Closed | SessionState::Disconnected) => {
                    return Err(Error::InvalidState {
                        operation: "wait_connected",
                        state: state.clone(),
                    })
                }
                _ => {}
            }
        }

        let mut signal = self.signal.clone();
        let mut closed = self.closed.subscribe();
        let observed = async {
            loop {
                let current = signal.borrow_and_update().clone();
                if current != EngineSignal::Pending {
                    return current;
                }
                if *closed.borrow_and_update() {
                    return EngineSignal::Closed;
                }
                tokio::select! {
                    changed = signal.changed() => {
                        if changed.is_err() {
                            return EngineSignal::Closed;
                        }
                    }
                    _ = closed.changed() => {}
                }
            }
        };
        let outcome = timeout(limit, observed).await;

        let mut inner = self.locked().await;
        let state = inner.negotiation.state().clone();
        match state {
            SessionState::Connected => Ok(()),
            SessionState::Failed(reason) => Err(Error::Failed(reason)),
            state if outcome.is_err() && !state.is_terminal() => Err(inner
                .negotiation
                .fail(format!("negotiation timed out after {} ms", limit.as_millis()))),
            state => Err(Error::InvalidState {
                operation: "wait_connected",
                state,
            }),
        }
    }

    /// Releases the engine resource. Safe in any state, idempotent.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.handle.take() {
            info!(connection = %self.id, state = %inner.negotiation.state(), "closing peer connection");
            handle.destroy();
        }
        inner.negotiation.close();
        self.closed.send_replace(true);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.get_mut().handle.take() {
            debug!(connection = %self.id, "releasing peer connection on drop");
            handle.destroy();
        }
    }
}
