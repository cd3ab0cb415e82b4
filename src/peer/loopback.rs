//! In-process engine: endpoints allocated from one [`LoopbackEngine`]
//! connect to each other through a shared switchboard instead of ICE.
//!
//! The SDP it produces is a minimal session block whose
//! `a=loopback-endpoint:` attribute names the endpoint. Descriptions from
//! another engine instance, or without that attribute, are rejected.
//!
//! Besides connecting controllers without a network, the engine can be
//! capped ([`LoopbackEngine::with_capacity`]), counts releases
//! ([`LoopbackEngine::released`]) and can fail every live endpoint at
//! once ([`LoopbackEngine::sever`]).

use crate::peer::engine::{raise, Engine, EngineError, EngineHandle, EngineSignal};
use crate::peer::types::SessionDescription;
use crate::utils::random_id;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

const ENDPOINT_ATTR: &str = "a=loopback-endpoint:";

struct Endpoint {
    inbox: mpsc::UnboundedSender<String>,
    signal: Arc<watch::Sender<EngineSignal>>,
    remote: Option<String>,
    has_local: bool,
}

#[derive(Default)]
struct Switchboard {
    endpoints: HashMap<String, Endpoint>,
    capacity: Option<usize>,
    allocated: usize,
    released: usize,
}

impl Switchboard {
    /// Signals readiness once both sides hold a local description and
    /// point at each other.
    fn try_link(&mut self, id: &str) {
        let Some(me) = self.endpoints.get(id) else {
            return;
        };
        let Some(remote_id) = me.remote.clone() else {
            return;
        };
        if !me.has_local {
            return;
        }
        let Some(peer) = self.endpoints.get(&remote_id) else {
            return;
        };
        if peer.has_local && peer.remote.as_deref() == Some(id) {
            debug!(endpoint = id, peer = %remote_id, "loopback endpoints linked");
            raise(&peer.signal, EngineSignal::Ready);
            raise(&me.signal, EngineSignal::Ready);
        }
    }
}

#[derive(Clone, Default)]
pub struct LoopbackEngine {
    board: Arc<Mutex<Switchboard>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `capacity` endpoints alive at once.
    pub fn with_capacity(capacity: usize) -> Self {
        let engine = Self::new();
        engine.board.lock().capacity = Some(capacity);
        engine
    }

    pub fn allocated(&self) -> usize {
        self.board.lock().allocated
    }

    pub fn released(&self) -> usize {
        self.board.lock().released
    }

    pub fn live(&self) -> usize {
        self.board.lock().endpoints.len()
    }

    /// Fails every live endpoint, as a dropped network would.
    pub fn sever(&self, reason: &str) {
        for endpoint in self.board.lock().endpoints.values() {
            raise(&endpoint.signal, EngineSignal::Failed(reason.to_string()));
        }
    }
}

#[async_trait]
impl Engine for LoopbackEngine {
    async fn allocate(&self) -> Result<Box<dyn EngineHandle>, EngineError> {
        let mut board = self.board.lock();
        if let Some(capacity) = board.capacity {
            if board.endpoints.len() >= capacity {
                return Err(EngineError::Unavailable(format!(
                    "all {capacity} loopback endpoints in use"
                )));
            }
        }

        let id = random_id();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (signal_tx, signal) = watch::channel(EngineSignal::Pending);
        board.endpoints.insert(
            id.clone(),
            Endpoint {
                inbox: inbox_tx,
                signal: Arc::new(signal_tx),
                remote: None,
                has_local: false,
            },
        );
        board.allocated += 1;
        debug!(endpoint = %id, "loopback endpoint allocated");

        Ok(Box::new(LoopbackHandle {
            id,
            board: self.board.clone(),
            inbox,
            signal,
        }))
    }
}

pub struct LoopbackHandle {
    id: String,
    board: Arc<Mutex<Switchboard>>,
    inbox: mpsc::UnboundedReceiver<String>,
    signal: watch::Receiver<EngineSignal>,
}

impl LoopbackHandle {
    fn describe(&self) -> String {
        format!(
            "v=0\r\no=- {id} 1 IN IP4 127.0.0.1\r\ns=pastelink-loopback\r\nt=0 0\r\n{ENDPOINT_ATTR}{id}\r\n",
            id = self.id
        )
    }

    fn local_applied(&mut self) -> Result<String, EngineError> {
        let mut board = self.board.lock();
        let endpoint = board
            .endpoints
            .get_mut(&self.id)
            .ok_or_else(|| EngineError::Transport("endpoint released".into()))?;
        endpoint.has_local = true;
        board.try_link(&self.id);
        Ok(self.describe())
    }
}

fn endpoint_of(sdp: &str) -> Option<&str> {
    if !sdp.starts_with("v=0") {
        return None;
    }
    sdp.lines()
        .find_map(|line| line.trim_end().strip_prefix(ENDPOINT_ATTR))
        .filter(|id| !id.is_empty())
}

#[async_trait]
impl EngineHandle for LoopbackHandle {
    async fn create_offer(&mut self) -> Result<String, EngineError> {
        self.local_applied()
    }

    async fn create_answer(&mut self) -> Result<String, EngineError> {
        self.local_applied()
    }

    async fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), EngineError> {
        let remote = endpoint_of(description.sdp())
            .ok_or_else(|| EngineError::Rejected("not a loopback session description".into()))?
            .to_string();

        let mut board = self.board.lock();
        if remote == self.id || !board.endpoints.contains_key(&remote) {
            return Err(EngineError::Rejected(format!("unknown endpoint {remote}")));
        }
        if let Some(endpoint) = board.endpoints.get_mut(&self.id) {
            endpoint.remote = Some(remote);
        }
        board.try_link(&self.id);
        Ok(())
    }

    async fn send_message(&mut self, text: &str) -> Result<(), EngineError> {
        let board = self.board.lock();
        let peer = board
            .endpoints
            .get(&self.id)
            .and_then(|me| me.remote.as_ref())
            .and_then(|remote| board.endpoints.get(remote))
            .ok_or_else(|| EngineError::Transport("peer endpoint released".into()))?;
        peer.inbox
            .send(text.to_string())
            .map_err(|_| EngineError::Transport("peer endpoint released".into()))
    }

    fn drain_messages(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(text) = self.inbox.try_recv() {
            messages.push(text);
        }
        messages
    }

    fn signal(&self) -> watch::Receiver<EngineSignal> {
        self.signal.clone()
    }

    fn destroy(self: Box<Self>) {
        let mut board = self.board.lock();
        if let Some(endpoint) = board.endpoints.remove(&self.id) {
            board.released += 1;
            debug!(endpoint = %self.id, "loopback endpoint released");
            if let Some(peer) = endpoint.remote.and_then(|r| board.endpoints.get(&r)) {
                if peer.remote.as_deref() == Some(self.id.as_str()) {
                    raise(&peer.signal, EngineSignal::Closed);
                }
            }
        }
    }
}
