use crate::config::PeerConfig;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::data_channel::{attach_dc, ChannelSlot};
use crate::peer::engine::{raise, Engine, EngineError, EngineHandle, EngineSignal};
use crate::peer::ice::{rtc_config, set_local_and_gather};
use crate::peer::types::{SdpType, SessionDescription};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_candidate::RTCIceCandidate,
    peer_connection::{
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Engine backed by the `webrtc` crate.
pub struct RtcEngine {
    config: PeerConfig,
}

impl RtcEngine {
    pub fn new(config: PeerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Engine for RtcEngine {
    async fn allocate(&self) -> Result<Box<dyn EngineHandle>, EngineError> {
        let runtime = Handle::try_current()
            .map_err(|err| EngineError::Unavailable(format!("no tokio runtime: {err}")))?;

        let api = APIBuilder::new().build();
        let pc = Arc::new(
            api.new_peer_connection(rtc_config(&self.config))
                .await
                .map_err(|err| EngineError::Unavailable(err.to_string()))?,
        );

        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (signal_tx, signal) = watch::channel(EngineSignal::Pending);
        let signal_tx = Arc::new(signal_tx);
        let channel: ChannelSlot = Arc::new(Mutex::new(None));

        wire_peer(&pc, &runtime, signal_tx.clone());

        // the answerer receives the offerer's channel
        pc.on_data_channel(Box::new({
            let channel = channel.clone();
            let inbox_tx = inbox_tx.clone();
            let signal_tx = signal_tx.clone();
            move |dc: Arc<RTCDataChannel>| {
                info!(label = dc.label(), "remote data channel announced");
                attach_dc(&dc, channel.clone(), inbox_tx.clone(), signal_tx.clone());
                Box::pin(async {})
            }
        }));

        Ok(Box::new(RtcHandle {
            pc,
            runtime,
            channel,
            inbox_tx,
            inbox,
            signal_tx,
            signal,
            label: self.config.data_channel_label.clone(),
            gather_timeout: self.config.gather_timeout(),
        }))
    }
}

/// Connection-level callbacks: candidate logging and failure reporting.
fn wire_peer(
    pc: &Arc<RTCPeerConnection>,
    runtime: &Handle,
    signal_tx: Arc<watch::Sender<EngineSignal>>,
) {
    pc.on_ice_candidate(Box::new(|cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => dump_candidate("local", &c),
            None => debug!("ICE candidate gathering finished"),
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(|state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    // weak, so the callback does not keep the connection alive
    let pc_stats = Arc::downgrade(pc);
    let runtime = runtime.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(state = ?st, "peer connection state changed");
        match st {
            RTCPeerConnectionState::Connected => {
                if let Some(pc) = pc_stats.upgrade() {
                    runtime.spawn(async move { dump_selected_pair(&pc, "connected").await });
                }
            }
            RTCPeerConnectionState::Failed => {
                raise(&signal_tx, EngineSignal::Failed("ICE connectivity failed".into()));
            }
            RTCPeerConnectionState::Disconnected => {
                warn!("peer connection disconnected, waiting for ICE to recover");
            }
            _ => {}
        }
        Box::pin(async {})
    }));
}

pub struct RtcHandle {
    pc: Arc<RTCPeerConnection>,
    runtime: Handle,
    channel: ChannelSlot,
    inbox_tx: mpsc::UnboundedSender<String>,
    inbox: mpsc::UnboundedReceiver<String>,
    signal_tx: Arc<watch::Sender<EngineSignal>>,
    signal: watch::Receiver<EngineSignal>,
    label: String,
    gather_timeout: Duration,
}

fn transport(err: webrtc::Error) -> EngineError {
    EngineError::Transport(err.to_string())
}

#[async_trait]
impl EngineHandle for RtcHandle {
    async fn create_offer(&mut self) -> Result<String, EngineError> {
        // the channel must exist before the offer so the SDP carries it
        let dc = self
            .pc
            .create_data_channel(&self.label, Some(RTCDataChannelInit::default()))
            .await
            .map_err(transport)?;
        attach_dc(
            &dc,
            self.channel.clone(),
            self.inbox_tx.clone(),
            self.signal_tx.clone(),
        );

        let offer = self.pc.create_offer(None).await.map_err(transport)?;
        set_local_and_gather(&self.pc, offer, self.gather_timeout).await
    }

    async fn create_answer(&mut self) -> Result<String, EngineError> {
        let answer = self.pc.create_answer(None).await.map_err(transport)?;
        set_local_and_gather(&self.pc, answer, self.gather_timeout).await
    }

    async fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), EngineError> {
        let sdp = description.sdp().to_string();
        let desc = match description.kind() {
            SdpType::Offer => RTCSessionDescription::offer(sdp),
            SdpType::Answer => RTCSessionDescription::answer(sdp),
        }
        .map_err(|err| EngineError::Rejected(err.to_string()))?;

        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|err| EngineError::Rejected(err.to_string()))
    }

    async fn send_message(&mut self, text: &str) -> Result<(), EngineError> {
        let dc = { self.channel.lock().await.as_ref().cloned() };
        let Some(dc) = dc else {
            return Err(EngineError::Transport("data channel is not open".into()));
        };
        dc.send(&Bytes::from(text.as_bytes().to_vec()))
            .await
            .map(|_| ())
            .map_err(transport)
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
        let pc = self.pc;
        self.runtime.spawn(async move {
            match pc.close().await {
                Ok(()) => debug!("peer connection closed"),
                Err(err) => warn!(error = %err, "failed to close peer connection"),
            }
        });
    }
}
