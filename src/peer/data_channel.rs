use crate::peer::engine::{raise, EngineSignal};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use webrtc::data_channel::{data_channel_message::DataChannelMessage, RTCDataChannel};

/// Shared slot for the single chat channel. The offerer fills it when it
/// creates the channel, the answerer when the remote channel arrives.
pub type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// Common data-channel wiring for both roles
pub fn attach_dc(
    dc: &Arc<RTCDataChannel>,
    slot: ChannelSlot,
    inbox: mpsc::UnboundedSender<String>,
    signal: Arc<watch::Sender<EngineSignal>>,
) {
    debug!(label = dc.label(), "attaching data channel");

    dc.on_open(Box::new({
        let dc = dc.clone();
        let signal = signal.clone();
        move || {
            let dc = dc.clone();
            let slot = slot.clone();
            let signal = signal.clone();
            Box::pin(async move {
                info!(label = dc.label(), "data channel open");
                *slot.lock().await = Some(dc);
                raise(&signal, EngineSignal::Ready);
            })
        }
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        match String::from_utf8(msg.data.to_vec()) {
            Ok(text) => {
                debug!(len = text.len(), "received message");
                if inbox.send(text).is_err() {
                    debug!("inbox dropped, discarding message");
                }
            }
            Err(_) => warn!(len = msg.data.len(), "discarding non-UTF-8 message"),
        }
        Box::pin(async {})
    }));

    dc.on_close(Box::new(move || {
        info!("data channel closed");
        raise(&signal, EngineSignal::Closed);
        Box::pin(async {})
    }));
}
