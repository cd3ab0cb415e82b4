use crate::config::PeerConfig;
use crate::peer::engine::EngineError;
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use webrtc::{
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, policy::bundle_policy::RTCBundlePolicy,
        policy::rtcp_mux_policy::RTCRtcpMuxPolicy,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Builds the peer connection configuration
pub fn rtc_config(config: &PeerConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(&config.ice_servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Applies `desc` locally and waits for ICE gathering, so the returned
/// SDP carries every candidate. Copy-paste signaling has no channel for
/// trickled candidates.
///
/// Gathering past `limit` is cut short; whatever was gathered so far is
/// returned.
pub async fn set_local_and_gather(
    pc: &RTCPeerConnection,
    desc: RTCSessionDescription,
    limit: Duration,
) -> Result<String, EngineError> {
    // must subscribe before gathering starts
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(desc)
        .await
        .map_err(|err| EngineError::Transport(err.to_string()))?;

    match timeout(limit, gather_complete.recv()).await {
        Ok(_) => debug!("ICE gathering complete"),
        Err(_) => warn!(
            limit_ms = limit.as_millis() as u64,
            "ICE gathering incomplete, using candidates gathered so far"
        ),
    }

    pc.local_description()
        .await
        .map(|local| local.sdp)
        .ok_or_else(|| EngineError::Transport("local description missing after gathering".into()))
}
