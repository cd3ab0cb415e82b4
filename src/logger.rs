use crate::config::{default_log_filter, LOG_ENV};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;

/// Installs the global fmt subscriber.
///
/// Filter precedence: `filter` argument, then `PASTELINK_LOG`, then the
/// build-profile default. Calling it again is a no-op.
pub fn init(filter: Option<&str>) {
    let filter = filter
        .map(str::to_owned)
        .or_else(|| std::env::var(LOG_ENV).ok())
        .unwrap_or_else(|| default_log_filter().to_owned());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .try_init();
}

/// Logs a gathered ICE candidate
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            label,
            candidate = %init.candidate,
            sdp_mid = ?init.sdp_mid,
            sdp_mline_index = ?init.sdp_mline_index,
            "ICE candidate"
        );
    }
}

/// getStats snapshot, nominated pair only
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                debug!(
                    moment,
                    local = %pair.local_candidate_id,
                    remote = %pair.remote_candidate_id,
                    bytes_sent = %pair.bytes_sent,
                    bytes_received = %pair.bytes_received,
                    state = ?pair.state,
                    "selected candidate pair"
                );
            }
        }
    }
}
