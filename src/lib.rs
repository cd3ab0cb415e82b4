//! Two-party WebRTC data channel whose signaling is done by hand: each
//! side copies a tagged session description to the other through any
//! out-of-band medium (clipboard, chat, shared file).

pub mod config;
pub mod error;
pub mod ffi;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use error::{Error, Result};
pub use peer::{Connection, LoopbackEngine, RtcEngine, SessionState};
pub use session::{SessionController, SessionStatus};
pub use signaling::{TransferEncoding, TransferMedium};
