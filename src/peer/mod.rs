pub mod connection;
pub mod data_channel;
pub mod engine;
pub mod ice;
pub mod loopback;
pub mod rtc;
pub mod state;
pub mod types;

pub use connection::Connection;
pub use engine::{Engine, EngineError, EngineHandle, EngineSignal};
pub use loopback::LoopbackEngine;
pub use rtc::RtcEngine;
pub use state::{Negotiation, SessionState};
pub use types::{Role, SdpType, ServerConfig, SessionDescription};
