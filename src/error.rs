//! Error types shared by the connection, the codec and the controller.

use thiserror::Error;

use crate::peer::state::SessionState;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The engine could not allocate a connection resource.
    #[error("peer connection engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Operation attempted out of order.
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Description text rejected by the codec or the engine.
    #[error("malformed session description: {0}")]
    MalformedDescription(String),

    #[error("peer connection is not connected")]
    NotConnected,

    /// Transfer text without an `OFFER:`/`ANSWER:` tag, or with the wrong one.
    #[error("unrecognized signaling payload: {0}")]
    UnrecognizedPayload(String),

    /// Sticky engine failure; the connection must be discarded.
    #[error("peer connection failed: {0}")]
    Failed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Stable status code for the C ABI. Success is `0`.
    pub fn code(&self) -> i32 {
        match self {
            Self::EngineUnavailable(_) => -1,
            Self::InvalidState { .. } => -2,
            Self::MalformedDescription(_) => -3,
            Self::NotConnected => -4,
            Self::UnrecognizedPayload(_) => -5,
            Self::Failed(_) => -6,
            Self::Config(_) => -7,
            Self::Io(_) => -8,
        }
    }
}
