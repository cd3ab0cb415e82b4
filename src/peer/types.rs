use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Which half of the offer/answer exchange a description is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    /// Discriminator used in the transfer text (`OFFER:` / `ANSWER:`).
    pub fn tag(self) -> &'static str {
        match self {
            SdpType::Offer => "OFFER:",
            SdpType::Answer => "ANSWER:",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// Immutable SDP text tagged as offer or answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    kind: SdpType,
    sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Answer, sdp)
    }

    pub fn kind(&self) -> SdpType {
        self.kind
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    /// Short SHA-256 digest of the SDP, grouped for reading aloud.
    /// Both users compare it to confirm the paste arrived intact.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.sdp.as_bytes());
        hex::encode(&digest[..8])
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Side of the exchange, fixed by the first action on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Offerer => f.write_str("offerer"),
            Role::Answerer => f.write_str("answerer"),
        }
    }
}

/// ICE server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }
}
