//! Tagged text form of a session description, and the media it travels
//! through.
//!
//! ```text
//! OFFER:
//! v=0
//! o=- 4215775240449105457 2 IN IP4 0.0.0.0
//! ...
//! ```
//!
//! The tag says which half of the exchange the body is. The body is either
//! the raw SDP ([`TransferEncoding::Plain`]) or base64 of a gzipped JSON
//! [`SdpPayload`] ([`TransferEncoding::Compact`]), which survives chat
//! clients and QR codes better.

use crate::error::{Error, Result};
use crate::peer::types::{SdpType, SessionDescription};
use crate::utils::random_id;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Decompressed payloads above this size are rejected (zip-bomb guard).
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferEncoding {
    #[default]
    Plain,
    Compact,
}

/// JSON body of a compact payload
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SdpPayload {
    pub sdp: String,
    pub id: String,
    pub ts: i64,
}

/// A parsed transfer payload. Plain payloads carry no metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub description: SessionDescription,
    pub session_id: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Starts a new exchange.
    pub fn new(description: SessionDescription) -> Self {
        Self {
            description,
            session_id: Some(random_id()),
            issued_at: Some(Utc::now()),
        }
    }

    /// Answers an exchange, echoing its session id.
    pub fn reply(description: SessionDescription, session_id: Option<String>) -> Self {
        Self {
            description,
            session_id: session_id.or_else(|| Some(random_id())),
            issued_at: Some(Utc::now()),
        }
    }
}

pub fn encode(description: &SessionDescription, encoding: TransferEncoding) -> Result<String> {
    encode_envelope(&Envelope::new(description.clone()), encoding)
}

/// Only SDP starting at its `v=` line is encoded; anything else could not
/// be told apart from a compact body on the way back.
pub fn encode_envelope(envelope: &Envelope, encoding: TransferEncoding) -> Result<String> {
    let description = &envelope.description;
    if !description.sdp().starts_with("v=") {
        return Err(Error::MalformedDescription(format!(
            "{} does not start with a v= line",
            description.kind()
        )));
    }
    let body = match encoding {
        TransferEncoding::Plain => description.sdp().to_string(),
        TransferEncoding::Compact => {
            let payload = SdpPayload {
                sdp: description.sdp().to_string(),
                id: envelope.session_id.clone().unwrap_or_else(random_id),
                ts: envelope.issued_at.unwrap_or_else(Utc::now).timestamp(),
            };
            compress(&payload)?
        }
    };
    Ok(format!("{}\n{}", description.kind().tag(), body))
}

pub fn parse(text: &str) -> Result<SessionDescription> {
    parse_envelope(text).map(|envelope| envelope.description)
}

pub fn parse_envelope(text: &str) -> Result<Envelope> {
    let text = text.trim_start_matches('\u{feff}').trim_start();
    let (kind, rest) = if let Some(rest) = text.strip_prefix(SdpType::Offer.tag()) {
        (SdpType::Offer, rest)
    } else if let Some(rest) = text.strip_prefix(SdpType::Answer.tag()) {
        (SdpType::Answer, rest)
    } else {
        let preview: String = text.chars().take(16).collect();
        return Err(Error::UnrecognizedPayload(format!(
            "expected OFFER: or ANSWER: tag, found {preview:?}"
        )));
    };

    // exactly one separator line; the SDP itself is kept verbatim
    let body = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);
    if body.trim().is_empty() {
        return Err(Error::MalformedDescription(format!("{kind} payload is empty")));
    }

    let sdp_start = body.trim_start();
    if sdp_start.starts_with("v=") {
        return Ok(Envelope {
            description: SessionDescription::new(kind, sdp_start),
            session_id: None,
            issued_at: None,
        });
    }

    let payload = decompress(body)?;
    Ok(Envelope {
        description: SessionDescription::new(kind, payload.sdp),
        session_id: Some(payload.id),
        issued_at: Utc.timestamp_opt(payload.ts, 0).single(),
    })
}

fn compress(payload: &SdpPayload) -> Result<String> {
    let json = serde_json::to_vec(payload)
        .map_err(|err| Error::MalformedDescription(format!("cannot serialize payload: {err}")))?;
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json)?;
    let compressed = gz.finish()?;
    Ok(general_purpose::STANDARD.encode(compressed))
}

fn decompress(body: &str) -> Result<SdpPayload> {
    // line wrapping from chat clients is tolerated
    let compact: String = body.split_whitespace().collect();
    let compressed = general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| Error::MalformedDescription(format!("neither SDP nor base64: {err}")))?;

    let mut json = Vec::new();
    GzDecoder::new(&compressed[..])
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut json)
        .map_err(|err| Error::MalformedDescription(format!("bad compressed payload: {err}")))?;
    if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(Error::MalformedDescription(
            "compressed payload exceeds 256 KiB".into(),
        ));
    }

    let payload: SdpPayload = serde_json::from_slice(&json)
        .map_err(|err| Error::MalformedDescription(format!("bad payload JSON: {err}")))?;
    if !payload.sdp.starts_with("v=") {
        return Err(Error::MalformedDescription("payload does not hold SDP".into()));
    }
    Ok(payload)
}

// ========  TRANSFER MEDIA  =========

/// Out-of-band channel that carries tagged payloads between users.
pub trait TransferMedium: Send {
    fn publish(&mut self, payload: &str) -> Result<()>;

    /// Current payload from the peer, if any. Does not consume it.
    fn fetch(&mut self) -> Result<Option<String>>;
}

/// Clipboard stand-in: clones share one slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, payload: impl Into<String>) {
        *self.slot.lock() = Some(payload.into());
    }

    pub fn contents(&self) -> Option<String> {
        self.slot.lock().clone()
    }
}

impl TransferMedium for MemoryMedium {
    fn publish(&mut self, payload: &str) -> Result<()> {
        self.set(payload);
        Ok(())
    }

    fn fetch(&mut self) -> Result<Option<String>> {
        Ok(self.contents())
    }
}

/// Writes to one file and reads the peer's payload from another.
#[derive(Debug, Clone)]
pub struct FileMedium {
    outbox: PathBuf,
    inbox: PathBuf,
}

impl FileMedium {
    pub fn new(outbox: impl Into<PathBuf>, inbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
            inbox: inbox.into(),
        }
    }

    /// Removes leftovers from a previous exchange.
    pub fn clear(&self) -> Result<()> {
        for path in [&self.outbox, &self.inbox] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl TransferMedium for FileMedium {
    /// Written beside the outbox and renamed into place, so a polling peer
    /// never reads half a payload.
    fn publish(&mut self, payload: &str) -> Result<()> {
        let staging = self.outbox.with_extension("partial");
        std::fs::write(&staging, payload)?;
        std::fs::rename(&staging, &self.outbox)?;
        Ok(())
    }

    fn fetch(&mut self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.inbox) {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
