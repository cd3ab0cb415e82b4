use crate::config::PeerConfig;
use crate::error::{Error, Result};
use crate::peer::{Connection, Engine, Role, SdpType, SessionState};
use crate::signaling::{self, Envelope, TransferEncoding, TransferMedium};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What the user is shown about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    CreatingOffer,
    OfferPublished { fingerprint: String },
    NoOfferAvailable,
    CreatingAnswer,
    AnswerPublished { fingerprint: String },
    NoAnswerAvailable,
    Connecting,
    Connected,
    PeerLeft,
    Closed,
    Error(String),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => f.write_str("Idle"),
            SessionStatus::CreatingOffer => f.write_str("Creating offer..."),
            SessionStatus::OfferPublished { fingerprint } => {
                write!(f, "Offer ready to share ({fingerprint})")
            }
            SessionStatus::NoOfferAvailable => f.write_str("No offer available"),
            SessionStatus::CreatingAnswer => f.write_str("Creating answer..."),
            SessionStatus::AnswerPublished { fingerprint } => {
                write!(f, "Answer ready to share ({fingerprint}), waiting for connection...")
            }
            SessionStatus::NoAnswerAvailable => f.write_str("No answer available"),
            SessionStatus::Connecting => f.write_str("Connecting..."),
            SessionStatus::Connected => f.write_str("Connected!"),
            SessionStatus::PeerLeft => f.write_str("Peer left the session"),
            SessionStatus::Closed => f.write_str("Closed"),
            SessionStatus::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// Drives the manual signaling flow for one user.
///
/// The offering side calls [`create_offer_text`](Self::create_offer_text),
/// hands the text to the peer, then feeds the reply to
/// [`accept_answer_text`](Self::accept_answer_text). The answering side
/// calls [`accept_offer_text`](Self::accept_offer_text) and hands back
/// what it returns. Both then [`wait_connected`](Self::wait_connected).
/// [`create_offer`](Self::create_offer), [`process_offer`](Self::process_offer)
/// and [`process_answer`](Self::process_answer) do the same through a
/// [`TransferMedium`].
pub struct SessionController {
    engine: Arc<dyn Engine>,
    connection: Option<Connection>,
    encoding: TransferEncoding,
    connect_timeout: Duration,
    status: SessionStatus,
    connected: bool,
    messages: Vec<String>,
    /// Session id of the outstanding exchange, from compact payloads.
    exchange_id: Option<String>,
    local_payload: Option<String>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn Engine>, config: &PeerConfig) -> Self {
        Self {
            engine,
            connection: None,
            encoding: config.encoding,
            connect_timeout: config.connect_timeout(),
            status: SessionStatus::Idle,
            connected: false,
            messages: Vec::new(),
            exchange_id: None,
            local_payload: None,
        }
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Transcript of every message received so far.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Last tagged payload this side produced.
    pub fn local_payload(&self) -> Option<&str> {
        self.local_payload.as_deref()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub async fn role(&self) -> Option<Role> {
        match &self.connection {
            Some(connection) => connection.role().await,
            None => None,
        }
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            warn!(error = %err, "session step failed");
            self.status = SessionStatus::Error(err.to_string());
        }
        result
    }

    /// Discards any previous connection and allocates a fresh one.
    async fn fresh_connection(&mut self) -> Result<&Connection> {
        if let Some(old) = self.connection.take() {
            old.close().await;
        }
        self.connected = false;
        self.exchange_id = None;
        self.local_payload = None;
        let connection = Connection::create(self.engine.as_ref()).await?;
        Ok(self.connection.insert(connection))
    }

    fn publish_local(&mut self, envelope: Envelope) -> Result<String> {
        let payload = signaling::encode_envelope(&envelope, self.encoding)?;
        self.exchange_id = envelope.session_id;
        self.local_payload = Some(payload.clone());
        Ok(payload)
    }

    /// Starts an exchange as the offerer. Returns the tagged offer.
    pub async fn create_offer_text(&mut self) -> Result<String> {
        self.status = SessionStatus::CreatingOffer;
        let result = self.create_offer_inner().await;
        self.record(result)
    }

    async fn create_offer_inner(&mut self) -> Result<String> {
        let offer = self.fresh_connection().await?.create_offer().await?;
        let fingerprint = offer.fingerprint();
        let payload = self.publish_local(Envelope::new(offer))?;
        info!(%fingerprint, "offer created");
        self.status = SessionStatus::OfferPublished { fingerprint };
        Ok(payload)
    }

    /// Answers a peer's tagged offer. Returns the tagged answer.
    pub async fn accept_offer_text(&mut self, text: &str) -> Result<String> {
        let envelope = match expect_kind(text, SdpType::Offer) {
            Ok(envelope) => envelope,
            Err(err @ Error::UnrecognizedPayload(_)) => {
                warn!(error = %err, "no offer in payload");
                self.status = SessionStatus::NoOfferAvailable;
                return Err(err);
            }
            Err(err) => return self.record(Err(err)),
        };
        self.status = SessionStatus::CreatingAnswer;
        let result = self.accept_offer_inner(envelope).await;
        self.record(result)
    }

    async fn accept_offer_inner(&mut self, envelope: Envelope) -> Result<String> {
        info!(
            fingerprint = %envelope.description.fingerprint(),
            session = ?envelope.session_id,
            "accepting offer"
        );
        let connection = self.fresh_connection().await?;
        connection
            .set_remote_description(envelope.description)
            .await?;
        let answer = connection.create_answer().await?;
        let fingerprint = answer.fingerprint();
        let payload = self.publish_local(Envelope::reply(answer, envelope.session_id))?;
        self.status = SessionStatus::AnswerPublished { fingerprint };
        Ok(payload)
    }

    /// Completes the exchange on the offering side.
    pub async fn accept_answer_text(&mut self, text: &str) -> Result<()> {
        let envelope = match expect_kind(text, SdpType::Answer) {
            Ok(envelope) => envelope,
            Err(err @ Error::UnrecognizedPayload(_)) => {
                warn!(error = %err, "no answer in payload");
                self.status = SessionStatus::NoAnswerAvailable;
                return Err(err);
            }
            Err(err) => return self.record(Err(err)),
        };
        let result = self.accept_answer_inner(envelope).await;
        self.record(result)
    }

    async fn accept_answer_inner(&mut self, envelope: Envelope) -> Result<()> {
        let Some(connection) = self.connection.as_ref() else {
            return Err(Error::InvalidState {
                operation: "accept_answer",
                state: SessionState::New,
            });
        };
        if let (Some(ours), Some(theirs)) = (&self.exchange_id, &envelope.session_id) {
            if ours != theirs {
                warn!(%ours, %theirs, "answer belongs to a different exchange");
            }
        }
        info!(fingerprint = %envelope.description.fingerprint(), "accepting answer");
        connection
            .set_remote_description(envelope.description)
            .await?;
        self.status = SessionStatus::Connecting;
        Ok(())
    }

    pub async fn create_offer(&mut self, medium: &mut dyn TransferMedium) -> Result<()> {
        let payload = self.create_offer_text().await?;
        let published = medium.publish(&payload);
        self.record(published)
    }

    pub async fn process_offer(&mut self, medium: &mut dyn TransferMedium) -> Result<()> {
        let Some(text) = self.fetch(medium, SessionStatus::NoOfferAvailable)? else {
            return Err(Error::UnrecognizedPayload("transfer medium is empty".into()));
        };
        let payload = self.accept_offer_text(&text).await?;
        let published = medium.publish(&payload);
        self.record(published)
    }

    pub async fn process_answer(&mut self, medium: &mut dyn TransferMedium) -> Result<()> {
        let Some(text) = self.fetch(medium, SessionStatus::NoAnswerAvailable)? else {
            return Err(Error::UnrecognizedPayload("transfer medium is empty".into()));
        };
        self.accept_answer_text(&text).await
    }

    fn fetch(
        &mut self,
        medium: &mut dyn TransferMedium,
        when_empty: SessionStatus,
    ) -> Result<Option<String>> {
        let fetched = medium.fetch();
        let text = self.record(fetched)?;
        if text.is_none() {
            self.status = when_empty;
        }
        Ok(text)
    }

    /// Waits for the engine's readiness notification, bounded by the
    /// configured connect timeout.
    pub async fn wait_connected(&mut self) -> Result<()> {
        let result = match &self.connection {
            Some(connection) => connection.wait_connected(self.connect_timeout).await,
            None => Err(Error::NotConnected),
        };
        let result = self.record(result);
        if result.is_ok() {
            self.mark_connected();
        }
        result
    }

    /// Non-blocking readiness check for UI timers.
    pub async fn poll(&mut self) -> Result<bool> {
        let Some(connection) = &self.connection else {
            return Ok(false);
        };
        match connection.state().await {
            SessionState::Connected => {
                self.mark_connected();
            }
            SessionState::Disconnected => {
                if self.connected {
                    info!("peer left the session");
                }
                self.connected = false;
                self.status = SessionStatus::PeerLeft;
            }
            SessionState::Failed(reason) => {
                self.connected = false;
                return self.record(Err(Error::Failed(reason)));
            }
            _ => {}
        }
        Ok(self.connected)
    }

    fn mark_connected(&mut self) {
        if !self.connected {
            info!("session connected");
        }
        self.connected = true;
        self.status = SessionStatus::Connected;
    }

    pub async fn send_message(&mut self, text: &str) -> Result<()> {
        let result = match &self.connection {
            Some(connection) => connection.send_message(text).await,
            None => Err(Error::NotConnected),
        };
        self.record(result)
    }

    /// Moves newly received messages into the transcript.
    pub async fn refresh_messages(&mut self) -> Result<&[String]> {
        let Some(connection) = &self.connection else {
            return Ok(&self.messages);
        };
        let drained = connection.drain_inbound_messages().await;
        let drained = self.record(drained)?;
        self.messages.extend(drained);
        Ok(&self.messages)
    }

    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.connected = false;
        self.status = SessionStatus::Closed;
    }
}

fn expect_kind(text: &str, kind: SdpType) -> Result<Envelope> {
    let envelope = signaling::parse_envelope(text)?;
    if envelope.description.kind() != kind {
        return Err(Error::UnrecognizedPayload(format!(
            "expected an {kind}, found an {}",
            envelope.description.kind()
        )));
    }
    Ok(envelope)
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("status", &self.status)
            .field("connected", &self.connected)
            .field("messages", &self.messages.len())
            .finish()
    }
}

