use crate::error::{Error, Result};
use crate::peer::types::{Role, SdpType};
use std::fmt;

// ========== SESSION STATE ==========

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    New,
    LocalDescriptionSet(SdpType),
    RemoteDescriptionSet(SdpType),
    /// Both descriptions applied; the engine is establishing connectivity.
    Negotiating,
    Connected,
    /// The remote side closed the channel. Messages it sent before leaving
    /// can still be drained; nothing more can be sent.
    Disconnected,
    Closed,
    /// Terminal and sticky.
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Disconnected | SessionState::Closed | SessionState::Failed(_)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::New => f.write_str("new"),
            SessionState::LocalDescriptionSet(kind) => write!(f, "local-description-set ({kind})"),
            SessionState::RemoteDescriptionSet(kind) => {
                write!(f, "remote-description-set ({kind})")
            }
            SessionState::Negotiating => f.write_str("negotiating"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Closed => f.write_str("closed"),
            SessionState::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

// ========== TRANSITIONS ==========

/// Offer/answer bookkeeping for one connection.
///
/// Every engine call is bracketed: an `expect_*` check before the call,
/// and the matching `*_applied` commit once the engine accepted it. A
/// failed engine call leaves the state untouched so the caller can decide
/// between `fail` and reporting the error as-is.
#[derive(Debug, Clone)]
pub struct Negotiation {
    state: SessionState,
    role: Option<Role>,
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new()
    }
}

impl Negotiation {
    pub fn new() -> Self {
        Self {
            state: SessionState::New,
            role: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Failed is reported as itself, everything else terminal as an ordering error.
    fn guard(&self, operation: &'static str) -> Result<()> {
        match &self.state {
            SessionState::Failed(reason) => Err(Error::Failed(reason.clone())),
            SessionState::Closed | SessionState::Disconnected => Err(self.invalid(operation)),
            _ => Ok(()),
        }
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.clone(),
        }
    }

    pub fn expect_local(&self, kind: SdpType) -> Result<()> {
        let operation = match kind {
            SdpType::Offer => "create_offer",
            SdpType::Answer => "create_answer",
        };
        self.guard(operation)?;
        match (&self.state, kind) {
            (SessionState::New, SdpType::Offer) => Ok(()),
            (SessionState::RemoteDescriptionSet(SdpType::Offer), SdpType::Answer) => Ok(()),
            _ => Err(self.invalid(operation)),
        }
    }

    pub fn local_applied(&mut self, kind: SdpType) {
        match (&self.state, kind) {
            (SessionState::New, SdpType::Offer) => {
                self.state = SessionState::LocalDescriptionSet(SdpType::Offer);
                self.role = Some(Role::Offerer);
            }
            (SessionState::RemoteDescriptionSet(SdpType::Offer), SdpType::Answer) => {
                self.state = SessionState::Negotiating;
            }
            _ => {}
        }
    }

    pub fn expect_remote(&self, kind: SdpType) -> Result<()> {
        const OP: &str = "set_remote_description";
        self.guard(OP)?;
        match (&self.state, kind) {
            (SessionState::New, SdpType::Offer) => Ok(()),
            (SessionState::LocalDescriptionSet(SdpType::Offer), SdpType::Answer) => Ok(()),
            _ => Err(self.invalid(OP)),
        }
    }

    pub fn remote_applied(&mut self, kind: SdpType) {
        match (&self.state, kind) {
            (SessionState::New, SdpType::Offer) => {
                self.state = SessionState::RemoteDescriptionSet(SdpType::Offer);
                self.role = Some(Role::Answerer);
            }
            (SessionState::LocalDescriptionSet(SdpType::Offer), SdpType::Answer) => {
                self.state = SessionState::Negotiating;
            }
            _ => {}
        }
    }

    pub fn expect_connected(&self) -> Result<()> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected => Err(Error::NotConnected),
            _ => {
                self.guard("send_message")?;
                Err(Error::NotConnected)
            }
        }
    }

    /// Any live state, or a disconnected one with messages left to read;
    /// used by draining and polling.
    pub fn expect_open(&self, operation: &'static str) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        self.guard(operation)
    }

    /// Engine reported readiness. Only meaningful while negotiating.
    pub fn engine_ready(&mut self) -> bool {
        if self.state == SessionState::Negotiating {
            self.state = SessionState::Connected;
            true
        } else {
            false
        }
    }

    /// Moves to `Failed` unless already terminal. Returns the sticky error.
    pub fn fail(&mut self, reason: impl Into<String>) -> Error {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed(reason.into());
        }
        match &self.state {
            SessionState::Failed(reason) => Error::Failed(reason.clone()),
            _ => self.invalid("engine"),
        }
    }

    /// The peer went away. After `Connected` that ends the session
    /// normally; before it, negotiation has failed.
    pub fn peer_closed(&mut self) -> Option<Error> {
        match self.state {
            SessionState::Connected => {
                self.state = SessionState::Disconnected;
                None
            }
            _ if self.state.is_terminal() => None,
            _ => Some(self.fail("remote peer closed the data channel")),
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offered() -> Negotiation {
        let mut n = Negotiation::new();
        n.expect_local(SdpType::Offer).unwrap();
        n.local_applied(SdpType::Offer);
        n
    }

    #[test]
    fn offerer_path_reaches_connected() {
        let mut n = offered();
        assert_eq!(n.state(), &SessionState::LocalDescriptionSet(SdpType::Offer));
        assert_eq!(n.role(), Some(Role::Offerer));

        n.expect_remote(SdpType::Answer).unwrap();
        n.remote_applied(SdpType::Answer);
        assert_eq!(n.state(), &SessionState::Negotiating);

        assert!(matches!(n.expect_connected(), Err(Error::NotConnected)));
        assert!(n.engine_ready());
        assert_eq!(n.state(), &SessionState::Connected);
        n.expect_connected().unwrap();
    }

    #[test]
    fn answerer_path_reaches_negotiating() {
        let mut n = Negotiation::new();
        n.expect_remote(SdpType::Offer).unwrap();
        n.remote_applied(SdpType::Offer);
        assert_eq!(n.state(), &SessionState::RemoteDescriptionSet(SdpType::Offer));
        assert_eq!(n.role(), Some(Role::Answerer));

        n.expect_local(SdpType::Answer).unwrap();
        n.local_applied(SdpType::Answer);
        assert_eq!(n.state(), &SessionState::Negotiating);
    }

    #[test]
    fn second_offer_is_rejected() {
        let n = offered();
        assert!(matches!(
            n.expect_local(SdpType::Offer),
            Err(Error::InvalidState {
                operation: "create_offer",
                ..
            })
        ));
    }

    #[test]
    fn answer_requires_remote_offer() {
        let n = Negotiation::new();
        assert!(matches!(
            n.expect_local(SdpType::Answer),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            offered().expect_local(SdpType::Answer),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn remote_description_only_once() {
        let mut n = Negotiation::new();
        n.remote_applied(SdpType::Offer);
        assert!(matches!(
            n.expect_remote(SdpType::Offer),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            n.expect_remote(SdpType::Answer),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn mismatched_remote_kinds_are_rejected() {
        assert!(Negotiation::new().expect_remote(SdpType::Answer).is_err());
        assert!(offered().expect_remote(SdpType::Offer).is_err());
    }

    #[test]
    fn readiness_outside_negotiation_is_ignored() {
        let mut n = offered();
        assert!(!n.engine_ready());
        assert_eq!(n.state(), &SessionState::LocalDescriptionSet(SdpType::Offer));
    }

    #[test]
    fn failure_is_sticky() {
        let mut n = offered();
        let err = n.fail("ice failed");
        assert!(matches!(err, Error::Failed(ref r) if r == "ice failed"));

        // a second failure keeps the first reason
        n.fail("something else");
        assert_eq!(n.state(), &SessionState::Failed("ice failed".into()));

        assert!(matches!(n.expect_remote(SdpType::Answer), Err(Error::Failed(_))));
        assert!(matches!(n.expect_connected(), Err(Error::Failed(_))));
        assert!(matches!(n.expect_open("drain"), Err(Error::Failed(_))));
        assert!(!n.engine_ready());
    }

    #[test]
    fn peer_leaving_after_connect_keeps_inbox_readable() {
        let mut n = offered();
        n.remote_applied(SdpType::Answer);
        assert!(n.engine_ready());

        assert!(n.peer_closed().is_none());
        assert_eq!(n.state(), &SessionState::Disconnected);
        n.expect_open("drain_inbound_messages").unwrap();
        assert!(matches!(n.expect_connected(), Err(Error::NotConnected)));
        assert!(matches!(
            n.expect_remote(SdpType::Answer),
            Err(Error::InvalidState { .. })
        ));
        // a later failure does not replace the disconnect
        n.fail("late");
        assert_eq!(n.state(), &SessionState::Disconnected);
        n.close();
        assert_eq!(n.state(), &SessionState::Closed);
    }

    #[test]
    fn peer_leaving_during_negotiation_fails() {
        let mut n = offered();
        assert!(matches!(n.peer_closed(), Some(Error::Failed(_))));
        assert!(matches!(n.state(), SessionState::Failed(_)));
    }

    #[test]
    fn closed_rejects_everything() {
        let mut n = offered();
        n.close();
        assert!(matches!(
            n.expect_open("drain_inbound_messages"),
            Err(Error::InvalidState {
                state: SessionState::Closed,
                ..
            })
        ));
        assert!(matches!(n.expect_connected(), Err(Error::InvalidState { .. })));
        // close wins over a late failure
        assert!(matches!(n.fail("late"), Error::InvalidState { .. }));
        assert_eq!(n.state(), &SessionState::Closed);
    }
}
