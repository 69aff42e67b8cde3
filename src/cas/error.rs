use thiserror::Error;

use crate::cas::validation::FailureKind;

/// Failure taxonomy for the CAS protocol exchange.
///
/// The first four variants mirror the protocol's `authenticationFailure`
/// codes; the rest cover the callback handshake, transport, and
/// caller-contract violations raised before any I/O.
#[derive(Debug, Error)]
pub enum CasError {
    #[error("invalid request: {0}")]
    RequestInvalid(String),
    #[error("invalid ticket: {0}")]
    TicketInvalid(String),
    #[error("invalid service: {0}")]
    ServiceInvalid(String),
    #[error("authentication failure: {0}")]
    Authentication(String),
    #[error("missing proxy-granting ticket: CAS was probably unable to reach the pgtUrl callback")]
    MissingPgt,
    #[error("CAS server unavailable: HTTP {status}")]
    ServerUnavailable { status: u16, body: String },
    #[error("invalid call: {0}")]
    InvalidCall(&'static str),
    #[error("malformed URL: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl CasError {
    /// Lift an in-band validation failure onto the error channel, for the
    /// flows that do not recover from it.
    #[must_use]
    pub fn from_failure(kind: FailureKind, message: String) -> Self {
        match kind {
            FailureKind::InvalidRequest => Self::RequestInvalid(message),
            FailureKind::InvalidTicket => Self::TicketInvalid(message),
            FailureKind::InvalidService => Self::ServiceInvalid(message),
            FailureKind::Other => Self::Authentication(message),
        }
    }
}
