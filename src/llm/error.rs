//! Completion service error types.

use thiserror::Error;

/// Broad classification of a completion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429 from the backend
    RateLimited,
    /// 5xx from the backend
    ServerError,
    /// 4xx other than 429 (bad request, auth, unknown model)
    ClientError,
    /// Connection failure or timeout before a response arrived
    Network,
    /// Response arrived but could not be decoded
    Parse,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Network => "network_error",
            Self::Parse => "parse_error",
        };
        write!(f, "{}", s)
    }
}

/// Error returned by a completion client.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl LlmError {
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::Network,
            status: None,
            message: message.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::Parse,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: classify_http_status(status),
            status: Some(status),
            message: body.into(),
        }
    }
}

/// Classify an HTTP status code returned by the completion backend.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        500..=599 => LlmErrorKind::ServerError,
        _ => LlmErrorKind::ClientError,
    }
}
