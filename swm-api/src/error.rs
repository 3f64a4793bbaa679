//! The abstract error kinds from the error handling design, plus the
//! `MuxError` type carrying one around the core, and the wire `ErrorPayload`
//! a client sees in a `Response`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kinds a client-visible response can carry, or that a handler can
/// fail with before it's translated into a wire response.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    UnknownSubAccount,
    DuplicateKey,
    InsufficientBalance,
    InvalidTransition,
    InvoiceAmountMissing,
    UpstreamFailure,
    Timeout,
    AuthFailure,
    TransportDropped,
}

#[derive(Clone, Debug, Error, Eq, PartialEq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct MuxError {
    pub kind: ErrorKind,
    pub message: String,
}

impl MuxError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn insufficient_balance(have: u64, need: u64) -> Self {
        Self::new(
            ErrorKind::InsufficientBalance,
            format!("balance {have} msats is less than the required {need} msats"),
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn upstream_failure(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::UpstreamFailure, format!("{message:#}"))
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(ErrorKind::Timeout, format!("{operation} timed out"))
    }
}

/// The error shape embedded in a [`crate::protocol::Response`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorKind,
    pub message: String,
}

impl From<MuxError> for ErrorPayload {
    fn from(e: MuxError) -> Self {
        Self {
            code: e.kind,
            message: e.message,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_kind_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InsufficientBalance).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_BALANCE\"");
    }
}
