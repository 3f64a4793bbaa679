use swm_api::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: i64, need: i64 },
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateKey(_) => ErrorKind::DuplicateKey,
            Self::InvalidSecret(_) => ErrorKind::InvalidInput,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::NotFound(_) => ErrorKind::UnknownSubAccount,
            Self::Sqlite(_) => ErrorKind::TransportDropped,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
