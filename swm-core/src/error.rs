//! Handler-level errors, mapped to the abstract error kinds of `swm-api` so
//! they can be surfaced to a client as a wallet-protocol error response.

use swm_api::{ErrorKind, MuxError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unknown sub-wallet")]
    UnknownSubAccount,
    #[error("{0}")]
    InvalidInput(String),
    #[error("pay_invoice called without a resolvable amount")]
    MissingAmount,
    #[error(transparent)]
    Ledger(#[from] swm_ledger::LedgerError),
    #[error(transparent)]
    Upstream(#[from] swm_upstream::UpstreamError),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error(transparent)]
    Vault(#[from] swm_vault::VaultError),
}

impl HandlerError {
    pub fn to_mux_error(&self) -> MuxError {
        let kind = match self {
            Self::UnknownSubAccount => ErrorKind::UnknownSubAccount,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::MissingAmount => ErrorKind::InvoiceAmountMissing,
            Self::Ledger(e) => e.kind(),
            Self::Upstream(_) => ErrorKind::UpstreamFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Vault(_) => ErrorKind::AuthFailure,
        };
        MuxError::new(kind, self.to_string())
    }
}
