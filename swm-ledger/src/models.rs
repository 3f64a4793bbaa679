use serde::{Deserialize, Serialize};
use swm_api::{ClientPubkey, ServicePubkey};
use swm_common::TimestampMs;

/// Accounting and identity for one virtual sub-wallet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubAccount {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
    pub relays: Vec<String>,
    pub service_pubkey: ServicePubkey,
    /// Ciphertext envelope (see `swm_vault`); decrypt with the process vault.
    pub service_secret_ciphertext: Vec<u8>,
    pub client_pubkey: ClientPubkey,
    pub client_secret_ciphertext: Vec<u8>,
    pub balance_msats: i64,
    pub pending_msats: i64,
    pub metadata: Option<serde_json::Value>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
    pub last_used_at: Option<TimestampMs>,
    pub usage_count: i64,
}

/// Plaintext secrets returned exactly once, at creation time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubAccountSecrets {
    pub service_secret: [u8; 32],
    pub client_secret: [u8; 32],
}

/// Input to `create_sub_account`. Secrets are optional; the ledger generates
/// them when absent.
#[derive(Clone, Debug, Default)]
pub struct CreateSubAccountInput {
    pub label: String,
    pub description: Option<String>,
    pub relays: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub service_secret: Option<[u8; 32]>,
    pub client_secret: Option<[u8; 32]>,
}

/// The lifecycle states a [`PendingInvoice`] can occupy. Only
/// `pending -> {settled, failed, expired}` transitions are legal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Pending,
    Settled,
    Failed,
    Expired,
}

impl InvoiceState {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "settled" => Some(Self::Settled),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// An invoice issued on a sub-wallet's behalf, awaiting upstream settlement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingInvoice {
    pub id: String,
    pub sub_account_id: String,
    pub invoice: Option<String>,
    pub payment_hash: Option<String>,
    pub description_hash: Option<String>,
    pub amount_msats: i64,
    pub state: InvoiceState,
    pub expires_at: Option<i64>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
    pub settled_at: Option<TimestampMs>,
    pub raw: Option<serde_json::Value>,
}

/// Input to `register_pending_invoice`.
#[derive(Clone, Debug, Default)]
pub struct RegisterPendingInvoiceInput {
    pub sub_account_id: String,
    pub invoice: Option<String>,
    pub payment_hash: Option<String>,
    pub description_hash: Option<String>,
    pub amount_msats: i64,
    pub expires_at: Option<i64>,
    pub raw: Option<serde_json::Value>,
}

/// A lookup filter for `find_pending_invoice`: matches on any of the three
/// fields, preferring `payment_hash` over `invoice` over `description_hash`
/// (this same preference order is used by the settlement correlator).
#[derive(Clone, Debug, Default)]
pub struct FindPendingInvoiceFilter {
    pub payment_hash: Option<String>,
    pub invoice: Option<String>,
    pub description_hash: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct TouchSubAccountInput {
    pub increment_usage: bool,
    pub update_last_used: bool,
}
