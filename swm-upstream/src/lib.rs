//! The upstream wallet adapter (C6): a narrow, transport-agnostic interface
//! to the single real Lightning wallet this process owns, plus a
//! deterministic in-memory implementation for tests.
//!
//! A thin `#[async_trait]` interface with exactly one real implementation
//! elsewhere and one in-memory mock here, so the rest of the crate never
//! has to special-case "are we in a test."

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream wallet unreachable: {0}")]
    Unreachable(String),
    #[error("upstream rejected the request: {0}")]
    Rejected(String),
    #[error("unknown payment hash or invoice")]
    NotFound,
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpstreamInfo {
    pub alias: String,
    pub pubkey: String,
    pub network: String,
    pub block_height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MakeInvoiceArgs {
    pub amount_msats: u64,
    pub description: Option<String>,
    pub description_hash: Option<String>,
    pub expiry_secs: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MakeInvoiceResult {
    pub invoice: String,
    pub payment_hash: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UpstreamInvoiceStatus {
    Pending,
    Settled,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupInvoiceResult {
    pub payment_hash: String,
    pub status: UpstreamInvoiceStatus,
    pub settled_at_unix: Option<i64>,
    pub amount_received_msats: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayInvoiceResult {
    pub payment_hash: String,
    pub fee_msats: u64,
}

/// A single payment the mock delivers once, mirroring the real wallet's
/// event stream of inbound settlements the correlator polls or subscribes to.
#[derive(Clone, Debug, PartialEq)]
pub struct PaymentReceivedNotification {
    pub payment_hash: String,
    pub amount_received_msats: u64,
}

/// The one upstream Lightning wallet connection this process owns. Every
/// sub-wallet's requests are ultimately served by the same `UpstreamWallet`.
#[async_trait]
pub trait UpstreamWallet: Send + Sync + 'static {
    async fn get_info(&self) -> UpstreamResult<UpstreamInfo>;

    async fn make_invoice(
        &self,
        args: MakeInvoiceArgs,
    ) -> UpstreamResult<MakeInvoiceResult>;

    async fn pay_invoice(&self, invoice: &str) -> UpstreamResult<PayInvoiceResult>;

    async fn lookup_invoice(
        &self,
        payment_hash: Option<&str>,
        invoice: Option<&str>,
    ) -> UpstreamResult<LookupInvoiceResult>;

    /// Whether `subscribe_payments` yields real notifications. A wallet
    /// backend without a push channel still works correctly with C7's
    /// fallback polling loop, just with higher settlement latency.
    fn supports_notifications(&self) -> bool;

    /// Hands back a receiver the correlator can drain for newly-settled
    /// inbound payments. Returns `None` if `supports_notifications` is false.
    fn subscribe_payments(&self) -> Option<mpsc::Receiver<PaymentReceivedNotification>>;
}

/// A deterministic, in-memory [`UpstreamWallet`] for tests. Every invoice is
/// "received" the moment `settle` is called on it by the test driver, never
/// on its own, so tests control timing precisely.
pub struct MockUpstreamWallet {
    inner: Mutex<MockState>,
    notify_tx: mpsc::Sender<PaymentReceivedNotification>,
    notify_rx: Mutex<Option<mpsc::Receiver<PaymentReceivedNotification>>>,
}

struct MockState {
    next_invoice_id: u64,
    invoices: HashMap<String, MockInvoice>,
    pay_outcomes: HashMap<String, UpstreamResult<PayInvoiceResult>>,
}

#[derive(Clone)]
struct MockInvoice {
    invoice: String,
    amount_msats: u64,
    status: UpstreamInvoiceStatus,
    settled_at_unix: Option<i64>,
}

impl Default for MockUpstreamWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUpstreamWallet {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = mpsc::channel(64);
        Self {
            inner: Mutex::new(MockState {
                next_invoice_id: 0,
                invoices: HashMap::new(),
                pay_outcomes: HashMap::new(),
            }),
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
        }
    }

    /// Test-only: marks a previously-issued invoice settled and pushes a
    /// notification, simulating an inbound payment landing upstream.
    pub fn settle(&self, payment_hash: &str, settled_at_unix: i64) {
        let amount = {
            let mut state = self.inner.lock().unwrap();
            let invoice = state
                .invoices
                .get_mut(payment_hash)
                .expect("settle called on unknown invoice");
            invoice.status = UpstreamInvoiceStatus::Settled;
            invoice.settled_at_unix = Some(settled_at_unix);
            invoice.amount_msats
        };
        let _ = self.notify_tx.try_send(PaymentReceivedNotification {
            payment_hash: payment_hash.to_string(),
            amount_received_msats: amount,
        });
    }

    /// Test-only: marks a previously-issued invoice failed (e.g. a routing
    /// failure the backend reports asynchronously), without pushing a
    /// notification — only settlement has a push path upstream.
    pub fn fail(&self, payment_hash: &str) {
        let mut state = self.inner.lock().unwrap();
        let invoice = state
            .invoices
            .get_mut(payment_hash)
            .expect("fail called on unknown invoice");
        invoice.status = UpstreamInvoiceStatus::Failed;
    }

    /// Test-only: pre-programs the outcome of the next `pay_invoice` call for
    /// a given invoice string, so tests can exercise upstream failures.
    pub fn program_pay_outcome(
        &self,
        invoice: &str,
        outcome: UpstreamResult<PayInvoiceResult>,
    ) {
        self.inner
            .lock()
            .unwrap()
            .pay_outcomes
            .insert(invoice.to_string(), outcome);
    }
}

#[async_trait]
impl UpstreamWallet for MockUpstreamWallet {
    async fn get_info(&self) -> UpstreamResult<UpstreamInfo> {
        Ok(UpstreamInfo {
            alias: "mock-upstream".to_string(),
            pubkey: "02".to_string() + &"ab".repeat(32),
            network: "regtest".to_string(),
            block_height: 0,
        })
    }

    async fn make_invoice(
        &self,
        args: MakeInvoiceArgs,
    ) -> UpstreamResult<MakeInvoiceResult> {
        let mut state = self.inner.lock().unwrap();
        state.next_invoice_id += 1;
        let id = state.next_invoice_id;
        let digest = ring::digest::digest(
            &ring::digest::SHA256,
            format!("mock-invoice-{id}").as_bytes(),
        );
        let payment_hash = hex::encode(digest.as_ref());
        let invoice = format!("lnmock1{payment_hash}{}", args.amount_msats);

        state.invoices.insert(
            payment_hash.clone(),
            MockInvoice {
                invoice: invoice.clone(),
                amount_msats: args.amount_msats,
                status: UpstreamInvoiceStatus::Pending,
                settled_at_unix: None,
            },
        );

        Ok(MakeInvoiceResult {
            invoice,
            payment_hash,
        })
    }

    async fn pay_invoice(&self, invoice: &str) -> UpstreamResult<PayInvoiceResult> {
        let mut state = self.inner.lock().unwrap();
        if let Some(outcome) = state.pay_outcomes.remove(invoice) {
            return outcome;
        }
        let digest = ring::digest::digest(&ring::digest::SHA256, invoice.as_bytes());
        Ok(PayInvoiceResult {
            payment_hash: hex::encode(digest.as_ref()),
            fee_msats: 0,
        })
    }

    async fn lookup_invoice(
        &self,
        payment_hash: Option<&str>,
        invoice: Option<&str>,
    ) -> UpstreamResult<LookupInvoiceResult> {
        let state = self.inner.lock().unwrap();
        let found = payment_hash
            .and_then(|h| state.invoices.get(h).map(|inv| (h.to_string(), inv)))
            .or_else(|| {
                invoice.and_then(|want| {
                    state
                        .invoices
                        .iter()
                        .find(|(_, inv)| inv.invoice == want)
                        .map(|(h, inv)| (h.clone(), inv))
                })
            })
            .ok_or(UpstreamError::NotFound)?;

        let (hash, inv) = found;
        Ok(LookupInvoiceResult {
            payment_hash: hash,
            status: inv.status,
            settled_at_unix: inv.settled_at_unix,
            amount_received_msats: match inv.status {
                UpstreamInvoiceStatus::Settled => Some(inv.amount_msats),
                _ => None,
            },
        })
    }

    fn supports_notifications(&self) -> bool {
        true
    }

    fn subscribe_payments(&self) -> Option<mpsc::Receiver<PaymentReceivedNotification>> {
        self.notify_rx.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn make_invoice_is_initially_pending() {
        let wallet = MockUpstreamWallet::new();
        let result = wallet
            .make_invoice(MakeInvoiceArgs {
                amount_msats: 1000,
                description: None,
                description_hash: None,
                expiry_secs: 3600,
            })
            .await
            .unwrap();
        let lookup = wallet
            .lookup_invoice(Some(&result.payment_hash), None)
            .await
            .unwrap();
        assert_eq!(lookup.status, UpstreamInvoiceStatus::Pending);
    }

    #[tokio::test]
    async fn settle_transitions_to_settled_and_notifies() {
        let wallet = MockUpstreamWallet::new();
        let mut rx = wallet.subscribe_payments().unwrap();
        let result = wallet
            .make_invoice(MakeInvoiceArgs {
                amount_msats: 2000,
                description: None,
                description_hash: None,
                expiry_secs: 3600,
            })
            .await
            .unwrap();

        wallet.settle(&result.payment_hash, 1_700_000_000);

        let lookup = wallet
            .lookup_invoice(Some(&result.payment_hash), None)
            .await
            .unwrap();
        assert_eq!(lookup.status, UpstreamInvoiceStatus::Settled);
        assert_eq!(lookup.amount_received_msats, Some(2000));

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.payment_hash, result.payment_hash);
        assert_eq!(notification.amount_received_msats, 2000);
    }

    #[tokio::test]
    async fn fail_transitions_to_failed_without_notifying() {
        let wallet = MockUpstreamWallet::new();
        let mut rx = wallet.subscribe_payments().unwrap();
        let result = wallet
            .make_invoice(MakeInvoiceArgs {
                amount_msats: 1500,
                description: None,
                description_hash: None,
                expiry_secs: 3600,
            })
            .await
            .unwrap();

        wallet.fail(&result.payment_hash);

        let lookup = wallet
            .lookup_invoice(Some(&result.payment_hash), None)
            .await
            .unwrap();
        assert_eq!(lookup.status, UpstreamInvoiceStatus::Failed);
        assert_eq!(lookup.amount_received_msats, None);
        assert!(rx.try_recv().is_err(), "a failure must not emit a payment notification");
    }

    #[tokio::test]
    async fn programmed_pay_outcome_is_honored_once() {
        let wallet = MockUpstreamWallet::new();
        wallet.program_pay_outcome(
            "lnbc-fail",
            Err(UpstreamError::Rejected("no route".to_string())),
        );
        let err = wallet.pay_invoice("lnbc-fail").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected(_)));

        // Second call for the same invoice falls through to the default.
        let ok = wallet.pay_invoice("lnbc-fail").await.unwrap();
        assert!(!ok.payment_hash.is_empty());
    }
}
