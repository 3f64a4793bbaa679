//! Settlement Correlator (C7): binds upstream payment notifications and
//! settled `lookup_invoice` results back to pending ledger entries.
//!
//! Follows a check → persist → commit staging discipline: check the
//! proposed transition against current state, persist transactionally,
//! only then notify downstream.

use std::sync::Arc;

use swm_common::TimestampMs;
use swm_ledger::{FindPendingInvoiceFilter, LedgerResult, LedgerStore, PendingInvoice, SubAccount};
use swm_upstream::{PaymentReceivedNotification, UpstreamWallet};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::task::{Shutdown, SwmTask};

/// Emitted after a settlement commits, for the router/endpoint layer to
/// relay a `payment_received` notification to the addressed client.
#[derive(Clone, Debug)]
pub struct SettlementEvent {
    pub pending_invoice: PendingInvoice,
    pub sub_account: SubAccount,
}

pub struct Correlator {
    ledger: Arc<LedgerStore>,
    events_tx: mpsc::Sender<SettlementEvent>,
}

impl Correlator {
    /// Returns the correlator plus the receiver half of its settlement
    /// event stream, which the caller wires to a publishing task.
    pub fn new(ledger: Arc<LedgerStore>) -> (Arc<Self>, mpsc::Receiver<SettlementEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        (Arc::new(Self { ledger, events_tx }), events_rx)
    }

    /// The core matching and crediting logic: find the best-matching
    /// PendingInvoice, no-op if none or already terminal, else settle and
    /// credit in one ledger transaction. Synchronous because every
    /// `LedgerStore` operation is.
    #[instrument(skip(self), name = "correlator_reconcile")]
    fn reconcile_now(
        &self,
        filter: FindPendingInvoiceFilter,
        credited_msats: i64,
        settled_at: TimestampMs,
    ) -> LedgerResult<Option<SettlementEvent>> {
        let Some(pending) = self.ledger.find_pending_invoice(&filter)? else {
            debug!("no matching pending invoice; not one we issued");
            return Ok(None);
        };

        if pending.state.is_terminal() {
            info!(pending_invoice_id = %pending.id, state = ?pending.state, "already settled, no-op");
            return Ok(None);
        }

        let credit = if credited_msats > 0 {
            credited_msats
        } else {
            pending.amount_msats
        };

        let (settled_invoice, sub_account) =
            self.ledger.settle_pending_invoice(&pending.id, credit, settled_at)?;

        info!(
            pending_invoice_id = %settled_invoice.id,
            sub_account_id = %sub_account.id,
            credited_msats = credit,
            "settled pending invoice"
        );

        Ok(Some(SettlementEvent {
            pending_invoice: settled_invoice,
            sub_account,
        }))
    }

    async fn emit(&self, event: Option<SettlementEvent>) {
        if let Some(event) = event {
            if self.events_tx.send(event).await.is_err() {
                warn!("settlement event receiver dropped; nothing is listening for payment_received relays");
            }
        }
    }

    /// Trigger (a): an inbound `payment_received` notification from the
    /// upstream adapter. Already running off the notification stream's own
    /// task, so no extra hand-off is needed here.
    pub async fn handle_payment_received(&self, notification: PaymentReceivedNotification) {
        let filter = FindPendingInvoiceFilter {
            payment_hash: Some(notification.payment_hash),
            ..Default::default()
        };
        let result = self.reconcile_now(
            filter,
            notification.amount_received_msats as i64,
            TimestampMs::now(),
        );
        match result {
            Ok(event) => self.emit(event).await,
            Err(e) => warn!(error = %e, "failed to reconcile payment_received notification"),
        }
    }

    /// Trigger (b): a settled `lookup_invoice` result observed inside a
    /// handler. Must never run on the handler's own call stack — it hands
    /// off to a freshly spawned task before the ledger transaction
    /// commits, per the no-reentrancy rule.
    pub fn spawn_reconcile_from_lookup(
        self: &Arc<Self>,
        payment_hash: Option<String>,
        invoice: Option<String>,
        description_hash: Option<String>,
        credited_msats: i64,
        settled_at: TimestampMs,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let filter = FindPendingInvoiceFilter {
                payment_hash,
                invoice,
                description_hash,
            };
            let result = this.reconcile_now(filter, credited_msats, settled_at);
            match result {
                Ok(event) => this.emit(event).await,
                Err(e) => warn!(error = %e, "failed to reconcile lookup-triggered settlement"),
            }
        });
    }

    /// Runs for the process lifetime, draining the upstream adapter's
    /// `payment_received` stream (if it has one) and reconciling each.
    pub fn spawn_notification_listener(
        self: Arc<Self>,
        upstream: Arc<dyn UpstreamWallet>,
        mut shutdown: Shutdown,
    ) -> Option<SwmTask<()>> {
        let mut rx = upstream.subscribe_payments()?;
        Some(SwmTask::spawn("correlator-notification-listener", async move {
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.recv() => return,
                    maybe_notification = rx.recv() => {
                        match maybe_notification {
                            Some(notification) => self.handle_payment_received(notification).await,
                            None => return,
                        }
                    }
                }
            }
        }))
    }
}
