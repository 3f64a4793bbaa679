//! Expiry Sweeper (C8): a single periodic task that transitions overdue
//! `PendingInvoice`s to `expired`, releasing their `pending_msats` share.
//! No interaction with the upstream adapter.

use std::sync::Arc;
use std::time::Duration;

use swm_common::TimestampMs;
use swm_ledger::LedgerStore;
use tracing::{info, warn};

use crate::task::{Shutdown, SwmTask};

pub struct Sweeper {
    ledger: Arc<LedgerStore>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(ledger: Arc<LedgerStore>, interval: Duration) -> Self {
        Self { ledger, interval }
    }

    /// Runs one sweep immediately (the crash-recovery pass: "on restart,
    /// `prune_expired(now)` runs once"), then ticks on `interval` until
    /// shutdown.
    pub fn spawn(self, mut shutdown: Shutdown) -> SwmTask<()> {
        SwmTask::spawn("sweeper", async move {
            self.sweep_once();
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // interval fires immediately on first tick
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.recv() => return,
                    _ = ticker.tick() => self.sweep_once(),
                }
            }
        })
    }

    /// Expires every invoice whose `expires_at` has already passed. Public so
    /// a caller driving the sweep on its own schedule (or a test asserting on
    /// a single pass) doesn't have to wait out a full `spawn` interval tick.
    pub fn sweep_once(&self) {
        let now = TimestampMs::now().as_unix_secs();
        match self.ledger.prune_expired(now) {
            Ok(expired) if !expired.is_empty() => {
                info!(count = expired.len(), "swept expired pending invoices");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "expiry sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use swm_common::rng::SysRng;
    use swm_ledger::{CreateSubAccountInput, InvoiceState, RegisterPendingInvoiceInput};
    use swm_vault::Vault;

    use super::*;

    #[tokio::test]
    async fn sweep_once_expires_past_due_invoices() {
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let vault = Vault::from_master_key(&"55".repeat(32));
        let mut rng = SysRng::new();
        let (account, _secrets) = ledger
            .create_sub_account(Default::default(), &mut rng, &vault)
            .unwrap();
        let now = TimestampMs::now().as_unix_secs();
        ledger
            .register_pending_invoice(RegisterPendingInvoiceInput {
                sub_account_id: account.id.clone(),
                payment_hash: Some("expiring".to_string()),
                amount_msats: 200_000,
                expires_at: Some(now - 1),
                ..Default::default()
            })
            .unwrap();

        let sweeper = Sweeper::new(Arc::clone(&ledger), Duration::from_secs(60));
        sweeper.sweep_once();

        let invoices = ledger.list_pending_invoices(&account.id).unwrap();
        assert_eq!(invoices[0].state, InvoiceState::Expired);
        let refreshed = ledger.get_sub_account_by_id(&account.id).unwrap().unwrap();
        assert_eq!(refreshed.pending_msats, 0);
        assert_eq!(refreshed.balance_msats, 0);
    }

    #[tokio::test]
    async fn spawn_runs_an_initial_sweep_before_shutdown() {
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let vault = Vault::from_master_key(&"66".repeat(32));
        let mut rng = SysRng::new();
        let (account, _secrets) = ledger
            .create_sub_account(Default::default(), &mut rng, &vault)
            .unwrap();
        let now = TimestampMs::now().as_unix_secs();
        ledger
            .register_pending_invoice(RegisterPendingInvoiceInput {
                sub_account_id: account.id.clone(),
                payment_hash: Some("already-due".to_string()),
                amount_msats: 1,
                expires_at: Some(now - 10),
                ..Default::default()
            })
            .unwrap();

        let shutdown = Shutdown::new();
        let sweeper = Sweeper::new(Arc::clone(&ledger), Duration::from_secs(3600));
        let task = sweeper.spawn(shutdown.clone());

        shutdown.send();
        let _ = tokio::time::timeout(Duration::from_millis(200), task).await;

        let invoices = ledger.list_pending_invoices(&account.id).unwrap();
        assert_eq!(invoices[0].state, InvoiceState::Expired);
    }
}
