//! The constructed context object every component is threaded through, per
//! the Design Note's resolution of the source's module-global singletons:
//! "process-wide resources initialized once, torn down on shutdown,
//! accessible to all components... no global mutable state required."

use std::sync::Arc;

use swm_ledger::LedgerStore;
use swm_upstream::UpstreamWallet;
use swm_vault::Vault;
use tokio::sync::mpsc;
use tracing::warn;

use crate::admin::Admin;
use crate::config::Config;
use crate::correlator::{Correlator, SettlementEvent};
use crate::endpoint::Endpoint;
use crate::registry::Registry;
use crate::router::Router;
use crate::sweeper::Sweeper;
use crate::task::{Shutdown, SwmTask};
use crate::transport::{OutboundEvent, RelayTransport};

/// Everything a fully-wired process needs to run. Built once at startup via
/// [`Context::build`]; components reach their dependencies through this
/// struct rather than through module statics.
pub struct Context {
    pub ledger: Arc<LedgerStore>,
    pub vault: Arc<Vault>,
    pub registry: Arc<Registry>,
    pub admin: Admin,
    router: Router,
    sweeper: Sweeper,
    correlator: Arc<Correlator>,
    upstream: Arc<dyn UpstreamWallet>,
    endpoint: Arc<Endpoint>,
    transport: Arc<dyn RelayTransport>,
    settlement_rx: mpsc::Receiver<SettlementEvent>,
}

impl Context {
    pub async fn build(
        config: &Config,
        upstream: Arc<dyn UpstreamWallet>,
        transport: Arc<dyn RelayTransport>,
    ) -> anyhow::Result<Self> {
        let vault = Arc::new(Vault::from_master_key(&config.storage_master_key));
        let ledger = Arc::new(LedgerStore::open(&config.db_path)?);
        let registry = Arc::new(Registry::load(Arc::clone(&ledger), Arc::clone(&vault)).await?);
        let admin = Admin::new(Arc::clone(&ledger), Arc::clone(&vault));

        let (correlator, settlement_rx) = Correlator::new(Arc::clone(&ledger));
        let endpoint = Arc::new(Endpoint::new(
            Arc::clone(&ledger),
            Arc::clone(&upstream),
            Arc::clone(&correlator),
            config.upstream_timeouts,
        ));
        let router = Router::new(Arc::clone(&registry), Arc::clone(&transport), Arc::clone(&endpoint));
        let sweeper = Sweeper::new(Arc::clone(&ledger), config.sweep_interval);

        Ok(Self {
            ledger,
            vault,
            registry,
            admin,
            router,
            sweeper,
            correlator,
            upstream,
            endpoint,
            transport,
            settlement_rx,
        })
    }

    /// Spawns every static, process-lifetime task and returns their handles
    /// for [`crate::task::join_tasks_and_shutdown`].
    pub fn spawn_static_tasks(self, shutdown: Shutdown) -> Vec<SwmTask<()>> {
        let mut tasks = vec![
            self.router.spawn(shutdown.clone()),
            self.sweeper.spawn(shutdown.clone()),
        ];
        if let Some(listener) = self
            .correlator
            .spawn_notification_listener(Arc::clone(&self.upstream), shutdown.clone())
        {
            tasks.push(listener);
        }
        tasks.push(spawn_settlement_relay(
            self.settlement_rx,
            self.registry,
            self.endpoint,
            self.transport,
            shutdown,
        ));
        tasks
    }
}

/// Drains the correlator's settlement stream for the process lifetime,
/// pushing a `payment_received` notification to each settled invoice's
/// client. A client whose registry entry or encryption step fails is
/// logged and skipped — a missed push just means the client finds out on
/// its next `lookup_invoice` poll instead.
fn spawn_settlement_relay(
    mut settlement_rx: mpsc::Receiver<SettlementEvent>,
    registry: Arc<Registry>,
    endpoint: Arc<Endpoint>,
    transport: Arc<dyn RelayTransport>,
    mut shutdown: Shutdown,
) -> SwmTask<()> {
    SwmTask::spawn("settlement-relay", async move {
        loop {
            tokio::select! {
                biased;
                () = shutdown.recv() => return,
                maybe_event = settlement_rx.recv() => {
                    match maybe_event {
                        Some(event) => relay_settlement(&registry, &endpoint, &transport, event).await,
                        None => return,
                    }
                }
            }
        }
    })
}

async fn relay_settlement(
    registry: &Registry,
    endpoint: &Endpoint,
    transport: &Arc<dyn RelayTransport>,
    event: SettlementEvent,
) {
    let Some(ctx) = registry.get(&event.sub_account.service_pubkey).await else {
        warn!(sub_account_id = %event.sub_account.id, "settled invoice's sub-wallet vanished from the registry");
        return;
    };

    let notification = swm_api::Notification::PaymentReceived {
        payment_hash: event.pending_invoice.payment_hash.clone(),
        invoice: event.pending_invoice.invoice.clone(),
        amount: event.pending_invoice.amount_msats.max(0) as u64,
        settled_at: event.pending_invoice.settled_at.map(|t| t.as_unix_secs()),
    };

    let ciphertext = match endpoint.encrypt_notification(&ctx, &notification) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(sub_account_id = %event.sub_account.id, error = %e, "failed to encrypt payment_received notification");
            return;
        }
    };

    if let Err(e) = transport
        .publish(OutboundEvent {
            recipient: ctx.account.client_pubkey,
            ciphertext,
        })
        .await
    {
        warn!(sub_account_id = %event.sub_account.id, error = %e, "failed to publish payment_received notification");
    }
}

#[cfg(test)]
mod tests {
    use swm_common::rng::SysRng;
    use swm_ledger::{CreateSubAccountInput, RegisterPendingInvoiceInput};

    use super::*;
    use crate::transport::MockRelayTransport;

    async fn fixture() -> (
        Arc<LedgerStore>,
        Arc<Registry>,
        Arc<Endpoint>,
        Arc<MockRelayTransport>,
    ) {
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let vault = Arc::new(Vault::from_master_key(&"77".repeat(32)));
        let registry = Arc::new(Registry::load(Arc::clone(&ledger), Arc::clone(&vault)).await.unwrap());
        let upstream = Arc::new(swm_upstream::MockUpstreamWallet::new());
        let (correlator, _settlement_rx) = Correlator::new(Arc::clone(&ledger));
        let endpoint = Arc::new(Endpoint::new(
            Arc::clone(&ledger),
            upstream as Arc<dyn UpstreamWallet>,
            correlator,
            crate::config::UpstreamTimeouts::default(),
        ));
        let transport = Arc::new(MockRelayTransport::new());
        (ledger, registry, endpoint, transport)
    }

    #[tokio::test]
    async fn relay_settlement_publishes_an_encrypted_notification_to_the_client() {
        let (ledger, registry, endpoint, transport) = fixture().await;
        let vault = registry.vault();
        let mut rng = SysRng::new();
        let (account, secrets) = ledger
            .create_sub_account(
                CreateSubAccountInput {
                    label: "relay-fixture".to_string(),
                    ..Default::default()
                },
                &mut rng,
                vault,
            )
            .unwrap();
        registry
            .insert(account.clone(), secrets.service_secret, secrets.client_secret)
            .await;

        let pending = ledger
            .register_pending_invoice(RegisterPendingInvoiceInput {
                sub_account_id: account.id.clone(),
                payment_hash: Some("relay-hash".to_string()),
                amount_msats: 123_000,
                ..Default::default()
            })
            .unwrap();
        let (settled, settled_account) = ledger
            .settle_pending_invoice(&pending.id, 123_000, swm_common::TimestampMs::now())
            .unwrap();

        let event = SettlementEvent {
            pending_invoice: settled,
            sub_account: settled_account,
        };

        relay_settlement(&registry, &endpoint, &(transport.clone() as Arc<dyn RelayTransport>), event).await;

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].recipient, account.client_pubkey);

        let client_sk = nostr::SecretKey::from_slice(&secrets.client_secret).unwrap();
        let service_pk = nostr::PublicKey::from_slice(&account.service_pubkey.0[1..]).unwrap();
        let plaintext = nostr::nips::nip44::decrypt(&client_sk, &service_pk, &published[0].ciphertext).unwrap();
        let notification: swm_api::Notification = serde_json::from_str(&plaintext).unwrap();
        match notification {
            swm_api::Notification::PaymentReceived { amount, payment_hash, .. } => {
                assert_eq!(amount, 123_000);
                assert_eq!(payment_hash, Some("relay-hash".to_string()));
            }
        }
    }

    #[tokio::test]
    async fn relay_settlement_skips_a_sub_account_missing_from_the_registry() {
        let (ledger, registry, endpoint, transport) = fixture().await;
        let vault = registry.vault();
        let mut rng = SysRng::new();
        // Created directly against the ledger, never registered, simulating
        // a registry that hasn't caught up with a concurrent create.
        let (account, _secrets) = ledger
            .create_sub_account(
                CreateSubAccountInput {
                    label: "orphan".to_string(),
                    ..Default::default()
                },
                &mut rng,
                vault,
            )
            .unwrap();

        let pending = ledger
            .register_pending_invoice(RegisterPendingInvoiceInput {
                sub_account_id: account.id.clone(),
                payment_hash: Some("orphan-hash".to_string()),
                amount_msats: 1000,
                ..Default::default()
            })
            .unwrap();
        let (settled, settled_account) = ledger
            .settle_pending_invoice(&pending.id, 1000, swm_common::TimestampMs::now())
            .unwrap();

        let event = SettlementEvent {
            pending_invoice: settled,
            sub_account: settled_account,
        };

        relay_settlement(&registry, &endpoint, &(transport.clone() as Arc<dyn RelayTransport>), event).await;
        assert!(transport.published().is_empty());
    }
}
