//! Sub-Wallet Registry (C3): an in-memory index from `service_pubkey` to the
//! decrypted context a handler needs, rebuilt from the ledger at startup and
//! kept current as sub-wallets are created. Also owns the reactive key set
//! the router subscribes to for subscription-filter refresh.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use swm_api::ServicePubkey;
use swm_ledger::{LedgerResult, LedgerStore, SubAccount};
use swm_vault::Vault;
use tokio::sync::{watch, RwLock};

/// The active set of service public keys, published over a `watch` channel
/// so the router can refresh its subscription filter on change.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServicePubkeySet(pub HashSet<ServicePubkey>);

/// A live, decrypted view of one SubAccount, cheap to clone and share across
/// the per-sub-wallet worker task and any handler it spawns.
#[derive(Clone)]
pub struct SubWalletContext {
    pub account: SubAccount,
    pub service_secret: [u8; 32],
    pub client_secret: [u8; 32],
}

struct Inner {
    by_service_pubkey: HashMap<ServicePubkey, SubWalletContext>,
}

/// Indexes every active SubAccount by its service public key. Mutated only
/// by [`Registry::load`] and [`Registry::insert`].
pub struct Registry {
    ledger: Arc<LedgerStore>,
    vault: Arc<Vault>,
    inner: RwLock<Inner>,
    keys_tx: watch::Sender<ServicePubkeySet>,
}

impl Registry {
    /// Loads every SubAccount from the ledger and decrypts its secrets,
    /// populating the index eagerly at startup.
    pub async fn load(ledger: Arc<LedgerStore>, vault: Arc<Vault>) -> LedgerResult<Self> {
        let accounts = ledger.list_sub_accounts()?;
        let mut by_service_pubkey = HashMap::with_capacity(accounts.len());
        for account in accounts {
            let ctx = decrypt_context(&vault, account);
            by_service_pubkey.insert(ctx.account.service_pubkey, ctx);
        }

        let key_set = ServicePubkeySet(by_service_pubkey.keys().copied().collect());
        let (keys_tx, _keys_rx) = watch::channel(key_set);

        Ok(Self {
            ledger,
            vault,
            inner: RwLock::new(Inner { by_service_pubkey }),
            keys_tx,
        })
    }

    /// A receiver the router subscribes to; fires whenever the active
    /// service-pubkey set changes (create/delete).
    pub fn subscribe_keys(&self) -> watch::Receiver<ServicePubkeySet> {
        self.keys_tx.subscribe()
    }

    pub async fn get(&self, service_pubkey: &ServicePubkey) -> Option<SubWalletContext> {
        self.inner.read().await.by_service_pubkey.get(service_pubkey).cloned()
    }

    /// Registers a freshly-created SubAccount (and its plaintext secrets)
    /// into the live index, then notifies the router's subscription.
    pub async fn insert(&self, account: SubAccount, service_secret: [u8; 32], client_secret: [u8; 32]) {
        let ctx = SubWalletContext {
            account,
            service_secret,
            client_secret,
        };

        let mut guard = self.inner.write().await;
        guard.by_service_pubkey.insert(ctx.account.service_pubkey, ctx);
        let key_set = ServicePubkeySet(guard.by_service_pubkey.keys().copied().collect());
        drop(guard);
        let _ = self.keys_tx.send(key_set);
    }

    /// Re-reads the account row from the ledger (e.g. after a balance
    /// mutation from a different worker) without touching the plaintext
    /// secrets, which never change after creation.
    pub async fn refresh_account(&self, service_pubkey: &ServicePubkey) -> LedgerResult<()> {
        let ledger = Arc::clone(&self.ledger);
        let id = {
            let guard = self.inner.read().await;
            match guard.by_service_pubkey.get(service_pubkey) {
                Some(ctx) => ctx.account.id.clone(),
                None => return Ok(()),
            }
        };
        if let Some(updated) = ledger.get_sub_account_by_id(&id)? {
            let mut guard = self.inner.write().await;
            if let Some(ctx) = guard.by_service_pubkey.get_mut(service_pubkey) {
                ctx.account = updated;
            }
        }
        Ok(())
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }
}

fn decrypt_context(vault: &Vault, account: SubAccount) -> SubWalletContext {
    let service_secret = decrypt_secret(vault, &account.service_secret_ciphertext);
    let client_secret = decrypt_secret(vault, &account.client_secret_ciphertext);
    SubWalletContext {
        account,
        service_secret,
        client_secret,
    }
}

fn decrypt_secret(vault: &Vault, ciphertext: &[u8]) -> [u8; 32] {
    let plaintext = vault
        .decrypt(ciphertext)
        .expect("ledger-stored ciphertext must decrypt under the process master key");
    plaintext
        .try_into()
        .expect("decrypted secret must be exactly 32 bytes")
}

#[cfg(test)]
mod tests {
    use swm_common::rng::SysRng;
    use swm_ledger::CreateSubAccountInput;

    use super::*;

    fn vault() -> Arc<Vault> {
        Arc::new(Vault::from_master_key(&"ab".repeat(32)))
    }

    #[tokio::test]
    async fn load_populates_index_from_existing_ledger_rows() {
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let vault = vault();
        let mut rng = SysRng::new();
        let (account, _secrets) = ledger
            .create_sub_account(
                CreateSubAccountInput {
                    label: "alice".to_string(),
                    ..Default::default()
                },
                &mut rng,
                &vault,
            )
            .unwrap();

        let registry = Registry::load(Arc::clone(&ledger), Arc::clone(&vault)).await.unwrap();
        let found = registry.get(&account.service_pubkey).await;
        assert!(found.is_some());
        assert_eq!(found.unwrap().account.label, "alice");
    }

    #[tokio::test]
    async fn insert_notifies_key_set_subscribers() {
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let vault = vault();
        let registry = Registry::load(Arc::clone(&ledger), Arc::clone(&vault)).await.unwrap();
        let mut keys_rx = registry.subscribe_keys();
        assert!(keys_rx.borrow().0.is_empty());

        let mut rng = SysRng::new();
        let (account, secrets) = ledger
            .create_sub_account(
                CreateSubAccountInput {
                    label: "bob".to_string(),
                    ..Default::default()
                },
                &mut rng,
                &vault,
            )
            .unwrap();
        registry
            .insert(account.clone(), secrets.service_secret, secrets.client_secret)
            .await;

        keys_rx.changed().await.unwrap();
        assert!(keys_rx.borrow().0.contains(&account.service_pubkey));
        assert!(registry.get(&account.service_pubkey).await.is_some());
    }

    #[tokio::test]
    async fn unknown_service_pubkey_returns_none() {
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let vault = vault();
        let registry = Registry::load(ledger, vault).await.unwrap();
        assert!(registry.get(&ServicePubkey([0x03; 33])).await.is_none());
    }
}
