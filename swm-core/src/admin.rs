//! The operator admin facade: plain Rust functions, no HTTP framework —
//! the CLI front-end, HTTP admin API, and interactive menu are external
//! collaborators represented only by this narrow surface.

use std::sync::Arc;

use swm_common::rng::SysRng;
use swm_ledger::{CreateSubAccountInput, LedgerResult, LedgerStore, PendingInvoice, SubAccount};
use swm_vault::Vault;

const CONNECT_URI_SCHEME: &str = "nostr+walletconnect";

/// Returned exactly once, at creation time — the plaintext secrets never
/// round-trip through the ledger again afterward.
pub struct CreatedSubAccount {
    pub record: SubAccount,
    pub connect_uri: String,
    pub client_secret: [u8; 32],
    pub service_secret: [u8; 32],
}

#[derive(Default)]
pub struct CreateSubAccountRequest {
    pub label: String,
    pub description: Option<String>,
    pub relays: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub client_secret_hex: Option<String>,
    pub service_secret_hex: Option<String>,
}

pub struct Admin {
    ledger: Arc<LedgerStore>,
    vault: Arc<Vault>,
}

impl Admin {
    pub fn new(ledger: Arc<LedgerStore>, vault: Arc<Vault>) -> Self {
        Self { ledger, vault }
    }

    pub fn create_sub_account(&self, request: CreateSubAccountRequest) -> anyhow::Result<CreatedSubAccount> {
        let service_secret = decode_secret_hex(request.service_secret_hex.as_deref())?;
        let client_secret = decode_secret_hex(request.client_secret_hex.as_deref())?;

        let mut rng = SysRng::new();
        let (record, secrets) = self.ledger.create_sub_account(
            CreateSubAccountInput {
                label: request.label,
                description: request.description,
                relays: request.relays,
                metadata: request.metadata,
                service_secret,
                client_secret,
            },
            &mut rng,
            &self.vault,
        )?;

        let connect_uri = build_connect_uri(&record, &secrets.client_secret);
        Ok(CreatedSubAccount {
            record,
            connect_uri,
            client_secret: secrets.client_secret,
            service_secret: secrets.service_secret,
        })
    }

    pub fn list_sub_accounts(&self) -> LedgerResult<Vec<SubAccount>> {
        self.ledger.list_sub_accounts()
    }

    pub fn list_pending_invoices(&self, sub_account_id: &str) -> LedgerResult<Vec<PendingInvoice>> {
        self.ledger.list_pending_invoices(sub_account_id)
    }

    /// Reconstructs the client-visible URI from the stored record and the
    /// decrypted client secret — it is never persisted itself.
    pub fn get_connect_uri(&self, sub_account_id: &str) -> anyhow::Result<Option<String>> {
        let Some(record) = self.ledger.get_sub_account_by_id(sub_account_id)? else {
            return Ok(None);
        };
        let client_secret_bytes = self.vault.decrypt(&record.client_secret_ciphertext)?;
        let client_secret: [u8; 32] = client_secret_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("stored client secret is not 32 bytes"))?;
        Ok(Some(build_connect_uri(&record, &client_secret)))
    }

    pub fn delete_sub_account(&self, sub_account_id: &str) -> LedgerResult<()> {
        self.ledger.delete_sub_account(sub_account_id)
    }
}

fn decode_secret_hex(hex_str: Option<&str>) -> anyhow::Result<Option<[u8; 32]>> {
    match hex_str {
        None => Ok(None),
        Some(s) => {
            let mut bytes = [0u8; 32];
            hex::decode_to_slice(s, &mut bytes)?;
            Ok(Some(bytes))
        }
    }
}

fn build_connect_uri(record: &SubAccount, client_secret: &[u8; 32]) -> String {
    let relay = record.relays.first().map(String::as_str).unwrap_or("");
    let relay_encoded = percent_encode(relay);
    format!(
        "{CONNECT_URI_SCHEME}://{}?relay={relay_encoded}&secret={}",
        record.service_pubkey,
        hex::encode(client_secret),
    )
}

/// Minimal percent-encoding for the two reserved characters (`:` and `/`)
/// that show up in relay URLs, without pulling in a full URL-encoding
/// crate.
fn percent_encode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ':' => "%3A".to_string(),
            '/' => "%2F".to_string(),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Admin {
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let vault = Arc::new(Vault::from_master_key(&"77".repeat(32)));
        Admin::new(ledger, vault)
    }

    #[test]
    fn create_sub_account_returns_connect_uri_with_scheme() {
        let admin = admin();
        let created = admin
            .create_sub_account(CreateSubAccountRequest {
                label: "alice".to_string(),
                relays: vec!["wss://relay.example".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert!(created.connect_uri.starts_with("nostr+walletconnect://"));
        assert!(created.connect_uri.contains("relay=wss%3A%2F%2Frelay.example"));
    }

    #[test]
    fn get_connect_uri_reconstructs_without_storing_it() {
        let admin = admin();
        let created = admin
            .create_sub_account(CreateSubAccountRequest {
                label: "bob".to_string(),
                relays: vec!["wss://relay.example".to_string()],
                ..Default::default()
            })
            .unwrap();
        let reconstructed = admin.get_connect_uri(&created.record.id).unwrap().unwrap();
        assert_eq!(reconstructed, created.connect_uri);
    }

    #[test]
    fn get_connect_uri_for_unknown_id_returns_none() {
        let admin = admin();
        assert!(admin.get_connect_uri("does-not-exist").unwrap().is_none());
    }

    #[test]
    fn list_sub_accounts_reflects_creations() {
        let admin = admin();
        admin
            .create_sub_account(CreateSubAccountRequest {
                label: "carol".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(admin.list_sub_accounts().unwrap().len(), 1);
    }
}
