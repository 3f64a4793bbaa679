//! The durable, transactional ledger store (C1). A single writer connection
//! guarded by a mutex serializes all mutating operations: the ledger store
//! is the serialization point for all balance-affecting work, the same
//! coarse-grained-lock discipline as an in-memory state guarded by a mutex,
//! just backed by SQLite instead of a map.

use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row};
use swm_common::TimestampMs;
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::models::*;
use crate::schema::SCHEMA_SQL;

const MAX_RETRIES: u32 = 3;

pub struct LedgerStore {
    conn: Mutex<Connection>,
}

impl LedgerStore {
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` inside a transaction, retrying up to [`MAX_RETRIES`] times
    /// with exponential backoff if SQLite reports the write was blocked by
    /// another connection (a transient serialization failure).
    fn with_retrying_txn<T>(
        &self,
        f: impl Fn(&rusqlite::Transaction) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut backoff = Duration::from_millis(10);
        let mut attempt = 0;
        loop {
            let mut conn = self.conn.lock().unwrap();
            let txn = conn.transaction()?;
            match f(&txn) {
                Ok(value) => {
                    txn.commit()?;
                    return Ok(value);
                }
                Err(LedgerError::Sqlite(e)) if is_transient(&e) && attempt < MAX_RETRIES => {
                    drop(txn);
                    drop(conn);
                    warn!(attempt, "ledger transaction busy, retrying: {e:#}");
                    thread::sleep(backoff);
                    backoff *= 4;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // --- SubAccount CRUD --- //

    pub fn create_sub_account(
        &self,
        input: CreateSubAccountInput,
        rng: &mut impl swm_common::rng::Crng,
        vault: &swm_vault::Vault,
    ) -> LedgerResult<(SubAccount, SubAccountSecrets)> {
        let service_secret = match input.service_secret {
            Some(s) => s,
            None => swm_common::rng::gen_bytes::<32>(rng),
        };
        let client_secret = match input.client_secret {
            Some(s) => s,
            None => swm_common::rng::gen_bytes::<32>(rng),
        };

        let service_pubkey = derive_pubkey(&service_secret)
            .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?;
        let client_pubkey = derive_pubkey(&client_secret)
            .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?;

        let service_secret_ciphertext = vault.encrypt(rng, &service_secret);
        let client_secret_ciphertext = vault.encrypt(rng, &client_secret);

        let id = hex::encode(swm_common::rng::gen_bytes::<16>(rng));
        let now = TimestampMs::now();
        let relays_json = serde_json::to_string(&input.relays)
            .expect("Vec<String> serialization cannot fail");
        let metadata_json = input
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).expect("Value serialization cannot fail"));

        let record = self.with_retrying_txn(|txn| {
            let existing = txn
                .query_row(
                    "SELECT 1 FROM sub_accounts WHERE service_pubkey = ?1 OR client_pubkey = ?2",
                    rusqlite::params![
                        hex::encode(service_pubkey.0),
                        hex::encode(client_pubkey.0)
                    ],
                    |_| Ok(()),
                )
                .optional()?;
            if existing.is_some() {
                return Err(LedgerError::DuplicateKey(
                    "service_pubkey or client_pubkey already exists".to_string(),
                ));
            }

            txn.execute(
                "INSERT INTO sub_accounts (
                    id, label, description, relays, service_pubkey,
                    service_secret, client_pubkey, client_secret,
                    balance_msats, pending_msats, metadata,
                    created_at, updated_at, last_used_at, usage_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9, ?10, ?10, NULL, 0)",
                rusqlite::params![
                    id,
                    input.label,
                    input.description,
                    relays_json,
                    hex::encode(service_pubkey.0),
                    service_secret_ciphertext,
                    hex::encode(client_pubkey.0),
                    client_secret_ciphertext,
                    metadata_json,
                    now.to_rfc3339(),
                ],
            )?;

            row_to_sub_account(&txn.query_row(
                "SELECT * FROM sub_accounts WHERE id = ?1",
                [&id],
                |row| Ok(row_values(row)),
            )?)
        })?;

        Ok((
            record,
            SubAccountSecrets {
                service_secret,
                client_secret,
            },
        ))
    }

    pub fn get_sub_account_by_id(&self, id: &str) -> LedgerResult<Option<SubAccount>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM sub_accounts WHERE id = ?1", [id], |row| {
            Ok(row_values(row))
        })
        .optional()?
        .map(|v| row_to_sub_account(&v))
        .transpose()
    }

    pub fn get_sub_account_by_service_pubkey(
        &self,
        pubkey: &swm_api::ServicePubkey,
    ) -> LedgerResult<Option<SubAccount>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM sub_accounts WHERE service_pubkey = ?1",
            [hex::encode(pubkey.0)],
            |row| Ok(row_values(row)),
        )
        .optional()?
        .map(|v| row_to_sub_account(&v))
        .transpose()
    }

    pub fn list_sub_accounts(&self) -> LedgerResult<Vec<SubAccount>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM sub_accounts ORDER BY created_at ASC")?;
        let rows = stmt
            .query_map([], |row| Ok(row_values(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(row_to_sub_account).collect()
    }

    /// Atomically applies a signed balance delta; fails rather than letting
    /// the balance go negative.
    pub fn adjust_balance(&self, id: &str, delta_msats: i64) -> LedgerResult<SubAccount> {
        self.with_retrying_txn(|txn| {
            let current: i64 = txn
                .query_row(
                    "SELECT balance_msats FROM sub_accounts WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

            let new_balance = current
                .checked_add(delta_msats)
                .ok_or_else(|| LedgerError::InsufficientBalance {
                    have: current,
                    need: -delta_msats,
                })?;
            if new_balance < 0 {
                return Err(LedgerError::InsufficientBalance {
                    have: current,
                    need: -delta_msats,
                });
            }

            txn.execute(
                "UPDATE sub_accounts SET balance_msats = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![new_balance, TimestampMs::now().to_rfc3339(), id],
            )?;

            row_to_sub_account(&txn.query_row(
                "SELECT * FROM sub_accounts WHERE id = ?1",
                [id],
                |row| Ok(row_values(row)),
            )?)
        })
    }

    pub fn touch_sub_account(
        &self,
        id: &str,
        input: TouchSubAccountInput,
    ) -> LedgerResult<()> {
        self.with_retrying_txn(|txn| {
            let now = TimestampMs::now().to_rfc3339();
            txn.execute(
                "UPDATE sub_accounts SET
                    usage_count = usage_count + ?1,
                    last_used_at = CASE WHEN ?2 THEN ?3 ELSE last_used_at END,
                    updated_at = ?3
                WHERE id = ?4",
                rusqlite::params![
                    i64::from(input.increment_usage),
                    input.update_last_used,
                    now,
                    id
                ],
            )?;
            Ok(())
        })
    }

    /// Deletes a SubAccount (and, via `ON DELETE CASCADE`, its
    /// PendingInvoices). Privileged operator action, never triggered by a
    /// client request.
    pub fn delete_sub_account(&self, id: &str) -> LedgerResult<()> {
        self.with_retrying_txn(|txn| {
            let affected = txn.execute("DELETE FROM sub_accounts WHERE id = ?1", [id])?;
            if affected == 0 {
                return Err(LedgerError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    // --- PendingInvoice CRUD --- //

    pub fn register_pending_invoice(
        &self,
        input: RegisterPendingInvoiceInput,
    ) -> LedgerResult<PendingInvoice> {
        self.with_retrying_txn(|txn| {
            let id = pending_invoice_id(&input);
            let now = TimestampMs::now();
            let raw_json = input
                .raw
                .as_ref()
                .map(|r| serde_json::to_string(r).expect("Value serialization cannot fail"));

            txn.execute(
                "INSERT INTO pending_invoices (
                    id, sub_account_id, invoice, payment_hash, description_hash,
                    amount_msats, state, expires_at, created_at, updated_at,
                    settled_at, raw
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?8, NULL, ?9)",
                rusqlite::params![
                    id,
                    input.sub_account_id,
                    input.invoice,
                    input.payment_hash,
                    input.description_hash,
                    input.amount_msats,
                    input.expires_at,
                    now.to_rfc3339(),
                    raw_json,
                ],
            )?;

            refresh_pending_msats(txn, &input.sub_account_id)?;

            row_to_pending_invoice(&txn.query_row(
                "SELECT * FROM pending_invoices WHERE id = ?1",
                [&id],
                |row| Ok(pending_invoice_row_values(row)),
            )?)
        })
    }

    /// Only `pending -> {settled, failed, expired}` transitions are legal.
    pub fn update_pending_invoice_state(
        &self,
        id: &str,
        new_state: InvoiceState,
        settled_at: Option<TimestampMs>,
    ) -> LedgerResult<PendingInvoice> {
        self.with_retrying_txn(|txn| {
            let current = row_to_pending_invoice(&txn.query_row(
                "SELECT * FROM pending_invoices WHERE id = ?1",
                [id],
                |row| Ok(pending_invoice_row_values(row)),
            )?)?;

            if current.state != InvoiceState::Pending || new_state == InvoiceState::Pending {
                return Err(LedgerError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    current.state, new_state
                )));
            }

            let now = TimestampMs::now();
            let settled_at_str = settled_at.map(|t| t.to_rfc3339());
            txn.execute(
                "UPDATE pending_invoices SET state = ?1, updated_at = ?2, settled_at = ?3
                 WHERE id = ?4",
                rusqlite::params![new_state.as_db_str(), now.to_rfc3339(), settled_at_str, id],
            )?;

            refresh_pending_msats(txn, &current.sub_account_id)?;

            row_to_pending_invoice(&txn.query_row(
                "SELECT * FROM pending_invoices WHERE id = ?1",
                [id],
                |row| Ok(pending_invoice_row_values(row)),
            )?)
        })
    }

    /// Credits `balance_msats` by `credited_msats` and transitions the
    /// invoice to `settled` in one transaction.
    pub fn settle_pending_invoice(
        &self,
        id: &str,
        credited_msats: i64,
        settled_at: TimestampMs,
    ) -> LedgerResult<(PendingInvoice, SubAccount)> {
        self.with_retrying_txn(|txn| {
            let current = row_to_pending_invoice(&txn.query_row(
                "SELECT * FROM pending_invoices WHERE id = ?1",
                [id],
                |row| Ok(pending_invoice_row_values(row)),
            )?)?;

            if current.state != InvoiceState::Pending {
                return Err(LedgerError::InvalidTransition(format!(
                    "{:?} -> Settled",
                    current.state
                )));
            }

            let now = TimestampMs::now();
            txn.execute(
                "UPDATE pending_invoices SET state = 'settled', updated_at = ?1, settled_at = ?2
                 WHERE id = ?3",
                rusqlite::params![now.to_rfc3339(), settled_at.to_rfc3339(), id],
            )?;

            txn.execute(
                "UPDATE sub_accounts SET balance_msats = balance_msats + ?1, updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![credited_msats, now.to_rfc3339(), current.sub_account_id],
            )?;

            refresh_pending_msats(txn, &current.sub_account_id)?;

            let invoice = row_to_pending_invoice(&txn.query_row(
                "SELECT * FROM pending_invoices WHERE id = ?1",
                [id],
                |row| Ok(pending_invoice_row_values(row)),
            )?)?;
            let account = row_to_sub_account(&txn.query_row(
                "SELECT * FROM sub_accounts WHERE id = ?1",
                [&current.sub_account_id],
                |row| Ok(row_values(row)),
            )?)?;
            Ok((invoice, account))
        })
    }

    pub fn find_pending_invoice(
        &self,
        filter: &FindPendingInvoiceFilter,
    ) -> LedgerResult<Option<PendingInvoice>> {
        let conn = self.conn.lock().unwrap();
        let mut candidates = Vec::new();

        if let Some(payment_hash) = &filter.payment_hash {
            candidates.extend(query_pending_invoices(
                &conn,
                "payment_hash",
                payment_hash,
            )?);
        }
        if let Some(invoice) = &filter.invoice {
            candidates.extend(query_pending_invoices(&conn, "invoice", invoice)?);
        }
        if let Some(description_hash) = &filter.description_hash {
            candidates.extend(query_pending_invoices(
                &conn,
                "description_hash",
                description_hash,
            )?);
        }

        // Preference order: payment_hash beats invoice beats description_hash;
        // within a field, most-recent updated_at wins.
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates.sort_by_key(|(_, _, priority)| *priority);
        Ok(candidates.into_iter().next().map(|(inv, _, _)| inv))
    }

    pub fn list_pending_invoices(&self, sub_account_id: &str) -> LedgerResult<Vec<PendingInvoice>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM pending_invoices WHERE sub_account_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([sub_account_id], |row| Ok(pending_invoice_row_values(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(row_to_pending_invoice).collect()
    }

    /// Bulk-transitions all `pending` rows with `expires_at <= now_unix` to
    /// `expired`. Idempotent: a row already transitioned is not matched
    /// again because it's no longer `pending`.
    pub fn prune_expired(&self, now_unix: i64) -> LedgerResult<Vec<PendingInvoice>> {
        self.with_retrying_txn(|txn| {
            let ids: Vec<String> = {
                let mut stmt = txn.prepare(
                    "SELECT id FROM pending_invoices
                     WHERE state = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?1",
                )?;
                let ids = stmt
                    .query_map([now_unix], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                ids
            };

            let mut affected_accounts = std::collections::HashSet::new();
            let now = TimestampMs::now().to_rfc3339();
            for id in &ids {
                let sub_account_id: String = txn.query_row(
                    "SELECT sub_account_id FROM pending_invoices WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )?;
                txn.execute(
                    "UPDATE pending_invoices SET state = 'expired', updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![now, id],
                )?;
                affected_accounts.insert(sub_account_id);
            }
            for sub_account_id in &affected_accounts {
                refresh_pending_msats(txn, sub_account_id)?;
            }

            ids.iter()
                .map(|id| {
                    row_to_pending_invoice(&txn.query_row(
                        "SELECT * FROM pending_invoices WHERE id = ?1",
                        [id],
                        |row| Ok(pending_invoice_row_values(row)),
                    )?)
                })
                .collect()
        })
    }
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _
        )
    )
}

fn derive_pubkey(secret: &[u8; 32]) -> Result<swm_api::ServicePubkey, secp256k1::Error> {
    let secp = secp256k1::Secp256k1::signing_only();
    let sk = secp256k1::SecretKey::from_slice(secret)?;
    let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
    Ok(swm_api::ServicePubkey(pk.serialize()))
}

fn pending_invoice_id(input: &RegisterPendingInvoiceInput) -> String {
    if let Some(hash) = &input.payment_hash {
        return hash.clone();
    }
    if let Some(invoice) = &input.invoice {
        let digest = ring::digest::digest(&ring::digest::SHA256, invoice.as_bytes());
        return hex::encode(digest.as_ref());
    }
    let mut rng = swm_common::rng::SysRng::new();
    hex::encode(swm_common::rng::gen_bytes::<16>(&mut rng))
}

/// Recomputes `pending_msats` from the canonical sum of pending invoices.
/// Must run inside the same transaction as whatever mutated the invoice set.
fn refresh_pending_msats(
    txn: &rusqlite::Transaction,
    sub_account_id: &str,
) -> LedgerResult<()> {
    let sum: i64 = txn.query_row(
        "SELECT COALESCE(SUM(amount_msats), 0) FROM pending_invoices
         WHERE sub_account_id = ?1 AND state = 'pending'",
        [sub_account_id],
        |row| row.get(0),
    )?;
    txn.execute(
        "UPDATE sub_accounts SET pending_msats = ?1 WHERE id = ?2",
        rusqlite::params![sum, sub_account_id],
    )?;
    Ok(())
}

fn query_pending_invoices(
    conn: &Connection,
    column: &str,
    value: &str,
    // sorted tuple: (invoice, updated_at-for-tiebreak, field-priority)
) -> LedgerResult<Vec<(PendingInvoice, String, u8)>> {
    let priority = match column {
        "payment_hash" => 0,
        "invoice" => 1,
        _ => 2,
    };
    let sql = format!("SELECT * FROM pending_invoices WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([value], |row| Ok(pending_invoice_row_values(row)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.iter()
        .map(|v| {
            let inv = row_to_pending_invoice(v)?;
            let updated_at = inv.updated_at.to_rfc3339();
            Ok((inv, updated_at, priority))
        })
        .collect()
}

// --- row <-> struct plumbing --- //

/// Raw column values pulled out of a `sub_accounts` row while the
/// [`rusqlite::Row`] borrow is live; converted to a [`SubAccount`] after
/// `query_row`/`query_map`'s closure returns.
struct SubAccountRow {
    id: String,
    label: String,
    description: Option<String>,
    relays: String,
    service_pubkey: String,
    service_secret: Vec<u8>,
    client_pubkey: String,
    client_secret: Vec<u8>,
    balance_msats: i64,
    pending_msats: i64,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
    last_used_at: Option<String>,
    usage_count: i64,
}

fn row_values(row: &Row) -> SubAccountRow {
    SubAccountRow {
        id: row.get_unwrap("id"),
        label: row.get_unwrap("label"),
        description: row.get_unwrap("description"),
        relays: row.get_unwrap("relays"),
        service_pubkey: row.get_unwrap("service_pubkey"),
        service_secret: row.get_unwrap("service_secret"),
        client_pubkey: row.get_unwrap("client_pubkey"),
        client_secret: row.get_unwrap("client_secret"),
        balance_msats: row.get_unwrap("balance_msats"),
        pending_msats: row.get_unwrap("pending_msats"),
        metadata: row.get_unwrap("metadata"),
        created_at: row.get_unwrap("created_at"),
        updated_at: row.get_unwrap("updated_at"),
        last_used_at: row.get_unwrap("last_used_at"),
        usage_count: row.get_unwrap("usage_count"),
    }
}

fn row_to_sub_account(row: &SubAccountRow) -> LedgerResult<SubAccount> {
    let mut service_pubkey = [0u8; 33];
    hex::decode_to_slice(&row.service_pubkey, &mut service_pubkey)
        .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?;
    let mut client_pubkey = [0u8; 33];
    hex::decode_to_slice(&row.client_pubkey, &mut client_pubkey)
        .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?;

    Ok(SubAccount {
        id: row.id.clone(),
        label: row.label.clone(),
        description: row.description.clone(),
        relays: serde_json::from_str(&row.relays).unwrap_or_default(),
        service_pubkey: swm_api::ServicePubkey(service_pubkey),
        service_secret_ciphertext: row.service_secret.clone(),
        client_pubkey: swm_api::ClientPubkey(client_pubkey),
        client_secret_ciphertext: row.client_secret.clone(),
        balance_msats: row.balance_msats,
        pending_msats: row.pending_msats,
        metadata: row
            .metadata
            .as_ref()
            .and_then(|m| serde_json::from_str(m).ok()),
        created_at: TimestampMs::from_rfc3339(&row.created_at)
            .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?,
        updated_at: TimestampMs::from_rfc3339(&row.updated_at)
            .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?,
        last_used_at: row
            .last_used_at
            .as_ref()
            .map(|s| TimestampMs::from_rfc3339(s))
            .transpose()
            .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?,
        usage_count: row.usage_count,
    })
}

struct PendingInvoiceRow {
    id: String,
    sub_account_id: String,
    invoice: Option<String>,
    payment_hash: Option<String>,
    description_hash: Option<String>,
    amount_msats: i64,
    state: String,
    expires_at: Option<i64>,
    created_at: String,
    updated_at: String,
    settled_at: Option<String>,
    raw: Option<String>,
}

fn pending_invoice_row_values(row: &Row) -> PendingInvoiceRow {
    PendingInvoiceRow {
        id: row.get_unwrap("id"),
        sub_account_id: row.get_unwrap("sub_account_id"),
        invoice: row.get_unwrap("invoice"),
        payment_hash: row.get_unwrap("payment_hash"),
        description_hash: row.get_unwrap("description_hash"),
        amount_msats: row.get_unwrap("amount_msats"),
        state: row.get_unwrap("state"),
        expires_at: row.get_unwrap("expires_at"),
        created_at: row.get_unwrap("created_at"),
        updated_at: row.get_unwrap("updated_at"),
        settled_at: row.get_unwrap("settled_at"),
        raw: row.get_unwrap("raw"),
    }
}


fn row_to_pending_invoice(row: &PendingInvoiceRow) -> LedgerResult<PendingInvoice> {
    Ok(PendingInvoice {
        id: row.id.clone(),
        sub_account_id: row.sub_account_id.clone(),
        invoice: row.invoice.clone(),
        payment_hash: row.payment_hash.clone(),
        description_hash: row.description_hash.clone(),
        amount_msats: row.amount_msats,
        state: InvoiceState::from_db_str(&row.state)
            .ok_or_else(|| LedgerError::InvalidTransition(row.state.clone()))?,
        expires_at: row.expires_at,
        created_at: TimestampMs::from_rfc3339(&row.created_at)
            .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?,
        updated_at: TimestampMs::from_rfc3339(&row.updated_at)
            .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?,
        settled_at: row
            .settled_at
            .as_ref()
            .map(|s| TimestampMs::from_rfc3339(s))
            .transpose()
            .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?,
        raw: row.raw.as_ref().and_then(|r| serde_json::from_str(r).ok()),
    })
}
