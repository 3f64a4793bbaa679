//! The embedded schema migration, run once at startup. Kept as a single
//! idempotent `CREATE TABLE IF NOT EXISTS` script rather than a numbered
//! migration chain, since the schema is fixed by the external interface
//! contract rather than expected to evolve incrementally.

pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sub_accounts (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    description TEXT,
    relays TEXT NOT NULL,
    service_pubkey TEXT NOT NULL UNIQUE,
    service_secret BLOB NOT NULL,
    client_pubkey TEXT NOT NULL UNIQUE,
    client_secret BLOB NOT NULL,
    balance_msats INTEGER NOT NULL DEFAULT 0,
    pending_msats INTEGER NOT NULL DEFAULT 0,
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_used_at TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pending_invoices (
    id TEXT PRIMARY KEY,
    sub_account_id TEXT NOT NULL REFERENCES sub_accounts(id) ON DELETE CASCADE,
    invoice TEXT,
    payment_hash TEXT,
    description_hash TEXT,
    amount_msats INTEGER NOT NULL,
    state TEXT NOT NULL CHECK(state IN ('pending','settled','failed','expired')),
    expires_at INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    settled_at TEXT,
    raw TEXT
);

CREATE INDEX IF NOT EXISTS idx_pending_invoices_sub_account_state
    ON pending_invoices(sub_account_id, state);
CREATE INDEX IF NOT EXISTS idx_pending_invoices_payment_hash
    ON pending_invoices(payment_hash);
CREATE INDEX IF NOT EXISTS idx_pending_invoices_invoice
    ON pending_invoices(invoice);
"#;
