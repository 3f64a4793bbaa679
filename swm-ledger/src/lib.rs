//! The durable ledger (C1): SubAccount and PendingInvoice persistence over
//! SQLite, with the transactional invariants enforced inside
//! [`store::LedgerStore`].

mod error;
mod models;
mod schema;
mod store;

pub use error::{LedgerError, LedgerResult};
pub use models::{
    CreateSubAccountInput, FindPendingInvoiceFilter, InvoiceState, PendingInvoice,
    RegisterPendingInvoiceInput, SubAccount, SubAccountSecrets, TouchSubAccountInput,
};
pub use store::LedgerStore;
