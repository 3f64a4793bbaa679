//! `swm-core`: the daemon process. Wires the Sub-Wallet Registry (C3),
//! Request Router (C4), Sub-Wallet Service Endpoint (C5), Settlement
//! Correlator (C7), and Expiry Sweeper (C8) together over the lower-layer
//! `swm-ledger`/`swm-vault`/`swm-upstream`/`swm-api` crates.

pub mod admin;
pub mod config;
pub mod context;
pub mod correlator;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod registry;
pub mod router;
pub mod sweeper;
pub mod task;
pub mod transport;
