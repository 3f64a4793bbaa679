//! Operator-supplied configuration: CLI flags via `argh` layered over
//! environment variables (argh struct + `or_env`-style env fallback,
//! rather than a config-file parser).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// `swm-core` daemon flags.
#[derive(argh::FromArgs)]
pub struct Args {
    /// path to the SQLite ledger database file.
    ///
    /// Default: `swm.sqlite3`.
    /// Env: `SWM_DB_PATH`.
    #[argh(option)]
    pub db_path: Option<PathBuf>,

    /// comma-separated relay URLs this process advertises to new sub-wallets.
    ///
    /// Env: `SWM_RELAYS`.
    #[argh(option)]
    pub relays: Option<String>,

    /// sweep interval for the expiry sweeper, in seconds.
    ///
    /// Default: 60.
    /// Env: `SWM_SWEEP_INTERVAL_SECS`.
    #[argh(option)]
    pub sweep_interval_secs: Option<u64>,

    /// upstream timeout for `get_info`, in seconds.
    ///
    /// Default: 15.
    /// Env: `SWM_TIMEOUT_INFO_SECS`.
    #[argh(option)]
    pub timeout_info_secs: Option<u64>,

    /// upstream timeout for `make_invoice`, in seconds.
    ///
    /// Default: 20.
    /// Env: `SWM_TIMEOUT_MAKE_INVOICE_SECS`.
    #[argh(option)]
    pub timeout_make_invoice_secs: Option<u64>,

    /// upstream timeout for `lookup_invoice`, in seconds.
    ///
    /// Default: 20.
    /// Env: `SWM_TIMEOUT_LOOKUP_INVOICE_SECS`.
    #[argh(option)]
    pub timeout_lookup_invoice_secs: Option<u64>,

    /// upstream timeout for `pay_invoice`, in seconds.
    ///
    /// Default: 60.
    /// Env: `SWM_TIMEOUT_PAY_INVOICE_SECS`.
    #[argh(option)]
    pub timeout_pay_invoice_secs: Option<u64>,

    /// override the `RUST_LOG` directive used by the tracing subscriber.
    #[argh(option)]
    pub log_level: Option<String>,
}

/// Per-operation budgets for calls into the upstream adapter. A handler that
/// exceeds its budget returns a `timeout` error to the client rather than
/// hanging the sub-wallet's worker indefinitely.
#[derive(Clone, Copy, Debug)]
pub struct UpstreamTimeouts {
    pub info: Duration,
    pub make_invoice: Duration,
    pub lookup_invoice: Duration,
    pub pay_invoice: Duration,
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            info: Duration::from_secs(15),
            make_invoice: Duration::from_secs(20),
            lookup_invoice: Duration::from_secs(20),
            pay_invoice: Duration::from_secs(60),
        }
    }
}

/// The fully-resolved configuration used to wire up a [`crate::context::Context`].
pub struct Config {
    pub db_path: PathBuf,
    pub relays: Vec<String>,
    pub sweep_interval: Duration,
    pub upstream_timeouts: UpstreamTimeouts,
    pub storage_master_key: String,
    pub log_level: Option<String>,
}

impl Config {
    /// Resolves CLI args, falling back to environment variables, then to
    /// defaults. `STORAGE_MASTER_KEY` has no default: it is a required
    /// secret with no safe fallback value.
    pub fn resolve(args: Args) -> anyhow::Result<Self> {
        let db_path = args
            .db_path
            .or_else(|| std::env::var("SWM_DB_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("swm.sqlite3"));

        let relays_raw = args
            .relays
            .or_else(|| std::env::var("SWM_RELAYS").ok())
            .unwrap_or_default();
        let relays = relays_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let sweep_interval_secs = args
            .sweep_interval_secs
            .or_else(|| {
                std::env::var("SWM_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(60);

        let defaults = UpstreamTimeouts::default();
        let upstream_timeouts = UpstreamTimeouts {
            info: resolve_timeout_secs(args.timeout_info_secs, "SWM_TIMEOUT_INFO_SECS", defaults.info),
            make_invoice: resolve_timeout_secs(
                args.timeout_make_invoice_secs,
                "SWM_TIMEOUT_MAKE_INVOICE_SECS",
                defaults.make_invoice,
            ),
            lookup_invoice: resolve_timeout_secs(
                args.timeout_lookup_invoice_secs,
                "SWM_TIMEOUT_LOOKUP_INVOICE_SECS",
                defaults.lookup_invoice,
            ),
            pay_invoice: resolve_timeout_secs(
                args.timeout_pay_invoice_secs,
                "SWM_TIMEOUT_PAY_INVOICE_SECS",
                defaults.pay_invoice,
            ),
        };

        let storage_master_key = std::env::var("STORAGE_MASTER_KEY")
            .context("STORAGE_MASTER_KEY environment variable is required")?;

        let log_level = args.log_level.or_else(|| std::env::var("RUST_LOG").ok());

        Ok(Self {
            db_path,
            relays,
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            upstream_timeouts,
            storage_master_key,
            log_level,
        })
    }
}

fn resolve_timeout_secs(arg: Option<u64>, env_var: &str, default: Duration) -> Duration {
    arg.or_else(|| std::env::var(env_var).ok().and_then(|s| s.parse().ok()))
        .map(Duration::from_secs)
        .unwrap_or(default)
}
