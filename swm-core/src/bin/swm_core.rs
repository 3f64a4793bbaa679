//! The `swm-core` daemon entrypoint: parse CLI flags, resolve config, wire
//! the context, run until shutdown. A thin `main`: `argh::from_env` then
//! hand off, plus the async runtime and signal-driven shutdown.

use std::sync::Arc;

use swm_core::config::{Args, Config};
use swm_core::context::Context;
use swm_core::task::{join_tasks_and_shutdown, Shutdown};
use swm_core::transport::RelayTransport;
use swm_upstream::UpstreamWallet;
use tracing::info;

/// Connecting to real relay websockets and a real Lightning wallet backend
/// is out of scope; until a real `RelayTransport`/`UpstreamWallet` is wired
/// in by an embedding binary, the daemon runs against the in-memory fakes
/// so it is still a runnable process end to end.
fn placeholder_collaborators() -> (Arc<dyn RelayTransport>, Arc<dyn UpstreamWallet>) {
    (
        Arc::new(swm_core::transport::MockRelayTransport::new()),
        Arc::new(swm_upstream::MockUpstreamWallet::new()),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    let config = Config::resolve(args)?;
    swm_core::logging::init(config.log_level.as_deref());

    info!(db_path = %config.db_path.display(), "starting swm-core");

    let (transport, upstream) = placeholder_collaborators();
    let context = Context::build(&config, upstream, transport).await?;

    let shutdown = Shutdown::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c, shutting down");
        shutdown_signal.send();
    });

    let static_tasks = context.spawn_static_tasks(shutdown.clone());
    join_tasks_and_shutdown(static_tasks, shutdown, std::time::Duration::from_secs(10)).await;

    Ok(())
}
