use std::sync::Arc;
use std::time::Duration;

use seisami_core::sync::{Reconciler, SyncScheduler, WakeListener};

use crate::commands::common::{fetch_mode, http_transport, open_store};
use crate::config::ClientConfig;
use crate::error::CliError;

/// Run scheduled passes plus wake-up driven passes until Ctrl-C.
pub async fn run_watch(
    config: &ClientConfig,
    interval: Duration,
    delta: bool,
) -> Result<(), CliError> {
    let (api_url, access_token) = config.remote()?;
    let transport = http_transport(config)?;
    let store = open_store(&config.db_path).await?;
    let device_id = store.device_id().await?;
    let listener = WakeListener::new(api_url, access_token, &device_id)?;

    let reconciler =
        Arc::new(Reconciler::new(store, transport).with_fetch_mode(fetch_mode(delta)));
    let scheduler = SyncScheduler::spawn(reconciler, Some(interval));
    tracing::info!(
        interval_secs = interval.as_secs(),
        device = %device_id,
        "Watching for changes"
    );
    println!("Syncing every {}s; press Ctrl-C to stop", interval.as_secs());

    tokio::select! {
        () = listener.run(|table| {
            if !scheduler.request(table) {
                tracing::warn!(table = %table, "Scheduler stopped; dropping wake-up");
            }
        }) => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    println!("Stopping; waiting for running passes");
    scheduler.shutdown().await;
    Ok(())
}
