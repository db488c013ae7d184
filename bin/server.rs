// Bank Ledger Sync - Webhook Server
//
// Serves the bank-facing and queue-facing webhook endpoints. When
// SYNC_INTERVAL_SECS is set it also runs pull sync on that interval.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use bank_ledger_sync::webhook::routes;
use bank_ledger_sync::{logging, AppContext, Config, SyncService};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging()?;
    let config = Config::from_env()?;
    let ctx = AppContext::open(config)?;
    ctx.init_mirror()?;

    if let Some(interval) = ctx.config.sync_interval {
        match ctx.sync_service() {
            Ok(service) => {
                info!("Pull sync every {:?}", interval);
                tokio::spawn(run_periodic_sync(Arc::new(service), interval));
            }
            Err(err) => warn!("Periodic sync disabled: {:#}", err),
        }
    }

    let app = routes::router(ctx.webhook_state());

    let addr = ctx.config.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!("Webhook server listening on http://{}", addr);
    info!("  Bank webhook:  POST /webhook");
    info!("  Queue push:    POST /webhook/process");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn run_periodic_sync(service: Arc<SyncService>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    // A run can outlast the interval; never stack runs
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let report = service.run().await;
        if report.has_errors() {
            warn!("Periodic sync finished with errors: {}", report.summary());
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
