//! Loan API: entry point.
//!
//! Serves the loan lifecycle over a small Axum REST API. When a webhook URL is
//! configured, funding notifications are queued and delivered by a background
//! dispatcher task; otherwise they are only logged.

mod api;
mod config;
mod dispatcher;
mod errors;
mod events;
mod webhook;

use std::sync::Arc;

use loan_protocol::{InMemoryLedgerStore, KeyedLocks, LoanProtocol, LogNotifier, Notifier};
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use dispatcher::DispatcherState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    let shutdown = CancellationToken::new();

    // ─── Notifications ────────────────────────────────────
    let (notifier, worker): (Arc<dyn Notifier>, Option<JoinHandle<()>>) =
        match &config.notify_webhook_url {
            Some(url) => {
                let client = Client::builder().timeout(config.notify_timeout()).build()?;
                let (notifier, rx) = dispatcher::channel(config.notify_queue_capacity);
                let state = Arc::new(DispatcherState {
                    client,
                    webhook_url: url.clone(),
                    max_attempts: config.notify_max_attempts,
                });
                let worker = tokio::spawn(dispatcher::run(state, rx, shutdown.clone()));
                (Arc::new(notifier) as Arc<dyn Notifier>, Some(worker))
            }
            None => {
                info!("NOTIFY_WEBHOOK_URL not set; funding notifications are logged only");
                (Arc::new(LogNotifier) as Arc<dyn Notifier>, None)
            }
        };

    // ─── Protocol ─────────────────────────────────────────
    let protocol = LoanProtocol::with_locks(
        Arc::new(InMemoryLedgerStore::new()),
        notifier,
        KeyedLocks::new(config.lock_shards),
    );

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(api::ApiState {
        protocol: Arc::new(protocol),
        request_timeout: config.request_timeout(),
        shutdown: shutdown.clone(),
    }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(worker) = worker {
        match tokio::time::timeout(config.shutdown_grace(), worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Notification dispatcher ended abnormally: {e}"),
            Err(_) => warn!(
                "Notification dispatcher did not drain within {}s",
                config.shutdown_grace_secs
            ),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM, cancelling `token` so in-flight request
/// contexts observe the shutdown.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    token.cancel();
}
