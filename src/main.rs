//! Snooze Relayer - gas-price gated broadcaster for pre-signed transactions
//!
//! Clients register signed EVM transactions together with a fee threshold.
//! The relayer broadcasts each one once the network fee drops to or below
//! that threshold, follows it to a receipt and reports the outcome.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod engine;
mod error;
mod events;
mod metrics;
mod notify;
mod state;
mod tx;

use api::AppState;
use chain::{ChainProvider, FeeOracle, TransactionSubmitter};
use config::Settings;
use engine::BroadcastEvaluator;
use events::EventBus;
use metrics::MetricsServer;
use notify::{NotificationListener, TelegramNotifier};
use tx::{SubmissionResolver, TransactionSigner, WalletSigner};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Snooze Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {} on chain {} ({})",
        settings.engine.instance_id, settings.chain.name, settings.chain.chain_id
    );

    // Store, with table bootstrap
    let store = state::connect(&settings.database).await?;

    // Chain access
    let provider = Arc::new(
        ChainProvider::new(settings.chain.clone(), settings.engine.request_timeout())?
            .with_submit_timeout(settings.engine.submit_timeout()),
    );
    info!("Chain provider initialized");

    let signer: Option<Arc<dyn TransactionSigner>> =
        match WalletSigner::from_config(&settings.wallet, provider.clone())? {
            Some(signer) => Some(Arc::new(signer)),
            None => {
                warn!("No signing wallet configured, intent registration disabled");
                None
            }
        };

    let events = EventBus::new();
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    // Success notifications
    let notifier =
        TelegramNotifier::new(settings.telegram.clone(), settings.engine.request_timeout())?;
    let listener = NotificationListener::new(
        Arc::new(notifier),
        settings.chain.explorer_tx_url.clone(),
        settings.telegram.mention.clone(),
    );
    tasks.push(tokio::spawn(listener.run(events.subscribe(), shutdown.clone())));

    // Broadcast engine
    let oracle: Arc<dyn FeeOracle> = provider.clone();
    let submitter: Arc<dyn TransactionSubmitter> = provider.clone();
    let receipt_policy = settings.engine.receipt_policy();
    info!(
        "Receipt polling: {} attempts, at most {:?} between first and last",
        receipt_policy.max_attempts(),
        receipt_policy.worst_case_wait()
    );
    let resolver = SubmissionResolver::new(
        submitter,
        store.clone(),
        events.clone(),
        receipt_policy,
    );
    let evaluator = Arc::new(BroadcastEvaluator::new(
        store.clone(),
        oracle.clone(),
        resolver,
        settings.chain.chain_id,
        settings.engine.max_concurrent_resolutions,
    ));
    info!("Broadcast evaluator initialized");

    // Start API server
    tasks.push(tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            store: store.clone(),
            oracle: oracle.clone(),
            evaluator: evaluator.clone(),
            signer,
            events: events.clone(),
            shutdown: shutdown.clone(),
        };
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = api::run_server(config, state, shutdown).await {
                error!("API server error: {}", e);
            }
        }
    }));

    // Start scheduled evaluation
    if settings.engine.schedule_enabled {
        tasks.push(tokio::spawn({
            let evaluator = evaluator.clone();
            let interval = Duration::from_secs(settings.engine.poll_interval_secs);
            let shutdown = shutdown.clone();
            async move { evaluator.run(interval, shutdown).await }
        }));
    } else {
        info!("Scheduled evaluation disabled, cycles run on GET /tx/pending only");
    }

    // Start metrics server
    let metrics_handle = settings.metrics.enabled.then(|| {
        let server = MetricsServer::new(settings.metrics.port);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Health check loop
    tasks.push(tokio::spawn({
        let provider = provider.clone();
        let store = store.clone();
        let interval = Duration::from_secs(settings.engine.health_check_interval_secs.max(1));
        let shutdown = shutdown.clone();
        async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let chain_ok = provider.health_check().await;
                metrics::record_chain_health(provider.chain_id(), chain_ok);
                if !chain_ok {
                    warn!("Chain {} health check failed", provider.chain_id());
                }

                match store.health_check().await {
                    Ok(()) if chain_ok => metrics::record_health_check(),
                    Ok(()) => metrics::record_health_check_failure(),
                    Err(e) => {
                        warn!("Database health check failed: {}", e);
                        metrics::record_health_check_failure();
                    }
                }
            }
        }
    }));

    info!("Snooze Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");
    shutdown.cancel();

    // A broadcast in flight may need the full submit deadline to be recorded
    let grace = settings.engine.submit_timeout() + SHUTDOWN_GRACE;
    let stopped = tokio::time::timeout(grace, async {
        futures::future::join_all(tasks).await;
        evaluator.drain().await;
    })
    .await;
    if stopped.is_err() {
        warn!("Background tasks did not stop within {:?}", grace);
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Snooze Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,snooze_relayer=debug,sqlx=warn,hyper=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
