//! Process bootstrap: wire the adapters into the core and serve HTTP.

use crate::config::Config;
use crate::routes::build_router;
use crate::state::{AppState, Readiness, ReadinessProbe};
use anyhow::Context;
use async_trait::async_trait;
use axum::{Router, http::HeaderName, routing::get};
use metrics_exporter_prometheus::PrometheusBuilder;
use raffle_core::environment::SystemClock;
use raffle_core::hub::LiveUpdateHub;
use raffle_core::lock::LockManager;
use raffle_core::payment::PaymentCoordinator;
use raffle_core::reservation::ReservationEngine;
use raffle_core::sweeper::ExpirationSweeper;
use raffle_postgres::PostgresStore;
use raffle_redis::RedisLockStore;
use raffle_stripe::StripeClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Readiness probe pinging Postgres and Redis.
#[derive(Clone)]
pub struct BackendProbe {
    store: PostgresStore,
    locks: RedisLockStore,
}

impl BackendProbe {
    /// Probe the given backends.
    #[must_use]
    pub const fn new(store: PostgresStore, locks: RedisLockStore) -> Self {
        Self { store, locks }
    }
}

#[async_trait]
impl ReadinessProbe for BackendProbe {
    async fn check(&self) -> Readiness {
        let (database, lock_store) = tokio::join!(self.store.ping(), self.locks.ping());
        if let Err(e) = &database {
            warn!(error = %e, "Database ping failed");
        }
        if let Err(e) = &lock_store {
            warn!(error = %e, "Lock store ping failed");
        }
        Readiness {
            database: database.is_ok(),
            lock_store: lock_store.is_ok(),
        }
    }
}

/// Run the server until Ctrl+C.
///
/// Connects to every backend, applies migrations, starts the sweeper and the metrics
/// listener, then serves the API. On shutdown the listener stops accepting, in-flight
/// requests drain, and the sweeper is given `shutdown_timeout` to finish its tick.
///
/// # Errors
///
/// Returns an error if a backend is unreachable at startup or a listener cannot bind.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = PostgresStore::connect_with(&config.postgres.url, &config.postgres.pool())
        .await
        .context("connecting to PostgreSQL")?;
    store.migrate().await.context("running migrations")?;
    info!("✓ PostgreSQL ready");

    let locks = RedisLockStore::new(&config.redis.url)
        .await
        .context("connecting to Redis")?;
    info!("✓ Redis ready");

    let stripe = StripeClient::new(config.stripe.client_config(config.core.provider_timeout))
        .context("building Stripe client")?;

    let store = Arc::new(store);
    let hub = LiveUpdateHub::new(config.websocket.subscriber_queue);
    let engine = Arc::new(ReservationEngine::new(
        store.clone(),
        store.clone(),
        LockManager::new(Arc::new(locks.clone())),
        Arc::new(hub.clone()),
        Arc::new(SystemClock),
        &config.core,
    ));
    let payments = Arc::new(PaymentCoordinator::new(
        engine,
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(stripe),
        &config.core,
    ));
    let sweeper = ExpirationSweeper::new(
        Arc::clone(&payments),
        store.clone(),
        config.core.sweeper.clone(),
    );

    let auth_header = HeaderName::try_from(config.auth_user_header.as_str())
        .context("invalid AUTH_USER_HEADER")?;
    let state = AppState::new(
        payments,
        hub,
        Arc::new(BackendProbe::new((*store).clone(), locks)),
        auth_header,
    )
    .with_websocket(config.websocket.clone())
    .with_webhook_timeout(config.server.webhook_timeout);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Metrics listener
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;
    let metrics_addr = socket_addr(&config.server.metrics_host, config.server.metrics_port)?;
    let metrics_app = Router::new().route("/metrics", get(move || async move { prometheus.render() }));
    let metrics_listener = TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("binding metrics listener on {metrics_addr}"))?;
    let mut metrics_shutdown = shutdown_rx.clone();
    let metrics_task = tokio::spawn(async move {
        let served = axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(async move {
                let _ = metrics_shutdown.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "Metrics server failed");
        }
    });
    info!("📊 Prometheus metrics at http://{metrics_addr}/metrics");

    let sweeper_task = tokio::spawn(sweeper.run(shutdown_rx));

    // API listener
    let addr = socket_addr(&config.server.host, config.server.port)?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding API listener on {addr}"))?;
    info!("🎟️ Raffle server listening on http://{addr}");

    let served = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Unable to listen for shutdown signal");
            }
            info!("🛑 Shutdown signal received, draining requests");
        })
        .await;

    let _ = shutdown_tx.send(true);
    let drained = tokio::time::timeout(config.server.shutdown_timeout, async {
        let _ = sweeper_task.await;
        let _ = metrics_task.await;
    })
    .await;
    if drained.is_err() {
        warn!(
            timeout_secs = config.server.shutdown_timeout.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    served.context("API server failed")?;
    info!("Shutdown complete");
    Ok(())
}

fn socket_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))
}
