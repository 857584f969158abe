//! Application state for Axum handlers.

use crate::config::WebSocketConfig;
use async_trait::async_trait;
use axum::http::HeaderName;
use raffle_core::hub::LiveUpdateHub;
use raffle_core::payment::PaymentCoordinator;
use raffle_core::reservation::ReservationEngine;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Dependency status reported by `/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    /// System of record answered
    pub database: bool,
    /// Lock store answered
    pub lock_store: bool,
}

impl Readiness {
    /// Whether traffic may be routed here.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.database && self.lock_store
    }
}

/// Checks the backing services.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Probe every dependency once.
    async fn check(&self) -> Readiness;
}

/// Probe that always reports ready; for in-memory deployments and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

#[async_trait]
impl ReadinessProbe for AlwaysReady {
    async fn check(&self) -> Readiness {
        Readiness {
            database: true,
            lock_store: true,
        }
    }
}

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Reservation lifecycle
    pub engine: Arc<ReservationEngine>,
    /// Payment intents and webhooks
    pub payments: Arc<PaymentCoordinator>,
    /// Live-update fan-out
    pub hub: LiveUpdateHub,
    /// Dependency checks for `/ready`
    pub readiness: Arc<dyn ReadinessProbe>,
    /// Header the upstream authenticator writes the user id into
    pub auth_header: HeaderName,
    /// WebSocket limits
    pub websocket: WebSocketConfig,
    /// Deadline for processing one webhook delivery
    pub webhook_timeout: Duration,
    ws_connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Create the state.
    #[must_use]
    pub fn new(
        payments: Arc<PaymentCoordinator>,
        hub: LiveUpdateHub,
        readiness: Arc<dyn ReadinessProbe>,
        auth_header: HeaderName,
    ) -> Self {
        Self {
            engine: Arc::clone(payments.engine()),
            payments,
            hub,
            readiness,
            auth_header,
            websocket: WebSocketConfig::default(),
            webhook_timeout: Duration::from_secs(25),
            ws_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Override the WebSocket limits.
    #[must_use]
    pub fn with_websocket(mut self, websocket: WebSocketConfig) -> Self {
        self.websocket = websocket;
        self
    }

    /// Override the webhook deadline.
    #[must_use]
    pub const fn with_webhook_timeout(mut self, timeout: Duration) -> Self {
        self.webhook_timeout = timeout;
        self
    }

    /// Reserve a WebSocket slot; `None` once the cap is reached.
    ///
    /// The slot is returned when the guard drops.
    #[must_use]
    pub fn try_open_socket(&self) -> Option<ConnectionGuard> {
        let max = self.websocket.max_connections;
        self.ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()
            .map(|previous| {
                #[allow(clippy::cast_precision_loss)]
                metrics::gauge!("raffle_ws_connections").set((previous + 1) as f64);
                ConnectionGuard {
                    counter: Arc::clone(&self.ws_connections),
                }
            })
    }

    /// Open WebSocket connections.
    #[must_use]
    pub fn open_sockets(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }
}

/// Holds one WebSocket slot.
#[derive(Debug)]
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.counter.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("raffle_ws_connections").set(remaining as f64);
    }
}
