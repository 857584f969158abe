//! Router configuration.

use crate::handlers::{health, payments, reservations, webhooks, websocket};
use crate::middleware::request_context_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Health checks and the webhook receiver need no caller identity; every other HTTP
/// route requires the authenticated-user header.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Reservations
        .route(
            "/reservations",
            post(reservations::create).get(reservations::list),
        )
        .route("/reservations/:id", get(reservations::get))
        .route("/reservations/:id/cancel", post(reservations::cancel))
        .route("/reservations/:id/confirm", post(reservations::confirm))
        .route("/reservations/:id/add-number", post(reservations::add_number))
        // Raffle views
        .route(
            "/raffles/:id/my-reservation",
            get(reservations::my_reservation),
        )
        .route("/raffles/:id/ws", get(websocket::subscribe))
        // Payments
        .route("/payments", get(payments::list))
        .route("/payments/intent", post(payments::create_intent))
        .route("/payments/:id", get(payments::get))
        .route("/webhooks/payments", post(webhooks::receive))
        .layer(TraceLayer::new_for_http())
        .layer(request_context_layer())
        .with_state(state)
}
