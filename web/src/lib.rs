//! HTTP and WebSocket surface for the raffle reservation core.
//!
//! Handlers are thin: they extract the caller and the request body, call into
//! [`raffle_core`], and map [`raffle_core::RaffleError`] onto a status code through
//! [`AppError`].
//!
//! # Example
//!
//! ```ignore
//! use raffle_web::{AppState, build_router};
//!
//! let state = AppState::new(payments, hub, readiness, auth_header);
//! let app = build_router(state);
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::AppError;
pub use extractors::{AuthUser, CorrelationId, IdempotencyKey};
pub use middleware::{CORRELATION_ID_HEADER, request_context_layer};
pub use routes::build_router;
pub use state::{AlwaysReady, AppState, Readiness, ReadinessProbe};
