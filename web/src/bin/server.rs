//! Raffle reservation server.
//!
//! # Usage
//!
//! ```bash
//! # Start Postgres and Redis, then
//! DATABASE_URL=postgres://... REDIS_URL=redis://... cargo run --bin raffle-server
//! ```
//!
//! Every setting is an environment variable; see [`raffle_web::config::Config`].

use raffle_web::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,raffle_core=debug,raffle_web=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        reservation_window_secs = config.core.reservation_window.as_secs(),
        "Configuration loaded"
    );

    raffle_web::server::run(config).await
}
