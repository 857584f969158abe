//! Stripe implementation of the raffle payment provider.
//!
//! [`StripeClient`] talks to the payment intents API with form-encoded requests and a
//! bearer secret key, and verifies `Stripe-Signature` headers on webhook deliveries.
//! Failures convert into [`raffle_core::RaffleError`]: transport and API errors become
//! `ProviderError`, signature and payload problems become `InvalidWebhook`.
//!
//! # Example
//!
//! ```no_run
//! use raffle_core::provider::PaymentProvider;
//! use raffle_stripe::{StripeClient, StripeConfig};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), raffle_stripe::StripeError> {
//! let client = StripeClient::new(StripeConfig::new("sk_test_...", "whsec_..."))?;
//! let provider: Arc<dyn PaymentProvider> = Arc::new(client);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod types;
pub mod webhook;

pub use client::{DEFAULT_API_URL, StripeClient, StripeConfig};
pub use error::StripeError;
pub use webhook::WebhookVerifier;
