//! `Stripe-Signature` verification.
//!
//! The header looks like `t=1700000000,v1=5257a8...,v1=...`. The expected signature is
//! `HMAC-SHA256(secret, "{t}.{payload}")` in lowercase hex; any `v1` entry may match.
//! Timestamps further than the tolerance from now are rejected to blunt replays.

use crate::error::StripeError;
use crate::types::EventObject;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use raffle_core::provider::WebhookEvent;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Default replay window, matching Stripe's own libraries.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Verifies and parses webhook deliveries for one endpoint secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Result<SignatureHeader<'_>, StripeError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    StripeError::InvalidSignature("timestamp is not a number".to_string())
                })?);
            }
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| StripeError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(StripeError::InvalidSignature("missing v1 signature".to_string()));
    }
    Ok(SignatureHeader { timestamp, signatures })
}

impl WebhookVerifier {
    /// Create a verifier for `secret` (`whsec_...`).
    #[must_use]
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, StripeError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| StripeError::InvalidSignature(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Compute the `v1` signature for `payload` signed at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`StripeError::InvalidSignature`] if the secret cannot key an HMAC.
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> Result<String, StripeError> {
        Ok(hex::encode(self.mac(timestamp, payload)?.finalize().into_bytes()))
    }

    /// Build a complete `Stripe-Signature` header value; used by tests and tooling.
    ///
    /// # Errors
    ///
    /// Returns [`StripeError::InvalidSignature`] if the secret cannot key an HMAC.
    pub fn header(&self, timestamp: i64, payload: &[u8]) -> Result<String, StripeError> {
        Ok(format!("t={timestamp},v1={}", self.sign(timestamp, payload)?))
    }

    /// Check `header` against `payload` at wall-clock second `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StripeError::InvalidSignature`] if the header is malformed or no
    /// signature matches, [`StripeError::TimestampOutOfTolerance`] if it is stale.
    pub fn verify(&self, payload: &[u8], header: &str, now: i64) -> Result<(), StripeError> {
        let parsed = parse_header(header)?;
        let expected = self.sign(parsed.timestamp, payload)?;

        let matched = parsed
            .signatures
            .iter()
            .any(|candidate| constant_time_eq(candidate.as_bytes(), expected.as_bytes()));
        if !matched {
            return Err(StripeError::InvalidSignature(
                "no signature matches the payload".to_string(),
            ));
        }

        if now.abs_diff(parsed.timestamp) > self.tolerance.as_secs() {
            return Err(StripeError::TimestampOutOfTolerance);
        }
        Ok(())
    }

    /// Verify the delivery and decode it into a [`WebhookEvent`].
    ///
    /// # Errors
    ///
    /// Signature failures as in [`Self::verify`]; [`StripeError::MalformedEvent`] if the
    /// body is not an event carrying an object id.
    pub fn construct_event(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<WebhookEvent, StripeError> {
        self.verify(payload, header, now)?;

        let event: EventObject = serde_json::from_slice(payload)
            .map_err(|e| StripeError::MalformedEvent(e.to_string()))?;
        if event.id.is_empty() || event.event_type.is_empty() || event.data.object.id.is_empty() {
            return Err(StripeError::MalformedEvent("event is missing identifiers".to_string()));
        }
        Ok(event.into())
    }
}
