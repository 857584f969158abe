//! Custom Axum extractors.
//!
//! - [`AuthUser`]: the caller, as asserted by the upstream authenticator
//! - [`IdempotencyKey`]: optional `Idempotency-Key` header
//! - [`CorrelationId`]: id assigned by the request-context middleware

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use crate::state::AppState;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use raffle_core::types::UserId;
use uuid::Uuid;

/// Header carrying a client-chosen idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Authenticated caller.
///
/// Identity is established upstream; this service trusts the user id found in the
/// configured header (`AUTH_USER_HEADER`). Missing or malformed ids are rejected with
/// 401.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(&state.auth_header)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing authenticated user"))?;

        raw.trim()
            .parse::<UserId>()
            .map(Self)
            .map_err(|_| AppError::unauthorized("malformed authenticated user"))
    }
}

/// Optional `Idempotency-Key` header; blank values count as absent.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyKey(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(ToString::to_string);
        Ok(Self(key))
    }
}

/// Correlation ID for request tracing.
///
/// Prefers the id stored by the middleware, then the `X-Correlation-ID` header, and
/// generates one as a last resort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }
        let id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);
        Ok(Self(id))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn idempotency_key_is_trimmed_and_optional() {
        let req = Request::builder()
            .header("Idempotency-Key", "  key-1 ")
            .body(())
            .expect("Valid request");
        let (mut parts, ()) = req.into_parts();
        let key = IdempotencyKey::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");
        assert_eq!(key.0.as_deref(), Some("key-1"));

        let req = Request::builder()
            .header("Idempotency-Key", "   ")
            .body(())
            .expect("Valid request");
        let (mut parts, ()) = req.into_parts();
        let key = IdempotencyKey::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");
        assert!(key.0.is_none());
    }

    #[tokio::test]
    async fn correlation_id_prefers_extension() {
        let stored = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .expect("Valid request");
        let (mut parts, ()) = req.into_parts();
        parts.extensions.insert(CorrelationId(stored));

        let id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");
        assert_eq!(id.0, stored);
    }

    #[tokio::test]
    async fn correlation_id_falls_back_to_header() {
        let sent = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, sent.to_string())
            .body(())
            .expect("Valid request");
        let (mut parts, ()) = req.into_parts();

        let id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");
        assert_eq!(id.0, sent);
    }
}
