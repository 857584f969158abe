//! Request context middleware.
//!
//! For every request the layer:
//!
//! 1. takes the `X-Correlation-ID` header, or generates a UUID when it is missing or malformed
//! 2. stores it in the request extensions as a [`CorrelationId`]
//! 3. runs the inner service inside an `http_request` span carrying the id
//! 4. echoes the id on the response and records `raffle_http_requests_total` and
//!    `raffle_http_request_duration_seconds`
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/reservations", post(create))
//!     .layer(request_context_layer());
//! ```

use crate::extractors::CorrelationId;
use axum::{extract::Request, http::HeaderValue, response::Response};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Build the request context layer.
#[must_use]
pub const fn request_context_layer() -> RequestContextLayer {
    RequestContextLayer
}

/// Layer installing [`RequestContext`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestContextLayer;

impl<S> Layer<S> for RequestContextLayer {
    type Service = RequestContext<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestContext { inner }
    }
}

/// Middleware service; see the module docs.
#[derive(Clone, Debug)]
pub struct RequestContext<S> {
    inner: S,
}

impl<S> Service<Request> for RequestContext<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);
        req.extensions_mut().insert(CorrelationId(correlation_id));

        let method = req.method().clone();
        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %method,
            uri = %req.uri(),
        );
        let started = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let mut response = match fut.await {
                    Ok(response) => response,
                    Err(err) => return Err(err),
                };

                let status = response.status();
                metrics::counter!(
                    "raffle_http_requests_total",
                    "method" => method.to_string(),
                    "status" => status.as_u16().to_string()
                )
                .increment(1);
                metrics::histogram!("raffle_http_request_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::debug!(status = status.as_u16(), "Request completed");

                if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
                    response.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                Ok(response)
            }
            .instrument(span),
        )
    }
}
