//! Live number updates over WebSocket.
//!
//! # Connection
//!
//! ```text
//! ws://localhost:8080/raffles/:id/ws
//! ```
//!
//! # Message Format
//!
//! Every server message is `{type, raffle_id, data}`:
//!
//! ```json
//! {"type": "number_update", "raffle_id": "...", "data": {"number_ids": [7], "status": "reserved", "reservation_id": "..."}}
//! {"type": "reservation_expired", "raffle_id": "...", "data": {"reservation_id": "...", "number_ids": [7, 8]}}
//! {"type": "error", "raffle_id": "...", "data": {"code": "SUBSCRIPTION_DROPPED", "message": "..."}}
//! ```
//!
//! `status` is one of `reserved`, `sold`, `available`. An `error` message is sent when
//! the hub drops a subscriber that fell behind; the socket closes right after and the
//! client should reconnect and re-read availability.
//!
//! # Connection Limits
//!
//! - `max_connections` concurrent sockets per server (503 beyond that)
//! - frame and message size caps
//! - a WebSocket ping every 90% of `pong_timeout`; a peer silent for `pong_timeout` is closed

use crate::config::WebSocketConfig;
use crate::state::{AppState, ConnectionGuard};
use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, stream::StreamExt};
use raffle_core::hub::{LiveEvent, LiveUpdateHub, ReleaseReason};
use raffle_core::types::RaffleId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, info, warn};

/// Server message kinds.
///
/// There is no separate `reservation_created` kind: a new reservation reaches viewers
/// as one `number_update` with status `reserved` per held number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Availability of one or more numbers changed
    NumberUpdate,
    /// A reservation lapsed and its numbers are free again
    ReservationExpired,
    /// The subscription failed; the socket closes next
    Error,
}

/// Server message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsEnvelope {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: WsMessageType,
    /// Raffle the message is about
    pub raffle_id: RaffleId,
    /// Kind-specific payload
    pub data: serde_json::Value,
}

impl WsEnvelope {
    /// Translate a hub event into the client protocol.
    #[must_use]
    pub fn from_event(event: &LiveEvent) -> Self {
        let raffle_id = event.raffle_id();
        let (kind, data) = match event {
            LiveEvent::NumberReserved {
                reservation_id,
                number_id,
                user_id,
                ..
            } => (
                WsMessageType::NumberUpdate,
                json!({
                    "number_ids": [number_id],
                    "status": "reserved",
                    "reservation_id": reservation_id,
                    "user_id": user_id,
                }),
            ),
            LiveEvent::NumbersSold {
                reservation_id,
                number_ids,
                user_id,
                ..
            } => (
                WsMessageType::NumberUpdate,
                json!({
                    "number_ids": number_ids,
                    "status": "sold",
                    "reservation_id": reservation_id,
                    "user_id": user_id,
                }),
            ),
            LiveEvent::NumbersReleased {
                reservation_id,
                number_ids,
                reason: ReleaseReason::Cancelled,
                ..
            } => (
                WsMessageType::NumberUpdate,
                json!({
                    "number_ids": number_ids,
                    "status": "available",
                    "reservation_id": reservation_id,
                }),
            ),
            LiveEvent::NumbersReleased {
                reservation_id,
                number_ids,
                reason: ReleaseReason::Expired,
                ..
            } => (
                WsMessageType::ReservationExpired,
                json!({
                    "reservation_id": reservation_id,
                    "number_ids": number_ids,
                }),
            ),
        };
        Self {
            kind,
            raffle_id,
            data,
        }
    }

    /// Error envelope.
    #[must_use]
    pub fn error(raffle_id: RaffleId, code: &str, message: &str) -> Self {
        Self {
            kind: WsMessageType::Error,
            raffle_id,
            data: json!({ "code": code, "message": message }),
        }
    }

    fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                warn!(error = %e, "Failed to serialize WebSocket message");
                None
            }
        }
    }
}

/// `GET /raffles/:id/ws`
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn subscribe(
    ws: WebSocketUpgrade,
    Path(raffle_id): Path<RaffleId>,
    State(state): State<AppState>,
) -> Response {
    let Some(guard) = state.try_open_socket() else {
        warn!(
            current_connections = state.open_sockets(),
            "WebSocket connection limit exceeded"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Too many concurrent connections. Please try again later.",
        )
            .into_response();
    };

    let config = state.websocket.clone();
    let hub = state.hub.clone();
    ws.max_frame_size(config.max_frame_bytes)
        .max_message_size(config.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, raffle_id, hub, config, guard))
}

async fn handle_socket(
    socket: WebSocket,
    raffle_id: RaffleId,
    hub: LiveUpdateHub,
    config: WebSocketConfig,
    _guard: ConnectionGuard,
) {
    let mut subscription = hub.subscribe(raffle_id);
    info!(%raffle_id, "WebSocket subscriber connected");

    let (mut sender, mut receiver) = socket.split();
    let ping_every = config.ping_interval();
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);
    let silence = sleep(config.pong_timeout);
    tokio::pin!(silence);

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    // The hub dropped us: queue overflow.
                    let envelope = WsEnvelope::error(
                        raffle_id,
                        "SUBSCRIPTION_DROPPED",
                        "update queue overflowed; reconnect and reload availability",
                    );
                    if let Some(message) = envelope.to_message() {
                        let _ = sender.send(message).await;
                    }
                    warn!(%raffle_id, "WebSocket subscriber dropped by hub");
                    break;
                };
                let Some(message) = WsEnvelope::from_event(&event).to_message() else {
                    continue;
                };
                if sender.send(message).await.is_err() {
                    debug!("Client disconnected during send");
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Client closed the connection");
                    break;
                }
                Some(Ok(_)) => {
                    // Pongs and any other traffic prove the peer is alive.
                    silence.as_mut().reset(Instant::now() + config.pong_timeout);
                }
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive failed");
                    break;
                }
            },
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            () = &mut silence => {
                warn!(%raffle_id, "WebSocket peer timed out");
                break;
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    info!(%raffle_id, "WebSocket subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_core::types::{NumberId, ReservationId, UserId};

    #[test]
    fn reserved_number_becomes_number_update() {
        let raffle_id = RaffleId::new();
        let envelope = WsEnvelope::from_event(&LiveEvent::NumberReserved {
            raffle_id,
            reservation_id: ReservationId::new(),
            number_id: NumberId::new(7),
            user_id: UserId::new(),
        });

        assert_eq!(envelope.kind, WsMessageType::NumberUpdate);
        assert_eq!(envelope.raffle_id, raffle_id);
        assert_eq!(envelope.data["status"], "reserved");
        assert_eq!(envelope.data["number_ids"], json!([7]));
    }

    #[test]
    fn expiry_and_cancellation_are_distinguished() {
        let raffle_id = RaffleId::new();
        let released = |reason| LiveEvent::NumbersReleased {
            raffle_id,
            reservation_id: ReservationId::new(),
            number_ids: vec![NumberId::new(1), NumberId::new(2)],
            reason,
        };

        let expired = WsEnvelope::from_event(&released(ReleaseReason::Expired));
        assert_eq!(expired.kind, WsMessageType::ReservationExpired);

        let cancelled = WsEnvelope::from_event(&released(ReleaseReason::Cancelled));
        assert_eq!(cancelled.kind, WsMessageType::NumberUpdate);
        assert_eq!(cancelled.data["status"], "available");
    }

    #[test]
    fn envelope_wire_shape() {
        let raffle_id = RaffleId::new();
        let json = serde_json::to_value(WsEnvelope::error(raffle_id, "SUBSCRIPTION_DROPPED", "slow"))
            .unwrap_or_default();

        assert_eq!(json["type"], "error");
        assert_eq!(json["raffle_id"], raffle_id.to_string());
        assert_eq!(json["data"]["code"], "SUBSCRIPTION_DROPPED");
    }
}
