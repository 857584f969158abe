//! End-to-end HTTP tests against the in-memory core.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use futures::{SinkExt, StreamExt};
use raffle_core::config::CoreConfig;
use raffle_core::environment::Clock;
use raffle_core::hub::LiveUpdateHub;
use raffle_core::lock::LockManager;
use raffle_core::mocks::{
    InMemoryLockStore, InMemoryStore, MockPaymentProvider, TestClock, VALID_SIGNATURE,
};
use raffle_core::payment::PaymentCoordinator;
use raffle_core::repository::PaymentRepository;
use raffle_core::reservation::ReservationEngine;
use raffle_core::types::{
    Money, NumberId, PaymentId, PaymentStatus, PaymentUpdate, RaffleId, RaffleStatus, UserId,
};
use raffle_web::config::WebSocketConfig;
use raffle_web::handlers::webhooks::SIGNATURE_HEADER;
use raffle_web::{AlwaysReady, AppState, Readiness, ReadinessProbe, build_router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

const AUTH_HEADER: &str = "x-authenticated-user";

struct Harness {
    server: TestServer,
    state: AppState,
    store: Arc<InMemoryStore>,
    clock: Arc<TestClock>,
    raffle_id: RaffleId,
}

impl Harness {
    fn new() -> Self {
        Self::with_probe(Arc::new(AlwaysReady))
    }

    fn with_probe(readiness: Arc<dyn ReadinessProbe>) -> Self {
        let config = CoreConfig::default();
        let clock = Arc::new(TestClock::default());
        let store = Arc::new(InMemoryStore::new());
        let locks = Arc::new(InMemoryLockStore::with_clock(clock.clone()));
        let hub = LiveUpdateHub::new(64);

        let engine = Arc::new(ReservationEngine::new(
            store.clone(),
            store.clone(),
            LockManager::new(locks),
            Arc::new(hub.clone()),
            clock.clone(),
            &config,
        ));
        let payments = Arc::new(PaymentCoordinator::new(
            engine,
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(MockPaymentProvider::new()),
            &config,
        ));
        let state = AppState::new(
            payments,
            hub,
            readiness,
            HeaderName::from_static(AUTH_HEADER),
        );
        let raffle_id = store.add_raffle(
            "Mountain bike",
            RaffleStatus::Active,
            Money::from_cents(1500),
            100,
        );
        let server = TestServer::new(build_router(state.clone())).expect("test server");

        Self {
            server,
            state,
            store,
            clock,
            raffle_id,
        }
    }

    async fn reserve(&self, user: UserId, numbers: &[i32], session: &str) -> Value {
        let response = self
            .server
            .post("/reservations")
            .add_header(auth(), user_value(user))
            .json(&json!({
                "raffle_id": self.raffle_id,
                "number_ids": numbers,
                "session_id": session,
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    async fn open_intent(&self, user: UserId, reservation_id: &Value) -> Value {
        let response = self
            .server
            .post("/payments/intent")
            .add_header(auth(), user_value(user))
            .json(&json!({ "reservation_id": reservation_id }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    async fn provider_intent_id(&self, user: UserId, payment_id: &Value) -> String {
        let payment: Value = self
            .server
            .get(&format!("/payments/{}", payment_id.as_str().unwrap()))
            .add_header(auth(), user_value(user))
            .await
            .json();
        payment["provider_intent_id"].as_str().unwrap().to_string()
    }
}

fn auth() -> HeaderName {
    HeaderName::from_static(AUTH_HEADER)
}

fn user_value(user: UserId) -> HeaderValue {
    HeaderValue::from_str(&user.to_string()).unwrap()
}

#[tokio::test]
async fn reserve_pay_and_confirm() {
    let h = Harness::new();
    let user = UserId::new();

    let reservation = h.reserve(user, &[7, 8], "checkout-1").await;
    assert_eq!(reservation["status"], "pending");
    assert_eq!(reservation["total_amount"], 3000);
    let reservation_id = reservation["id"].clone();

    let intent = h.open_intent(user, &reservation_id).await;
    assert_eq!(intent["amount"], 3000);
    assert_eq!(intent["currency"], "usd");
    assert!(!intent["client_secret"].as_str().unwrap().is_empty());

    // Confirming before the provider reports success is refused.
    let early = h
        .server
        .post(&format!("/reservations/{}/confirm", reservation_id.as_str().unwrap()))
        .add_header(auth(), user_value(user))
        .await;
    early.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(early.json::<Value>()["code"], "PAYMENT_NOT_COMPLETED");

    let intent_id = h.provider_intent_id(user, &intent["payment_id"]).await;
    let webhook = h
        .server
        .post("/webhooks/payments")
        .add_header(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_static(VALID_SIGNATURE),
        )
        .bytes(MockPaymentProvider::webhook_payload("payment_intent.succeeded", &intent_id).into())
        .await;
    webhook.assert_status_ok();
    assert_eq!(webhook.json::<Value>()["outcome"], "applied");

    let confirmed = h
        .server
        .post(&format!("/reservations/{}/confirm", reservation_id.as_str().unwrap()))
        .add_header(auth(), user_value(user))
        .await;
    confirmed.assert_status_ok();
    assert_eq!(confirmed.json::<Value>()["status"], "confirmed");

    let raffle_id = h.raffle_id;
    assert_eq!(h.store.owner_of(raffle_id, NumberId::new(7)), Some(user));
    assert_eq!(h.store.owner_of(raffle_id, NumberId::new(8)), Some(user));
}

#[tokio::test]
async fn taken_numbers_conflict() {
    let h = Harness::new();
    h.reserve(UserId::new(), &[5], "first").await;

    let response = h
        .server
        .post("/reservations")
        .add_header(auth(), user_value(UserId::new()))
        .json(&json!({
            "raffle_id": h.raffle_id,
            "number_ids": [5, 6],
            "session_id": "second",
        }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["code"], "NUMBERS_UNAVAILABLE");
}

#[tokio::test]
async fn requests_without_identity_are_unauthorized() {
    let h = Harness::new();

    let response = h
        .server
        .post("/reservations")
        .json(&json!({
            "raffle_id": h.raffle_id,
            "number_ids": [1],
            "session_id": "s",
        }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = h
        .server
        .get("/payments")
        .add_header(auth(), HeaderValue::from_static("not-a-user"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let h = Harness::new();

    let response = h
        .server
        .post("/reservations")
        .add_header(auth(), user_value(UserId::new()))
        .json(&json!({ "raffle_id": h.raffle_id }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_selection_is_rejected() {
    let h = Harness::new();

    let response = h
        .server
        .post("/reservations")
        .add_header(auth(), user_value(UserId::new()))
        .json(&json!({
            "raffle_id": h.raffle_id,
            "number_ids": [],
            "session_id": "s",
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "NO_NUMBERS_SELECTED");
}

#[tokio::test]
async fn idempotency_header_replays_the_first_intent() {
    let h = Harness::new();
    let user = UserId::new();
    let reservation = h.reserve(user, &[3], "s").await;

    let send = |key: &'static str| {
        h.server
            .post("/payments/intent")
            .add_header(auth(), user_value(user))
            .add_header(
                HeaderName::from_static("idempotency-key"),
                HeaderValue::from_static(key),
            )
            .json(&json!({
                "reservation_id": reservation["id"],
                "idempotency_key": "ignored-body-key",
            }))
    };

    let first = send("pay-1").await;
    first.assert_status(StatusCode::CREATED);
    let second = send("pay-1").await;
    second.assert_status(StatusCode::CREATED);

    assert_eq!(
        first.json::<Value>()["payment_id"],
        second.json::<Value>()["payment_id"]
    );
}

#[tokio::test]
async fn other_users_cannot_read_a_reservation() {
    let h = Harness::new();
    let reservation = h.reserve(UserId::new(), &[9], "s").await;

    let response = h
        .server
        .get(&format!("/reservations/{}", reservation["id"].as_str().unwrap()))
        .add_header(auth(), user_value(UserId::new()))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cancel_releases_numbers_and_blocks_confirm() {
    let h = Harness::new();
    let user = UserId::new();
    let reservation = h.reserve(user, &[11], "s").await;
    let id = reservation["id"].as_str().unwrap().to_string();

    let cancelled = h
        .server
        .post(&format!("/reservations/{id}/cancel"))
        .add_header(auth(), user_value(user))
        .await;
    cancelled.assert_status_ok();
    assert_eq!(cancelled.json::<Value>()["status"], "cancelled");

    // The number is free for someone else.
    h.reserve(UserId::new(), &[11], "other").await;
}

#[tokio::test]
async fn paid_reservation_cancel_is_refused() {
    let h = Harness::new();
    let user = UserId::new();
    let reservation = h.reserve(user, &[12], "s").await;
    let id = reservation["id"].as_str().unwrap().to_string();
    let intent = h.open_intent(user, &reservation["id"]).await;

    // Payment recorded as succeeded, reservation not confirmed yet.
    let payment_id: PaymentId = serde_json::from_value(intent["payment_id"].clone()).unwrap();
    let paid = PaymentUpdate::status(PaymentStatus::Succeeded, h.clock.now());
    h.store
        .update_payment(payment_id, &[PaymentStatus::Pending], &paid)
        .await
        .unwrap();

    let refused = h
        .server
        .post(&format!("/reservations/{id}/cancel"))
        .add_header(auth(), user_value(user))
        .await;
    refused.assert_status(StatusCode::CONFLICT);
    assert_eq!(refused.json::<Value>()["code"], "ALREADY_CONFIRMED");
    assert_eq!(h.store.owner_of(h.raffle_id, NumberId::new(12)), Some(user));
}

#[tokio::test]
async fn add_number_grows_the_reservation() {
    let h = Harness::new();
    let user = UserId::new();
    let reservation = h.reserve(user, &[20], "s").await;
    let id = reservation["id"].as_str().unwrap().to_string();

    let grown = h
        .server
        .post(&format!("/reservations/{id}/add-number"))
        .add_header(auth(), user_value(user))
        .json(&json!({ "number_id": 21 }))
        .await;
    grown.assert_status_ok();
    let body: Value = grown.json();
    assert_eq!(body["number_ids"], json!([20, 21]));
    assert_eq!(body["total_amount"], 3000);

    let duplicate = h
        .server
        .post(&format!("/reservations/{id}/add-number"))
        .add_header(auth(), user_value(user))
        .json(&json!({ "number_id": 21 }))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);
    assert_eq!(
        duplicate.json::<Value>()["code"],
        "NUMBER_ALREADY_IN_RESERVATION"
    );
}

#[tokio::test]
async fn my_reservation_wraps_in_data() {
    let h = Harness::new();
    let user = UserId::new();
    let path = format!("/raffles/{}/my-reservation", h.raffle_id);

    let none: Value = h
        .server
        .get(&path)
        .add_header(auth(), user_value(user))
        .await
        .json();
    assert_eq!(none, json!({ "data": null }));

    let reservation = h.reserve(user, &[42], "s").await;
    let some: Value = h
        .server
        .get(&path)
        .add_header(auth(), user_value(user))
        .await
        .json();
    assert_eq!(some["data"]["id"], reservation["id"]);

    // Past the window the reservation is no longer live.
    h.clock.advance(chrono::Duration::seconds(301));
    let lapsed: Value = h
        .server
        .get(&path)
        .add_header(auth(), user_value(user))
        .await
        .json();
    assert_eq!(lapsed, json!({ "data": null }));
}

#[tokio::test]
async fn webhook_signature_is_enforced() {
    let h = Harness::new();
    let payload = MockPaymentProvider::webhook_payload("payment_intent.succeeded", "pi_unknown");

    let missing = h
        .server
        .post("/webhooks/payments")
        .bytes(payload.clone().into())
        .await;
    missing.assert_status(StatusCode::BAD_REQUEST);

    let forged = h
        .server
        .post("/webhooks/payments")
        .add_header(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_static("forged"),
        )
        .bytes(payload.into())
        .await;
    forged.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(forged.json::<Value>()["code"], "INVALID_WEBHOOK");
}

#[tokio::test]
async fn unknown_intent_webhook_is_acknowledged() {
    let h = Harness::new();

    let response = h
        .server
        .post("/webhooks/payments")
        .add_header(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_static(VALID_SIGNATURE),
        )
        .bytes(MockPaymentProvider::webhook_payload("payment_intent.succeeded", "pi_unknown").into())
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["outcome"], "ignored");
}

#[tokio::test]
async fn payments_list_is_scoped_to_the_caller() {
    let h = Harness::new();
    let user = UserId::new();
    let reservation = h.reserve(user, &[50], "s").await;
    h.open_intent(user, &reservation["id"]).await;

    let mine: Value = h
        .server
        .get("/payments")
        .add_header(auth(), user_value(user))
        .await
        .json();
    assert_eq!(mine.as_array().map(Vec::len), Some(1));

    let theirs: Value = h
        .server
        .get("/payments")
        .add_header(auth(), user_value(UserId::new()))
        .await
        .json();
    assert_eq!(theirs, json!([]));
}

#[tokio::test]
async fn health_and_readiness() {
    let h = Harness::new();

    let health = h.server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Value>()["status"], "ok");

    let ready = h.server.get("/ready").await;
    ready.assert_status_ok();
    assert_eq!(ready.json::<Value>()["ready"], true);
}

struct DatabaseDown;

#[async_trait]
impl ReadinessProbe for DatabaseDown {
    async fn check(&self) -> Readiness {
        Readiness {
            database: false,
            lock_store: true,
        }
    }
}

#[tokio::test]
async fn readiness_reports_failing_dependency() {
    let h = Harness::with_probe(Arc::new(DatabaseDown));

    let ready = h.server.get("/ready").await;
    ready.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = ready.json();
    assert_eq!(body["ready"], false);
    assert_eq!(body["database"], false);
    assert_eq!(body["lock_store"], true);
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let h = Harness::new();

    let response = h.server.get("/health").await;
    let id = response.header("x-correlation-id");
    assert!(uuid_like(id.to_str().unwrap()));
}

fn uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4
}

#[tokio::test]
async fn websocket_slots_are_capped() {
    let h = Harness::new();
    let state = h.state.clone().with_websocket(WebSocketConfig {
        max_connections: 2,
        ..WebSocketConfig::default()
    });

    let first = state.try_open_socket().expect("slot 1");
    let _second = state.try_open_socket().expect("slot 2");
    assert!(state.try_open_socket().is_none());
    assert_eq!(state.open_sockets(), 2);

    drop(first);
    assert_eq!(state.open_sockets(), 1);
    assert!(state.try_open_socket().is_some());
}

async fn serve(state: AppState) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

async fn wait_for_sockets(state: &AppState, expected: usize) {
    for _ in 0..100 {
        if state.open_sockets() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.open_sockets(), expected);
}

#[tokio::test]
async fn silent_websocket_peer_is_disconnected() {
    let h = Harness::new();
    let state = h.state.clone().with_websocket(WebSocketConfig {
        pong_timeout: Duration::from_millis(200),
        ..WebSocketConfig::default()
    });
    let addr = serve(state.clone()).await;

    let url = format!("ws://{addr}/raffles/{}/ws", h.raffle_id);
    let (mut socket, _) = connect_async(url.as_str()).await.expect("connect");
    assert_eq!(state.open_sockets(), 1);

    let first = tokio::time::timeout(Duration::from_secs(1), socket.next())
        .await
        .expect("ping before the deadline");
    assert!(matches!(first, Some(Ok(WsMessage::Ping(_)))));

    // Never answer; the server gives up after the pong timeout.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let closed = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server kept the silent socket open");
    wait_for_sockets(&state, 0).await;
}

#[tokio::test]
async fn chatty_websocket_peer_stays_connected() {
    let h = Harness::new();
    let state = h.state.clone().with_websocket(WebSocketConfig {
        pong_timeout: Duration::from_millis(200),
        ..WebSocketConfig::default()
    });
    let addr = serve(state.clone()).await;

    let url = format!("ws://{addr}/raffles/{}/ws", h.raffle_id);
    let (mut socket, _) = connect_async(url.as_str()).await.expect("connect");
    for _ in 0..12 {
        socket
            .send(WsMessage::Text("still here".to_string()))
            .await
            .expect("send");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(state.open_sockets(), 1);

    // Updates still flow after the keep-alive period.
    h.reserve(UserId::new(), &[30], "live").await;
    let update = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str::<Value>(&text).unwrap();
                }
                Some(Ok(_)) => {}
                other => panic!("socket ended early: {other:?}"),
            }
        }
    })
    .await
    .expect("number update");
    assert_eq!(update["type"], "number_update");
    assert_eq!(update["data"]["status"], "reserved");
    assert_eq!(update["data"]["number_ids"], json!([30]));
}
