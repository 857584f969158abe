//! `StripeClient` against a mocked Stripe API.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use raffle_core::RaffleError;
use raffle_core::provider::{CreateIntentRequest, IntentStatus, PaymentProvider};
use raffle_core::types::Money;
use raffle_stripe::{StripeClient, StripeConfig, StripeError};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> StripeClient {
    StripeClient::new(StripeConfig::new("sk_test_123", "whsec_test").with_api_url(server.uri()))
        .expect("client builds")
}

fn intent_json(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "object": "payment_intent",
        "amount": 3000,
        "currency": "usd",
        "status": status,
        "client_secret": format!("{id}_secret_xyz"),
        "payment_method": null,
        "last_payment_error": null
    })
}

fn request() -> CreateIntentRequest {
    CreateIntentRequest {
        amount: Money::from_cents(3000),
        currency: "usd".to_string(),
        description: "Raffle: Summer Draw - 3 number(s)".to_string(),
        metadata: vec![
            ("reservation_id".to_string(), "r-1".to_string()),
            ("number_count".to_string(), "3".to_string()),
        ],
        idempotency_key: "reservation-r-1-3000".to_string(),
    }
}

#[tokio::test]
async fn create_sends_form_with_idempotency_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(header("idempotency-key", "reservation-r-1-3000"))
        .and(body_string_contains("amount=3000"))
        .and(body_string_contains("metadata%5Breservation_id%5D=r-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("pi_1", "requires_payment_method")))
        .expect(1)
        .mount(&server)
        .await;

    let intent = client(&server).create_intent(request()).await.unwrap();

    assert_eq!(intent.id, "pi_1");
    assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
    assert_eq!(intent.client_secret.as_deref(), Some("pi_1_secret_xyz"));
    assert_eq!(intent.amount, Money::from_cents(3000));
}

#[tokio::test]
async fn retrieve_maps_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("pi_2", "succeeded")))
        .mount(&server)
        .await;

    let intent = client(&server).get_intent("pi_2").await.unwrap();
    assert_eq!(intent.status, IntentStatus::Succeeded);
}

#[tokio::test]
async fn cancel_and_confirm_hit_their_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents/pi_3/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("pi_3", "canceled")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payment_intents/pi_4/confirm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("pi_4", "processing")))
        .expect(1)
        .mount(&server)
        .await;

    let stripe = client(&server);
    assert_eq!(stripe.cancel_intent("pi_3").await.unwrap().status, IntentStatus::Canceled);
    assert_eq!(stripe.confirm_intent("pi_4").await.unwrap().status, IntentStatus::Processing);
}

#[tokio::test]
async fn api_errors_carry_stripe_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {"type": "card_error", "code": "card_declined", "message": "Your card was declined."}
        })))
        .mount(&server)
        .await;

    let err = client(&server).create_payment_intent(&request()).await.unwrap_err();
    match err {
        StripeError::ApiError { status, code, message } => {
            assert_eq!(status, 402);
            assert_eq!(code.as_deref(), Some("card_declined"));
            assert_eq!(message, "Your card was declined.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rate_limit_and_auth_failures_become_provider_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_limited"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_denied"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let stripe = client(&server);
    assert!(matches!(
        stripe.retrieve_payment_intent("pi_limited").await,
        Err(StripeError::RateLimited)
    ));
    assert!(matches!(
        stripe.get_intent("pi_denied").await,
        Err(RaffleError::ProviderError(_))
    ));
}

#[tokio::test]
async fn webhook_events_verify_through_the_provider_trait() {
    let server = MockServer::start().await;
    let stripe = client(&server);
    let body = json!({
        "id": "evt_1",
        "type": "payment_intent.payment_failed",
        "data": {"object": {
            "id": "pi_9",
            "status": "requires_payment_method",
            "last_payment_error": {"code": "card_declined", "message": "Declined"}
        }}
    })
    .to_string();
    let now = chrono::Utc::now().timestamp();
    let signature = stripe.webhooks().header(now, body.as_bytes()).unwrap();

    let event = stripe.construct_webhook_event(body.as_bytes(), &signature).unwrap();
    assert_eq!(event.intent_id, "pi_9");
    assert_eq!(event.error_message.as_deref(), Some("Declined"));

    assert!(matches!(
        stripe.construct_webhook_event(body.as_bytes(), "t=1,v1=00"),
        Err(RaffleError::InvalidWebhook(_))
    ));
}
