//! Booking form and the payment gate in front of booking finish.

mod common;

use booking_service::models::{PaymentProvider, PaymentRecord, PaymentStatus};
use booking_service::services::repository::BookingStore;
use chrono::Utc;
use common::TestApp;
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

fn paid_payment(partner_order_id: &str, status: PaymentStatus) -> PaymentRecord {
    let now = Utc::now();
    PaymentRecord {
        provider: PaymentProvider::Systempay,
        status,
        partner_order_id: partner_order_id.to_string(),
        prebook_token: Some("p-789".to_string()),
        supplier_order_id: Some("ORD-1".to_string()),
        item_id: Some(77),
        amount: Decimal::new(18000, 2),
        currency_code: "EUR".to_string(),
        external_reference: Some(format!("BKG-{}", partner_order_id)),
        payload: json!({}),
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn booking_form_mints_partner_order_id() {
    let app = TestApp::spawn().await;

    Mock::given(method("POST"))
        .and(path("/hotel/order/booking/form/"))
        .and(body_partial_json(json!({ "book_hash": "p-789" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "order_id": 123456,
                "item_id": 77,
                "payment_types": [{ "amount": "180.00", "currency_code": "EUR" }]
            },
            "status": "ok",
            "error": null
        })))
        .mount(&app.supplier)
        .await;

    let response = app
        .post_json("/booking/form", &json!({ "prebook_token": "p-789" }))
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    let partner_order_id = body["partner_order_id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(partner_order_id).is_ok());
    assert_eq!(body["form"]["item_id"], 77);

    // The form is stored so later payment calls can derive the amount.
    let stored = app
        .state
        .store
        .latest_booking_form(partner_order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.prebook_token, "p-789");
    assert_eq!(stored.amount, Some(Decimal::new(18000, 2)));
}

#[tokio::test]
async fn booking_form_requires_prebook_token() {
    let app = TestApp::spawn().await;

    let response = app
        .post_json("/booking/form", &json!({ "prebook_token": "h-123" }))
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn booking_finish_is_blocked_without_payment() {
    let app = TestApp::spawn().await;

    let response = app
        .post_json(
            "/booking/start",
            &json!({
                "partner_order_id": "order-1",
                "user": { "email": "guest@example.com", "phone": "0601020304" },
                "rooms": [{ "guests": [{ "first_name": "Ada", "last_name": "Lovelace" }] }]
            }),
        )
        .await;

    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "payment_required_before_booking_finish");
}

#[tokio::test]
async fn booking_finish_is_blocked_while_payment_pending() {
    let app = TestApp::spawn().await;
    app.state
        .store
        .insert_payment(paid_payment("order-1", PaymentStatus::Pending))
        .await
        .unwrap();

    let response = app
        .post_json(
            "/booking/start",
            &json!({
                "partner_order_id": "order-1",
                "user": { "email": "guest@example.com", "phone": "0601020304" },
                "rooms": [{ "guests": [{ "first_name": "Ada", "last_name": "Lovelace" }] }]
            }),
        )
        .await;

    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn booking_finish_proceeds_once_paid() {
    let app = TestApp::spawn().await;
    app.state
        .store
        .insert_payment(paid_payment("order-1", PaymentStatus::Paid))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/hotel/order/booking/finish/"))
        .and(body_partial_json(json!({
            "partner": { "partner_order_id": "order-1" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "order_id": 123456 },
            "status": "ok",
            "error": null
        })))
        .mount(&app.supplier)
        .await;

    let response = app
        .post_json(
            "/booking/start",
            &json!({
                "partner_order_id": "order-1",
                "user": {
                    "email": "guest@example.com",
                    "phone": "0601020304",
                    "first_name": "Ada",
                    "last_name": "Lovelace"
                },
                "rooms": [{ "guests": [{ "first_name": "Ada", "last_name": "Lovelace" }] }]
            }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["data"]["order_id"], 123456);
}

#[tokio::test]
async fn booking_finish_rejects_invalid_email() {
    let app = TestApp::spawn().await;

    let response = app
        .post_json(
            "/booking/start",
            &json!({
                "partner_order_id": "order-1",
                "user": { "email": "not-an-email", "phone": "0601020304" },
                "rooms": [{ "guests": [] }]
            }),
        )
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn booking_finish_requires_rooms() {
    let app = TestApp::spawn().await;

    let response = app
        .post_json(
            "/booking/start",
            &json!({
                "partner_order_id": "order-1",
                "user": { "email": "guest@example.com", "phone": "0601020304" },
                "rooms": []
            }),
        )
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "rooms must not be empty");
}

#[tokio::test]
async fn booking_status_polls_the_supplier() {
    let app = TestApp::spawn().await;

    Mock::given(method("POST"))
        .and(path("/hotel/order/booking/finish/status/"))
        .and(body_partial_json(json!({ "partner_order_id": "order-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "percent": 100, "success": true },
            "status": "ok",
            "error": null
        })))
        .mount(&app.supplier)
        .await;

    let response = app
        .post_json("/booking/check", &json!({ "partner_order_id": "order-1" }))
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["success"], true);
}
