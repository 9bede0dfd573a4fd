//! Prebook flow: holding rates and refreshing stale ones.

mod common;

use common::TestApp;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_prebook_success(server: &MockServer, hash: &str, token: &str) {
    Mock::given(method("POST"))
        .and(path("/hotel/prebook/"))
        .and(body_partial_json(json!({ "hash": hash })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "hotels": [{
                    "id": "grand_hotel",
                    "rates": [{
                        "book_hash": token,
                        "meal": "breakfast",
                        "room_name": "Double Room",
                        "payment_options": {
                            "payment_types": [{ "amount": "180.00", "currency_code": "EUR" }]
                        }
                    }]
                }]
            },
            "status": "ok",
            "error": null
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn prebook_returns_token_for_fresh_rate() {
    let app = TestApp::spawn().await;
    mock_prebook_success(&app.supplier, "h-123", "p-789").await;

    let response = app.post_json("/prebook", &json!({ "hash": "h-123" })).await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["prebook_token"], "p-789");
    assert_eq!(body["refreshed"], false);
    assert!(body["hotels"].is_array());
}

#[tokio::test]
async fn prebook_rejects_match_hashes() {
    let app = TestApp::spawn().await;

    let response = app.post_json("/prebook", &json!({ "hash": "m-42" })).await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn prebook_without_hash_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app.post_json("/prebook", &json!({})).await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn stale_rate_is_refreshed_once() {
    let app = TestApp::spawn().await;

    // The original hash is gone at the supplier.
    Mock::given(method("POST"))
        .and(path("/hotel/prebook/"))
        .and(body_partial_json(json!({ "hash": "h-123" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "data": null,
            "status": "error",
            "error": "no_available_rates"
        })))
        .mount(&app.supplier)
        .await;

    // The hotel page refetch offers a replacement matching the shopper's
    // meal and room preferences.
    Mock::given(method("POST"))
        .and(path("/search/hp/"))
        .and(body_partial_json(json!({ "id": 55, "checkin": "2025-11-10" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "hotels": [{
                    "rates": [
                        { "hash": "h-999", "meal": "nomeal", "room_name": "Single" },
                        { "hash": "h-456", "meal": "breakfast", "room_name": "Double Room" }
                    ]
                }]
            },
            "status": "ok",
            "error": null
        })))
        .mount(&app.supplier)
        .await;

    mock_prebook_success(&app.supplier, "h-456", "p-789").await;

    let response = app
        .post_json(
            "/prebook",
            &json!({
                "hash": "h-123",
                "meal": "breakfast",
                "room_name": "Double Room",
                "hp_context": {
                    "id": 55,
                    "checkin": "2025-11-10",
                    "checkout": "2025-11-12",
                    "guests": [{ "adults": 2 }]
                }
            }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["prebook_token"], "p-789");
    assert_eq!(body["refreshed"], true);
    assert_eq!(body["picked"]["hash"], "h-456");
    assert_eq!(body["picked"]["meal"], "breakfast");
}

#[tokio::test]
async fn stale_rate_without_context_is_not_refreshed() {
    let app = TestApp::spawn().await;

    Mock::given(method("POST"))
        .and(path("/hotel/prebook/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "data": null,
            "status": "error",
            "error": "no_available_rates"
        })))
        .mount(&app.supplier)
        .await;

    let response = app.post_json("/prebook", &json!({ "hash": "h-123" })).await;

    // Without an hp_context there is nothing to refetch.
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn refresh_with_no_fresh_rates_fails() {
    let app = TestApp::spawn().await;

    Mock::given(method("POST"))
        .and(path("/hotel/prebook/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "data": null,
            "status": "error",
            "error": "no_available_rates"
        })))
        .mount(&app.supplier)
        .await;
    Mock::given(method("POST"))
        .and(path("/search/hp/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "hotels": [{ "rates": [] }] },
            "status": "ok",
            "error": null
        })))
        .mount(&app.supplier)
        .await;

    let response = app
        .post_json(
            "/prebook",
            &json!({
                "hash": "h-123",
                "hp_context": {
                    "id": 55,
                    "checkin": "2025-11-10",
                    "checkout": "2025-11-12",
                    "guests": [{ "adults": 2 }]
                }
            }),
        )
        .await;

    assert_eq!(response.status(), 400);
}
