//! Installment deal creation against mocked provider endpoints.

mod common;

use booking_service::models::{BookingFormRecord, PaymentProvider, PaymentStatus};
use booking_service::services::repository::BookingStore;
use chrono::Utc;
use common::TestApp;
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

async fn seed_booking_form(app: &TestApp, partner_order_id: &str) {
    app.state
        .store
        .save_booking_form(BookingFormRecord {
            partner_order_id: partner_order_id.to_string(),
            prebook_token: "p-789".to_string(),
            supplier_order_id: Some("ORD-1".to_string()),
            item_id: Some(77),
            amount: Some(Decimal::new(18000, 2)),
            currency_code: Some("EUR".to_string()),
            form: json!({
                "payment_types": [{ "amount": "180.00", "currency_code": "EUR" }]
            }),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

fn customer() -> serde_json::Value {
    json!({
        "civility": "Mr",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "email": "guest@example.com"
    })
}

#[tokio::test]
async fn deal_creation_uses_root_eligibility_id() {
    let app = TestApp::spawn().await;
    seed_booking_form(&app, "order-1").await;

    Mock::given(method("POST"))
        .and(path("/api/v1/product-eligibilities"))
        .and(body_partial_json(json!({ "merchantFinancedAmount": 18000 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ROOT-1",
            "productEligibilities": [
                { "id": "E-1", "productCode": "BC4XF", "countryCode": "FR", "hasAgreement": true },
                { "id": "E-2", "productCode": "BC3XF", "countryCode": "FR", "hasAgreement": true }
            ]
        })))
        .mount(&app.floa)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/deals"))
        .and(query_param("productCode", "BC3XF"))
        .and(body_partial_json(json!({ "productEligibilityId": "ROOT-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reference": "DEAL-42",
            "state": "Initial"
        })))
        .mount(&app.floa)
        .await;

    let response = app
        .post_json(
            "/payments/floa/hotel/deal",
            &json!({
                "partner_order_id": "order-1",
                "product_code": "BC3XF",
                "customer": customer()
            }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["deal_reference"], "DEAL-42");
    assert!(body["merchant_reference"]
        .as_str()
        .unwrap()
        .starts_with("order-1-"));

    // A pending payment row now tracks the deal.
    let payment = app
        .state
        .store
        .latest_payment("order-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.provider, PaymentProvider::Floa);
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.external_reference.as_deref(), Some("DEAL-42"));
}

#[tokio::test]
async fn ineligible_product_is_a_business_negative() {
    let app = TestApp::spawn().await;
    seed_booking_form(&app, "order-1").await;

    Mock::given(method("POST"))
        .and(path("/api/v1/product-eligibilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ROOT-1",
            "productEligibilities": [
                { "productCode": "BC3XF", "countryCode": "FR", "hasAgreement": false }
            ]
        })))
        .mount(&app.floa)
        .await;

    let response = app
        .post_json(
            "/payments/floa/hotel/deal",
            &json!({
                "partner_order_id": "order-1",
                "product_code": "BC3XF",
                "customer": customer()
            }),
        )
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_eligible");
    assert_eq!(body["debug"]["id"], "ROOT-1");

    // No payment row is created for a refused eligibility.
    assert!(app
        .state
        .store
        .latest_payment("order-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn deal_for_unknown_order_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app
        .post_json(
            "/payments/floa/hotel/deal",
            &json!({
                "partner_order_id": "missing",
                "product_code": "BC3XF",
                "customer": customer()
            }),
        )
        .await;

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn deal_requires_customer_civility() {
    let app = TestApp::spawn().await;
    seed_booking_form(&app, "order-1").await;

    let response = app
        .post_json(
            "/payments/floa/hotel/deal",
            &json!({
                "partner_order_id": "order-1",
                "product_code": "BC3XF",
                "customer": { "firstName": "Ada" }
            }),
        )
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn ancillaries_are_added_to_the_financed_amount() {
    let app = TestApp::spawn().await;
    seed_booking_form(&app, "order-1").await;

    // 180.00 stay + 12.50 insurance = 19250 cents.
    Mock::given(method("POST"))
        .and(path("/api/v1/product-eligibilities"))
        .and(body_partial_json(json!({ "merchantFinancedAmount": 19250 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ROOT-1",
            "productEligibilities": [
                { "productCode": "BC3XF", "countryCode": "FR", "hasAgreement": true }
            ]
        })))
        .mount(&app.floa)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reference": "DEAL-43"
        })))
        .mount(&app.floa)
        .await;

    let response = app
        .post_json(
            "/payments/floa/hotel/deal",
            &json!({
                "partner_order_id": "order-1",
                "product_code": "BC3XF",
                "customer": customer(),
                "ancillaries": [
                    { "description": "Travel insurance", "amount": "12.50" }
                ]
            }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let payment = app
        .state
        .store
        .latest_payment("order-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.amount, Decimal::new(19250, 2));
}

#[tokio::test]
async fn finalize_passes_through_to_the_provider() {
    let app = TestApp::spawn().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/deals/DEAL-42/finalize"))
        .and(body_partial_json(json!({
            "merchantReference": "order-1-xyz",
            "configuration": { "sessionModes": ["WebPage"], "culture": "fr-FR" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reference": "DEAL-42",
            "state": "Finalized"
        })))
        .mount(&app.floa)
        .await;

    let response = app
        .post_json(
            "/payments/floa/deal/DEAL-42/finalize",
            &json!({ "merchantReference": "order-1-xyz", "culture": "fr-FR" }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["state"], "Finalized");
}
