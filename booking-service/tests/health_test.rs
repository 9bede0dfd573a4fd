mod common;

use common::TestApp;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "booking-service");
}

#[tokio::test]
async fn readiness_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/ready", app.address))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn metrics_endpoint_responds() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn metrics_label_requests_by_route_template() {
    booking_service::services::metrics::init_metrics();
    let app = TestApp::spawn().await;

    // Deal references must not fan out into per-value metric labels.
    app.client
        .get(format!("{}/payments/floa/deal/DEAL-42", app.address))
        .send()
        .await
        .expect("request failed");

    let body = app
        .client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("request failed")
        .text()
        .await
        .unwrap();
    assert!(body.contains("/payments/floa/deal/:reference"));
    assert!(!body.contains("DEAL-42"));
}
