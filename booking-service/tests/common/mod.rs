//! Shared harness for integration tests.
//!
//! Spawns the application on a random port against an in-memory store,
//! with wiremock stand-ins for the hotel supplier, the installment
//! provider, and the card gateway.

use booking_service::config::{
    Config, DatabaseConfig, FloaConfig, ServerConfig, SupplierConfig, SystempayConfig,
};
use booking_service::{AppState, Application};
use secrecy::Secret;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_HMAC_KEY: &str = "test-hmac-key";

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub state: AppState,
    pub supplier: MockServer,
    pub floa: MockServer,
    pub systempay: MockServer,
}

impl TestApp {
    pub async fn spawn() -> TestApp {
        let supplier = MockServer::start().await;
        let floa = MockServer::start().await;
        let systempay = MockServer::start().await;

        // Installment calls fetch a token first; keep a default on every
        // server so tests only mock what they exercise.
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "test-token",
                "expires_in": 3600,
            })))
            .mount(&floa)
            .await;

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 2,
            },
            supplier: SupplierConfig {
                base_url: supplier.uri(),
                key_id: "test-key".to_string(),
                api_key: Secret::new("test-secret".to_string()),
                timeout_secs: 5,
                user_agent: "booking-service-tests".to_string(),
            },
            floa: FloaConfig {
                base_url: floa.uri(),
                client_id: "test-client".to_string(),
                client_secret: Secret::new("test-client-secret".to_string()),
            },
            systempay: SystempayConfig {
                create_payment_url: format!("{}/api-payment/V4/Charge/CreatePayment", systempay.uri()),
                rest_username: "test-user".to_string(),
                rest_password: Secret::new("test-pass".to_string()),
                sdk_public_key: "pk_test".to_string(),
                hmac_key: Some(Secret::new(TEST_HMAC_KEY.to_string())),
                ipn_url: None,
            },
            service_name: "booking-service".to_string(),
        };

        let application = Application::build(config)
            .await
            .expect("failed to build application");
        let address = format!("http://127.0.0.1:{}", application.port());
        let state = application.state();
        tokio::spawn(application.run_until_stopped());

        TestApp {
            address,
            client: reqwest::Client::new(),
            state,
            supplier,
            floa,
            systempay,
        }
    }

    pub async fn post_json(&self, route: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, route))
            .json(body)
            .send()
            .await
            .expect("request failed")
    }
}
