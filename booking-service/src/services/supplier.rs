//! Hotel supplier gateway client.
//!
//! Stateless HTTP client to the supplier's B2B API: prebook, hotel page
//! rates, booking form, booking finish, and finish status. Responses come
//! wrapped in a `{data, status, error, debug}` envelope; `call` unwraps the
//! `data` field and maps error envelopes onto [`AppError::Upstream`].

use crate::config::SupplierConfig;
use reqwest::{Client, Method};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use service_core::error::AppError;
use std::time::Duration;

#[derive(Clone)]
pub struct SupplierClient {
    client: Client,
    config: SupplierConfig,
}

impl SupplierClient {
    pub fn new(config: SupplierConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Issue one supplier call and unwrap the response envelope.
    ///
    /// Returns the `data` field when present, the whole body otherwise. The
    /// supplier's `request-id` header is logged for traceability.
    pub async fn call(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, AppError> {
        let url = format!("{}{}", self.config.base_url, endpoint);

        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.config.key_id, Some(self.config.api_key.expose_secret()))
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| AppError::Upstream {
            status: 502,
            message: format!("supplier request failed: {}", e),
            debug: None,
        })?;

        let status = response.status();
        let request_id = response
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        if let Some(ref id) = request_id {
            tracing::debug!(request_id = %id, endpoint = %endpoint, "supplier call");
        }

        let text = response.text().await.map_err(|e| AppError::Upstream {
            status: 502,
            message: format!("supplier response unreadable: {}", e),
            debug: None,
        })?;
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status.is_success() {
            let data = parsed.get("data").filter(|d| !d.is_null()).cloned();
            return Ok(data.unwrap_or(parsed));
        }

        let message = parsed
            .get("error")
            .and_then(|e| e.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("supplier error: {}", status));
        tracing::error!(
            endpoint = %endpoint,
            status = %status,
            request_id = ?request_id,
            message = %message,
            "supplier call failed"
        );
        Err(AppError::Upstream {
            status: status.as_u16(),
            message,
            debug: parsed.get("debug").cloned(),
        })
    }

    pub async fn prebook(&self, hash: &str, price_increase_percent: f64) -> Result<Value, AppError> {
        let payload = json!({
            "hash": hash,
            "price_increase_percent": price_increase_percent,
        });
        self.call(Method::POST, "/hotel/prebook/", Some(&payload)).await
    }

    pub async fn hotel_page(&self, body: &Value) -> Result<Value, AppError> {
        self.call(Method::POST, "/search/hp/", Some(body)).await
    }

    pub async fn booking_form(&self, payload: &Value) -> Result<Value, AppError> {
        self.call(Method::POST, "/hotel/order/booking/form/", Some(payload))
            .await
    }

    pub async fn booking_finish(&self, payload: &Value) -> Result<Value, AppError> {
        self.call(Method::POST, "/hotel/order/booking/finish/", Some(payload))
            .await
    }

    pub async fn booking_finish_status(&self, partner_order_id: &str) -> Result<Value, AppError> {
        let payload = json!({ "partner_order_id": partner_order_id });
        self.call(
            Method::POST,
            "/hotel/order/booking/finish/status/",
            Some(&payload),
        )
        .await
    }
}
