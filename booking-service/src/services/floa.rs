//! Floa installment-payment provider client.
//!
//! Covers the full deal lifecycle: OAuth client-credentials token, product
//! eligibility, deal create/finalize/retrieve/cancel, and plan simulation.

use crate::config::FloaConfig;
use reqwest::{Client, Method};
use secrecy::ExposeSecret;
use serde_json::Value;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(5);
const TOKEN_FETCH_ATTEMPTS: u32 = 3;

/// Process-wide access-token cache.
///
/// The mutex is held across the refresh network call, so concurrent callers
/// that need a token while a fetch is in flight await that single fetch
/// instead of issuing duplicates.
pub struct TokenCache {
    state: Mutex<TokenState>,
}

#[derive(Default)]
struct TokenState {
    token: Option<String>,
    expires_at: Option<Instant>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TokenState::default()),
        }
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FloaClient {
    client: Client,
    config: FloaConfig,
    token_cache: Arc<TokenCache>,
}

impl FloaClient {
    pub fn new(config: FloaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            token_cache: Arc::new(TokenCache::new()),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.base_url.is_empty()
            && !self.config.client_id.is_empty()
            && !self.config.client_secret.expose_secret().is_empty()
    }

    fn ensure_configured(&self) -> Result<(), AppError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(AppError::Internal(anyhow::anyhow!(
                "Floa credentials not configured (base url, client id, client secret)"
            )))
        }
    }

    /// Get a valid access token, fetching a new one if the cached token is
    /// missing or about to expire. Single-flight: the cache lock is held for
    /// the duration of the fetch.
    async fn access_token(&self) -> Result<String, AppError> {
        self.ensure_configured()?;

        let mut state = self.token_cache.state.lock().await;
        if let (Some(token), Some(expires_at)) = (&state.token, state.expires_at) {
            if expires_at > Instant::now() + TOKEN_EXPIRY_SLACK {
                return Ok(token.clone());
            }
        }

        let (token, expires_in) = self.request_new_access_token().await?;
        state.token = Some(token.clone());
        state.expires_at = Some(Instant::now() + Duration::from_secs(expires_in));
        Ok(token)
    }

    /// Client-credentials token fetch with exponential backoff
    /// (500ms, 1s, 2s between attempts).
    async fn request_new_access_token(&self) -> Result<(String, u64), AppError> {
        let url = format!("{}/oauth/token", self.config.base_url);
        let mut last_error = None;

        for attempt in 1..=TOKEN_FETCH_ATTEMPTS {
            let result = self
                .client
                .post(&url)
                .basic_auth(
                    &self.config.client_id,
                    Some(self.config.client_secret.expose_secret()),
                )
                .form(&[("grant_type", "client_credentials")])
                .timeout(Duration::from_secs(5))
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let body: Value = response.json().await.map_err(|e| AppError::Upstream {
                        status: 502,
                        message: format!("floa token response unreadable: {}", e),
                        debug: None,
                    })?;
                    let token = body
                        .get("access_token")
                        .and_then(|t| t.as_str())
                        .map(str::to_string);
                    let expires_in = body
                        .get("expires_in")
                        .and_then(|e| e.as_u64())
                        .unwrap_or(3600);
                    match token {
                        Some(token) => return Ok((token, expires_in)),
                        None => {
                            last_error = Some(AppError::Upstream {
                                status: 502,
                                message: "floa_auth_failed: missing access_token field".into(),
                                debug: Some(body),
                            });
                        }
                    }
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let debug = response.json::<Value>().await.ok();
                    last_error = Some(AppError::Upstream {
                        status,
                        message: "floa_auth_failed".into(),
                        debug,
                    });
                }
                Err(e) => {
                    last_error = Some(AppError::Upstream {
                        status: 502,
                        message: format!("floa_auth_failed: {}", e),
                        debug: None,
                    });
                }
            }

            if attempt < TOKEN_FETCH_ATTEMPTS {
                let wait = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                tokio::time::sleep(wait).await;
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Internal(anyhow::anyhow!("floa auth failed"))))
    }

    /// Issue one authenticated Floa API call.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
        extra_headers: Option<&[(&str, &str)]>,
    ) -> Result<Value, AppError> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.base_url, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&token)
            .header("Content-Type", "application/json");
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(headers) = extra_headers {
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
        }

        let response = request.send().await.map_err(|e| AppError::Upstream {
            status: 502,
            message: format!("floa_api_error: {}", e),
            debug: None,
        })?;

        let status = response.status();
        let parsed: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            Ok(parsed)
        } else {
            tracing::error!(path = %path, status = %status, "floa call failed");
            Err(AppError::Upstream {
                status: status.as_u16(),
                message: "floa_api_error".into(),
                debug: Some(parsed),
            })
        }
    }

    pub async fn check_product_eligibility(&self, payload: &Value) -> Result<Value, AppError> {
        self.request(
            Method::POST,
            "/api/v1/product-eligibilities",
            None,
            Some(payload),
            None,
        )
        .await
    }

    pub async fn create_deal(
        &self,
        product_code: &str,
        implementation_type: Option<&str>,
        body: &Value,
    ) -> Result<Value, AppError> {
        if product_code.is_empty() {
            return Err(AppError::Validation(
                "productCode is required to create a deal".into(),
            ));
        }
        let headers = implementation_type.map(|t| [("Implementation-type", t)]);
        self.request(
            Method::POST,
            "/api/v1/deals",
            Some(&[("productCode", product_code)]),
            Some(body),
            headers.as_ref().map(|h| h.as_slice()),
        )
        .await
    }

    pub async fn finalize_deal(&self, deal_reference: &str, payload: &Value) -> Result<Value, AppError> {
        Self::ensure_reference(deal_reference, "finalize")?;
        let body = build_finalize_body(payload);
        let path = format!("/api/v1/deals/{}/finalize", deal_reference);
        self.request(Method::POST, &path, None, Some(&body), None).await
    }

    pub async fn retrieve_deal(&self, deal_reference: &str) -> Result<Value, AppError> {
        Self::ensure_reference(deal_reference, "retrieve")?;
        let path = format!("/api/v1/deals/{}/installment-plan", deal_reference);
        self.request(Method::GET, &path, None, None, None).await
    }

    pub async fn cancel_deal(&self, deal_reference: &str, body: &Value) -> Result<Value, AppError> {
        Self::ensure_reference(deal_reference, "cancel")?;
        let path = format!("/api/v1/deals/{}/cancel", deal_reference);
        self.request(Method::POST, &path, None, Some(body), None).await
    }

    pub async fn simulate_plan(&self, query: &[(&str, String)]) -> Result<Value, AppError> {
        let query: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.request(
            Method::GET,
            "/api/v1/simulated-installment-plans",
            Some(&query),
            None,
            None,
        )
        .await
    }

    fn ensure_reference(deal_reference: &str, operation: &str) -> Result<(), AppError> {
        if deal_reference.trim().is_empty() {
            Err(AppError::Validation(format!(
                "dealReference is required to {} a deal",
                operation
            )))
        } else {
            Ok(())
        }
    }
}

/// Shape a caller-supplied finalize payload into the body Floa expects.
///
/// Root-level shortcuts (`culture`, `sessionModes`, `backUrl`, `returnUrl`,
/// `notificationUrl` and the legacy `notificationURL` spelling) are lifted
/// into the nested `configuration` block without overwriting values the
/// caller already nested there. `sessionModes` defaults to `["WebPage"]`.
pub fn build_finalize_body(payload: &Value) -> Value {
    let mut body = serde_json::Map::new();

    for field in ["merchantReference", "merchantFinancedAmount", "freeText", "amountDetails"] {
        if let Some(value) = payload.get(field) {
            if !value.is_null() {
                body.insert(field.to_string(), value.clone());
            }
        }
    }

    let mut configuration = payload
        .get("configuration")
        .and_then(|c| c.as_object())
        .cloned()
        .unwrap_or_default();

    let lift = |configuration: &mut serde_json::Map<String, Value>, key: &str, roots: &[&str]| {
        if configuration.contains_key(key) {
            return;
        }
        for root in roots {
            if let Some(value) = payload.get(*root) {
                if !value.is_null() {
                    configuration.insert(key.to_string(), value.clone());
                    return;
                }
            }
        }
    };
    lift(&mut configuration, "culture", &["culture"]);
    lift(&mut configuration, "backUrl", &["backUrl"]);
    lift(&mut configuration, "returnUrl", &["returnUrl"]);
    lift(
        &mut configuration,
        "notificationUrl",
        &["notificationUrl", "notificationURL"],
    );
    if !configuration.contains_key("sessionModes") {
        let modes = payload
            .get("sessionModes")
            .filter(|m| !m.is_null())
            .cloned()
            .unwrap_or_else(|| serde_json::json!(["WebPage"]));
        configuration.insert("sessionModes".to_string(), modes);
    }
    body.insert("configuration".to_string(), Value::Object(configuration));

    let mut psp = payload
        .get("pspDetails")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();
    if !psp.contains_key("threatPreventionSessionId") {
        if let Some(id) = payload.get("threatPreventionSessionId") {
            if !id.is_null() {
                psp.insert("threatPreventionSessionId".to_string(), id.clone());
            }
        }
    }
    if !psp.is_empty() {
        body.insert("pspDetails".to_string(), Value::Object(psp));
    }

    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finalize_body_defaults_session_modes() {
        let body = build_finalize_body(&json!({ "merchantReference": "ref-1" }));
        assert_eq!(body["merchantReference"], "ref-1");
        assert_eq!(body["configuration"]["sessionModes"], json!(["WebPage"]));
    }

    #[test]
    fn finalize_body_lifts_root_shortcuts_into_configuration() {
        let body = build_finalize_body(&json!({
            "culture": "fr-FR",
            "returnUrl": "https://shop.example/return",
            "notificationURL": "https://shop.example/ipn",
        }));
        let config = &body["configuration"];
        assert_eq!(config["culture"], "fr-FR");
        assert_eq!(config["returnUrl"], "https://shop.example/return");
        assert_eq!(config["notificationUrl"], "https://shop.example/ipn");
    }

    #[test]
    fn finalize_body_keeps_nested_configuration_values() {
        let body = build_finalize_body(&json!({
            "culture": "en-GB",
            "sessionModes": ["Redirect"],
            "configuration": { "culture": "fr-FR" },
        }));
        assert_eq!(body["configuration"]["culture"], "fr-FR");
        assert_eq!(body["configuration"]["sessionModes"], json!(["Redirect"]));
    }

    #[test]
    fn finalize_body_collects_psp_details() {
        let body = build_finalize_body(&json!({
            "threatPreventionSessionId": "tps-1",
            "pspDetails": { "acquirer": "systempay" },
        }));
        assert_eq!(body["pspDetails"]["threatPreventionSessionId"], "tps-1");
        assert_eq!(body["pspDetails"]["acquirer"], "systempay");
    }
}
