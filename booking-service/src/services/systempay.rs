//! Systempay card gateway: payment order creation and notification
//! signature checks.

use crate::config::SystempayConfig;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use secrecy::ExposeSecret;
use serde_json::Value;
use service_core::error::AppError;
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Gateway transaction statuses mapped onto our payment lifecycle.
pub static SYSTEMPAY_STATUS_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("PAID", "paid"),
        ("ACCEPTED", "paid"),
        ("AUTHORISED", "paid"),
        ("CANCELED", "failed"),
        ("CANCELLED", "failed"),
        ("REFUSED", "failed"),
        ("ABANDONED", "failed"),
        ("FAILED", "failed"),
    ])
});

/// Map a raw gateway status onto a lifecycle status name. Unknown statuses
/// stay pending rather than guessing an outcome.
pub fn map_gateway_status(raw: &str) -> &'static str {
    SYSTEMPAY_STATUS_MAP
        .get(raw.to_uppercase().as_str())
        .copied()
        .unwrap_or("pending")
}

#[derive(Clone)]
pub struct SystempayClient {
    client: reqwest::Client,
    config: SystempayConfig,
}

impl SystempayClient {
    pub fn new(config: SystempayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn public_key(&self) -> &str {
        &self.config.sdk_public_key
    }

    /// CreatePayment: returns the form token the embedded payment form needs.
    pub async fn create_payment(&self, body: &Value) -> Result<String, AppError> {
        let response = self
            .client
            .post(&self.config.create_payment_url)
            .basic_auth(
                &self.config.rest_username,
                Some(self.config.rest_password.expose_secret()),
            )
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Upstream {
                status: 502,
                message: format!("systempay request failed: {}", e),
                debug: None,
            })?;

        let status = response.status();
        let payload: Value = response.json().await.map_err(|e| AppError::Upstream {
            status: status.as_u16(),
            message: format!("systempay returned invalid json: {}", e),
            debug: None,
        })?;

        if payload.get("status").and_then(|s| s.as_str()) != Some("SUCCESS") {
            return Err(AppError::Upstream {
                status: 502,
                message: "systempay_create_payment_failed".into(),
                debug: Some(payload),
            });
        }
        payload
            .pointer("/answer/formToken")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::Upstream {
                status: 502,
                message: "systempay response missing formToken".into(),
                debug: Some(payload),
            })
    }

    /// Validate the `kr-hash` signature over a notification's `kr-answer`.
    ///
    /// With no HMAC key configured, verification is skipped with a warning
    /// so notifications still reconcile in environments where the key has
    /// not been provisioned.
    pub fn verify_notification(&self, fields: &HashMap<String, String>) -> Result<(), AppError> {
        let Some(hmac_key) = &self.config.hmac_key else {
            tracing::warn!("systempay hmac key not configured, skipping signature check");
            return Ok(());
        };

        let (Some(received_hash), Some(answer)) = (fields.get("kr-hash"), fields.get("kr-answer"))
        else {
            tracing::warn!("notification without kr-hash/kr-answer, skipping signature check");
            return Ok(());
        };

        if let Some(algorithm) = fields.get("kr-hash-algorithm") {
            if algorithm != "sha256_hmac" {
                return Err(AppError::SignatureInvalid(format!(
                    "unsupported hash algorithm: {}",
                    algorithm
                )));
            }
        }

        let received = hex::decode(received_hash.trim())
            .map_err(|_| AppError::SignatureInvalid("kr-hash is not valid hex".into()))?;

        let mut mac = HmacSha256::new_from_slice(hmac_key.expose_secret().as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("hmac key rejected: {}", e)))?;
        mac.update(answer.as_bytes());
        let expected = mac.finalize().into_bytes();

        if received.len() != expected.len() || received.ct_eq(&expected).unwrap_u8() != 1 {
            return Err(AppError::SignatureInvalid(
                "kr-hash does not match kr-answer".into(),
            ));
        }
        Ok(())
    }
}
