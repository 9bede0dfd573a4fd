use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub supplier: SupplierConfig,
    pub floa: FloaConfig,
    pub systempay: SystempayConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    /// When unset the service falls back to the in-memory store, which is
    /// what local development and the integration tests run against.
    pub url: Option<Secret<String>>,
    pub max_connections: u32,
}

/// Hotel supplier (ETG-style B2B) gateway credentials.
#[derive(Deserialize, Clone, Debug)]
pub struct SupplierConfig {
    pub base_url: String,
    pub key_id: String,
    pub api_key: Secret<String>,
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// Installment payment provider (OAuth client-credentials).
#[derive(Deserialize, Clone, Debug)]
pub struct FloaConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
}

/// Card payment gateway (REST order creation + IPN webhook).
#[derive(Deserialize, Clone, Debug)]
pub struct SystempayConfig {
    pub create_payment_url: String,
    pub rest_username: String,
    pub rest_password: Secret<String>,
    pub sdk_public_key: String,
    /// Shared HMAC key for IPN signature verification. When unset,
    /// verification is skipped with a logged warning.
    pub hmac_key: Option<Secret<String>>,
    pub ipn_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("BOOKING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("BOOKING_SERVICE_PORT")
            .unwrap_or_else(|_| "3010".to_string())
            .parse()?;

        let db_url = env::var("DATABASE_URL").ok().map(Secret::new);
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()?;

        let supplier = SupplierConfig {
            base_url: env::var("SUPPLIER_BASE_URL")
                .unwrap_or_else(|_| "https://api.worldota.net/api/b2b/v3".to_string()),
            key_id: env::var("SUPPLIER_KEY_ID").unwrap_or_default(),
            api_key: Secret::new(env::var("SUPPLIER_API_KEY").unwrap_or_default()),
            timeout_secs: env::var("SUPPLIER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "12".to_string())
                .parse()?,
            user_agent: env::var("APP_USER_AGENT")
                .unwrap_or_else(|_| "BookingService/1.0".to_string()),
        };

        let floa = FloaConfig {
            base_url: env::var("FLOA_BASE_URL").unwrap_or_default(),
            client_id: env::var("FLOA_CLIENT_ID").unwrap_or_default(),
            client_secret: Secret::new(env::var("FLOA_CLIENT_SECRET").unwrap_or_default()),
        };

        let systempay = SystempayConfig {
            create_payment_url: env::var("SYSTEMPAY_CREATE_PAYMENT_URL")
                .ok()
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| {
                    "https://api.systempay.fr/api-payment/V4/Charge/CreatePayment".to_string()
                }),
            rest_username: env::var("SYSTEMPAY_REST_USERNAME").unwrap_or_default(),
            rest_password: Secret::new(env::var("SYSTEMPAY_REST_PASSWORD").unwrap_or_default()),
            sdk_public_key: env::var("SYSTEMPAY_SDK_PUBLIC_KEY").unwrap_or_default(),
            hmac_key: env::var("SYSTEMPAY_HMAC_KEY").ok().map(Secret::new),
            ipn_url: env::var("SYSTEMPAY_IPN_URL").ok(),
        };

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: db_url,
                max_connections,
            },
            supplier,
            floa,
            systempay,
            service_name: "booking-service".to_string(),
        })
    }
}
