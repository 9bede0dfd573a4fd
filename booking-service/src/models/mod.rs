use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment providers this service drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Floa,
    Systempay,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Floa => "floa",
            PaymentProvider::Systempay => "systempay",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "floa" => Some(PaymentProvider::Floa),
            "systempay" => Some(PaymentProvider::Systempay),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment lifecycle: `pending -> paid` or `pending -> failed`, terminal
/// once reached. Only the webhook reconciler moves a row out of `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Failed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One successful supplier prebook call. Immutable once written;
/// `expires_at` is an advisory hint only, the store does not enforce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrebookRecord {
    pub offer_hash: String,
    pub token: String,
    pub request_id: Option<String>,
    pub summary: Option<serde_json::Value>,
    pub raw_response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One booking-form request. The most recent row for a `partner_order_id`
/// is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingFormRecord {
    pub partner_order_id: String,
    pub prebook_token: String,
    pub supplier_order_id: Option<String>,
    pub item_id: Option<i64>,
    pub amount: Option<Decimal>,
    pub currency_code: Option<String>,
    pub form: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A payment attempt at one of the providers. Created `pending` at
/// deal/order creation; only the webhook reconciler transitions it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    pub partner_order_id: String,
    pub prebook_token: Option<String>,
    pub supplier_order_id: Option<String>,
    pub item_id: Option<i64>,
    pub amount: Decimal,
    pub currency_code: String,
    pub external_reference: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Denormalized booking row written after a successful supplier finish
/// call. The authoritative payment truth lives in [`PaymentRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRecord {
    pub partner_order_id: String,
    pub supplier_order_id: Option<String>,
    pub status: String,
    pub user_email: Option<String>,
    pub user_phone: Option<String>,
    pub user_name: Option<String>,
    pub amount: Option<Decimal>,
    pub currency_code: Option<String>,
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::from_str("refunded"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }
}
