//! Webview/IPN notification reconciliation.
//!
//! Pulls the transaction status and order references out of a gateway
//! notification and applies them to the stored payment row, then
//! denormalizes terminal outcomes onto the booking row.

use crate::models::{PaymentProvider, PaymentStatus};
use crate::services::repository::BookingStore;
use crate::services::systempay::map_gateway_status;
use serde_json::Value;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;

/// References and status pulled from a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNotification {
    pub status: PaymentStatus,
    pub raw_status: Option<String>,
    pub order_id: Option<String>,
    pub partner_order_id: Option<String>,
}

fn string_at<'a>(value: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .find_map(|p| value.pointer(p).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
}

/// Parse a notification from its form fields. The signed `kr-answer` JSON
/// is the primary source; flat form fields are the fallback for gateways
/// posting without an answer document.
pub fn parse_notification(fields: &HashMap<String, String>) -> ParsedNotification {
    let answer: Value = fields
        .get("kr-answer")
        .and_then(|a| serde_json::from_str(a).ok())
        .unwrap_or(Value::Null);

    let raw_status = string_at(
        &answer,
        &[
            "/orderStatus",
            "/transactions/0/status",
            "/status",
            "/transactionStatus",
        ],
    )
    .map(str::to_string)
    .or_else(|| fields.get("vads_trans_status").cloned())
    .or_else(|| fields.get("status").cloned());

    let order_id = string_at(
        &answer,
        &[
            "/orderDetails/orderId",
            "/orderId",
            "/paymentOrderId",
            "/order_id",
        ],
    )
    .map(str::to_string)
    .or_else(|| fields.get("vads_order_id").cloned())
    .or_else(|| fields.get("orderId").cloned());

    let partner_order_id = string_at(
        &answer,
        &[
            "/orderDetails/metadata/partner_order_id",
            "/metadata/partner_order_id",
            "/partner_order_id",
        ],
    )
    .map(str::to_string)
    .or_else(|| fields.get("metadata_partner_order_id").cloned())
    .or_else(|| fields.get("partner_order_id").cloned())
    .or_else(|| order_id.clone());

    let status = raw_status
        .as_deref()
        .map(map_gateway_status)
        .and_then(PaymentStatus::from_str)
        .unwrap_or(PaymentStatus::Pending);

    ParsedNotification {
        status,
        raw_status,
        order_id,
        partner_order_id,
    }
}

/// Result of applying one notification.
#[derive(Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// No usable order reference in the notification.
    Ignored,
    /// Payment rows matched and set to the given status.
    Applied { status: PaymentStatus, rows: u64 },
}

#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn BookingStore>,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Apply a parsed notification. Safe to call repeatedly for the same
    /// notification: the status update is set-based and terminal statuses
    /// are never reverted to pending.
    ///
    /// Either reference is enough to key the update; only a notification
    /// carrying neither is a no-op.
    pub async fn apply(&self, parsed: &ParsedNotification) -> Result<ReconcileOutcome, AppError> {
        let Some(reference) = parsed
            .order_id
            .as_deref()
            .or(parsed.partner_order_id.as_deref())
        else {
            tracing::warn!(
                raw_status = ?parsed.raw_status,
                "notification without order references, ignoring"
            );
            return Ok(ReconcileOutcome::Ignored);
        };
        let partner_order_id = parsed.partner_order_id.as_deref().unwrap_or(reference);

        let rows = self
            .store
            .apply_payment_status(
                PaymentProvider::Systempay,
                reference,
                partner_order_id,
                parsed.status,
            )
            .await?;

        if parsed.status.is_terminal() {
            let booking_status = match parsed.status {
                PaymentStatus::Paid => "paid",
                _ => "payment_failed",
            };
            self.store
                .set_booking_status(partner_order_id, booking_status)
                .await?;
        }

        metrics::counter!(
            "webhook_notifications_total",
            &[("status", parsed.status.as_str())]
        )
        .increment(1);
        tracing::info!(
            reference = %reference,
            partner_order_id = %partner_order_id,
            status = %parsed.status,
            rows,
            "notification reconciled"
        );

        Ok(ReconcileOutcome::Applied {
            status: parsed.status,
            rows,
        })
    }
}
