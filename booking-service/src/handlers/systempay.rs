//! Card gateway handlers: payment order creation and the IPN webhook.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use service_core::error::AppError;
use std::collections::HashMap;

use crate::{
    models::{PaymentProvider, PaymentRecord, PaymentStatus},
    services::deal::{derive_amount, to_cents},
    services::reconcile::parse_notification,
    services::repository::BookingStore,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub partner_order_id: String,
    pub email: Option<String>,
    pub language: Option<String>,
}

/// Create a gateway payment order for a stored booking form and return the
/// form token the embedded checkout needs.
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if payload.partner_order_id.trim().is_empty() {
        return Err(AppError::Validation("partner_order_id is required".into()));
    }

    let form = state
        .store
        .latest_booking_form(&payload.partner_order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("booking_form_not_found".into()))?;

    let derivation = derive_amount(&form)?;
    let order_id = format!("BKG-{}", payload.partner_order_id);

    let mut body = json!({
        "amount": to_cents(derivation.amount)?,
        "currency": &derivation.currency,
        "orderId": &order_id,
        "metadata": { "partner_order_id": &payload.partner_order_id },
    });
    if let Some(email) = &payload.email {
        body["customer"] = json!({ "email": email });
    }
    if let Some(language) = &payload.language {
        body["language"] = json!(language.to_lowercase());
    }
    if let Some(ipn_url) = &state.config.systempay.ipn_url {
        body["ipnTargetUrl"] = json!(ipn_url);
    }

    let form_token = state.systempay.create_payment(&body).await?;

    let now = Utc::now();
    let record = PaymentRecord {
        provider: PaymentProvider::Systempay,
        status: PaymentStatus::Pending,
        partner_order_id: payload.partner_order_id.clone(),
        prebook_token: Some(form.prebook_token.clone()),
        supplier_order_id: form.supplier_order_id.clone(),
        item_id: form.item_id,
        amount: derivation.amount,
        currency_code: derivation.currency.clone(),
        external_reference: Some(order_id.clone()),
        payload: json!({ "orderId": &order_id, "source": derivation.source }),
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = state.store.insert_payment(record).await {
        tracing::warn!(
            error = %e,
            partner_order_id = %payload.partner_order_id,
            "failed to persist systempay payment"
        );
    }
    metrics::counter!("payments_created_total", &[("provider", "systempay")]).increment(1);

    tracing::info!(
        partner_order_id = %payload.partner_order_id,
        order_id = %order_id,
        amount = %derivation.amount,
        "systempay order created"
    );
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "formToken": form_token,
            "publicKey": state.systempay.public_key(),
        })),
    ))
}

/// IPN webhook. Signature failures are the only non-200 outcome; anything
/// else is acknowledged so the gateway does not retry forever.
///
/// The gateway sends `kr-hash` and `kr-hash-algorithm` as headers; browser
/// returns repeat them as form fields, so headers win when both are present.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let mut fields: HashMap<String, String> = match serde_urlencoded::from_str(&body) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable gateway notification");
            return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
        }
    };
    for name in ["kr-hash", "kr-hash-algorithm"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            fields.insert(name.to_string(), value.to_string());
        }
    }

    state.systempay.verify_notification(&fields)?;

    let parsed = parse_notification(&fields);
    match state.reconciler.apply(&parsed).await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "notification processed");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to reconcile notification");
        }
    }
    Ok((StatusCode::OK, Json(json!({ "status": "ok" }))))
}
