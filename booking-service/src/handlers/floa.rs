//! Installment payment handlers (Floa).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::{
    services::deal::{AncillaryItem, HotelDealRequest},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateDealRequest {
    pub partner_order_id: String,
    #[serde(alias = "productCode")]
    pub product_code: String,
    pub customer: Value,
    #[serde(default)]
    pub ancillaries: Vec<AncillaryItem>,
    #[serde(default = "default_country")]
    pub country_code: String,
    pub currency: Option<String>,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(alias = "implementationType")]
    pub implementation_type: Option<String>,
}

fn default_country() -> String {
    "FR".to_string()
}

fn default_device() -> String {
    "Desktop".to_string()
}

/// Eligibility check plus deal creation for a stored booking form.
pub async fn create_deal(
    State(state): State<AppState>,
    Json(payload): Json<CreateDealRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let outcome = state
        .deals
        .create_hotel_deal(HotelDealRequest {
            partner_order_id: payload.partner_order_id,
            product_code: payload.product_code,
            customer: payload.customer,
            ancillaries: payload.ancillaries,
            country_code: payload.country_code,
            currency: payload.currency,
            device: payload.device,
            implementation_type: payload.implementation_type,
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "deal_reference": outcome.deal_reference,
            "merchant_reference": outcome.merchant_reference,
            "amount": outcome.amount.to_string(),
            "currency": outcome.currency,
            "deal": outcome.deal,
        })),
    ))
}

/// Finalize a deal after the shopper completed the provider journey.
pub async fn finalize_deal(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let response = state.floa.finalize_deal(&reference, &payload).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "ok", "data": response }))))
}

/// Cancel a deal.
pub async fn cancel_deal(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let response = state.floa.cancel_deal(&reference, &payload).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "ok", "data": response }))))
}

/// Retrieve the installment plan attached to a deal.
pub async fn get_installment_plan(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let response = state.floa.retrieve_deal(&reference).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "ok", "data": response }))))
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    #[serde(alias = "productCode")]
    pub product_code: String,
    pub amount: String,
    #[serde(default = "default_country")]
    pub country_code: String,
    pub currency: Option<String>,
}

/// Preview the installment schedule for an amount, without a deal.
pub async fn simulate_plan(
    State(state): State<AppState>,
    Json(params): Json<SimulateRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let mut query = vec![
        ("productCode", params.product_code),
        ("amount", params.amount),
        ("countryCode", params.country_code),
    ];
    if let Some(currency) = params.currency {
        query.push(("currency", currency));
    }
    let response = state.floa.simulate_plan(&query).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "ok", "data": response }))))
}
