//! Booking flow handlers: prebook, booking form, finish, and status.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::{BookingFormRecord, BookingRecord, PaymentStatus},
    services::prebook::{is_prebook_hash, HpContext, RatePreferences},
    services::repository::BookingStore,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct PrebookRequest {
    #[serde(alias = "search_hash", alias = "book_hash", alias = "offer_id")]
    pub hash: Option<String>,
    #[serde(default)]
    pub price_increase_percent: f64,
    pub hp_context: Option<HpContext>,
    pub meal: Option<String>,
    pub room_name: Option<String>,
}

/// Hold a rate with the supplier, refreshing stale hotel rates once.
pub async fn prebook(
    State(state): State<AppState>,
    Json(payload): Json<PrebookRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let prefs = RatePreferences {
        meal: payload.meal.clone(),
        room_name: payload.room_name.clone(),
    };
    let outcome = state
        .prebooks
        .prebook(
            payload.hash.as_deref(),
            payload.price_increase_percent,
            payload.hp_context,
            prefs,
        )
        .await?;

    let mut body = match outcome.response {
        Value::Object(map) => Value::Object(map),
        other => json!({ "data": other }),
    };
    body["prebook_token"] = json!(outcome.token);
    body["refreshed"] = json!(outcome.refreshed);
    if let Some(picked) = &outcome.picked {
        body["picked"] = json!(picked);
    }
    Ok((StatusCode::OK, Json(body)))
}

#[derive(Debug, Deserialize)]
pub struct BookingFormRequest {
    #[serde(alias = "book_hash", alias = "token")]
    pub prebook_token: Option<String>,
    pub language: Option<String>,
    pub user_ip: Option<String>,
}

fn client_ip(headers: &HeaderMap, explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|ip| ip.trim().to_string())
        })
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

fn decimal_at(value: &Value, pointer: &str) -> Option<Decimal> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Open the supplier booking form for a held rate. Mints the partner order
/// id the rest of the flow keys on.
pub async fn booking_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BookingFormRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let token = payload
        .prebook_token
        .as_deref()
        .map(str::trim)
        .filter(|t| is_prebook_hash(t))
        .ok_or_else(|| {
            AppError::Validation("prebook_token (p-...) is required".into())
        })?;

    let partner_order_id = Uuid::new_v4().to_string();
    let language = payload
        .language
        .as_deref()
        .map(|l| l.to_lowercase())
        .unwrap_or_else(|| "en".to_string());
    let request = json!({
        "partner_order_id": &partner_order_id,
        "book_hash": token,
        "language": language,
        "user_ip": client_ip(&headers, payload.user_ip.as_deref()),
    });

    let form = state.supplier.booking_form(&request).await?;

    let record = BookingFormRecord {
        partner_order_id: partner_order_id.clone(),
        prebook_token: token.to_string(),
        supplier_order_id: form.get("order_id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        item_id: form.get("item_id").and_then(|v| v.as_i64()),
        amount: decimal_at(&form, "/payment_types/0/amount"),
        currency_code: form
            .pointer("/payment_types/0/currency_code")
            .and_then(|c| c.as_str())
            .map(str::to_string),
        form: form.clone(),
        created_at: Utc::now(),
    };
    if let Err(e) = state.store.save_booking_form(record).await {
        tracing::warn!(error = %e, partner_order_id = %partner_order_id, "failed to persist booking form");
    }

    tracing::info!(partner_order_id = %partner_order_id, "booking form opened");
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "partner_order_id": partner_order_id,
            "form": form,
        })),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct BookingUser {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 5))]
    pub phone: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartBookingRequest {
    pub partner_order_id: String,
    #[validate(nested)]
    pub user: BookingUser,
    #[serde(default)]
    pub rooms: Vec<Value>,
    pub language: Option<String>,
    pub payment_type: Option<Value>,
}

/// Finish a booking with the supplier. Refuses to run until a payment row
/// for the order has reached `paid`.
pub async fn start_booking(
    State(state): State<AppState>,
    Json(payload): Json<StartBookingRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    payload.validate()?;
    if payload.partner_order_id.trim().is_empty() {
        return Err(AppError::Validation("partner_order_id is required".into()));
    }
    if payload.rooms.is_empty() {
        return Err(AppError::Validation("rooms must not be empty".into()));
    }
    if let Some(payment_type) = &payload.payment_type {
        let has_currency = payment_type
            .get("currency_code")
            .and_then(|c| c.as_str())
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        if !has_currency {
            return Err(AppError::Validation(
                "payment_type.currency_code is required".into(),
            ));
        }
    }

    let latest = state.store.latest_payment(&payload.partner_order_id).await?;
    match &latest {
        Some(payment) if payment.status == PaymentStatus::Paid => {}
        other => {
            return Err(AppError::PaymentRequired {
                current_status: other.as_ref().map(|p| p.status.as_str().to_string()),
                provider: other.as_ref().map(|p| p.provider.as_str().to_string()),
            });
        }
    }
    let payment = latest.expect("gate passed with a paid payment row");

    let mut user = json!({
        "email": &payload.user.email,
        "phone": &payload.user.phone,
    });
    if let Some(first) = &payload.user.first_name {
        user["first_name"] = json!(first);
    }
    if let Some(last) = &payload.user.last_name {
        user["last_name"] = json!(last);
    }
    for (key, value) in &payload.user.extra {
        user[key.as_str()] = value.clone();
    }

    let mut payment_type = payload.payment_type.clone().unwrap_or_else(|| {
        json!({
            "amount": payment.amount.to_string(),
            "currency_code": &payment.currency_code,
        })
    });
    if payment_type.get("type").is_none() {
        payment_type["type"] = json!("deposit");
    }
    let language = payload
        .language
        .as_deref()
        .map(|l| l.to_lowercase())
        .unwrap_or_else(|| "fr".to_string());
    let request = json!({
        "partner": { "partner_order_id": &payload.partner_order_id },
        "user": user,
        "rooms": &payload.rooms,
        "language": language,
        "payment_type": payment_type,
    });

    let response = state.supplier.booking_finish(&request).await?;

    let user_name = match (&payload.user.first_name, &payload.user.last_name) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (Some(first), None) => Some(first.clone()),
        (None, Some(last)) => Some(last.clone()),
        (None, None) => None,
    };
    let record = BookingRecord {
        partner_order_id: payload.partner_order_id.clone(),
        supplier_order_id: payment.supplier_order_id.clone(),
        status: "processing".into(),
        user_email: Some(payload.user.email.clone()),
        user_phone: Some(payload.user.phone.clone()),
        user_name,
        amount: Some(payment.amount),
        currency_code: Some(payment.currency_code.clone()),
        raw: response.clone(),
        created_at: Utc::now(),
    };
    if let Err(e) = state.store.insert_booking(record).await {
        tracing::warn!(error = %e, partner_order_id = %payload.partner_order_id, "failed to persist booking");
    }
    metrics::counter!("bookings_finished_total").increment(1);

    tracing::info!(partner_order_id = %payload.partner_order_id, "booking finish submitted");
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "partner_order_id": payload.partner_order_id,
            "data": response,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BookingStatusRequest {
    pub partner_order_id: String,
}

/// Poll the supplier for the finish status of an order.
pub async fn check_booking(
    State(state): State<AppState>,
    Json(payload): Json<BookingStatusRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    booking_status_inner(&state, &payload.partner_order_id).await
}

/// GET variant of [`check_booking`] for webview polling.
pub async fn booking_status(
    State(state): State<AppState>,
    Query(params): Query<BookingStatusRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    booking_status_inner(&state, &params.partner_order_id).await
}

async fn booking_status_inner(
    state: &AppState,
    partner_order_id: &str,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if partner_order_id.trim().is_empty() {
        return Err(AppError::Validation("partner_order_id is required".into()));
    }
    let response = state.supplier.booking_finish_status(partner_order_id).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "ok", "data": response }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_ip_first_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, None), "203.0.113.9");
    }

    #[test]
    fn explicit_ip_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        assert_eq!(client_ip(&headers, Some("198.51.100.7")), "198.51.100.7");
    }

    #[test]
    fn ip_falls_back_to_loopback() {
        assert_eq!(client_ip(&HeaderMap::new(), None), "127.0.0.1");
    }

    #[test]
    fn booking_form_request_accepts_token_spellings() {
        for key in ["prebook_token", "book_hash", "token"] {
            let body = format!(r#"{{"{}":"p-789"}}"#, key);
            let request: BookingFormRequest = serde_json::from_str(&body).unwrap();
            assert_eq!(request.prebook_token.as_deref(), Some("p-789"));
        }
    }

    #[test]
    fn user_validation_rejects_bad_email() {
        let user = BookingUser {
            email: "not-an-email".into(),
            phone: "0601020304".into(),
            first_name: None,
            last_name: None,
            extra: Default::default(),
        };
        assert!(user.validate().is_err());
    }
}
