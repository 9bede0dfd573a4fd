//! Prebook orchestration: turn a shopper-selected rate hash into a supplier
//! prebook token, refreshing the rate once when the supplier reports it
//! stale.
//!
//! Hash classes: `h-` direct hotel-rate hashes (refreshable), `p-` prebook
//! tokens, `m-` match hashes (never bookable).

use crate::models::PrebookRecord;
use crate::services::repository::BookingStore;
use crate::services::supplier::SupplierClient;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use service_core::error::AppError;
use std::sync::Arc;

/// Advisory prebook token lifetime recorded on the persisted row.
const PREBOOK_TTL_MINUTES: i64 = 30;

const STALE_RATE_ERROR: &str = "no_available_rates";

pub fn normalize_hash(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn has_prefix(hash: &str, prefix: &str) -> bool {
    hash.len() >= prefix.len() && hash[..prefix.len()].eq_ignore_ascii_case(prefix)
}

pub fn is_hotel_hash(hash: &str) -> bool {
    has_prefix(hash, "h-")
}

pub fn is_prebook_hash(hash: &str) -> bool {
    has_prefix(hash, "p-")
}

pub fn is_match_hash(hash: &str) -> bool {
    has_prefix(hash, "m-")
}

/// Extract a bookable token from a prebook response.
///
/// Known shapes, tried in order: a bare string response, a top-level
/// `token`, a top-level `prebook_token` string, then the first `p-` prefixed
/// `book_hash` inside `prebook_token.hotels[].rates[]` or `hotels[].rates[]`.
pub fn extract_prebook_token(response: &Value) -> Option<String> {
    if let Some(s) = response.as_str() {
        return Some(s.to_string());
    }
    if let Some(token) = response.get("token").and_then(|t| t.as_str()) {
        return Some(token.to_string());
    }
    if let Some(token) = response.get("prebook_token").and_then(|t| t.as_str()) {
        return Some(token.to_string());
    }

    let hotel_buckets = response
        .get("prebook_token")
        .and_then(|t| t.get("hotels"))
        .or_else(|| response.get("hotels"))
        .and_then(|h| h.as_array());

    for hotel in hotel_buckets.into_iter().flatten() {
        let rates = hotel.get("rates").and_then(|r| r.as_array());
        for rate in rates.into_iter().flatten() {
            if let Some(book_hash) = rate.get("book_hash").and_then(|b| b.as_str()) {
                if is_prebook_hash(book_hash) {
                    return Some(book_hash.to_string());
                }
            }
        }
    }
    None
}

/// Hotel-page context carried by the shopper's request, used both to refresh
/// stale rates and to enrich the persisted prebook summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HpContext {
    pub id: Option<Value>,
    pub hid: Option<Value>,
    pub checkin: Option<String>,
    pub checkout: Option<String>,
    pub guests: Option<Value>,
    pub currency: Option<String>,
    pub language: Option<String>,
    pub residency: Option<String>,
    pub city: Option<String>,
}

/// Shopper preferences used to pick a replacement rate after a refresh.
#[derive(Debug, Clone, Default)]
pub struct RatePreferences {
    pub meal: Option<String>,
    pub room_name: Option<String>,
}

/// The replacement rate chosen by the refresh path.
#[derive(Debug, Clone, Serialize)]
pub struct PickedRate {
    pub meal: Option<String>,
    pub room_name: Option<String>,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct PrebookOutcome {
    pub token: String,
    pub response: Value,
    pub summary: Value,
    pub refreshed: bool,
    pub picked: Option<PickedRate>,
}

fn build_hotel_page_request(ctx: &HpContext) -> Result<Value, AppError> {
    let hotel_id = ctx.id.clone().or_else(|| ctx.hid.clone());
    let hotel_id = match hotel_id {
        Some(id) if !id.is_null() => id,
        _ => return Err(AppError::Validation("id (hid) is required".into())),
    };
    if ctx.checkin.is_none() || ctx.checkout.is_none() {
        return Err(AppError::Validation("checkin/checkout required".into()));
    }
    let guests = match &ctx.guests {
        Some(Value::Array(guests)) if !guests.is_empty() => guests.clone(),
        _ => {
            return Err(AppError::Validation(
                "guests is required (e.g., [{ adults: 2 }])".into(),
            ))
        }
    };

    let language = ctx
        .language
        .as_deref()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "en".to_string());
    let currency = ctx
        .currency
        .as_deref()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "EUR".to_string());

    let mut body = json!({
        "id": hotel_id,
        "checkin": ctx.checkin,
        "checkout": ctx.checkout,
        "guests": guests,
        "language": language,
        "currency": currency,
    });
    if let Some(residency) = ctx.residency.as_deref() {
        body["residency"] = Value::String(residency.to_lowercase());
    }
    Ok(body)
}

fn text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_text<'a>(candidates: impl IntoIterator<Item = &'a Value>) -> Option<String> {
    candidates.into_iter().find_map(text)
}

/// Best-effort summary of the held rate (hotel identity, stay, room/price)
/// persisted with the prebook row for later reuse.
pub fn build_prebook_summary(response: &Value, token: &str, ctx: Option<&HpContext>) -> Value {
    let empty = vec![];
    let hotels = response
        .get("data")
        .and_then(|d| d.get("hotels"))
        .or_else(|| response.get("hotels"))
        .and_then(|h| h.as_array())
        .unwrap_or(&empty);

    let mut picked_hotel: Option<&Value> = None;
    let mut picked_rate: Option<&Value> = None;
    'outer: for hotel in hotels {
        let rates = hotel.get("rates").and_then(|r| r.as_array());
        for rate in rates.into_iter().flatten() {
            if rate.get("book_hash").and_then(|b| b.as_str()) == Some(token) {
                picked_hotel = Some(hotel);
                picked_rate = Some(rate);
                break 'outer;
            }
        }
    }
    if picked_hotel.is_none() {
        picked_hotel = hotels.first();
        picked_rate = picked_hotel
            .and_then(|h| h.get("rates"))
            .and_then(|r| r.as_array())
            .and_then(|rates| {
                rates
                    .iter()
                    .find(|rate| rate.get("book_hash").map(|b| b.is_string()).unwrap_or(false))
                    .or_else(|| rates.first())
            });
    }

    let hotel = picked_hotel.cloned().unwrap_or(Value::Null);
    let rate = picked_rate.cloned().unwrap_or(Value::Null);
    let payment = rate
        .pointer("/payment_options/payment_types/0")
        .cloned()
        .unwrap_or(Value::Null);
    let legal_hotel = rate
        .pointer("/legal_info/hotel")
        .or_else(|| hotel.pointer("/legal_info/hotel"))
        .cloned()
        .unwrap_or(Value::Null);

    let null = Value::Null;
    let ctx_field = |f: &dyn Fn(&HpContext) -> Option<&str>| -> Value {
        ctx.and_then(f)
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Null)
    };

    json!({
        "token": token,
        "created_at": Utc::now().to_rfc3339(),
        "hotel": {
            "id": hotel.get("id").cloned().unwrap_or(Value::Null),
            "hid": hotel.get("hid").cloned().unwrap_or(Value::Null),
            "name": first_text([
                hotel.get("name").unwrap_or(&null),
                hotel.get("hotel_name").unwrap_or(&null),
                hotel.get("hotel_name_trans").unwrap_or(&null),
                legal_hotel.get("name").unwrap_or(&null),
            ]),
            "city": first_text([
                hotel.get("city").unwrap_or(&null),
                hotel.get("city_name").unwrap_or(&null),
                legal_hotel.get("city").unwrap_or(&null),
            ])
            .map(Value::String)
            .unwrap_or_else(|| ctx_field(&|c| c.city.as_deref())),
            "address": first_text([
                hotel.get("address").unwrap_or(&null),
                hotel.get("address_full").unwrap_or(&null),
                legal_hotel.get("address").unwrap_or(&null),
            ]),
            "country": first_text([
                hotel.get("country").unwrap_or(&null),
                hotel.get("country_name").unwrap_or(&null),
                legal_hotel.get("country").unwrap_or(&null),
            ]),
        },
        "stay": {
            "checkin": ctx_field(&|c| c.checkin.as_deref()),
            "checkout": ctx_field(&|c| c.checkout.as_deref()),
            "guests": ctx.and_then(|c| c.guests.clone()).unwrap_or(Value::Null),
            "currency": ctx
                .and_then(|c| c.currency.clone())
                .map(Value::String)
                .or_else(|| payment.get("show_currency_code").and_then(text).map(Value::String))
                .or_else(|| payment.get("currency_code").and_then(text).map(Value::String))
                .unwrap_or(Value::Null),
            "language": ctx_field(&|c| c.language.as_deref()),
        },
        "room": {
            "name": rate
                .get("room_name")
                .and_then(text)
                .or_else(|| rate.pointer("/room_data_trans/main_name").and_then(text)),
            "meal": rate.get("meal").cloned().unwrap_or(Value::Null),
            "price": payment
                .get("show_amount")
                .or_else(|| payment.get("amount"))
                .cloned()
                .unwrap_or(Value::Null),
            "currency": payment
                .get("show_currency_code")
                .or_else(|| payment.get("currency_code"))
                .cloned()
                .unwrap_or(Value::Null),
            "daily_prices": rate.get("daily_prices").cloned().unwrap_or(Value::Null),
            "match_hash": rate.get("match_hash").cloned().unwrap_or(Value::Null),
        },
    })
}

/// A stale-rate prebook failure qualifies for refresh only when the hash was
/// a direct hotel-rate hash and the shopper supplied the hotel-page context.
pub fn should_refresh_after_prebook_error(error: &AppError, hash: &str, has_context: bool) -> bool {
    if !has_context || !is_hotel_hash(hash) {
        return false;
    }
    match error {
        AppError::Upstream { message, debug, .. } => {
            message == STALE_RATE_ERROR
                || debug
                    .as_ref()
                    .and_then(|d| d.get("error"))
                    .and_then(|e| e.as_str())
                    == Some(STALE_RATE_ERROR)
        }
        _ => false,
    }
}

/// Replacement-rate tie-break: prefer a rate matching both the desired meal
/// plan and room name, then either one, then the first returned rate.
pub fn pick_replacement_rate<'a>(rates: &'a [Value], prefs: &RatePreferences) -> Option<&'a Value> {
    let meal_matches = |rate: &Value| {
        prefs
            .meal
            .as_deref()
            .map(|meal| rate.get("meal").and_then(|m| m.as_str()) == Some(meal))
            .unwrap_or(false)
    };
    let room_matches = |rate: &Value| {
        prefs
            .room_name
            .as_deref()
            .map(|room| rate.get("room_name").and_then(|r| r.as_str()) == Some(room))
            .unwrap_or(false)
    };

    rates
        .iter()
        .find(|rate| meal_matches(rate) && room_matches(rate))
        .or_else(|| rates.iter().find(|rate| meal_matches(rate) || room_matches(rate)))
        .or_else(|| rates.first())
}

#[derive(Clone)]
pub struct PrebookOrchestrator {
    supplier: Arc<SupplierClient>,
    store: Arc<dyn BookingStore>,
}

impl PrebookOrchestrator {
    pub fn new(supplier: Arc<SupplierClient>, store: Arc<dyn BookingStore>) -> Self {
        Self { supplier, store }
    }

    /// Entry point for `POST /prebook`.
    pub async fn prebook(
        &self,
        raw_hash: Option<&str>,
        price_increase_percent: f64,
        hp_context: Option<HpContext>,
        prefs: RatePreferences,
    ) -> Result<PrebookOutcome, AppError> {
        let hash = normalize_hash(raw_hash)
            .filter(|h| !is_match_hash(h))
            .ok_or_else(|| {
                AppError::Validation("invalid hash: provide sr-... or h-...".into())
            })?;

        let outcome = match self
            .create_prebook(&hash, price_increase_percent, hp_context.as_ref())
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                if !should_refresh_after_prebook_error(&error, &hash, hp_context.is_some()) {
                    return Err(error);
                }
                let ctx = hp_context.expect("refresh requires hp context");
                tracing::info!(hash = %hash, "stale rate, refreshing hotel page");
                self.refresh_prebook(&ctx, price_increase_percent, &prefs)
                    .await?
            }
        };

        let refreshed = if outcome.refreshed { "true" } else { "false" };
        metrics::counter!("prebooks_total", &[("refreshed", refreshed)]).increment(1);
        Ok(outcome)
    }

    /// One supplier prebook call plus best-effort persistence. Store
    /// failures are logged and swallowed; they must never fail the
    /// user-facing call once the supplier accepted the prebook.
    async fn create_prebook(
        &self,
        hash: &str,
        price_increase_percent: f64,
        hp_context: Option<&HpContext>,
    ) -> Result<PrebookOutcome, AppError> {
        let response = self.supplier.prebook(hash, price_increase_percent).await?;
        let token = match extract_prebook_token(&response) {
            Some(token) => token,
            None => {
                return Err(AppError::Upstream {
                    status: 502,
                    message: "prebook_failed".into(),
                    debug: Some(json!({ "hash": hash, "response": response })),
                })
            }
        };

        let summary = build_prebook_summary(&response, &token, hp_context);
        let now = Utc::now();
        let record = PrebookRecord {
            offer_hash: hash.to_string(),
            token: token.clone(),
            request_id: None,
            summary: Some(summary.clone()),
            raw_response: response.clone(),
            created_at: now,
            expires_at: now + Duration::minutes(PREBOOK_TTL_MINUTES),
        };
        if let Err(e) = self.store.save_prebook(record).await {
            tracing::warn!(error = %e, hash = %hash, "failed to persist prebook");
        }

        Ok(PrebookOutcome {
            token,
            response,
            summary,
            refreshed: false,
            picked: None,
        })
    }

    /// Refetch current rates for the hotel/stay and retry the prebook
    /// exactly once with the replacement hash.
    async fn refresh_prebook(
        &self,
        ctx: &HpContext,
        price_increase_percent: f64,
        prefs: &RatePreferences,
    ) -> Result<PrebookOutcome, AppError> {
        let body = build_hotel_page_request(ctx)?;
        let hp = self.supplier.hotel_page(&body).await?;

        let empty = vec![];
        let rates = hp
            .get("hotels")
            .and_then(|h| h.as_array())
            .and_then(|hotels| hotels.first())
            .and_then(|hotel| hotel.get("rates"))
            .and_then(|r| r.as_array())
            .unwrap_or(&empty);
        if rates.is_empty() {
            return Err(AppError::Validation(
                "no fresh rates available after refresh".into(),
            ));
        }

        let candidate =
            pick_replacement_rate(rates, prefs).expect("non-empty rates always yield a candidate");
        let candidate_hash = candidate
            .get("hash")
            .and_then(|h| h.as_str())
            .filter(|h| is_hotel_hash(h))
            .ok_or_else(|| {
                AppError::Validation("no valid h- hash in refreshed rates".into())
            })?;

        let picked = PickedRate {
            meal: candidate
                .get("meal")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            room_name: candidate
                .get("room_name")
                .and_then(|r| r.as_str())
                .map(str::to_string),
            hash: candidate_hash.to_string(),
        };

        let mut outcome = self
            .create_prebook(candidate_hash, price_increase_percent, Some(ctx))
            .await?;
        outcome.refreshed = true;
        outcome.picked = Some(picked);
        Ok(outcome)
    }
}
