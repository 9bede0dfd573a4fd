//! Installment deal management.
//!
//! Computes the chargeable amount from the persisted booking form, runs the
//! provider eligibility check, creates the deal, and persists the pending
//! payment row.

use crate::models::{BookingFormRecord, PaymentProvider, PaymentRecord, PaymentStatus};
use crate::services::floa::FloaClient;
use crate::services::repository::BookingStore;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use service_core::error::AppError;
use std::sync::Arc;

/// A derived chargeable amount plus the extraction strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct AmountDerivation {
    pub amount: Decimal,
    pub currency: String,
    pub source: &'static str,
}

/// Ancillary line item (e.g. travel insurance) added next to the hotel stay.
#[derive(Debug, Clone, Deserialize)]
pub struct AncillaryItem {
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub reference: Option<String>,
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A bare integer (no decimal point written) above 100 is far more likely a
/// minor-unit amount than a three-digit-plus price, so it is deferred to the
/// cents fallback. `"180.00"` carries a scale and is taken at face value.
fn looks_like_minor_units(amount: &Decimal) -> bool {
    amount.scale() == 0 && *amount > Decimal::from(100)
}

/// A candidate qualifies directly when it is positive and plausible as a
/// major-currency-unit amount.
fn parse_major_amount(value: &Value) -> Option<Decimal> {
    parse_decimal(value)
        .filter(|a| a.is_sign_positive() && !a.is_zero())
        .filter(|a| !looks_like_minor_units(a))
}

/// Minor-unit fallback: a bare-integer candidate greater than 100 is
/// reinterpreted as cents.
fn parse_minor_unit_fallback(value: &Value) -> Option<Decimal> {
    parse_decimal(value)
        .filter(looks_like_minor_units)
        .map(|a| a / Decimal::from(100))
}

/// Named extraction strategies, tried in order of trust.
fn amount_candidates(record: &BookingFormRecord) -> Vec<(&'static str, Value)> {
    let form = &record.form;
    let mut candidates = Vec::new();
    if let Some(v) = form.pointer("/payment_types/0/amount") {
        candidates.push(("payment_type_amount", v.clone()));
    }
    if let Some(amount) = record.amount {
        candidates.push(("record_amount", json!(amount.to_string())));
    }
    if let Some(v) = form.get("total_amount") {
        candidates.push(("total_amount", v.clone()));
    }
    if let Some(v) = form.get("order_amount") {
        candidates.push(("order_amount", v.clone()));
    }
    candidates
}

/// Derive the chargeable amount for a booking form.
///
/// The first candidate that parses as a positive major-unit amount wins;
/// otherwise the first candidate that fits the minor-unit heuristic is
/// divided by 100. Failing both, the tried candidates are returned for
/// diagnostics.
pub fn derive_amount(record: &BookingFormRecord) -> Result<AmountDerivation, AppError> {
    let candidates = amount_candidates(record);
    let currency = record
        .currency_code
        .clone()
        .or_else(|| {
            record
                .form
                .pointer("/payment_types/0/currency_code")
                .and_then(|c| c.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "EUR".to_string());

    for (source, value) in &candidates {
        if let Some(amount) = parse_major_amount(value) {
            return Ok(AmountDerivation {
                amount,
                currency,
                source,
            });
        }
    }
    for (source, value) in &candidates {
        if let Some(amount) = parse_minor_unit_fallback(value) {
            return Ok(AmountDerivation {
                amount,
                currency,
                source,
            });
        }
    }

    let tried: Vec<Value> = candidates
        .iter()
        .map(|(source, value)| json!({ "source": source, "value": value }))
        .collect();
    Err(AppError::Validation(format!(
        "invalid_amount: no usable amount among candidates {}",
        Value::Array(tried)
    )))
}

/// Whole cents for the provider API.
pub fn to_cents(amount: Decimal) -> Result<i64, AppError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| AppError::Validation("amount out of range".into()))
}

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(BASE36_ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 output is ascii")
}

/// Merchant references are minted fresh per attempt so shopper retries for
/// the same order never collide with a previous attempt at the provider.
pub fn mint_merchant_reference(partner_order_id: &str, now_millis: u64) -> String {
    format!("{}-{}", partner_order_id, to_base36(now_millis))
}

/// Locate the eligibility entry matching the requested product and country,
/// with the agreement flag set and no per-entry error. Returns the
/// response's **root** id, which is what deal creation takes.
pub fn match_eligibility(raw: &Value, product_code: &str, country_code: &str) -> Option<String> {
    let root_id = raw.get("id").and_then(|id| id.as_str())?;
    let entries = raw.get("productEligibilities").and_then(|e| e.as_array())?;
    let matched = entries.iter().any(|entry| {
        entry.get("productCode").and_then(|c| c.as_str()) == Some(product_code)
            && entry.get("countryCode").and_then(|c| c.as_str()) == Some(country_code)
            && entry.get("hasAgreement").and_then(|a| a.as_bool()) == Some(true)
            && entry.get("error").map(|e| e.is_null()).unwrap_or(true)
    });
    matched.then(|| root_id.to_string())
}

fn extract_deal_reference(deal: &Value) -> Option<String> {
    ["reference", "dealReference", "id"]
        .iter()
        .find_map(|key| deal.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

pub struct HotelDealRequest {
    pub partner_order_id: String,
    pub product_code: String,
    pub customer: Value,
    pub ancillaries: Vec<AncillaryItem>,
    pub country_code: String,
    pub currency: Option<String>,
    pub device: String,
    pub implementation_type: Option<String>,
}

pub struct HotelDealOutcome {
    pub deal_reference: String,
    pub merchant_reference: String,
    pub deal: Value,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Clone)]
pub struct DealManager {
    floa: FloaClient,
    store: Arc<dyn BookingStore>,
}

impl DealManager {
    pub fn new(floa: FloaClient, store: Arc<dyn BookingStore>) -> Self {
        Self { floa, store }
    }

    /// Eligibility check followed by deal creation for a hotel stay.
    pub async fn create_hotel_deal(
        &self,
        request: HotelDealRequest,
    ) -> Result<HotelDealOutcome, AppError> {
        if request.partner_order_id.trim().is_empty() {
            return Err(AppError::Validation("partner_order_id is required".into()));
        }
        if request.product_code.trim().is_empty() {
            return Err(AppError::Validation("productCode is required".into()));
        }
        if request
            .customer
            .get("civility")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().is_empty())
            .unwrap_or(true)
        {
            return Err(AppError::Validation("customer.civility is required".into()));
        }

        let form = self
            .store
            .latest_booking_form(&request.partner_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("booking_form_not_found".into()))?;

        let derivation = derive_amount(&form)?;
        let hotel_cents = to_cents(derivation.amount)?;

        let mut items = vec![json!({
            "reference": &request.partner_order_id,
            "description": "Hotel stay",
            "price": hotel_cents,
            "quantity": 1,
        })];
        let mut financed_cents = hotel_cents;
        for ancillary in &request.ancillaries {
            let cents = to_cents(ancillary.amount)?;
            financed_cents += cents;
            items.push(json!({
                "reference": ancillary
                    .reference
                    .clone()
                    .unwrap_or_else(|| request.partner_order_id.clone()),
                "description": ancillary.description,
                "price": cents,
                "quantity": 1,
            }));
        }

        let currency = request.currency.clone().unwrap_or(derivation.currency.clone());
        let eligibility_payload = json!({
            "customers": [&request.customer],
            "merchantFinancedAmount": financed_cents,
            "itemCount": items.len(),
            "items": &items,
            "device": &request.device,
            "country_code": &request.country_code,
            "currency": &currency,
        });

        let eligibility = self
            .floa
            .check_product_eligibility(&eligibility_payload)
            .await?;
        let eligibility_id = match match_eligibility(
            &eligibility,
            &request.product_code,
            &request.country_code,
        ) {
            Some(id) => id,
            None => {
                tracing::info!(
                    partner_order_id = %request.partner_order_id,
                    product_code = %request.product_code,
                    "no eligible installment product"
                );
                return Err(AppError::NotEligible(eligibility));
            }
        };

        let merchant_reference = mint_merchant_reference(
            &request.partner_order_id,
            Utc::now().timestamp_millis() as u64,
        );
        let deal_body = json!({
            "merchantReference": &merchant_reference,
            "merchantFinancedAmount": financed_cents,
            "itemCount": items.len(),
            "items": items,
            "customers": [request.customer],
            "productEligibilityId": eligibility_id,
            "currency": &currency,
            "country_code": &request.country_code,
        });
        let deal = self
            .floa
            .create_deal(
                &request.product_code,
                request.implementation_type.as_deref(),
                &deal_body,
            )
            .await?;

        let deal_reference = extract_deal_reference(&deal).ok_or_else(|| AppError::Upstream {
            status: 502,
            message: "deal created without a reference".into(),
            debug: Some(deal.clone()),
        })?;

        let total_amount = derivation.amount
            + request
                .ancillaries
                .iter()
                .map(|a| a.amount)
                .sum::<Decimal>();
        let now = Utc::now();
        let record = PaymentRecord {
            provider: PaymentProvider::Floa,
            status: PaymentStatus::Pending,
            partner_order_id: request.partner_order_id.clone(),
            prebook_token: Some(form.prebook_token.clone()),
            supplier_order_id: form.supplier_order_id.clone(),
            item_id: form.item_id,
            amount: total_amount,
            currency_code: currency.clone(),
            external_reference: Some(deal_reference.clone()),
            payload: deal.clone(),
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.insert_payment(record).await {
            tracing::warn!(
                error = %e,
                partner_order_id = %request.partner_order_id,
                "failed to persist floa payment"
            );
        }
        metrics::counter!("payments_created_total", &[("provider", "floa")]).increment(1);

        tracing::info!(
            partner_order_id = %request.partner_order_id,
            deal_reference = %deal_reference,
            amount = %total_amount,
            currency = %currency,
            "floa deal created"
        );

        Ok(HotelDealOutcome {
            deal_reference,
            merchant_reference,
            deal,
            amount: total_amount,
            currency,
        })
    }
}
