//! Persistence for prebooks, booking forms, payments, and bookings.
//!
//! The store is append-or-upsert, looked up by natural keys
//! (`partner_order_id`, `external_reference`). It sits behind a trait so the
//! integration tests and local development can run against the in-memory
//! implementation while production uses PostgreSQL.

use crate::models::{
    BookingFormRecord, BookingRecord, PaymentProvider, PaymentRecord, PaymentStatus, PrebookRecord,
};
use async_trait::async_trait;
use dashmap::DashMap;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn save_prebook(&self, record: PrebookRecord) -> Result<(), AppError>;

    async fn save_booking_form(&self, record: BookingFormRecord) -> Result<(), AppError>;

    /// Most recent booking form for an order; that row is authoritative.
    async fn latest_booking_form(
        &self,
        partner_order_id: &str,
    ) -> Result<Option<BookingFormRecord>, AppError>;

    async fn insert_payment(&self, record: PaymentRecord) -> Result<(), AppError>;

    /// Most recent payment row for an order, used by the booking finish gate.
    async fn latest_payment(
        &self,
        partner_order_id: &str,
    ) -> Result<Option<PaymentRecord>, AppError>;

    /// Set-based, idempotent status update keyed by
    /// `(provider, external_reference OR partner_order_id)`. A non-terminal
    /// status never overwrites a terminal one. Returns affected row count.
    async fn apply_payment_status(
        &self,
        provider: PaymentProvider,
        reference: &str,
        partner_order_id: &str,
        status: PaymentStatus,
    ) -> Result<u64, AppError>;

    async fn insert_booking(&self, record: BookingRecord) -> Result<(), AppError>;

    /// Convenience denormalization driven by the webhook reconciler.
    async fn set_booking_status(
        &self,
        partner_order_id: &str,
        status: &str,
    ) -> Result<u64, AppError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn payment_from_row(row: &sqlx::postgres::PgRow) -> Result<PaymentRecord, AppError> {
        let provider_raw: String = row
            .try_get("provider")
            .map_err(|e| AppError::Database(e.into()))?;
        let status_raw: String = row
            .try_get("status")
            .map_err(|e| AppError::Database(e.into()))?;
        Ok(PaymentRecord {
            provider: PaymentProvider::from_str(&provider_raw).ok_or_else(|| {
                AppError::Database(anyhow::anyhow!("unknown provider: {}", provider_raw))
            })?,
            status: PaymentStatus::from_str(&status_raw).ok_or_else(|| {
                AppError::Database(anyhow::anyhow!("unknown status: {}", status_raw))
            })?,
            partner_order_id: row
                .try_get("partner_order_id")
                .map_err(|e| AppError::Database(e.into()))?,
            prebook_token: row
                .try_get("prebook_token")
                .map_err(|e| AppError::Database(e.into()))?,
            supplier_order_id: row
                .try_get("supplier_order_id")
                .map_err(|e| AppError::Database(e.into()))?,
            item_id: row
                .try_get("item_id")
                .map_err(|e| AppError::Database(e.into()))?,
            amount: row
                .try_get("amount")
                .map_err(|e| AppError::Database(e.into()))?,
            currency_code: row
                .try_get("currency_code")
                .map_err(|e| AppError::Database(e.into()))?,
            external_reference: row
                .try_get("external_reference")
                .map_err(|e| AppError::Database(e.into()))?,
            payload: row
                .try_get("payload")
                .map_err(|e| AppError::Database(e.into()))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| AppError::Database(e.into()))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| AppError::Database(e.into()))?,
        })
    }

    fn booking_form_from_row(row: &sqlx::postgres::PgRow) -> Result<BookingFormRecord, AppError> {
        Ok(BookingFormRecord {
            partner_order_id: row
                .try_get("partner_order_id")
                .map_err(|e| AppError::Database(e.into()))?,
            prebook_token: row
                .try_get("prebook_token")
                .map_err(|e| AppError::Database(e.into()))?,
            supplier_order_id: row
                .try_get("supplier_order_id")
                .map_err(|e| AppError::Database(e.into()))?,
            item_id: row
                .try_get("item_id")
                .map_err(|e| AppError::Database(e.into()))?,
            amount: row
                .try_get("amount")
                .map_err(|e| AppError::Database(e.into()))?,
            currency_code: row
                .try_get("currency_code")
                .map_err(|e| AppError::Database(e.into()))?,
            form: row
                .try_get("form")
                .map_err(|e| AppError::Database(e.into()))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| AppError::Database(e.into()))?,
        })
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn save_prebook(&self, record: PrebookRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO prebooks (offer_hash, prebook_token, request_id, summary, raw_response, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.offer_hash)
        .bind(&record.token)
        .bind(&record.request_id)
        .bind(&record.summary)
        .bind(&record.raw_response)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to save prebook: {}", e)))?;
        Ok(())
    }

    async fn save_booking_form(&self, record: BookingFormRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO booking_forms (partner_order_id, prebook_token, supplier_order_id, item_id, amount, currency_code, form, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.partner_order_id)
        .bind(&record.prebook_token)
        .bind(&record.supplier_order_id)
        .bind(record.item_id)
        .bind(record.amount)
        .bind(&record.currency_code)
        .bind(&record.form)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to save booking form: {}", e)))?;
        Ok(())
    }

    async fn latest_booking_form(
        &self,
        partner_order_id: &str,
    ) -> Result<Option<BookingFormRecord>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT partner_order_id, prebook_token, supplier_order_id, item_id, amount, currency_code, form, created_at
            FROM booking_forms
            WHERE partner_order_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(partner_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to load booking form: {}", e)))?;

        row.map(|r| Self::booking_form_from_row(&r)).transpose()
    }

    async fn insert_payment(&self, record: PaymentRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO payments (provider, status, partner_order_id, prebook_token, supplier_order_id, item_id, amount, currency_code, external_reference, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.provider.as_str())
        .bind(record.status.as_str())
        .bind(&record.partner_order_id)
        .bind(&record.prebook_token)
        .bind(&record.supplier_order_id)
        .bind(record.item_id)
        .bind(record.amount)
        .bind(&record.currency_code)
        .bind(&record.external_reference)
        .bind(&record.payload)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to insert payment: {}", e)))?;
        Ok(())
    }

    async fn latest_payment(
        &self,
        partner_order_id: &str,
    ) -> Result<Option<PaymentRecord>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT provider, status, partner_order_id, prebook_token, supplier_order_id, item_id, amount, currency_code, external_reference, payload, created_at, updated_at
            FROM payments
            WHERE partner_order_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(partner_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to load payment: {}", e)))?;

        row.map(|r| Self::payment_from_row(&r)).transpose()
    }

    async fn apply_payment_status(
        &self,
        provider: PaymentProvider,
        reference: &str,
        partner_order_id: &str,
        status: PaymentStatus,
    ) -> Result<u64, AppError> {
        // Terminal guard: a stale `pending` notification must not revert a
        // row that already reached `paid` or `failed`.
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1, updated_at = NOW()
            WHERE provider = $2
              AND (external_reference = $3 OR partner_order_id = $4)
              AND (status = 'pending' OR $1 <> 'pending')
            "#,
        )
        .bind(status.as_str())
        .bind(provider.as_str())
        .bind(reference)
        .bind(partner_order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to update payment: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn insert_booking(&self, record: BookingRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO bookings (partner_order_id, supplier_order_id, status, user_email, user_phone, user_name, amount, currency_code, raw, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&record.partner_order_id)
        .bind(&record.supplier_order_id)
        .bind(&record.status)
        .bind(&record.user_email)
        .bind(&record.user_phone)
        .bind(&record.user_name)
        .bind(record.amount)
        .bind(&record.currency_code)
        .bind(&record.raw)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to insert booking: {}", e)))?;
        Ok(())
    }

    async fn set_booking_status(
        &self,
        partner_order_id: &str,
        status: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $1
            WHERE partner_order_id = $2
            "#,
        )
        .bind(status)
        .bind(partner_order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to update booking: {}", e)))?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Dashmap-backed store for local development and integration tests.
/// Keyed like the relational layout; append order stands in for serial ids.
#[derive(Default)]
pub struct InMemoryStore {
    prebooks: DashMap<String, Vec<PrebookRecord>>,
    booking_forms: DashMap<String, Vec<BookingFormRecord>>,
    payments: DashMap<String, Vec<PaymentRecord>>,
    bookings: DashMap<String, Vec<BookingRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn save_prebook(&self, record: PrebookRecord) -> Result<(), AppError> {
        self.prebooks
            .entry(record.offer_hash.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn save_booking_form(&self, record: BookingFormRecord) -> Result<(), AppError> {
        self.booking_forms
            .entry(record.partner_order_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn latest_booking_form(
        &self,
        partner_order_id: &str,
    ) -> Result<Option<BookingFormRecord>, AppError> {
        Ok(self
            .booking_forms
            .get(partner_order_id)
            .and_then(|rows| rows.last().cloned()))
    }

    async fn insert_payment(&self, record: PaymentRecord) -> Result<(), AppError> {
        self.payments
            .entry(record.partner_order_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn latest_payment(
        &self,
        partner_order_id: &str,
    ) -> Result<Option<PaymentRecord>, AppError> {
        Ok(self
            .payments
            .get(partner_order_id)
            .and_then(|rows| rows.last().cloned()))
    }

    async fn apply_payment_status(
        &self,
        provider: PaymentProvider,
        reference: &str,
        partner_order_id: &str,
        status: PaymentStatus,
    ) -> Result<u64, AppError> {
        let mut affected = 0;
        for mut rows in self.payments.iter_mut() {
            for payment in rows.value_mut().iter_mut() {
                let matches_ref = payment.external_reference.as_deref() == Some(reference)
                    || payment.partner_order_id == partner_order_id;
                if payment.provider != provider || !matches_ref {
                    continue;
                }
                if payment.status.is_terminal() && !status.is_terminal() {
                    continue;
                }
                payment.status = status;
                payment.updated_at = chrono::Utc::now();
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn insert_booking(&self, record: BookingRecord) -> Result<(), AppError> {
        self.bookings
            .entry(record.partner_order_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn set_booking_status(
        &self,
        partner_order_id: &str,
        status: &str,
    ) -> Result<u64, AppError> {
        let mut affected = 0;
        if let Some(mut rows) = self.bookings.get_mut(partner_order_id) {
            for booking in rows.value_mut().iter_mut() {
                booking.status = status.to_string();
                affected += 1;
            }
        }
        Ok(affected)
    }
}
