//! Receipt database operations
//!
//! Amounts are stored as integer minor units, timestamps as fixed-width
//! RFC 3339 text (microseconds, `Z`) so they sort chronologically,
//! line items and field provenance as JSON.

use super::{ReceiptStore, DUPLICATE_EXEMPT_STATUSES, LIVE_FINGERPRINT_INDEX};
use crate::error::StorageError;
use crate::models::Receipt;
use crate::types::{
    Amount, ExtractedFields, ImageFingerprint, LineItem, ProviderAttribution, ProviderKind,
    PurchaseDate,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rcpt_common::events::ReceiptStatus;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// SQLite-backed receipt store
#[derive(Clone)]
pub struct SqliteReceiptStore {
    pool: SqlitePool,
}

impl SqliteReceiptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load receipt by id
    pub async fn load(&self, id: Uuid) -> Result<Option<Receipt>, StorageError> {
        let row = sqlx::query("SELECT * FROM receipts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| receipt_from_row(&r)).transpose()
    }

    /// Count receipts for an owner (all statuses)
    pub async fn count_for_owner(&self, owner_id: &str) -> Result<i64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM receipts WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl ReceiptStore for SqliteReceiptStore {
    async fn save(&self, receipt: &Receipt) -> Result<Receipt, StorageError> {
        let fields = receipt.fields();
        let line_items = serde_json::to_string(&fields.line_items)
            .map_err(|e| StorageError::Serialization(format!("line_items: {}", e)))?;
        let field_sources = serde_json::to_string(receipt.field_sources())
            .map_err(|e| StorageError::Serialization(format!("field_sources: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO receipts (
                id, owner_id, fingerprint, status,
                store_name, address, phone, postal_code, country,
                purchase_date, purchase_time,
                total_minor, subtotal_minor, tax_minor, tip_minor,
                line_items, transaction_id, payment_method, document_type,
                attribution, field_sources, ocr_confidence, location_confidence,
                created_at, updated_at, processed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(receipt.id().to_string())
        .bind(receipt.owner_id())
        .bind(receipt.fingerprint().as_str())
        .bind(receipt.status().as_str())
        .bind(&fields.store_name)
        .bind(&fields.address)
        .bind(&fields.phone)
        .bind(&fields.postal_code)
        .bind(&fields.country)
        .bind(fields.purchase_date.map(|d| d.date.format(DATE_FORMAT).to_string()))
        .bind(
            fields
                .purchase_date
                .and_then(|d| d.time)
                .map(|t| t.format(TIME_FORMAT).to_string()),
        )
        .bind(fields.total_amount.map(Amount::minor_units))
        .bind(fields.subtotal_amount.map(Amount::minor_units))
        .bind(fields.tax_amount.map(Amount::minor_units))
        .bind(fields.tip_amount.map(Amount::minor_units))
        .bind(line_items)
        .bind(&fields.transaction_id)
        .bind(&fields.payment_method)
        .bind(receipt.document_type())
        .bind(receipt.attribution().map(|a| a.to_string()))
        .bind(field_sources)
        .bind(receipt.ocr_confidence())
        .bind(receipt.location_confidence())
        .bind(format_timestamp(receipt.created_at()))
        .bind(format_timestamp(receipt.updated_at()))
        .bind(receipt.processed_at().map(format_timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let conflict = matches!(
                &e,
                sqlx::Error::Database(db) if is_live_fingerprint_violation(db.message())
            );
            if conflict {
                StorageError::FingerprintConflict {
                    owner_id: receipt.owner_id().to_string(),
                    fingerprint: receipt.fingerprint().to_string(),
                }
            } else {
                StorageError::Database(e)
            }
        })?;

        tracing::debug!(
            receipt_id = %receipt.id(),
            status = %receipt.status(),
            "Receipt saved"
        );

        Ok(receipt.clone())
    }

    async fn find_by_owner_and_fingerprint(
        &self,
        owner_id: &str,
        fingerprint: &ImageFingerprint,
    ) -> Result<Option<Receipt>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM receipts
            WHERE owner_id = ? AND fingerprint = ? AND status NOT IN (?, ?)
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(fingerprint.as_str())
        .bind(DUPLICATE_EXEMPT_STATUSES[0].as_str())
        .bind(DUPLICATE_EXEMPT_STATUSES[1].as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| receipt_from_row(&r)).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ReceiptStatus,
        updated_at: DateTime<Utc>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE receipts SET status = ?, updated_at = ?, processed_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(format_timestamp(updated_at))
        .bind(processed_at.map(format_timestamp))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }

        Ok(())
    }
}

fn decode_err(column: &str, detail: impl std::fmt::Display) -> StorageError {
    StorageError::Serialization(format!("Invalid {} column: {}", column, detail))
}

fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite reports a partial-index violation by its column list, not its name
fn is_live_fingerprint_violation(message: &str) -> bool {
    message.contains(LIVE_FINGERPRINT_INDEX)
        || message.contains("receipts.owner_id, receipts.fingerprint")
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| decode_err(column, e))
}

fn receipt_from_row(row: &SqliteRow) -> Result<Receipt, StorageError> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id).map_err(|e| decode_err("id", e))?;

    let fingerprint: String = row.try_get("fingerprint")?;
    let fingerprint = ImageFingerprint::parse(&fingerprint)
        .ok_or_else(|| decode_err("fingerprint", &fingerprint))?;

    let status: String = row.try_get("status")?;
    let status: ReceiptStatus = status.parse()?;

    let purchase_date = match row.try_get::<Option<String>, _>("purchase_date")? {
        Some(date) => {
            let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
                .map_err(|e| decode_err("purchase_date", e))?;
            let time = row
                .try_get::<Option<String>, _>("purchase_time")?
                .map(|t| NaiveTime::parse_from_str(&t, TIME_FORMAT))
                .transpose()
                .map_err(|e| decode_err("purchase_time", e))?;
            Some(PurchaseDate { date, time })
        }
        None => None,
    };

    let line_items: String = row.try_get("line_items")?;
    let line_items: Vec<LineItem> =
        serde_json::from_str(&line_items).map_err(|e| decode_err("line_items", e))?;

    let field_sources: String = row.try_get("field_sources")?;
    let field_sources: BTreeMap<String, ProviderKind> =
        serde_json::from_str(&field_sources).map_err(|e| decode_err("field_sources", e))?;

    let attribution = row
        .try_get::<Option<String>, _>("attribution")?
        .map(|a| a.parse::<ProviderAttribution>())
        .transpose()
        .map_err(|e| decode_err("attribution", e))?;

    let amount = |column: &str| -> Result<Option<Amount>, StorageError> {
        Ok(row.try_get::<Option<i64>, _>(column)?.map(Amount::from_minor))
    };

    let fields = ExtractedFields {
        store_name: row.try_get("store_name")?,
        address: row.try_get("address")?,
        phone: row.try_get("phone")?,
        postal_code: row.try_get("postal_code")?,
        country: row.try_get("country")?,
        purchase_date,
        total_amount: amount("total_minor")?,
        subtotal_amount: amount("subtotal_minor")?,
        tax_amount: amount("tax_minor")?,
        tip_amount: amount("tip_minor")?,
        line_items,
        transaction_id: row.try_get("transaction_id")?,
        payment_method: row.try_get("payment_method")?,
    };

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let processed_at = row
        .try_get::<Option<String>, _>("processed_at")?
        .map(|t| parse_timestamp("processed_at", &t))
        .transpose()?;

    Ok(Receipt::restore(
        id,
        row.try_get("owner_id")?,
        fields,
        field_sources,
        attribution,
        row.try_get("document_type")?,
        fingerprint,
        status,
        row.try_get("ocr_confidence")?,
        row.try_get("location_confidence")?,
        parse_timestamp("created_at", &created_at)?,
        parse_timestamp("updated_at", &updated_at)?,
        processed_at,
    ))
}
