//! Persistence collaborator for rcpt-ingest
//!
//! The core only depends on the `ReceiptStore` trait; `SqliteReceiptStore`
//! is the shipped implementation.

pub mod receipts;

use crate::error::StorageError;
use crate::models::Receipt;
use crate::types::ImageFingerprint;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rcpt_common::events::ReceiptStatus;
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

pub use receipts::SqliteReceiptStore;

/// Receipt statuses that never count as a duplicate conflict
///
/// A submission that failed validation (or was cancelled) may be retried
/// with the same image.
pub const DUPLICATE_EXEMPT_STATUSES: [ReceiptStatus; 2] =
    [ReceiptStatus::ValidationFailed, ReceiptStatus::Cancelled];

/// Partial unique index over live (non-exempt) receipts
pub(crate) const LIVE_FINGERPRINT_INDEX: &str = "idx_receipts_owner_fingerprint_live";

/// Storage interface consumed by the pipeline
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Insert a new receipt
    ///
    /// Fails with `FingerprintConflict` if the owner already has a live
    /// receipt for the same image.
    async fn save(&self, receipt: &Receipt) -> Result<Receipt, StorageError>;

    /// Oldest receipt for (owner, fingerprint) that is not duplicate-exempt
    async fn find_by_owner_and_fingerprint(
        &self,
        owner_id: &str,
        fingerprint: &ImageFingerprint,
    ) -> Result<Option<Receipt>, StorageError>;

    /// Persist a status change made by the lifecycle
    async fn update_status(
        &self,
        id: Uuid,
        status: ReceiptStatus,
        updated_at: DateTime<Utc>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;
}

/// Initialize database connection pool
///
/// Creates the database file (and parent directory) on first use.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the receipts table and lookup index if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipts (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            status TEXT NOT NULL,
            store_name TEXT,
            address TEXT,
            phone TEXT,
            postal_code TEXT,
            country TEXT,
            purchase_date TEXT,
            purchase_time TEXT,
            total_minor INTEGER,
            subtotal_minor INTEGER,
            tax_minor INTEGER,
            tip_minor INTEGER,
            line_items TEXT NOT NULL DEFAULT '[]',
            transaction_id TEXT,
            payment_method TEXT,
            document_type TEXT,
            attribution TEXT,
            field_sources TEXT NOT NULL DEFAULT '{}',
            ocr_confidence REAL,
            location_confidence REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            processed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_receipts_owner_fingerprint ON receipts (owner_id, fingerprint)",
    )
    .execute(pool)
    .await?;

    // At most one live receipt per (owner, image), even under concurrent submissions
    let live_unique = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON receipts (owner_id, fingerprint) \
         WHERE status NOT IN ('{}', '{}')",
        LIVE_FINGERPRINT_INDEX,
        DUPLICATE_EXEMPT_STATUSES[0].as_str(),
        DUPLICATE_EXEMPT_STATUSES[1].as_str(),
    );
    sqlx::query(&live_unique).execute(pool).await?;

    Ok(())
}
