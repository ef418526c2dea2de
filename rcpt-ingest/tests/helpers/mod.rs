//! Test Helper Utilities
//!
//! Shared utilities for rcpt-ingest integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rcpt_common::events::{EventBus, ReceiptStatus};
use rcpt_ingest::db::{init_database_pool, ReceiptStore, SqliteReceiptStore};
use rcpt_ingest::error::{ProviderError, StorageError};
use rcpt_ingest::fusion::ResultReconciler;
use rcpt_ingest::models::{AcceptanceThresholds, Receipt, ReceiptLifecycle};
use rcpt_ingest::providers::{OcrProvider, ProviderEntry, ProviderOptions, ProviderSet};
use rcpt_ingest::types::{
    Amount, ExtractedFields, ImageFingerprint, ProviderKind, ProviderResult, PurchaseDate,
};
use rcpt_ingest::ProcessingOrchestrator;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Provider returning scripted outcomes in order (the last one repeats)
pub struct ScriptedProvider {
    kind: ProviderKind,
    outcomes: Mutex<VecDeque<Result<ProviderResult, ProviderError>>>,
    delay: Duration,
    cancel_on_return: Option<CancellationToken>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind, outcomes: Vec<Result<ProviderResult, ProviderError>>) -> Self {
        Self {
            kind,
            outcomes: Mutex::new(outcomes.into()),
            delay: Duration::ZERO,
            cancel_on_return: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn ok(result: ProviderResult) -> Self {
        Self::new(result.provider, vec![Ok(result)])
    }

    pub fn failing(kind: ProviderKind, error: ProviderError) -> Self {
        Self::new(kind, vec![Err(error)])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancel `token` right after producing the result
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_return = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Result<ProviderResult, ProviderError> {
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap()
        } else {
            outcomes.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl OcrProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn extract(
        &self,
        _image: &[u8],
        _options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Result<ProviderResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        let outcome = self.next_outcome();
        if let Some(token) = &self.cancel_on_return {
            token.cancel();
        }
        outcome
    }
}

/// Store whose writes always fail
pub struct FailingStore;

#[async_trait]
impl ReceiptStore for FailingStore {
    async fn save(&self, _receipt: &Receipt) -> Result<Receipt, StorageError> {
        Err(StorageError::Serialization("disk full".to_string()))
    }

    async fn find_by_owner_and_fingerprint(
        &self,
        _owner_id: &str,
        _fingerprint: &ImageFingerprint,
    ) -> Result<Option<Receipt>, StorageError> {
        Ok(None)
    }

    async fn update_status(
        &self,
        id: Uuid,
        _status: ReceiptStatus,
        _updated_at: DateTime<Utc>,
        _processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        Err(StorageError::NotFound(id))
    }
}

/// Store that commits writes, then holds the acknowledgement back
pub struct SlowAckStore {
    inner: Arc<SqliteReceiptStore>,
    ack_delay: Duration,
    cancel_after_commit: Option<CancellationToken>,
}

impl SlowAckStore {
    pub fn new(inner: Arc<SqliteReceiptStore>, ack_delay: Duration) -> Self {
        Self {
            inner,
            ack_delay,
            cancel_after_commit: None,
        }
    }

    /// Cancel `token` once the row is committed, before acknowledging
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_after_commit = Some(token);
        self
    }
}

#[async_trait]
impl ReceiptStore for SlowAckStore {
    async fn save(&self, receipt: &Receipt) -> Result<Receipt, StorageError> {
        let saved = self.inner.save(receipt).await?;
        if let Some(token) = &self.cancel_after_commit {
            token.cancel();
        }
        tokio::time::sleep(self.ack_delay).await;
        Ok(saved)
    }

    async fn find_by_owner_and_fingerprint(
        &self,
        owner_id: &str,
        fingerprint: &ImageFingerprint,
    ) -> Result<Option<Receipt>, StorageError> {
        self.inner.find_by_owner_and_fingerprint(owner_id, fingerprint).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ReceiptStatus,
        updated_at: DateTime<Utc>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.inner.update_status(id, status, updated_at, processed_at).await
    }
}

/// Store that rejects the final `Processed` update; other writes go through
pub struct RejectProcessedStore {
    inner: Arc<SqliteReceiptStore>,
}

impl RejectProcessedStore {
    pub fn new(inner: Arc<SqliteReceiptStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ReceiptStore for RejectProcessedStore {
    async fn save(&self, receipt: &Receipt) -> Result<Receipt, StorageError> {
        self.inner.save(receipt).await
    }

    async fn find_by_owner_and_fingerprint(
        &self,
        owner_id: &str,
        fingerprint: &ImageFingerprint,
    ) -> Result<Option<Receipt>, StorageError> {
        self.inner.find_by_owner_and_fingerprint(owner_id, fingerprint).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ReceiptStatus,
        updated_at: DateTime<Utc>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        if status == ReceiptStatus::Processed {
            return Err(StorageError::Serialization("status write lost".to_string()));
        }
        self.inner.update_status(id, status, updated_at, processed_at).await
    }
}

/// Store whose first `blind_lookups` duplicate lookups see nothing, as if a
/// concurrent submission had not committed yet
pub struct StaleLookupStore {
    inner: Arc<SqliteReceiptStore>,
    blind_lookups: AtomicUsize,
}

impl StaleLookupStore {
    pub fn new(inner: Arc<SqliteReceiptStore>, blind_lookups: usize) -> Self {
        Self {
            inner,
            blind_lookups: AtomicUsize::new(blind_lookups),
        }
    }
}

#[async_trait]
impl ReceiptStore for StaleLookupStore {
    async fn save(&self, receipt: &Receipt) -> Result<Receipt, StorageError> {
        self.inner.save(receipt).await
    }

    async fn find_by_owner_and_fingerprint(
        &self,
        owner_id: &str,
        fingerprint: &ImageFingerprint,
    ) -> Result<Option<Receipt>, StorageError> {
        let blind = self
            .blind_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if blind {
            return Ok(None);
        }
        self.inner.find_by_owner_and_fingerprint(owner_id, fingerprint).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ReceiptStatus,
        updated_at: DateTime<Utc>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.inner.update_status(id, status, updated_at, processed_at).await
    }
}

/// Create a file-backed test store
///
/// Returns (TempDir, store) - TempDir must be kept alive for duration of test
pub async fn create_test_store() -> (TempDir, Arc<SqliteReceiptStore>) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database_pool(&temp_dir.path().join("test_rcpt.db"))
        .await
        .unwrap();
    (temp_dir, Arc::new(SqliteReceiptStore::new(pool)))
}

/// Orchestrator over scripted providers with default thresholds
pub fn create_test_orchestrator(
    store: Arc<dyn ReceiptStore>,
    providers: Vec<Arc<ScriptedProvider>>,
    event_bus: EventBus,
) -> ProcessingOrchestrator {
    let entries = providers
        .into_iter()
        .map(|provider| ProviderEntry {
            provider: provider as Arc<dyn OcrProvider>,
            options: ProviderOptions::default(),
            timeout: Duration::from_secs(5),
        })
        .collect();

    ProcessingOrchestrator::new(
        store,
        ProviderSet::new(entries),
        ResultReconciler::default(),
        ReceiptLifecycle::new(AcceptanceThresholds::default(), event_bus.clone()),
        event_bus,
    )
}

/// Structured-extraction result that passes validation on its own
pub fn structured_result(store_name: &str, total_minor: i64, confidence: f64) -> ProviderResult {
    ProviderResult::new(
        ProviderKind::StructuredExtraction,
        Some(confidence),
        ExtractedFields {
            store_name: Some(store_name.to_string()),
            purchase_date: Some(PurchaseDate {
                date: NaiveDate::from_ymd_opt(2024, 5, 12).unwrap(),
                time: None,
            }),
            total_amount: Some(Amount::from_minor(total_minor)),
            ..Default::default()
        },
    )
    .with_document_type("receipt.retailMeal")
}

/// Text/location result with store and address details
pub fn location_result(store_name: &str, confidence: f64) -> ProviderResult {
    ProviderResult::new(
        ProviderKind::TextLocation,
        Some(confidence),
        ExtractedFields {
            store_name: Some(store_name.to_string()),
            address: Some("Lot 12, Jalan Telawi 3 Bangsar Baru".to_string()),
            phone: Some("0322821234".to_string()),
            postal_code: Some("59100".to_string()),
            country: Some("Malaysia".to_string()),
            ..Default::default()
        },
    )
    .with_preprocessing("enhanced")
}
