//! C10 / C13: the payment ledger, keyed by `telegram_payment_charge_id`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use caseloot_types::{PaymentRecord, PaymentStatus};
use sqlx::PgPool;

use crate::StoreError;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get(&self, charge_id: &str) -> Result<Option<PaymentRecord>, StoreError>;

    /// Idempotent insert: if a record for `record.telegram_payment_charge_id`
    /// already exists, it's returned unchanged and `record` is discarded.
    async fn insert_if_absent(&self, record: PaymentRecord) -> Result<PaymentRecord, StoreError>;

    async fn update_status(
        &self,
        charge_id: &str,
        status: PaymentStatus,
        awarded_item_id: Option<String>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPaymentStore {
    records: Mutex<HashMap<String, PaymentRecord>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn get(&self, charge_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        Ok(self.records.lock().expect("payment store mutex poisoned").get(charge_id).cloned())
    }

    async fn insert_if_absent(&self, record: PaymentRecord) -> Result<PaymentRecord, StoreError> {
        let mut records = self.records.lock().expect("payment store mutex poisoned");
        Ok(records.entry(record.telegram_payment_charge_id.clone()).or_insert(record).clone())
    }

    async fn update_status(
        &self,
        charge_id: &str,
        status: PaymentStatus,
        awarded_item_id: Option<String>,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.records.lock().expect("payment store mutex poisoned").get_mut(charge_id)
        {
            record.status = status;
            if awarded_item_id.is_some() {
                record.awarded_item_id = awarded_item_id;
            }
        }
        Ok(())
    }
}

/// Append-only journal file backend, mirroring [`crate::rng::FileRngStore`]:
/// full records are replayed at open time, new inserts are appended, and
/// status updates append a compact correction record.
pub struct FilePaymentStore {
    path: PathBuf,
    inner: InMemoryPaymentStore,
    write_lock: tokio::sync::Mutex<()>,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "op")]
enum JournalLine {
    Insert(PaymentRecord),
    UpdateStatus { charge_id: String, status: PaymentStatus, awarded_item_id: Option<String> },
}

impl FilePaymentStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let inner = InMemoryPaymentStore::new();
        if let Ok(text) = tokio::fs::read_to_string(&path).await {
            let mut records = inner.records.lock().expect("payment store mutex poisoned");
            for line in text.lines().filter(|l| !l.is_empty()) {
                match serde_json::from_str(line)? {
                    JournalLine::Insert(record) => {
                        records.insert(record.telegram_payment_charge_id.clone(), record);
                    }
                    JournalLine::UpdateStatus { charge_id, status, awarded_item_id } => {
                        if let Some(record) = records.get_mut(&charge_id) {
                            record.status = status;
                            if awarded_item_id.is_some() {
                                record.awarded_item_id = awarded_item_id;
                            }
                        }
                    }
                }
            }
        }
        Ok(Self { path, inner, write_lock: tokio::sync::Mutex::new(()) })
    }

    async fn append(&self, line: &JournalLine) -> Result<(), StoreError> {
        use tokio::io::AsyncWriteExt;
        let _guard = self.write_lock.lock().await;
        let mut text = serde_json::to_string(line)?;
        text.push('\n');
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(text.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for FilePaymentStore {
    async fn get(&self, charge_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        self.inner.get(charge_id).await
    }

    async fn insert_if_absent(&self, record: PaymentRecord) -> Result<PaymentRecord, StoreError> {
        if let Some(existing) = self.inner.get(&record.telegram_payment_charge_id).await? {
            return Ok(existing);
        }
        let result = self.inner.insert_if_absent(record).await?;
        self.append(&JournalLine::Insert(result.clone())).await?;
        Ok(result)
    }

    async fn update_status(
        &self,
        charge_id: &str,
        status: PaymentStatus,
        awarded_item_id: Option<String>,
    ) -> Result<(), StoreError> {
        self.inner.update_status(charge_id, status, awarded_item_id.clone()).await?;
        self.append(&JournalLine::UpdateStatus {
            charge_id: charge_id.to_string(),
            status,
            awarded_item_id,
        })
        .await
    }
}

pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    telegram_payment_charge_id: String,
    provider_payment_charge_id: String,
    invoice_payload: String,
    currency: String,
    total_amount: i64,
    user_id: i64,
    status: String,
    awarded_item_id: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<PaymentRow> for PaymentRecord {
    fn from(row: PaymentRow) -> Self {
        let status = match row.status.as_str() {
            "PAID" => PaymentStatus::Paid,
            "AWARDED" => PaymentStatus::Awarded,
            "REFUNDED" => PaymentStatus::Refunded,
            _ => PaymentStatus::Failed,
        };
        PaymentRecord {
            telegram_payment_charge_id: row.telegram_payment_charge_id,
            provider_payment_charge_id: row.provider_payment_charge_id,
            invoice_payload: row.invoice_payload,
            currency: row.currency,
            total_amount: row.total_amount,
            user_id: row.user_id,
            status,
            awarded_item_id: row.awarded_item_id,
            created_at: row.created_at,
        }
    }
}

fn status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Paid => "PAID",
        PaymentStatus::Awarded => "AWARDED",
        PaymentStatus::Refunded => "REFUNDED",
        PaymentStatus::Failed => "FAILED",
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn get(&self, charge_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(
            r#"SELECT telegram_payment_charge_id, provider_payment_charge_id, invoice_payload,
                      currency, total_amount, user_id, status, awarded_item_id, created_at
               FROM payments WHERE telegram_payment_charge_id = $1"#,
        )
        .bind(charge_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn insert_if_absent(&self, record: PaymentRecord) -> Result<PaymentRecord, StoreError> {
        let row: PaymentRow = sqlx::query_as(
            r#"INSERT INTO payments
                 (telegram_payment_charge_id, provider_payment_charge_id, invoice_payload,
                  currency, total_amount, user_id, status, awarded_item_id, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (telegram_payment_charge_id)
                 DO UPDATE SET telegram_payment_charge_id = payments.telegram_payment_charge_id
               RETURNING telegram_payment_charge_id, provider_payment_charge_id, invoice_payload,
                         currency, total_amount, user_id, status, awarded_item_id, created_at"#,
        )
        .bind(&record.telegram_payment_charge_id)
        .bind(&record.provider_payment_charge_id)
        .bind(&record.invoice_payload)
        .bind(&record.currency)
        .bind(record.total_amount)
        .bind(record.user_id)
        .bind(status_str(record.status))
        .bind(&record.awarded_item_id)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn update_status(
        &self,
        charge_id: &str,
        status: PaymentStatus,
        awarded_item_id: Option<String>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE payments SET status = $2,
                 awarded_item_id = COALESCE($3, awarded_item_id)
               WHERE telegram_payment_charge_id = $1"#,
        )
        .bind(charge_id)
        .bind(status_str(status))
        .bind(awarded_item_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(charge_id: &str) -> PaymentRecord {
        PaymentRecord {
            telegram_payment_charge_id: charge_id.into(),
            provider_payment_charge_id: "provider-1".into(),
            invoice_payload: "payload".into(),
            currency: "XTR".into(),
            total_amount: 100,
            user_id: 42,
            status: PaymentStatus::Paid,
            awarded_item_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_charge_id() {
        let store = InMemoryPaymentStore::new();
        let first = store.insert_if_absent(record("charge-1")).await.unwrap();
        let mut dup = record("charge-1");
        dup.total_amount = 999;
        let second = store.insert_if_absent(dup).await.unwrap();
        assert_eq!(first.total_amount, second.total_amount);
    }

    #[tokio::test]
    async fn update_status_mutates_existing_record() {
        let store = InMemoryPaymentStore::new();
        store.insert_if_absent(record("charge-1")).await.unwrap();
        store.update_status("charge-1", PaymentStatus::Awarded, Some("gift-a".into())).await.unwrap();
        let updated = store.get("charge-1").await.unwrap().unwrap();
        assert_eq!(updated.status, PaymentStatus::Awarded);
        assert_eq!(updated.awarded_item_id.as_deref(), Some("gift-a"));
    }

    #[tokio::test]
    async fn file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payments.jsonl");

        let store = FilePaymentStore::open(&path).await.unwrap();
        store.insert_if_absent(record("charge-1")).await.unwrap();
        store.update_status("charge-1", PaymentStatus::Awarded, Some("gift-a".into())).await.unwrap();
        drop(store);

        let reopened = FilePaymentStore::open(&path).await.unwrap();
        let record = reopened.get("charge-1").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Awarded);
    }
}
