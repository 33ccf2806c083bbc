//! Refund path (§4.8): invoked only for `XTR`-denominated charges, with up
//! to 3 retries on transient failure. Final failure leaves the payment's
//! status untouched (`PAID`) for operator reconciliation rather than
//! guessing at a terminal state we can't confirm.

use std::sync::Arc;

use caseloot_concurrency::backoff::default_outbound_backoff_iter;
use caseloot_storage::PaymentStore;
use caseloot_telegram::TelegramClient;
use caseloot_types::{PaymentRecord, PaymentStatus};
use tracing::warn;

use crate::error::PaymentError;

pub struct RefundService {
    client: Arc<dyn TelegramClient>,
    payments: Arc<dyn PaymentStore>,
}

impl RefundService {
    pub fn new(client: Arc<dyn TelegramClient>, payments: Arc<dyn PaymentStore>) -> Self {
        Self { client, payments }
    }

    pub async fn refund(&self, charge_id: &str, user_id: i64) -> Result<(), PaymentError> {
        let Some(record) = self.payments.get(charge_id).await? else {
            return Ok(());
        };
        if record.currency != PaymentRecord::CURRENCY_XTR {
            return Ok(());
        }

        let mut backoff = default_outbound_backoff_iter();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.refund_star_payment(user_id, charge_id).await {
                Ok(()) => {
                    self.payments.update_status(charge_id, PaymentStatus::Refunded, None).await?;
                    caseloot_metrics::refund();
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < 3 => {
                    let wait = backoff.next().expect("backoff iterator never ends");
                    warn!(charge_id, attempt, %err, "refund attempt failed, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    warn!(charge_id, attempt, %err, "refund failed, leaving payment PAID for reconciliation");
                    caseloot_metrics::refund_fail();
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use caseloot_storage::InMemoryPaymentStore;
    use caseloot_telegram::{ClientError, CreateInvoiceParams, SetWebhookParams, WebhookInfo};
    use chrono::Utc;
    use serde_json::Value;

    use super::*;

    struct StubClient {
        succeeds: bool,
    }

    #[async_trait]
    impl TelegramClient for StubClient {
        async fn create_invoice_link(&self, _: CreateInvoiceParams<'_>) -> Result<String, ClientError> {
            unimplemented!()
        }
        async fn answer_pre_checkout_query(&self, _: &str, _: bool, _: Option<&str>) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn refund_star_payment(&self, _: i64, _: &str) -> Result<(), ClientError> {
            if self.succeeds {
                Ok(())
            } else {
                Err(ClientError::Permanent { status: 400, description: "cannot refund".into() })
            }
        }
        async fn send_gift(&self, _: i64, _: &str) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn grant_premium(&self, _: i64, _: u32) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn set_webhook(&self, _: SetWebhookParams) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn delete_webhook(&self, _: bool) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn get_webhook_info(&self) -> Result<WebhookInfo, ClientError> {
            unimplemented!()
        }
        async fn get_updates(&self, _: i64, _: u64) -> Result<Vec<Value>, ClientError> {
            unimplemented!()
        }
    }

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
    async fn successful_refund_marks_refunded() {
        let payments: Arc<dyn PaymentStore> = Arc::new(InMemoryPaymentStore::new());
        payments.insert_if_absent(record("charge-1")).await.unwrap();
        let svc = RefundService::new(Arc::new(StubClient { succeeds: true }), payments.clone());

        svc.refund("charge-1", 42).await.unwrap();
        let updated = payments.get("charge-1").await.unwrap().unwrap();
        assert!(matches!(updated.status, PaymentStatus::Refunded));
    }

    #[tokio::test]
    async fn permanent_failure_leaves_status_paid() {
        let payments: Arc<dyn PaymentStore> = Arc::new(InMemoryPaymentStore::new());
        payments.insert_if_absent(record("charge-2")).await.unwrap();
        let svc = RefundService::new(Arc::new(StubClient { succeeds: false }), payments.clone());

        svc.refund("charge-2", 42).await.unwrap();
        let updated = payments.get("charge-2").await.unwrap().unwrap();
        assert!(matches!(updated.status, PaymentStatus::Paid));
    }

    #[tokio::test]
    async fn refund_for_non_xtr_currency_is_a_no_op() {
        let payments: Arc<dyn PaymentStore> = Arc::new(InMemoryPaymentStore::new());
        let mut other_currency = record("charge-3");
        other_currency.currency = "USD".into();
        payments.insert_if_absent(other_currency).await.unwrap();
        let svc = RefundService::new(Arc::new(StubClient { succeeds: true }), payments.clone());

        svc.refund("charge-3", 42).await.unwrap();
        let updated = payments.get("charge-3").await.unwrap().unwrap();
        assert!(matches!(updated.status, PaymentStatus::Paid));
    }
}
