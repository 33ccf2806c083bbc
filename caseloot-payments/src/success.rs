//! Successful-payment transition (§4.8): `PAID -> AWARDED`, with `REFUNDED`
//! as the failure sink for external award attempts.

use std::sync::Arc;

use caseloot_antifraud::{VelocityContext, VelocityScorer};
use caseloot_cases::CasesRegistry;
use caseloot_rng::RngService;
use caseloot_storage::PaymentStore;
use caseloot_telegram::{decode_invoice_payload, TelegramClient};
use caseloot_types::{EventType, PaymentRecord, PaymentStatus, PrizeKind};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde_json::Value;
use tracing::{info, warn};

use crate::{error::PaymentError, refund::RefundService};

pub struct SuccessService {
    client: Arc<dyn TelegramClient>,
    payments: Arc<dyn PaymentStore>,
    cases: Arc<CasesRegistry>,
    rng: Arc<RngService>,
    refunds: Arc<RefundService>,
    scorer: Arc<VelocityScorer>,
    fairness_key: SecretString,
}

impl SuccessService {
    pub fn new(
        client: Arc<dyn TelegramClient>,
        payments: Arc<dyn PaymentStore>,
        cases: Arc<CasesRegistry>,
        rng: Arc<RngService>,
        refunds: Arc<RefundService>,
        scorer: Arc<VelocityScorer>,
        fairness_key: SecretString,
    ) -> Self {
        Self { client, payments, cases, rng, refunds, scorer, fairness_key }
    }

    /// Handles one `successful_payment` payload. Idempotent on
    /// `telegram_payment_charge_id`: a record that already exists for this
    /// charge id (whatever its current status) means a prior call already
    /// ran the draw and award, so this call only records the replay.
    ///
    /// Scores the capture itself as a `Success` event (§4.2/§4.3): this
    /// feeds `SUCCESS_BURST` and the `pay_af_decisions_total` accounting,
    /// but per §4.8 "post-capture antifraud is observe-only" the verdict is
    /// never allowed to block -- `AntifraudAction::demoted_for` already
    /// guarantees `Success` can't come back `HARD_BLOCK`, so the result is
    /// recorded and otherwise ignored here.
    pub async fn handle(
        &self,
        success: &Value,
        user_id: i64,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        let charge_id = success
            .get("telegram_payment_charge_id")
            .and_then(Value::as_str)
            .ok_or(PaymentError::InvalidInvoicePayload(caseloot_telegram::InvoicePayloadError::Malformed))?;
        let provider_charge_id =
            success.get("provider_payment_charge_id").and_then(Value::as_str).unwrap_or_default();
        let currency = success.get("currency").and_then(Value::as_str).unwrap_or_default();
        let total_amount = success.get("total_amount").and_then(Value::as_i64).unwrap_or(0);
        let raw_payload = success.get("invoice_payload").and_then(Value::as_str).unwrap_or_default();

        self.scorer
            .evaluate(
                &VelocityContext {
                    ip: ip.to_string(),
                    subject: Some(user_id),
                    path: "/telegram/webhook".to_string(),
                    user_agent: None,
                    event_type: EventType::Success,
                },
                now.timestamp_millis(),
            )
            .await;

        let candidate = PaymentRecord {
            telegram_payment_charge_id: charge_id.to_string(),
            provider_payment_charge_id: provider_charge_id.to_string(),
            invoice_payload: raw_payload.to_string(),
            currency: currency.to_string(),
            total_amount,
            user_id,
            status: PaymentStatus::Paid,
            awarded_item_id: None,
            created_at: now,
        };

        let existed_before = self.payments.get(charge_id).await?.is_some();
        let stored = self.payments.insert_if_absent(candidate).await?;
        if existed_before {
            caseloot_metrics::pay_success_idempotent();
            info!(charge_id, "successful-payment replay observed, not re-awarding");
            return Ok(());
        }

        let payload = decode_invoice_payload(&self.fairness_key, &stored.invoice_payload)?;
        let snapshot = self.cases.load();
        let case = snapshot
            .internal_case(&payload.case_id)
            .ok_or_else(|| PaymentError::UnknownCase(payload.case_id.clone()))?;

        let draw = self.rng.draw(&payload.case_id, payload.user_id, &payload.nonce, &case.items, now).await?;

        let kind = match &draw.result_item_id {
            None => PrizeKind::Internal,
            Some(item_id) => case
                .items
                .iter()
                .find(|i| &i.id == item_id)
                .map(|i| i.kind)
                .unwrap_or(PrizeKind::Internal),
        };
        let item_id = draw.result_item_id.as_deref().unwrap_or("internal");

        self.award_item(charge_id, item_id, kind, user_id).await
    }

    /// Dispatch one award by `PrizeKind` (§4.8 step 4) and mark the payment
    /// `AWARDED`, or refund and leave the terminal status on failure.
    async fn award_item(
        &self,
        charge_id: &str,
        item_id: &str,
        kind: PrizeKind,
        user_id: i64,
    ) -> Result<(), PaymentError> {
        if kind == PrizeKind::Internal {
            self.payments.update_status(charge_id, PaymentStatus::Awarded, Some(item_id.to_string())).await?;
            caseloot_metrics::pay_success();
            caseloot_metrics::award("internal");
            return Ok(());
        }

        let award_result = match kind {
            PrizeKind::Gift => self.client.send_gift(user_id, item_id).await,
            PrizeKind::Premium3M | PrizeKind::Premium6M | PrizeKind::Premium12M => {
                let months = kind.premium_months().expect("premium kinds carry a month count");
                self.client.grant_premium(user_id, months).await
            }
            PrizeKind::Internal => unreachable!("handled above"),
        };

        match award_result {
            Ok(()) => {
                let metric_kind = if kind == PrizeKind::Gift { "gift" } else { "premium" };
                self.payments.update_status(charge_id, PaymentStatus::Awarded, Some(item_id.to_string())).await?;
                caseloot_metrics::pay_success();
                caseloot_metrics::award(metric_kind);
                Ok(())
            }
            Err(err) => {
                warn!(charge_id, item_id, %err, "award failed, issuing refund");
                caseloot_metrics::pay_success_fail();
                caseloot_metrics::award("fail");
                self.refunds.refund(charge_id, user_id).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use caseloot_antifraud::VelocityConfig;
    use caseloot_cases::CasesSnapshot;
    use caseloot_storage::{InMemoryPaymentStore, InMemoryRngStore, InMemoryVelocityStore};
    use caseloot_telegram::{
        encode_invoice_payload, ClientError, CreateInvoiceParams, InvoicePayload, SetWebhookParams, WebhookInfo,
    };
    use caseloot_types::{CaseConfig, CasesRoot, PrizeItem};
    use serde_json::json;

    use super::*;
    use crate::refund::RefundService;

    struct ScriptedClient {
        gift_fails: bool,
    }

    #[async_trait]
    impl TelegramClient for ScriptedClient {
        async fn create_invoice_link(&self, _: CreateInvoiceParams<'_>) -> Result<String, ClientError> {
            unimplemented!()
        }
        async fn answer_pre_checkout_query(&self, _: &str, _: bool, _: Option<&str>) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn refund_star_payment(&self, _: i64, _: &str) -> Result<(), ClientError> {
            Ok(())
        }
        async fn send_gift(&self, _: i64, _: &str) -> Result<(), ClientError> {
            if self.gift_fails {
                Err(ClientError::Permanent { status: 400, description: "no such gift".into() })
            } else {
                Ok(())
            }
        }
        async fn grant_premium(&self, _: i64, _: u32) -> Result<(), ClientError> {
            Ok(())
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

    fn fairness_key() -> SecretString {
        SecretString::new("f".repeat(64).into())
    }

    fn cases_registry() -> Arc<CasesRegistry> {
        let root = CasesRoot {
            cases: vec![CaseConfig {
                id: "classic".into(),
                title: "Classic Case".into(),
                price_stars: 100,
                rtp_ext_min: 0.0,
                rtp_ext_max: 1.0,
                jackpot_alpha: 0.05,
                items: vec![PrizeItem {
                    id: "gift-a".into(),
                    kind: PrizeKind::Gift,
                    star_cost: Some(80),
                    probability_ppm: 1_000_000,
                }],
            }],
        };
        Arc::new(CasesRegistry::new(CasesSnapshot::from_root(root)))
    }

    fn service(gift_fails: bool) -> (Arc<dyn PaymentStore>, SuccessService) {
        let client: Arc<dyn TelegramClient> = Arc::new(ScriptedClient { gift_fails });
        let payments: Arc<dyn PaymentStore> = Arc::new(InMemoryPaymentStore::new());
        let rng = Arc::new(RngService::new(Arc::new(InMemoryRngStore::new())));
        let refunds = Arc::new(RefundService::new(client.clone(), payments.clone()));
        let scorer = Arc::new(VelocityScorer::new(Arc::new(InMemoryVelocityStore::new()), VelocityConfig::default()));
        let svc = SuccessService::new(
            client,
            payments.clone(),
            cases_registry(),
            rng,
            refunds,
            scorer,
            fairness_key(),
        );
        (payments, svc)
    }

    fn success_payload(charge_id: &str, user_id: i64, nonce: &str) -> Value {
        let payload = InvoicePayload { case_id: "classic".into(), user_id, nonce: nonce.into() };
        json!({
            "telegram_payment_charge_id": charge_id,
            "provider_payment_charge_id": "provider-1",
            "currency": "XTR",
            "total_amount": 100,
            "invoice_payload": encode_invoice_payload(&fairness_key(), &payload),
        })
    }

    #[tokio::test]
    async fn successful_gift_award_marks_awarded() {
        let (payments, svc) = service(false);
        let success = success_payload("charge-1", 42, "n1");
        svc.handle(&success, 42, "203.0.113.1", Utc::now()).await.unwrap();

        let record = payments.get("charge-1").await.unwrap().unwrap();
        assert!(matches!(record.status, PaymentStatus::Awarded));
        assert_eq!(record.awarded_item_id.as_deref(), Some("gift-a"));
    }

    #[tokio::test]
    async fn duplicate_charge_id_is_not_reawarded() {
        let (payments, svc) = service(false);
        let success = success_payload("charge-1", 42, "n1");
        let now = Utc::now();
        svc.handle(&success, 42, "203.0.113.1", now).await.unwrap();
        svc.handle(&success, 42, "203.0.113.1", now).await.unwrap();

        let record = payments.get("charge-1").await.unwrap().unwrap();
        assert!(matches!(record.status, PaymentStatus::Awarded));
    }

    #[tokio::test]
    async fn failed_gift_award_triggers_refund_and_leaves_paid() {
        let (payments, svc) = service(true);
        let success = success_payload("charge-2", 7, "n2");
        svc.handle(&success, 7, "203.0.113.1", Utc::now()).await.unwrap();

        let record = payments.get("charge-2").await.unwrap().unwrap();
        assert!(matches!(record.status, PaymentStatus::Refunded));
    }

    /// §4.2/§4.3: the capture itself is a scored `Success` event, so a
    /// burst of successful payments should feed the same velocity counter
    /// a repeated webhook/invoice burst would.
    #[tokio::test]
    async fn successful_payment_feeds_the_success_burst_counter() {
        let client: Arc<dyn TelegramClient> = Arc::new(ScriptedClient { gift_fails: false });
        let payments: Arc<dyn PaymentStore> = Arc::new(InMemoryPaymentStore::new());
        let rng = Arc::new(RngService::new(Arc::new(InMemoryRngStore::new())));
        let refunds = Arc::new(RefundService::new(client.clone(), payments.clone()));
        let velocity_store = Arc::new(InMemoryVelocityStore::new());
        let config = VelocityConfig { success_max: 0, ..VelocityConfig::default() };
        let scorer = Arc::new(VelocityScorer::new(velocity_store, config));
        let svc = SuccessService::new(
            client,
            payments,
            cases_registry(),
            rng,
            refunds,
            Arc::clone(&scorer),
            fairness_key(),
        );

        let success = success_payload("charge-3", 99, "n3");
        svc.handle(&success, 99, "203.0.113.7", Utc::now()).await.unwrap();

        let verdict = scorer
            .evaluate(
                &VelocityContext {
                    ip: "203.0.113.7".to_string(),
                    subject: Some(99),
                    path: "/telegram/webhook".to_string(),
                    user_agent: None,
                    event_type: EventType::Success,
                },
                0,
            )
            .await;
        assert!(verdict.flags.contains(&caseloot_types::VelocityFlag::SuccessBurst));
    }
}
