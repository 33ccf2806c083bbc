//! Pre-checkout transition (§4.8): `INVOICED -> PRECHECKED`. Answered within
//! a hard 10s deadline, as the platform will fail the payment if it isn't.

use std::{sync::Arc, time::Duration};

use caseloot_antifraud::{VelocityContext, VelocityScorer};
use caseloot_cases::CasesRegistry;
use caseloot_telegram::{decode_invoice_payload, TelegramClient};
use caseloot_types::{AntifraudAction, EventType, PaymentRecord};
use secrecy::SecretString;
use serde_json::Value;
use tracing::warn;

use crate::error::PaymentError;

const ANSWER_DEADLINE: Duration = Duration::from_secs(10);

pub struct PreCheckoutService {
    client: Arc<dyn TelegramClient>,
    cases: Arc<CasesRegistry>,
    scorer: Arc<VelocityScorer>,
    fairness_key: SecretString,
}

impl PreCheckoutService {
    pub fn new(
        client: Arc<dyn TelegramClient>,
        cases: Arc<CasesRegistry>,
        scorer: Arc<VelocityScorer>,
        fairness_key: SecretString,
    ) -> Self {
        Self { client, cases, scorer, fairness_key }
    }

    /// Handles one `pre_checkout_query` payload. Never propagates a timeout
    /// as an error to the caller: the deadline only bounds how long we spend
    /// deciding, the platform call itself races against its own default
    /// client timeout if the deadline is hit.
    pub async fn handle(&self, pcq: &Value, ip: &str, now_ms: i64) -> Result<(), PaymentError> {
        match tokio::time::timeout(ANSWER_DEADLINE, self.decide_and_answer(pcq, ip, now_ms)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("pre-checkout answer deadline exceeded, answering ok=false");
                let query_id = pcq.get("id").and_then(Value::as_str).unwrap_or_default();
                self.client.answer_pre_checkout_query(query_id, false, Some("timeout")).await?;
                Ok(())
            }
        }
    }

    async fn decide_and_answer(&self, pcq: &Value, ip: &str, now_ms: i64) -> Result<(), PaymentError> {
        let query_id = pcq.get("id").and_then(Value::as_str).unwrap_or_default();
        let user_id = pcq.get("from").and_then(|f| f.get("id")).and_then(Value::as_i64).unwrap_or(0);
        let currency = pcq.get("currency").and_then(Value::as_str).unwrap_or_default();
        let total_amount = pcq.get("total_amount").and_then(Value::as_i64).unwrap_or(0);
        let raw_payload = pcq.get("invoice_payload").and_then(Value::as_str).unwrap_or_default();

        let verdict = self
            .scorer
            .evaluate(
                &VelocityContext {
                    ip: ip.to_string(),
                    subject: Some(user_id),
                    path: "/telegram/webhook".to_string(),
                    user_agent: None,
                    event_type: EventType::PreCheckout,
                },
                now_ms,
            )
            .await;
        if verdict.action == AntifraudAction::HardBlock {
            caseloot_metrics::af_block("precheckout");
            self.client.answer_pre_checkout_query(query_id, false, Some("request denied")).await?;
            return Ok(());
        }

        let payload = match decode_invoice_payload(&self.fairness_key, raw_payload) {
            Ok(payload) => payload,
            Err(_) => {
                self.client.answer_pre_checkout_query(query_id, false, Some("invalid payload")).await?;
                return Ok(());
            }
        };

        let snapshot = self.cases.load();
        let Some(case) = snapshot.internal_case(&payload.case_id) else {
            self.client.answer_pre_checkout_query(query_id, false, Some("unknown case")).await?;
            return Ok(());
        };

        if currency != PaymentRecord::CURRENCY_XTR {
            let err = PaymentError::WrongCurrency(currency.to_string());
            warn!(query_id, %err, "declining pre-checkout");
            self.client.answer_pre_checkout_query(query_id, false, Some("wrong currency")).await?;
            return Ok(());
        }
        if total_amount != case.price_stars {
            let err = PaymentError::AmountMismatch { expected: case.price_stars, actual: total_amount };
            warn!(query_id, %err, "declining pre-checkout");
            self.client.answer_pre_checkout_query(query_id, false, Some("amount mismatch")).await?;
            return Ok(());
        }

        self.client.answer_pre_checkout_query(query_id, true, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use caseloot_antifraud::VelocityConfig;
    use caseloot_cases::CasesSnapshot;
    use caseloot_storage::InMemoryVelocityStore;
    use caseloot_telegram::{encode_invoice_payload, ClientError, CreateInvoiceParams, InvoicePayload, SetWebhookParams, WebhookInfo};
    use caseloot_types::{CaseConfig, CasesRoot, PrizeItem, PrizeKind};
    use serde_json::json;

    use super::*;

    struct RecordingClient {
        answers: Mutex<Vec<(String, bool, Option<String>)>>,
    }

    #[async_trait]
    impl TelegramClient for RecordingClient {
        async fn create_invoice_link(&self, _: CreateInvoiceParams<'_>) -> Result<String, ClientError> {
            unimplemented!()
        }
        async fn answer_pre_checkout_query(
            &self,
            id: &str,
            ok: bool,
            error_message: Option<&str>,
        ) -> Result<(), ClientError> {
            self.answers.lock().unwrap().push((id.to_string(), ok, error_message.map(ToOwned::to_owned)));
            Ok(())
        }
        async fn refund_star_payment(&self, _: i64, _: &str) -> Result<(), ClientError> {
            unimplemented!()
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
                    probability_ppm: 500_000,
                }],
            }],
        };
        Arc::new(CasesRegistry::new(CasesSnapshot::from_root(root)))
    }

    fn service() -> (Arc<RecordingClient>, PreCheckoutService) {
        let client = Arc::new(RecordingClient { answers: Mutex::new(Vec::new()) });
        let svc = PreCheckoutService::new(
            client.clone(),
            cases_registry(),
            Arc::new(VelocityScorer::new(Arc::new(InMemoryVelocityStore::new()), VelocityConfig::default())),
            fairness_key(),
        );
        (client, svc)
    }

    fn valid_pcq() -> Value {
        let payload = InvoicePayload { case_id: "classic".into(), user_id: 42, nonce: "n1".into() };
        let encoded = encode_invoice_payload(&fairness_key(), &payload);
        json!({
            "id": "pcq-1",
            "from": {"id": 42},
            "currency": "XTR",
            "total_amount": 100,
            "invoice_payload": encoded,
        })
    }

    #[tokio::test]
    async fn valid_precheckout_is_answered_ok() {
        let (client, svc) = service();
        svc.handle(&valid_pcq(), "1.2.3.4", 0).await.unwrap();
        let answers = client.answers.lock().unwrap();
        assert_eq!(answers.last(), Some(&("pcq-1".to_string(), true, None)));
    }

    #[tokio::test]
    async fn wrong_currency_is_answered_not_ok() {
        let (client, svc) = service();
        let mut pcq = valid_pcq();
        pcq["currency"] = json!("USD");
        svc.handle(&pcq, "1.2.3.4", 0).await.unwrap();
        let answers = client.answers.lock().unwrap();
        assert_eq!(answers.last().map(|(_, ok, _)| *ok), Some(false));
    }

    #[tokio::test]
    async fn amount_mismatch_is_answered_not_ok() {
        let (client, svc) = service();
        let mut pcq = valid_pcq();
        pcq["total_amount"] = json!(999);
        svc.handle(&pcq, "1.2.3.4", 0).await.unwrap();
        let answers = client.answers.lock().unwrap();
        assert_eq!(answers.last().map(|(_, ok, _)| *ok), Some(false));
    }

    #[tokio::test]
    async fn tampered_invoice_payload_is_answered_not_ok() {
        let (client, svc) = service();
        let mut pcq = valid_pcq();
        pcq["invoice_payload"] = json!("garbage");
        svc.handle(&pcq, "1.2.3.4", 0).await.unwrap();
        let answers = client.answers.lock().unwrap();
        assert_eq!(answers.last().map(|(_, ok, _)| *ok), Some(false));
    }
}
