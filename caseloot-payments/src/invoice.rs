//! Create-invoice transition (§4.8): `NEW -> INVOICED`.

use std::sync::Arc;

use caseloot_antifraud::{VelocityContext, VelocityScorer};
use caseloot_cases::CasesRegistry;
use caseloot_telegram::{encode_invoice_payload, CreateInvoiceParams, InvoicePayload, TelegramClient};
use caseloot_types::{AntifraudAction, EventType};
use rand::{distributions::Alphanumeric, Rng};
use secrecy::SecretString;

use crate::error::PaymentError;

fn generate_nonce() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(16).map(char::from).collect()
}

pub struct InvoiceService {
    client: Arc<dyn TelegramClient>,
    cases: Arc<CasesRegistry>,
    scorer: Arc<VelocityScorer>,
    fairness_key: SecretString,
}

impl InvoiceService {
    pub fn new(
        client: Arc<dyn TelegramClient>,
        cases: Arc<CasesRegistry>,
        scorer: Arc<VelocityScorer>,
        fairness_key: SecretString,
    ) -> Self {
        Self { client, cases, scorer, fairness_key }
    }

    /// Compute the antifraud decision, then (unless HARD_BLOCK) create the
    /// invoice and return its link.
    pub async fn create_invoice(
        &self,
        chat_id: i64,
        user_id: i64,
        case_id: &str,
        ip: &str,
        now_ms: i64,
    ) -> Result<String, PaymentError> {
        let verdict = self
            .scorer
            .evaluate(
                &VelocityContext {
                    ip: ip.to_string(),
                    subject: Some(user_id),
                    path: "/api/miniapp/invoice".to_string(),
                    user_agent: None,
                    event_type: EventType::Invoice,
                },
                now_ms,
            )
            .await;
        if verdict.action == AntifraudAction::HardBlock {
            caseloot_metrics::af_block("invoice");
            return Err(PaymentError::AntifraudBlocked("velocity"));
        }

        let snapshot = self.cases.load();
        let case = snapshot
            .internal_case(case_id)
            .ok_or_else(|| PaymentError::UnknownCase(case_id.to_string()))?;

        let nonce = generate_nonce();
        let payload = InvoicePayload { case_id: case_id.to_string(), user_id, nonce };
        let encoded_payload = encode_invoice_payload(&self.fairness_key, &payload);

        let link = self
            .client
            .create_invoice_link(CreateInvoiceParams {
                chat_id,
                title: &case.title,
                description: &format!("Open the {} case", case.title),
                payload: &encoded_payload,
                label: &case.title,
                amount: case.price_stars,
            })
            .await?;

        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use caseloot_antifraud::VelocityConfig;
    use caseloot_cases::CasesSnapshot;
    use caseloot_storage::InMemoryVelocityStore;
    use caseloot_telegram::{ClientError, SetWebhookParams, WebhookInfo};
    use caseloot_types::{CaseConfig, CasesRoot, PrizeItem, PrizeKind};
    use serde_json::Value;

    use super::*;

    struct StubClient;

    #[async_trait]
    impl TelegramClient for StubClient {
        async fn create_invoice_link(&self, params: CreateInvoiceParams<'_>) -> Result<String, ClientError> {
            Ok(format!("https://t.me/invoice/{}", params.payload))
        }
        async fn answer_pre_checkout_query(&self, _: &str, _: bool, _: Option<&str>) -> Result<(), ClientError> {
            unimplemented!()
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

    fn service() -> InvoiceService {
        InvoiceService::new(
            Arc::new(StubClient),
            cases_registry(),
            Arc::new(VelocityScorer::new(Arc::new(InMemoryVelocityStore::new()), VelocityConfig::default())),
            SecretString::new("f".repeat(64).into()),
        )
    }

    #[tokio::test]
    async fn creates_an_invoice_for_a_known_case() {
        let svc = service();
        let link = svc.create_invoice(1, 42, "classic", "1.2.3.4", 0).await.unwrap();
        assert!(link.starts_with("https://t.me/invoice/"));
    }

    #[tokio::test]
    async fn unknown_case_is_rejected() {
        let svc = service();
        let err = svc.create_invoice(1, 42, "nonexistent", "1.2.3.4", 0).await.unwrap_err();
        assert!(matches!(err, PaymentError::UnknownCase(_)));
    }

    #[tokio::test]
    async fn repeated_invoices_from_the_same_subject_eventually_hard_block() {
        let svc = service();
        svc.create_invoice(1, 42, "classic", "1.2.3.4", 0).await.unwrap();
        let err = svc.create_invoice(1, 42, "classic", "1.2.3.4", 1_000).await.unwrap_err();
        assert!(matches!(err, PaymentError::AntifraudBlocked(_)));
    }
}
