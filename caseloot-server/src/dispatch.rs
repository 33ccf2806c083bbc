//! The queue's dispatch target: routes a dequeued [`Update`] to the payment
//! state machine by kind. The ingress's IP is not carried on [`Update`]
//! (§3 Data Model) -- by the time a worker dequeues it, the antifraud
//! decision for the *ingress* has already run (§4.4/§4.5); the scorer calls
//! inside [`PreCheckoutService`] and [`SuccessService`] fold onto a fixed
//! `"queue"` bucket for this stage, mirroring how the long-poll runner folds
//! onto `"longpoll"`.

use std::sync::Arc;

use async_trait::async_trait;
use caseloot_payments::{PreCheckoutService, SuccessService};
use caseloot_queue::UpdateHandler;
use caseloot_types::{Update, UpdateKind};
use chrono::Utc;
use tracing::warn;

const QUEUE_INGRESS_IP: &str = "queue";

pub struct PaymentDispatcher {
    precheckout: Arc<PreCheckoutService>,
    success: Arc<SuccessService>,
}

impl PaymentDispatcher {
    pub fn new(precheckout: Arc<PreCheckoutService>, success: Arc<SuccessService>) -> Self {
        Self { precheckout, success }
    }
}

#[async_trait]
impl UpdateHandler for PaymentDispatcher {
    async fn handle(&self, update: Update) {
        match update.kind {
            UpdateKind::PreCheckoutQuery => {
                let Some(payload) = &update.pre_checkout_payload else {
                    warn!(update_id = update.update_id, "pre_checkout update missing its payload");
                    return;
                };
                let now_ms = Utc::now().timestamp_millis();
                if let Err(err) = self.precheckout.handle(payload, QUEUE_INGRESS_IP, now_ms).await {
                    warn!(?err, update_id = update.update_id, "pre-checkout handling failed");
                }
            }
            UpdateKind::SuccessfulPayment => {
                let Some(payload) = &update.success_payload else {
                    warn!(update_id = update.update_id, "successful_payment update missing its payload");
                    return;
                };
                let user_id = update.user_id.unwrap_or(0);
                if let Err(err) = self.success.handle(payload, user_id, QUEUE_INGRESS_IP, Utc::now()).await {
                    warn!(?err, update_id = update.update_id, "successful payment handling failed");
                }
            }
            UpdateKind::Message | UpdateKind::Other => {}
        }
    }
}
