//! §3: `Update`, the unit of work flowing through the ingestion pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kinds of platform update this bot acts on. Anything else is parsed
/// permissively into `Other` so unknown update shapes never fail parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Message,
    PreCheckoutQuery,
    SuccessfulPayment,
    Other,
}

/// An immutable platform update. Identity is `update_id`; the queue
/// deduplicates on it and the dedup set discards entries after a ~26h TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub kind: UpdateKind,
    pub chat_id: Option<i64>,
    pub user_id: Option<i64>,
    pub message_payload: Option<Value>,
    pub pre_checkout_payload: Option<Value>,
    pub success_payload: Option<Value>,
}

impl Update {
    /// Classify a raw Telegram-shaped JSON update into our narrower
    /// [`UpdateKind`] taxonomy, without rejecting unrecognized shapes.
    pub fn from_raw(update_id: i64, raw: &Value) -> Self {
        let (kind, chat_id, user_id, message_payload, pre_checkout_payload, success_payload) =
            if let Some(pcq) = raw.get("pre_checkout_query") {
                let user_id = pcq.get("from").and_then(|f| f.get("id")).and_then(Value::as_i64);
                (UpdateKind::PreCheckoutQuery, None, user_id, None, Some(pcq.clone()), None)
            } else if let Some(msg) = raw.get("message") {
                let chat_id = msg.get("chat").and_then(|c| c.get("id")).and_then(Value::as_i64);
                let user_id = msg.get("from").and_then(|f| f.get("id")).and_then(Value::as_i64);
                if let Some(sp) = msg.get("successful_payment") {
                    (
                        UpdateKind::SuccessfulPayment,
                        chat_id,
                        user_id,
                        Some(msg.clone()),
                        None,
                        Some(sp.clone()),
                    )
                } else {
                    (UpdateKind::Message, chat_id, user_id, Some(msg.clone()), None, None)
                }
            } else {
                (UpdateKind::Other, None, None, None, None, None)
            };

        Update {
            update_id,
            kind,
            chat_id,
            user_id,
            message_payload,
            pre_checkout_payload,
            success_payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_pre_checkout_query() {
        let raw = json!({
            "pre_checkout_query": { "from": { "id": 42 }, "currency": "XTR" },
        });
        let update = Update::from_raw(7, &raw);
        assert_eq!(update.kind, UpdateKind::PreCheckoutQuery);
        assert_eq!(update.user_id, Some(42));
    }

    #[test]
    fn classifies_successful_payment() {
        let raw = json!({
            "message": {
                "chat": { "id": 1 },
                "from": { "id": 2 },
                "successful_payment": { "telegram_payment_charge_id": "charge-1" },
            },
        });
        let update = Update::from_raw(8, &raw);
        assert_eq!(update.kind, UpdateKind::SuccessfulPayment);
        assert_eq!(update.chat_id, Some(1));
    }

    #[test]
    fn unrecognized_shape_is_other() {
        let update = Update::from_raw(9, &json!({"something_else": true}));
        assert_eq!(update.kind, UpdateKind::Other);
    }
}
