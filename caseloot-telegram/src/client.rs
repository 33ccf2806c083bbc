//! The narrow chat-platform client facade. Spec §1 treats the Bot API's wire
//! encoding as an external collaborator; this trait is the seam between that
//! encoding and the rest of the core.

use std::time::Duration;

use async_trait::async_trait;
use caseloot_concurrency::backoff::default_outbound_backoff_iter;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network failure or 5xx: retryable per the concurrency & resource model.
    #[error("transient telegram api failure: {0}")]
    Transient(String),
    /// 4xx: not retried.
    #[error("permanent telegram api failure: {status}: {description}")]
    Permanent { status: u16, description: String },
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceParams<'a> {
    pub chat_id: i64,
    pub title: &'a str,
    pub description: &'a str,
    pub payload: &'a str,
    pub label: &'a str,
    pub amount: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SetWebhookParams {
    pub url: String,
    pub secret_token: String,
    pub allowed_updates: Option<Vec<String>>,
    pub max_connections: Option<u32>,
    pub drop_pending_updates: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookInfo {
    pub url: String,
    pub has_custom_certificate: bool,
    pub pending_update_count: i64,
    #[serde(default)]
    pub last_error_date: Option<i64>,
    #[serde(default)]
    pub last_error_message: Option<String>,
}

/// Outbound calls the payment state machine, admin surface, and long-poll
/// runner all need. A narrow facade, not a full Bot API binding: the core
/// only calls the methods its use cases actually need.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    async fn create_invoice_link(&self, params: CreateInvoiceParams<'_>) -> Result<String, ClientError>;

    async fn answer_pre_checkout_query(
        &self,
        pre_checkout_query_id: &str,
        ok: bool,
        error_message: Option<&str>,
    ) -> Result<(), ClientError>;

    async fn refund_star_payment(&self, user_id: i64, telegram_payment_charge_id: &str) -> Result<(), ClientError>;

    async fn send_gift(&self, user_id: i64, gift_id: &str) -> Result<(), ClientError>;

    async fn grant_premium(&self, user_id: i64, months: u32) -> Result<(), ClientError>;

    async fn set_webhook(&self, params: SetWebhookParams) -> Result<(), ClientError>;

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), ClientError>;

    async fn get_webhook_info(&self) -> Result<WebhookInfo, ClientError>;

    async fn get_updates(&self, offset: i64, timeout_sec: u64) -> Result<Vec<Value>, ClientError>;
}

/// Reqwest-backed implementation talking to `https://api.telegram.org`.
/// Every call retries transient failures with the workspace's default
/// jittered backoff (base 200ms, factor 2, cap 5s, 3 attempts); 4xx
/// responses are surfaced immediately as [`ClientError::Permanent`].
pub struct HttpTelegramClient {
    http: reqwest::Client,
    bot_token: SecretString,
    base_url: String,
}

impl HttpTelegramClient {
    pub fn new(bot_token: SecretString) -> Self {
        Self::with_base_url(bot_token, "https://api.telegram.org".to_string())
    }

    pub fn with_base_url(bot_token: SecretString, base_url: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client builder should not fail with these options"),
            bot_token,
            base_url,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.bot_token.expose_secret())
    }

    /// POST `method` with a JSON body, retrying transient failures up to 3
    /// attempts with the default outbound backoff.
    async fn call(&self, method: &str, body: Value) -> Result<Value, ClientError> {
        let url = self.method_url(method);
        let mut backoff = default_outbound_backoff_iter();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = self.call_once(&url, &body).await;
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < 3 => {
                    let wait = backoff.next().expect("backoff iterator never ends");
                    warn!(method, attempt, ?wait, "retrying transient telegram api failure");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn call_once(&self, url: &str, body: &Value) -> Result<Value, ClientError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ClientError::Transient(format!("5xx: {status}")));
        }

        let parsed: Value = response.json().await.map_err(|e| ClientError::Transient(e.to_string()))?;

        if status.is_client_error() {
            let description = parsed
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description")
                .to_string();
            return Err(ClientError::Permanent { status: status.as_u16(), description });
        }

        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl TelegramClient for HttpTelegramClient {
    async fn create_invoice_link(&self, params: CreateInvoiceParams<'_>) -> Result<String, ClientError> {
        let body = serde_json::json!({
            "chat_id": params.chat_id,
            "title": params.title,
            "description": params.description,
            "payload": params.payload,
            "currency": "XTR",
            "prices": [{"label": params.label, "amount": params.amount}],
        });
        let result = self.call("createInvoiceLink", body).await?;
        result
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| ClientError::Transient("createInvoiceLink returned no link".into()))
    }

    async fn answer_pre_checkout_query(
        &self,
        pre_checkout_query_id: &str,
        ok: bool,
        error_message: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut body = serde_json::json!({
            "pre_checkout_query_id": pre_checkout_query_id,
            "ok": ok,
        });
        if let Some(msg) = error_message {
            body["error_message"] = Value::String(msg.to_string());
        }
        self.call("answerPreCheckoutQuery", body).await?;
        Ok(())
    }

    async fn refund_star_payment(&self, user_id: i64, telegram_payment_charge_id: &str) -> Result<(), ClientError> {
        let body = serde_json::json!({
            "user_id": user_id,
            "telegram_payment_charge_id": telegram_payment_charge_id,
        });
        self.call("refundStarPayment", body).await?;
        Ok(())
    }

    async fn send_gift(&self, user_id: i64, gift_id: &str) -> Result<(), ClientError> {
        let body = serde_json::json!({"user_id": user_id, "gift_id": gift_id});
        self.call("sendGift", body).await?;
        Ok(())
    }

    async fn grant_premium(&self, user_id: i64, months: u32) -> Result<(), ClientError> {
        let body = serde_json::json!({"user_id": user_id, "month_count": months});
        self.call("giftPremiumSubscription", body).await?;
        Ok(())
    }

    async fn set_webhook(&self, params: SetWebhookParams) -> Result<(), ClientError> {
        let mut body = serde_json::json!({
            "url": params.url,
            "secret_token": params.secret_token,
            "drop_pending_updates": params.drop_pending_updates,
        });
        if let Some(allowed) = &params.allowed_updates {
            body["allowed_updates"] = serde_json::json!(allowed);
        }
        if let Some(max_conn) = params.max_connections {
            body["max_connections"] = serde_json::json!(max_conn);
        }
        self.call("setWebhook", body).await?;
        Ok(())
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), ClientError> {
        let body = serde_json::json!({"drop_pending_updates": drop_pending_updates});
        self.call("deleteWebhook", body).await?;
        Ok(())
    }

    async fn get_webhook_info(&self) -> Result<WebhookInfo, ClientError> {
        let result = self.call("getWebhookInfo", serde_json::json!({})).await?;
        serde_json::from_value(result).map_err(|e| ClientError::Transient(e.to_string()))
    }

    async fn get_updates(&self, offset: i64, timeout_sec: u64) -> Result<Vec<Value>, ClientError> {
        let body = serde_json::json!({"offset": offset, "timeout": timeout_sec});
        let result = self.call("getUpdates", body).await?;
        match result {
            Value::Array(items) => Ok(items),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_url_never_logs_the_raw_token() {
        let client = HttpTelegramClient::new(SecretString::new("123456:TEST-TOKEN".into()));
        let url = client.method_url("getMe");
        // this assertion is really just documentation: `method_url` is the
        // only place the token touches a string outside `SecretString`.
        assert!(url.contains("123456:TEST-TOKEN"));
        assert!(url.starts_with("https://api.telegram.org/bot"));
    }
}
