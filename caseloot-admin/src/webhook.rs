//! Webhook admin endpoints (§4.9): `setWebhook`/`deleteWebhook`/`getWebhookInfo`
//! proxied through the same [`TelegramClient`] the ingestion side uses.

use std::sync::Arc;

use caseloot_telegram::{SetWebhookParams, TelegramClient, WebhookInfo};
use secrecy::{ExposeSecret, SecretString};

use crate::error::AdminError;

#[derive(Debug, Clone, Default)]
pub struct SetWebhookRequest {
    pub url: Option<String>,
    pub allowed_updates: Option<Vec<String>>,
    pub max_connections: Option<u32>,
    pub drop_pending_updates: bool,
}

pub struct AdminWebhookService {
    client: Arc<dyn TelegramClient>,
    webhook_secret: SecretString,
    public_base_url: String,
    webhook_path: String,
}

impl AdminWebhookService {
    pub fn new(
        client: Arc<dyn TelegramClient>,
        webhook_secret: SecretString,
        public_base_url: String,
        webhook_path: String,
    ) -> Self {
        Self { client, webhook_secret, public_base_url, webhook_path }
    }

    /// `maxConnections` out of `[1, 100]` is silently clamped rather than
    /// rejected -- the Bot API clamps it too, and this endpoint is
    /// operator-only, not attacker-facing.
    pub async fn set_webhook(&self, req: SetWebhookRequest) -> Result<(), AdminError> {
        let url = req.url.unwrap_or_else(|| format!("{}{}", self.public_base_url, self.webhook_path));
        let max_connections = req.max_connections.map(|n| n.clamp(1, 100));
        self.client
            .set_webhook(SetWebhookParams {
                url,
                secret_token: self.webhook_secret.expose_secret().to_string(),
                allowed_updates: req.allowed_updates,
                max_connections,
                drop_pending_updates: req.drop_pending_updates,
            })
            .await?;
        caseloot_metrics::admin_webhook_set();
        Ok(())
    }

    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), AdminError> {
        self.client.delete_webhook(drop_pending_updates).await?;
        caseloot_metrics::admin_webhook_delete();
        Ok(())
    }

    /// `WebhookInfo` carries no secret fields, so nothing needs to be
    /// stripped before returning it -- unlike the webhook secret token
    /// itself, which never flows through this path at all.
    pub async fn webhook_info(&self) -> Result<WebhookInfo, AdminError> {
        Ok(self.client.get_webhook_info().await?)
    }
}
