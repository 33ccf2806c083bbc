//! C4: IP banlist facade — metrics-instrumented wrapper over
//! [`caseloot_storage::IpBanStore`].

use std::sync::Arc;

use caseloot_storage::{IpBanEntry, IpBanStore, StoreError};

pub struct Banlist {
    store: Arc<dyn IpBanStore>,
}

impl Banlist {
    pub fn new(store: Arc<dyn IpBanStore>) -> Self {
        Self { store }
    }

    pub async fn is_banned(&self, ip: &str, now_ms: i64) -> Result<bool, StoreError> {
        let banned = self.store.is_banned(ip, now_ms).await?;
        if banned {
            caseloot_metrics::ip_forbidden();
        }
        Ok(banned)
    }

    pub async fn ban(
        &self,
        ip: &str,
        reason: &str,
        now_ms: i64,
        duration_sec: Option<i64>,
        auto: bool,
    ) -> Result<(), StoreError> {
        let entry = IpBanEntry {
            ip: ip.to_string(),
            reason: reason.to_string(),
            banned_at_ms: now_ms,
            expires_at_ms: duration_sec.map(|d| now_ms + d * 1000),
            auto,
        };
        self.store.ban(entry).await?;
        caseloot_metrics::ip_ban();
        Ok(())
    }

    pub async fn unban(&self, ip: &str) -> Result<(), StoreError> {
        self.store.unban(ip).await?;
        caseloot_metrics::ip_unban();
        Ok(())
    }

    /// Mark an IP as suspicious without banning it outright; purely an
    /// observability signal for operators deciding whether to escalate.
    pub fn mark_suspicious(&self) {
        caseloot_metrics::ip_suspicious_mark();
    }

    pub async fn list(&self) -> Result<Vec<IpBanEntry>, StoreError> {
        self.store.list().await
    }
}
