//! IP banlist admin endpoints (§4.9): thin pass-through to
//! [`caseloot_antifraud::Banlist`], which already does the metrics
//! bookkeeping -- this module only shapes the admin-facing request/response.

use std::sync::Arc;

use caseloot_antifraud::Banlist;
use caseloot_storage::IpBanEntry;

use crate::error::AdminError;

pub struct BanRequest {
    pub ip: String,
    pub reason: String,
    pub duration_sec: Option<i64>,
}

pub struct AdminBanlistService {
    banlist: Arc<Banlist>,
}

impl AdminBanlistService {
    pub fn new(banlist: Arc<Banlist>) -> Self {
        Self { banlist }
    }

    pub async fn ban(&self, req: BanRequest, now_ms: i64) -> Result<(), AdminError> {
        self.banlist.ban(&req.ip, &req.reason, now_ms, req.duration_sec, false).await?;
        Ok(())
    }

    pub async fn unban(&self, ip: &str) -> Result<(), AdminError> {
        self.banlist.unban(ip).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<IpBanEntry>, AdminError> {
        Ok(self.banlist.list().await?)
    }
}
