//! C4: IP banlist store.
//!
//! Manual and automatic bans, temporary (`expires_at_ms = Some(_)`) or
//! permanent (`None`). The in-memory backend is lost on restart; the file
//! backend persists the whole list as a single JSON snapshot rewritten on
//! every mutation, which is fine given a banlist is expected to stay small.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpBanEntry {
    pub ip: String,
    pub reason: String,
    pub banned_at_ms: i64,
    pub expires_at_ms: Option<i64>,
    pub auto: bool,
}

impl IpBanEntry {
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_none_or(|exp| now_ms < exp)
    }
}

#[async_trait]
pub trait IpBanStore: Send + Sync {
    async fn ban(&self, entry: IpBanEntry) -> Result<(), StoreError>;
    async fn unban(&self, ip: &str) -> Result<(), StoreError>;
    async fn is_banned(&self, ip: &str, now_ms: i64) -> Result<bool, StoreError>;
    async fn list(&self) -> Result<Vec<IpBanEntry>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryIpBanStore {
    entries: Mutex<HashMap<String, IpBanEntry>>,
}

impl InMemoryIpBanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IpBanStore for InMemoryIpBanStore {
    async fn ban(&self, entry: IpBanEntry) -> Result<(), StoreError> {
        self.entries.lock().expect("ip ban mutex poisoned").insert(entry.ip.clone(), entry);
        Ok(())
    }

    async fn unban(&self, ip: &str) -> Result<(), StoreError> {
        self.entries.lock().expect("ip ban mutex poisoned").remove(ip);
        Ok(())
    }

    async fn is_banned(&self, ip: &str, now_ms: i64) -> Result<bool, StoreError> {
        let entries = self.entries.lock().expect("ip ban mutex poisoned");
        Ok(entries.get(ip).is_some_and(|e| e.is_active(now_ms)))
    }

    async fn list(&self) -> Result<Vec<IpBanEntry>, StoreError> {
        Ok(self.entries.lock().expect("ip ban mutex poisoned").values().cloned().collect())
    }
}

/// Persists the banlist as a single JSON array, rewritten in full on every
/// mutation. Loads the snapshot (if any) at construction time.
pub struct FileIpBanStore {
    path: PathBuf,
    inner: InMemoryIpBanStore,
}

impl FileIpBanStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let inner = InMemoryIpBanStore::new();
        if let Ok(bytes) = tokio::fs::read(&path).await {
            let entries: Vec<IpBanEntry> = serde_json::from_slice(&bytes)?;
            let mut map = inner.entries.lock().expect("ip ban mutex poisoned");
            for e in entries {
                map.insert(e.ip.clone(), e);
            }
        }
        Ok(Self { path, inner })
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let snapshot = self.inner.list().await?;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl IpBanStore for FileIpBanStore {
    async fn ban(&self, entry: IpBanEntry) -> Result<(), StoreError> {
        self.inner.ban(entry).await?;
        self.flush().await
    }

    async fn unban(&self, ip: &str) -> Result<(), StoreError> {
        self.inner.unban(ip).await?;
        self.flush().await
    }

    async fn is_banned(&self, ip: &str, now_ms: i64) -> Result<bool, StoreError> {
        self.inner.is_banned(ip, now_ms).await
    }

    async fn list(&self) -> Result<Vec<IpBanEntry>, StoreError> {
        self.inner.list().await
    }
}
