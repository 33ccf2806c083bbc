//! C9 / C13: the RNG commit/reveal journal, selectable by `RNG_STORAGE`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use caseloot_types::{DrawRecord, SeedCommit};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RngStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("day {day} was already revealed with a different seed")]
    RevealConflict { day: NaiveDate },
}

#[async_trait]
pub trait RngStore: Send + Sync {
    async fn get_commit(&self, day: NaiveDate) -> Result<Option<SeedCommit>, RngStoreError>;

    /// First-writer-wins: if a commit for `commit.day_utc` already exists,
    /// the existing one is returned unchanged.
    async fn create_commit_if_absent(&self, commit: SeedCommit) -> Result<SeedCommit, RngStoreError>;

    /// One-shot: fails with [`RngStoreError::RevealConflict`] if the day was
    /// already revealed with a different seed; repeating the same seed is a
    /// no-op that returns the existing commit.
    async fn reveal(
        &self,
        day: NaiveDate,
        server_seed: String,
        revealed_at: DateTime<Utc>,
    ) -> Result<SeedCommit, RngStoreError>;

    async fn get_draw(
        &self,
        case_id: &str,
        user_id: i64,
        nonce: &str,
    ) -> Result<Option<DrawRecord>, RngStoreError>;

    /// Idempotent on `(case_id, user_id, nonce)`: returns the existing draw
    /// if one was already journaled for that key.
    async fn insert_draw_if_absent(&self, draw: DrawRecord) -> Result<DrawRecord, RngStoreError>;
}

fn draw_key(case_id: &str, user_id: i64, nonce: &str) -> String {
    format!("{case_id}\u{0}{user_id}\u{0}{nonce}")
}

#[derive(Debug, Default)]
pub struct InMemoryRngStore {
    commits: Mutex<HashMap<NaiveDate, SeedCommit>>,
    draws: Mutex<HashMap<String, DrawRecord>>,
}

impl InMemoryRngStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RngStore for InMemoryRngStore {
    async fn get_commit(&self, day: NaiveDate) -> Result<Option<SeedCommit>, RngStoreError> {
        Ok(self.commits.lock().expect("rng commit mutex poisoned").get(&day).cloned())
    }

    async fn create_commit_if_absent(&self, commit: SeedCommit) -> Result<SeedCommit, RngStoreError> {
        let mut commits = self.commits.lock().expect("rng commit mutex poisoned");
        Ok(commits.entry(commit.day_utc).or_insert(commit).clone())
    }

    async fn reveal(
        &self,
        day: NaiveDate,
        server_seed: String,
        revealed_at: DateTime<Utc>,
    ) -> Result<SeedCommit, RngStoreError> {
        let mut commits = self.commits.lock().expect("rng commit mutex poisoned");
        let commit = commits.get_mut(&day).ok_or_else(|| {
            RngStoreError::Store(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no commit for day {day}"),
            )))
        })?;
        match &commit.server_seed {
            Some(existing) if existing == &server_seed => Ok(commit.clone()),
            Some(_) => Err(RngStoreError::RevealConflict { day }),
            None => {
                commit.server_seed = Some(server_seed);
                commit.revealed_at = Some(revealed_at);
                Ok(commit.clone())
            }
        }
    }

    async fn get_draw(
        &self,
        case_id: &str,
        user_id: i64,
        nonce: &str,
    ) -> Result<Option<DrawRecord>, RngStoreError> {
        let key = draw_key(case_id, user_id, nonce);
        Ok(self.draws.lock().expect("rng draw mutex poisoned").get(&key).cloned())
    }

    async fn insert_draw_if_absent(&self, draw: DrawRecord) -> Result<DrawRecord, RngStoreError> {
        let key = draw_key(&draw.case_id, draw.user_id, &draw.nonce);
        let mut draws = self.draws.lock().expect("rng draw mutex poisoned");
        Ok(draws.entry(key).or_insert(draw).clone())
    }
}

/// Append-only journal file backend: commits and draws are each serialized
/// as a JSON-lines file, replayed into an in-memory index at open time, and
/// appended to (never rewritten) on every write.
pub struct FileRngStore {
    commits_path: PathBuf,
    draws_path: PathBuf,
    inner: InMemoryRngStore,
    write_lock: tokio::sync::Mutex<()>,
}

#[derive(Serialize, Deserialize)]
struct CommitLine(SeedCommit);
#[derive(Serialize, Deserialize)]
struct DrawLine(DrawRecord);

impl FileRngStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let commits_path = dir.join("rng_seed_commits.jsonl");
        let draws_path = dir.join("rng_draws.jsonl");

        let inner = InMemoryRngStore::new();
        if let Ok(text) = tokio::fs::read_to_string(&commits_path).await {
            let mut commits = inner.commits.lock().expect("rng commit mutex poisoned");
            for line in text.lines().filter(|l| !l.is_empty()) {
                let CommitLine(commit) = serde_json::from_str(line)?;
                commits.insert(commit.day_utc, commit);
            }
        }
        if let Ok(text) = tokio::fs::read_to_string(&draws_path).await {
            let mut draws = inner.draws.lock().expect("rng draw mutex poisoned");
            for line in text.lines().filter(|l| !l.is_empty()) {
                let DrawLine(draw) = serde_json::from_str(line)?;
                draws.insert(draw_key(&draw.case_id, draw.user_id, &draw.nonce), draw);
            }
        }

        Ok(Self { commits_path, draws_path, inner, write_lock: tokio::sync::Mutex::new(()) })
    }

    async fn append_commit(&self, commit: &SeedCommit) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut line = serde_json::to_string(&CommitLine(commit.clone()))?;
        line.push('\n');
        tokio::fs::try_exists(&self.commits_path).await.ok();
        append_line(&self.commits_path, &line).await
    }

    async fn append_draw(&self, draw: &DrawRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut line = serde_json::to_string(&DrawLine(draw.clone()))?;
        line.push('\n');
        append_line(&self.draws_path, &line).await
    }
}

async fn append_line(path: &Path, line: &str) -> Result<(), StoreError> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

#[async_trait]
impl RngStore for FileRngStore {
    async fn get_commit(&self, day: NaiveDate) -> Result<Option<SeedCommit>, RngStoreError> {
        self.inner.get_commit(day).await
    }

    async fn create_commit_if_absent(&self, commit: SeedCommit) -> Result<SeedCommit, RngStoreError> {
        let existing = self.inner.get_commit(commit.day_utc).await?;
        if let Some(existing) = existing {
            return Ok(existing);
        }
        let result = self.inner.create_commit_if_absent(commit).await?;
        self.append_commit(&result).await.map_err(RngStoreError::Store)?;
        Ok(result)
    }

    async fn reveal(
        &self,
        day: NaiveDate,
        server_seed: String,
        revealed_at: DateTime<Utc>,
    ) -> Result<SeedCommit, RngStoreError> {
        let result = self.inner.reveal(day, server_seed, revealed_at).await?;
        self.append_commit(&result).await.map_err(RngStoreError::Store)?;
        Ok(result)
    }

    async fn get_draw(
        &self,
        case_id: &str,
        user_id: i64,
        nonce: &str,
    ) -> Result<Option<DrawRecord>, RngStoreError> {
        self.inner.get_draw(case_id, user_id, nonce).await
    }

    async fn insert_draw_if_absent(&self, draw: DrawRecord) -> Result<DrawRecord, RngStoreError> {
        let existing = self.inner.get_draw(&draw.case_id, draw.user_id, &draw.nonce).await?;
        if let Some(existing) = existing {
            return Ok(existing);
        }
        let result = self.inner.insert_draw_if_absent(draw).await?;
        self.append_draw(&result).await.map_err(RngStoreError::Store)?;
        Ok(result)
    }
}

/// Relational backend against the two tables from spec §6:
/// `rng_seed_commits(day_utc PK, ...)` and
/// `rng_draws(id PK, ..., UNIQUE(case_id, user_id, nonce))`.
pub struct PostgresRngStore {
    pool: PgPool,
}

impl PostgresRngStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RngStore for PostgresRngStore {
    async fn get_commit(&self, day: NaiveDate) -> Result<Option<SeedCommit>, RngStoreError> {
        let row: Option<SeedCommitRow> = sqlx::query_as(
            r#"SELECT day_utc, server_seed_hash, committed_at, server_seed, revealed_at
               FROM rng_seed_commits WHERE day_utc = $1"#,
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row.map(Into::into))
    }

    async fn create_commit_if_absent(&self, commit: SeedCommit) -> Result<SeedCommit, RngStoreError> {
        let row: SeedCommitRow = sqlx::query_as(
            r#"INSERT INTO rng_seed_commits (day_utc, server_seed_hash, committed_at)
               VALUES ($1, $2, $3)
               ON CONFLICT (day_utc) DO UPDATE SET day_utc = rng_seed_commits.day_utc
               RETURNING day_utc, server_seed_hash, committed_at, server_seed, revealed_at"#,
        )
        .bind(commit.day_utc)
        .bind(commit.server_seed_hash)
        .bind(commit.committed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row.into())
    }

    async fn reveal(
        &self,
        day: NaiveDate,
        server_seed: String,
        revealed_at: DateTime<Utc>,
    ) -> Result<SeedCommit, RngStoreError> {
        let existing = self.get_commit(day).await?.ok_or_else(|| {
            RngStoreError::Store(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no commit for day {day}"),
            )))
        })?;
        if let Some(existing_seed) = &existing.server_seed {
            return if existing_seed == &server_seed {
                Ok(existing)
            } else {
                Err(RngStoreError::RevealConflict { day })
            };
        }
        let row: SeedCommitRow = sqlx::query_as(
            r#"UPDATE rng_seed_commits SET server_seed = $2, revealed_at = $3
               WHERE day_utc = $1
               RETURNING day_utc, server_seed_hash, committed_at, server_seed, revealed_at"#,
        )
        .bind(day)
        .bind(server_seed)
        .bind(revealed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row.into())
    }

    async fn get_draw(
        &self,
        case_id: &str,
        user_id: i64,
        nonce: &str,
    ) -> Result<Option<DrawRecord>, RngStoreError> {
        let row: Option<DrawRow> = sqlx::query_as(
            r#"SELECT case_id, user_id, nonce, server_seed_hash, roll_hex, ppm, result_item_id, created_at
               FROM rng_draws WHERE case_id = $1 AND user_id = $2 AND nonce = $3"#,
        )
        .bind(case_id)
        .bind(user_id)
        .bind(nonce)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row.map(Into::into))
    }

    async fn insert_draw_if_absent(&self, draw: DrawRecord) -> Result<DrawRecord, RngStoreError> {
        let row: DrawRow = sqlx::query_as(
            r#"INSERT INTO rng_draws
                 (case_id, user_id, nonce, server_seed_hash, roll_hex, ppm, result_item_id, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (case_id, user_id, nonce) DO UPDATE SET case_id = rng_draws.case_id
               RETURNING case_id, user_id, nonce, server_seed_hash, roll_hex, ppm, result_item_id, created_at"#,
        )
        .bind(draw.case_id)
        .bind(draw.user_id)
        .bind(draw.nonce)
        .bind(draw.server_seed_hash)
        .bind(draw.roll_hex)
        .bind(draw.ppm)
        .bind(draw.result_item_id)
        .bind(draw.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row.into())
    }
}

#[derive(sqlx::FromRow)]
struct SeedCommitRow {
    day_utc: NaiveDate,
    server_seed_hash: String,
    committed_at: DateTime<Utc>,
    server_seed: Option<String>,
    revealed_at: Option<DateTime<Utc>>,
}

impl From<SeedCommitRow> for SeedCommit {
    fn from(row: SeedCommitRow) -> Self {
        SeedCommit {
            day_utc: row.day_utc,
            server_seed_hash: row.server_seed_hash,
            committed_at: row.committed_at,
            server_seed: row.server_seed,
            revealed_at: row.revealed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DrawRow {
    case_id: String,
    user_id: i64,
    nonce: String,
    server_seed_hash: String,
    roll_hex: String,
    ppm: i64,
    result_item_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<DrawRow> for DrawRecord {
    fn from(row: DrawRow) -> Self {
        DrawRecord {
            case_id: row.case_id,
            user_id: row.user_id,
            nonce: row.nonce,
            server_seed_hash: row.server_seed_hash,
            roll_hex: row.roll_hex,
            ppm: row.ppm,
            result_item_id: row.result_item_id,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(day: NaiveDate, hash: &str) -> SeedCommit {
        SeedCommit {
            day_utc: day,
            server_seed_hash: hash.into(),
            committed_at: Utc::now(),
            server_seed: None,
            revealed_at: None,
        }
    }

    fn draw(case_id: &str, user_id: i64, nonce: &str) -> DrawRecord {
        DrawRecord {
            case_id: case_id.into(),
            user_id,
            nonce: nonce.into(),
            server_seed_hash: "hash".into(),
            roll_hex: "abc123".into(),
            ppm: 500_000,
            result_item_id: Some("gift-a".into()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn commit_is_idempotent_by_day() {
        let store = InMemoryRngStore::new();
        let day = Utc::now().date_naive();
        let a = store.create_commit_if_absent(commit(day, "hash-a")).await.unwrap();
        let b = store.create_commit_if_absent(commit(day, "hash-b")).await.unwrap();
        assert_eq!(a.server_seed_hash, b.server_seed_hash);
        assert_eq!(a.server_seed_hash, "hash-a");
    }

    #[tokio::test]
    async fn reveal_is_one_shot() {
        let store = InMemoryRngStore::new();
        let day = Utc::now().date_naive();
        store.create_commit_if_absent(commit(day, "hash-a")).await.unwrap();
        store.reveal(day, "seed-a".into(), Utc::now()).await.unwrap();
        let err = store.reveal(day, "seed-b".into(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, RngStoreError::RevealConflict { .. }));

        // re-revealing with the same seed is a harmless no-op.
        let again = store.reveal(day, "seed-a".into(), Utc::now()).await.unwrap();
        assert_eq!(again.server_seed.as_deref(), Some("seed-a"));
    }

    #[tokio::test]
    async fn draw_is_idempotent_by_composite_key() {
        let store = InMemoryRngStore::new();
        let first = store.insert_draw_if_absent(draw("case-1", 42, "nonce-1")).await.unwrap();
        let mut other = draw("case-1", 42, "nonce-1");
        other.roll_hex = "different".into();
        let second = store.insert_draw_if_absent(other).await.unwrap();
        assert_eq!(first.roll_hex, second.roll_hex);
    }

    #[tokio::test]
    async fn file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let day = Utc::now().date_naive();

        let store = FileRngStore::open(dir.path()).await.unwrap();
        store.create_commit_if_absent(commit(day, "hash-a")).await.unwrap();
        store.insert_draw_if_absent(draw("case-1", 1, "n1")).await.unwrap();
        drop(store);

        let reopened = FileRngStore::open(dir.path()).await.unwrap();
        assert!(reopened.get_commit(day).await.unwrap().is_some());
        assert!(reopened.get_draw("case-1", 1, "n1").await.unwrap().is_some());
    }
}
