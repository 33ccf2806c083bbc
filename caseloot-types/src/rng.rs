//! §3 / §4.7: the commit-reveal fairness journal's persisted shapes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A daily server-seed commitment. `server_seed` is populated only on
/// reveal; `server_seed_hash = SHA-256(server_seed)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedCommit {
    pub day_utc: NaiveDate,
    pub server_seed_hash: String,
    pub committed_at: DateTime<Utc>,
    pub server_seed: Option<String>,
    pub revealed_at: Option<DateTime<Utc>>,
}

impl SeedCommit {
    pub fn is_revealed(&self) -> bool {
        self.server_seed.is_some()
    }
}

/// A single journaled draw. Idempotency key: `(case_id, user_id, nonce)`.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawRecord {
    pub case_id: String,
    pub user_id: i64,
    pub nonce: String,
    pub server_seed_hash: String,
    pub roll_hex: String,
    pub ppm: i64,
    pub result_item_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
