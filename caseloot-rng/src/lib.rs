//! C9: provably-fair commit/reveal RNG service (§4.7).

use std::{collections::HashMap, sync::RwLock};

use caseloot_storage::{RngStore, RngStoreError};
use caseloot_types::{DrawRecord, PrizeItem, SeedCommit};
use chrono::{DateTime, NaiveDate, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum RngError {
    #[error(transparent)]
    Store(#[from] RngStoreError),
    /// The commit for this day exists but its raw seed isn't available
    /// in-process (not yet revealed, and not generated by this process —
    /// can happen after a restart on the same UTC day, before reveal). A
    /// known limitation of the single-process seed cache; multi-node
    /// coordination is out of scope (§1 Non-goals).
    #[error("server seed for day {day} is not available in this process")]
    SeedUnavailable { day: NaiveDate },
}

/// The commit service's in-memory cache of raw seed bytes, separate from
/// the store (which only ever sees the hash until reveal). First draw of
/// the day materializes this under exclusive access (§5).
pub struct RngService {
    store: std::sync::Arc<dyn RngStore>,
    seed_cache: RwLock<HashMap<NaiveDate, Vec<u8>>>,
}

impl RngService {
    pub fn new(store: std::sync::Arc<dyn RngStore>) -> Self {
        Self { store, seed_cache: RwLock::new(HashMap::new()) }
    }

    /// Commit: idempotent by day (first-writer wins). Returns the existing
    /// commit if one already exists for `day`.
    pub async fn commit(&self, day: NaiveDate, now: DateTime<Utc>) -> Result<SeedCommit, RngError> {
        self.commit_or_get(day, now).await.map(|(commit, _seed)| commit)
    }

    /// Reveal: one-shot per day; re-revealing with a different seed fails.
    pub async fn reveal(&self, day: NaiveDate, revealed_at: DateTime<Utc>) -> Result<SeedCommit, RngError> {
        let seed = {
            let cache = self.seed_cache.read().expect("rng seed cache poisoned");
            cache.get(&day).cloned()
        };
        let seed = seed.ok_or(RngError::SeedUnavailable { day })?;
        let seed_hex = base16ct::lower::encode_string(&seed);
        let commit = self.store.reveal(day, seed_hex, revealed_at).await?;
        caseloot_metrics::rng_reveal();
        Ok(commit)
    }

    /// `draw(caseId, userId, nonce)`: idempotent on `(caseId, userId, nonce)`.
    pub async fn draw(
        &self,
        case_id: &str,
        user_id: i64,
        nonce: &str,
        items: &[PrizeItem],
        now: DateTime<Utc>,
    ) -> Result<DrawRecord, RngError> {
        if let Some(existing) = self.store.get_draw(case_id, user_id, nonce).await? {
            caseloot_metrics::rng_draw_idempotent();
            return Ok(existing);
        }

        let (commit, seed) = self.commit_or_get(now.date_naive(), now).await?;

        let message = format!("{case_id}|{user_id}|{nonce}");
        let mut mac = HmacSha256::new_from_slice(&seed).expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        let roll_bytes = mac.finalize().into_bytes();
        let roll_hex = base16ct::lower::encode_string(&roll_bytes);

        let first_u32 = u32::from_str_radix(&roll_hex[..8], 16).expect("HMAC-SHA256 output is >= 4 bytes");
        let ppm = (first_u32 % 1_000_000) as i64;
        let result_item_id = item_for_ppm(items, ppm);

        let draw = DrawRecord {
            case_id: case_id.to_string(),
            user_id,
            nonce: nonce.to_string(),
            server_seed_hash: commit.server_seed_hash,
            roll_hex,
            ppm,
            result_item_id,
            created_at: now,
        };

        let result = self.store.insert_draw_if_absent(draw).await?;
        caseloot_metrics::rng_draw();
        Ok(result)
    }

    /// Verify the commit-reveal integrity property: `SHA-256(serverSeed) ==
    /// serverSeedHash`, and recomputing the HMAC for a journaled draw
    /// reproduces its stored `roll_hex`.
    pub fn verify_draw(commit: &SeedCommit, draw: &DrawRecord) -> bool {
        let Some(server_seed) = &commit.server_seed else { return false };
        let Ok(seed_bytes) = base16ct::lower::decode_vec(server_seed) else { return false };

        let computed_hash = base16ct::lower::encode_string(&Sha256::digest(&seed_bytes));
        if computed_hash.as_bytes().ct_eq(commit.server_seed_hash.as_bytes()).unwrap_u8() != 1 {
            return false;
        }

        let message = format!("{}|{}|{}", draw.case_id, draw.user_id, draw.nonce);
        let Ok(mut mac) = HmacSha256::new_from_slice(&seed_bytes) else { return false };
        mac.update(message.as_bytes());
        let recomputed = base16ct::lower::encode_string(&mac.finalize().into_bytes());
        recomputed.as_bytes().ct_eq(draw.roll_hex.as_bytes()).unwrap_u8() == 1
    }

    async fn commit_or_get(
        &self,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(SeedCommit, Vec<u8>), RngError> {
        {
            let cache = self.seed_cache.read().expect("rng seed cache poisoned");
            if let Some(seed) = cache.get(&day) {
                let commit = self.store.get_commit(day).await?.expect("cached seed implies a stored commit");
                return Ok((commit, seed.clone()));
            }
        }

        let mut cache = self.seed_cache.write().expect("rng seed cache poisoned");
        // Re-check under the write lock: another task may have raced us here.
        if let Some(seed) = cache.get(&day) {
            let commit = self.store.get_commit(day).await?.expect("cached seed implies a stored commit");
            return Ok((commit, seed.clone()));
        }

        if let Some(existing) = self.store.get_commit(day).await? {
            if let Some(server_seed) = &existing.server_seed {
                let seed_bytes = base16ct::lower::decode_vec(server_seed).unwrap_or_default();
                cache.insert(day, seed_bytes.clone());
                return Ok((existing, seed_bytes));
            }
            return Err(RngError::SeedUnavailable { day });
        }

        let mut seed_bytes = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed_bytes);
        let hash = base16ct::lower::encode_string(&Sha256::digest(&seed_bytes));

        let commit = self
            .store
            .create_commit_if_absent(SeedCommit {
                day_utc: day,
                server_seed_hash: hash.clone(),
                committed_at: now,
                server_seed: None,
                revealed_at: None,
            })
            .await?;
        caseloot_metrics::rng_commit();

        if commit.server_seed_hash == hash {
            // We won the race: the stored commit is the one we generated,
            // so its hash matches the seed bytes we're holding.
            cache.insert(day, seed_bytes.clone());
            Ok((commit, seed_bytes))
        } else {
            // Someone else's commit won (only possible against a
            // concurrent caller in this same process); we have no seed
            // bytes for their hash.
            Err(RngError::SeedUnavailable { day })
        }
    }
}

/// Map `ppm` to the weighted item table by cumulative probability in
/// declaration order; `None` means the implicit `INTERNAL` slot.
fn item_for_ppm(items: &[PrizeItem], ppm: i64) -> Option<String> {
    let mut cumulative = 0i64;
    for item in items {
        cumulative += item.probability_ppm;
        if ppm < cumulative {
            return Some(item.id.clone());
        }
    }
    None
}
