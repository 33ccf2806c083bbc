//! C13: pluggable persistence abstraction.
//!
//! Each store kind is a single trait with the same contract regardless of
//! backend; callers select a backend by configuration (`RNG_STORAGE` etc.)
//! and never downcast. The token-bucket and velocity stores are hot-path,
//! per-key-mutex state and only have an in-memory backend today (§4.1's
//! "future distributed" variant is explicitly deferred). The RNG journal,
//! payment ledger, and IP banlist additionally support file and relational
//! backends since they must survive a process restart.

pub mod bucket;
pub mod ipban;
pub mod payment;
pub mod rng;
pub mod velocity;

pub use bucket::{BucketParams, BucketStore, Decision, InMemoryBucketStore};
pub use ipban::{FileIpBanStore, InMemoryIpBanStore, IpBanEntry, IpBanStore};
pub use payment::{FilePaymentStore, InMemoryPaymentStore, PaymentStore, PostgresPaymentStore};
pub use rng::{FileRngStore, InMemoryRngStore, PostgresRngStore, RngStore};
pub use velocity::{InMemoryVelocityStore, VelocityStore};

/// Errors a storage backend can surface. Kept deliberately small: stores
/// expose domain-shaped `Result`s, not raw driver errors, to callers outside
/// this crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
