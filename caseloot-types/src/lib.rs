//! Shared data model for the caseloot bot: the types every other
//! `caseloot-*` crate builds on (C1's clock/id generator plus the §3 data
//! model), with no I/O of their own.

pub mod cases;
pub mod clock;
pub mod ids;
pub mod payment;
pub mod ratelimit;
pub mod rng;
pub mod update;
pub mod velocity;

pub use cases::{CaseConfig, CasePublicView, CaseValidationReport, CasesRoot, PrizeItem, PrizeKind};
pub use clock::{Clock, SystemClock};
pub use ids::{generate_request_id, is_valid_request_id};
pub use payment::{PaymentRecord, PaymentStatus};
pub use ratelimit::RateLimitKey;
pub use rng::{DrawRecord, SeedCommit};
pub use update::{Update, UpdateKind};
pub use velocity::{AntifraudAction, EventType, VelocityFlag};
