//! C3 velocity scorer and C4 IP banlist facade.

pub mod banlist;
pub mod scorer;

pub use banlist::Banlist;
pub use scorer::{VelocityConfig, VelocityContext, VelocityScorer, VelocityVerdict};
