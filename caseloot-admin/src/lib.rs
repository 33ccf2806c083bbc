//! C11: the token-gated admin surface (§4.9). Three independent service
//! facades -- webhook management, case economy preview/reload, IP banlist --
//! plus the `X-Admin-Token` check `caseloot-server` runs before dispatching
//! to any of them. Framework-agnostic like its sibling crates: no route
//! mounting happens here, only the checks and the calls a router wires up.
//!
//! Per §4.9, if no admin token is configured at startup the whole surface is
//! not mounted; that decision lives in `caseloot-server`'s router assembly,
//! not here -- this crate has nothing to say about an absent token beyond
//! rejecting requests that don't present the right one.

pub mod banlist;
pub mod economy;
pub mod error;
pub mod token;
pub mod webhook;

pub use banlist::{AdminBanlistService, BanRequest};
pub use economy::EconomyService;
pub use error::AdminError;
pub use token::verify_admin_token;
pub use webhook::{AdminWebhookService, SetWebhookRequest};
