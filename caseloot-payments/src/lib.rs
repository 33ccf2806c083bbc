//! C10: the payment state machine (§4.8). Three independent transitions —
//! invoice creation, pre-checkout answering, successful-payment award — plus
//! the refund path shared by award failures. Framework-agnostic, same as
//! `caseloot-telegram`: `caseloot-server`'s handlers extract the relevant
//! update payload and call straight into these services.

pub mod error;
pub mod invoice;
pub mod precheckout;
pub mod refund;
pub mod success;

pub use error::PaymentError;
pub use invoice::InvoiceService;
pub use precheckout::PreCheckoutService;
pub use refund::RefundService;
pub use success::SuccessService;
