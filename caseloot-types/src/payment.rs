//! §3 / §4.8: the payment state machine's persisted record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Paid,
    Awarded,
    Refunded,
    Failed,
}

/// Identity and idempotency key: `telegram_payment_charge_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub telegram_payment_charge_id: String,
    pub provider_payment_charge_id: String,
    pub invoice_payload: String,
    pub currency: String,
    pub total_amount: i64,
    pub user_id: i64,
    pub status: PaymentStatus,
    pub awarded_item_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub const CURRENCY_XTR: &'static str = "XTR";
}
