//! The chat-platform collaborator: a narrow client facade (C10's outbound
//! calls), the two ingestion front doors (C6 webhook receiver, C7 long-poll
//! runner), web-view `initData` verification, and the invoice-payload codec.
//!
//! Everything in here is HTTP-transport-shaped but axum-free: `webhook`
//! exposes a plain ingest function that `caseloot-server`'s handler calls
//! after extracting headers/body, so this crate has no opinion on the web
//! framework wrapping it.

pub mod client;
pub mod initdata;
pub mod invoice_payload;
pub mod longpoll;
pub mod mode;
pub mod webhook;

pub use client::{ClientError, CreateInvoiceParams, HttpTelegramClient, SetWebhookParams, TelegramClient, WebhookInfo};
pub use initdata::{verify_init_data, InitDataContext, InitDataError};
pub use invoice_payload::{decode_invoice_payload, encode_invoice_payload, InvoicePayload, InvoicePayloadError};
pub use longpoll::{LongPollRunner, RunnerState};
pub use mode::{IngestMode, ModeError, ModeGuard};
pub use webhook::{WebhookError, WebhookIngest, MAX_BODY_BYTES};
