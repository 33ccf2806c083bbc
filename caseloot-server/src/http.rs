//! The HTTP surface (spec §6): wires every inbound route onto the
//! framework-agnostic services the sibling crates already implement. This
//! module's own job is small -- extract headers/bodies/query strings into
//! the shapes those services expect, and render their `Result`s back into
//! [`ApiError`]'s wire form. No domain logic lives here.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use caseloot_admin::{AdminBanlistService, AdminWebhookService, BanRequest, EconomyService, SetWebhookRequest};
use caseloot_cases::CasesRegistry;
use caseloot_concurrency::NotifyOnce;
use caseloot_error::{ApiError, ApiErrorKind};
use caseloot_payments::InvoiceService;
use caseloot_telegram::{verify_init_data, InitDataContext, ModeGuard, WebhookIngest};
use caseloot_types::{generate_request_id, is_valid_request_id, CasePublicView};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tracing::{error, info_span, Instrument};

#[derive(Clone)]
pub struct AppState {
    pub metrics_handle: PrometheusHandle,
    pub health_path: String,
    pub metrics_path: String,
    pub admin_token: Option<SecretString>,
    pub bot_token: SecretString,
    pub cases: Arc<CasesRegistry>,
    pub invoices: Arc<InvoiceService>,
    pub webhook_ingest: Arc<WebhookIngest>,
    pub admin_webhooks: Option<Arc<AdminWebhookService>>,
    pub admin_economy: Option<Arc<EconomyService>>,
    pub admin_banlist: Option<Arc<AdminBanlistService>>,
    pub mode_guard: Arc<ModeGuard>,
}

/// Renders any [`ApiError`] into the wire [`ErrorResponse`]. The id stamped
/// here is just a fallback for errors raised outside the normal handler flow
/// (rejections, extractor failures); ordinary handler errors are rendered by
/// [`request_id_middleware`] instead, which overwrites this field with the
/// id it already put in the response headers so body and header agree.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        reply_err(self, generate_request_id())
    }
}

fn reply_err(err: ApiError, request_id: String) -> Response {
    let status = err.status;
    if matches!(err.kind, ApiErrorKind::Internal) {
        error!(error = %err, "internal error");
    }
    let body = err.into_response_body(request_id, Utc::now().timestamp_millis());
    (status, Json(body)).into_response()
}

/// Reads `X-Request-Id` if present and valid, generating one otherwise, per
/// spec §6 (8-64 chars `[A-Za-z0-9]`, 12 generated).
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| is_valid_request_id(s))
        .map(ToOwned::to_owned)
        .unwrap_or_else(generate_request_id)
}

/// Assigns every request a request id up front (reusing the client's
/// `X-Request-Id` if it's well-formed), stamps it on the outgoing response
/// header, and rewrites any JSON error body's `request_id` field to match --
/// so logs, the response header, and the error body all agree on one id.
async fn request_id_middleware(headers: HeaderMap, req: Request, next: Next) -> Response {
    let rid = request_id(&headers);
    let mut response = next.run(req).await;

    if response.status().is_client_error() || response.status().is_server_error() {
        if let Ok(bytes) = axum::body::to_bytes(std::mem::take(response.body_mut()), usize::MAX).await {
            let rewritten = serde_json::from_slice::<caseloot_error::ErrorResponse>(&bytes).ok().map(|mut body| {
                body.request_id = rid.clone();
                serde_json::to_vec(&body).unwrap_or_else(|_| bytes.to_vec())
            });
            let final_bytes = rewritten.unwrap_or_else(|| bytes.to_vec());
            response.headers_mut().remove(axum::http::header::CONTENT_LENGTH);
            *response.body_mut() = axum::body::Body::from(final_bytes);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&rid) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn client_ip(headers: &HeaderMap, connect_info: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_owned())
        .unwrap_or_else(|| connect_info.ip().to_string())
}

// --- /health, /metrics, /version --- //

async fn health() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

#[derive(Serialize)]
struct VersionInfo {
    app: &'static str,
    version: &'static str,
    git: &'static str,
    build_time: &'static str,
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        app: "caseloot-server",
        version: env!("CARGO_PKG_VERSION"),
        git: option_env!("CASELOOT_GIT_SHA").unwrap_or("unknown"),
        build_time: option_env!("CASELOOT_BUILD_TIME").unwrap_or("unknown"),
    })
}

// --- /api/miniapp/* --- //

fn verify_init_data_header(state: &AppState, headers: &HeaderMap) -> Result<InitDataContext, ApiError> {
    let raw = headers
        .get("x-telegram-init-data")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::forbidden("forbidden", "missing X-Telegram-Init-Data header"))?;

    let pairs: Vec<(String, String)> = form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    verify_init_data(&state.bot_token, &pairs).map_err(|e| ApiError::forbidden("forbidden", e.to_string()))
}

async fn list_cases(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<CasePublicView>>, ApiError> {
    verify_init_data_header(&state, &headers)?;
    Ok(Json(state.cases.load().public_cases()))
}

#[derive(Deserialize)]
struct CreateInvoiceRequest {
    #[serde(rename = "caseId")]
    case_id: String,
}

#[derive(Serialize)]
struct CreateInvoiceResponse {
    url: String,
}

async fn create_invoice(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<Json<CreateInvoiceResponse>, ApiError> {
    let ctx = verify_init_data_header(&state, &headers)?;
    let ip = client_ip(&headers, &peer);
    let now_ms = Utc::now().timestamp_millis();
    // A mini-app invoice link targets the user's private chat with the bot;
    // `createInvoiceLink` has no notion of a separate chat recipient.
    let url = state.invoices.create_invoice(ctx.user_id, ctx.user_id, &req.case_id, &ip, now_ms).await?;
    Ok(Json(CreateInvoiceResponse { url }))
}

// --- /telegram/webhook --- //

async fn telegram_webhook(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ip = client_ip(&headers, &peer);
    let secret = headers.get("x-telegram-bot-api-secret-token").and_then(|v| v.to_str().ok());
    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok());
    let now_ms = Utc::now().timestamp_millis();

    match state.webhook_ingest.ingest(secret, content_type, &body, &ip, now_ms).await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(err) => webhook_error_response(err).into_response(),
    }
}

fn webhook_error_response(err: caseloot_telegram::WebhookError) -> Response {
    use caseloot_telegram::WebhookError::*;
    let api_err = match err {
        Forbidden => ApiError::forbidden("forbidden", err.to_string()),
        PayloadTooLarge => {
            ApiError::client_input("payload too large", err.to_string()).with_status(StatusCode::PAYLOAD_TOO_LARGE)
        }
        UnsupportedMediaType => ApiError::client_input("unsupported media type", err.to_string())
            .with_status(StatusCode::UNSUPPORTED_MEDIA_TYPE),
        InvalidJson => ApiError::client_input("invalid update json", err.to_string()),
        AntifraudBlocked => ApiError::antifraud_deny("rate_limit"),
    };
    api_err.into_response()
}

// --- /internal/* (admin) --- //

fn check_admin_token(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let configured = state.admin_token.as_ref().expect("admin routes are only mounted when a token is configured");
    let provided = headers.get("x-admin-token").and_then(|v| v.to_str().ok());
    caseloot_admin::verify_admin_token(configured, provided).map_err(ApiError::from)
}

async fn admin_webhook_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SetWebhookRequestBody>,
) -> Result<StatusCode, ApiError> {
    check_admin_token(&state, &headers)?;
    let svc = state.admin_webhooks.as_ref().expect("mounted only when configured");
    svc.set_webhook(SetWebhookRequest {
        url: req.url,
        allowed_updates: req.allowed_updates,
        max_connections: req.max_connections,
        drop_pending_updates: req.drop_pending.unwrap_or(false),
    })
    .await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct SetWebhookRequestBody {
    url: Option<String>,
    #[serde(rename = "allowedUpdates")]
    allowed_updates: Option<Vec<String>>,
    #[serde(rename = "maxConnections")]
    max_connections: Option<u32>,
    #[serde(rename = "dropPending")]
    drop_pending: Option<bool>,
}

#[derive(Deserialize)]
struct DropPendingQuery {
    #[serde(rename = "dropPending", default)]
    drop_pending: bool,
}

async fn admin_webhook_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<DropPendingQuery>,
) -> Result<StatusCode, ApiError> {
    check_admin_token(&state, &headers)?;
    let svc = state.admin_webhooks.as_ref().expect("mounted only when configured");
    svc.delete_webhook(q.drop_pending).await?;
    Ok(StatusCode::OK)
}

async fn admin_webhook_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<caseloot_telegram::WebhookInfo>, ApiError> {
    check_admin_token(&state, &headers)?;
    let svc = state.admin_webhooks.as_ref().expect("mounted only when configured");
    Ok(Json(svc.webhook_info().await?))
}

#[derive(Deserialize)]
struct CaseIdQuery {
    #[serde(rename = "caseId")]
    case_id: String,
}

async fn admin_economy_preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<CaseIdQuery>,
) -> Result<Json<caseloot_types::CaseValidationReport>, ApiError> {
    check_admin_token(&state, &headers)?;
    let svc = state.admin_economy.as_ref().expect("mounted only when configured");
    Ok(Json(svc.preview(&q.case_id)?))
}

async fn admin_economy_reload(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    check_admin_token(&state, &headers)?;
    let svc = state.admin_economy.as_ref().expect("mounted only when configured");
    svc.reload().await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct BanRequestBody {
    ip: String,
    reason: String,
    #[serde(rename = "durationSec")]
    duration_sec: Option<i64>,
}

async fn admin_banlist_ban(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BanRequestBody>,
) -> Result<StatusCode, ApiError> {
    check_admin_token(&state, &headers)?;
    let svc = state.admin_banlist.as_ref().expect("mounted only when configured");
    let now_ms = Utc::now().timestamp_millis();
    svc.ban(BanRequest { ip: req.ip, reason: req.reason, duration_sec: req.duration_sec }, now_ms).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct IpQuery {
    ip: String,
}

async fn admin_banlist_unban(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<IpQuery>,
) -> Result<StatusCode, ApiError> {
    check_admin_token(&state, &headers)?;
    let svc = state.admin_banlist.as_ref().expect("mounted only when configured");
    svc.unban(&q.ip).await?;
    Ok(StatusCode::OK)
}

async fn admin_banlist_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<caseloot_storage::IpBanEntry>>, ApiError> {
    check_admin_token(&state, &headers)?;
    let svc = state.admin_banlist.as_ref().expect("mounted only when configured");
    Ok(Json(svc.list().await?))
}

/// Builds the full router. The `/internal/*` admin group is only nested in
/// when an admin token is configured (§4.9: "If no admin token is configured
/// at startup, admin routes are not mounted").
pub fn build_router(state: AppState) -> Router {
    let health_path = state.health_path.clone();
    let metrics_path = state.metrics_path.clone();
    let admin_mounted = state.admin_token.is_some();

    let mut router = Router::new()
        .route(&health_path, get(health))
        .route(&metrics_path, get(metrics))
        .route("/version", get(version))
        .nest_service("/app", ServeDir::new("webapp"))
        .route("/api/miniapp/cases", get(list_cases))
        .route("/api/miniapp/invoice", post(create_invoice))
        .route("/telegram/webhook", post(telegram_webhook));

    if admin_mounted {
        let admin_router = Router::new()
            .route("/telegram/webhook/set", post(admin_webhook_set))
            .route("/telegram/webhook/delete", post(admin_webhook_delete))
            .route("/telegram/webhook/info", get(admin_webhook_info))
            .route("/economy/preview", get(admin_economy_preview))
            .route("/economy/reload", post(admin_economy_reload))
            .route("/banlist/ban", post(admin_banlist_ban))
            .route("/banlist/unban", post(admin_banlist_unban))
            .route("/banlist", get(admin_banlist_list));
        router = router.nest("/internal", admin_router);
    }

    router
        .layer(middleware::from_fn(request_id_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on `addr` until `shutdown` fires, with a bounded grace
/// period for in-flight connections to finish (mirrors the queue's own
/// `close()` bound, §4.3/§5).
pub async fn serve(addr: SocketAddr, router: Router, mut shutdown: NotifyOnce) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, %err, "failed to bind http listener");
            return;
        }
    };

    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
    let server = axum::serve(listener, make_service).with_graceful_shutdown(async move {
        shutdown.recv().await;
    });

    if let Err(err) = server.instrument(info_span!("http-server")).await {
        error!(%err, "http server exited with an error");
    }
}
