use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use redes_core::current_unix_timestamp_ms;
use redes_flow::{
    Attachment, ReconcileError, Reconciler, ResolutionRequest, TicketFlows, WebhookEvent,
    OPEN_ACTIVE_STATE,
};
use redes_store::{
    LogStatus, NewLogEntry, PageQuery, SqliteTicketStore, Ticket, TicketStore, TicketStoreError,
    User,
};
use redes_sync::{RemoteSyncClient, RemoteSyncConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;

mod auth_runtime;
#[cfg(test)]
mod tests;
mod types;
mod web_page;

use auth_runtime::{
    authorize_request, collect_auth_status_report, hash_password, issue_session_token,
    note_auth_failure, verify_password, AuthRuntimeState,
};
pub use auth_runtime::AuthSession;
use types::{
    FlowActionRequest, LoginRequest, MirrorApiError, ProposeResolutionRequest, RegisterRequest,
    SessionTokenResponse,
};
use web_page::render_operator_page;

const HEALTH_ENDPOINT: &str = "/health";
const WEBHOOK_ENDPOINT: &str = "/webhook/adamo";
const TICKETS_ENDPOINT: &str = "/tickets";
const TICKET_DETAIL_ENDPOINT: &str = "/tickets/{primary_key}";
const TICKET_REQUEST_INFO_ENDPOINT: &str = "/tickets/{primary_key}/request_info";
const TICKET_PROPOSE_RESOLUTION_ENDPOINT: &str = "/tickets/{primary_key}/propose_resolution";
const TICKET_SEND_REPORT_ENDPOINT: &str = "/tickets/{primary_key}/send_report";
const TICKET_RETRY_ENDPOINT: &str = "/tickets/{primary_key}/retry";
const LOGS_ENDPOINT: &str = "/logs";
const AUTH_REGISTER_ENDPOINT: &str = "/auth/register";
const AUTH_LOGIN_ENDPOINT: &str = "/auth/login";
const SIMULATE_INBOUND_ENDPOINT: &str = "/simulate/adamo-to-redes";
const SIMULATE_OUTBOUND_ENDPOINT: &str = "/simulate/redes-to-adamo";
const WEB_ENDPOINT: &str = "/web";

const ERROR_EVENT: &str = "error";
const DEFAULT_PAGE_LIMIT: usize = 50;
const DEFAULT_OPERATOR_ROLE: &str = "technician";
const SIMULATED_PRIMARY_KEY: &str = "IB-LOCAL-001";

/// Runtime configuration for the mirror server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub database_path: PathBuf,
    pub sync: RemoteSyncConfig,
    pub clearance_person: String,
    pub session_ttl_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8740".to_string(),
            database_path: PathBuf::from(".redes/tickets.sqlite3"),
            sync: RemoteSyncConfig::default(),
            clearance_person: "ibiocom".to_string(),
            session_ttl_seconds: 86_400,
        }
    }
}

/// Shared server state handed to every request handler.
#[derive(Clone)]
pub struct ServerState {
    config: ServerConfig,
    store: Arc<dyn TicketStore>,
    reconciler: Arc<Reconciler>,
    flows: Arc<TicketFlows>,
    auth_runtime: Arc<Mutex<AuthRuntimeState>>,
    session_sequence: Arc<AtomicU64>,
}

impl ServerState {
    /// Opens the configured SQLite database and wires the sync pipeline.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let store = SqliteTicketStore::new(&config.database_path).with_context(|| {
            format!(
                "failed to open ticket database at {}",
                config.database_path.display()
            )
        })?;
        Self::with_store(config, Arc::new(store))
    }

    /// Wires the sync pipeline over an externally supplied store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn TicketStore>) -> Result<Self> {
        let sync = Arc::new(RemoteSyncClient::new(config.sync.clone(), store.clone())?);
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            sync.clone(),
            config.clearance_person.clone(),
        ));
        let flows = Arc::new(TicketFlows::new(
            store.clone(),
            sync,
            config.clearance_person.clone(),
        ));
        Ok(Self {
            config,
            store,
            reconciler,
            flows,
            auth_runtime: Arc::new(Mutex::new(AuthRuntimeState::default())),
            session_sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    fn next_sequence(&self) -> u64 {
        self.session_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Runs the mirror server until ctrl-c.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind address '{}'", config.bind))?;

    let state = ServerState::from_config(config)?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind mirror server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound mirror server address")?;

    println!(
        "redes mirror server listening: addr={} webhook={} sync_mode={} database={}",
        local_addr,
        WEBHOOK_ENDPOINT,
        state.config.sync.mode.as_str(),
        state.config.database_path.display()
    );

    let app = build_server_router(Arc::new(state));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("mirror server exited unexpectedly")?;

    Ok(())
}

/// Builds the mirror server router over `state`.
pub fn build_server_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(WEBHOOK_ENDPOINT, post(handle_webhook))
        .route(TICKETS_ENDPOINT, get(handle_tickets_list))
        .route(TICKET_DETAIL_ENDPOINT, get(handle_ticket_detail))
        .route(TICKET_REQUEST_INFO_ENDPOINT, post(handle_request_info))
        .route(
            TICKET_PROPOSE_RESOLUTION_ENDPOINT,
            post(handle_propose_resolution),
        )
        .route(TICKET_SEND_REPORT_ENDPOINT, post(handle_send_report))
        .route(TICKET_RETRY_ENDPOINT, post(handle_retry))
        .route(LOGS_ENDPOINT, get(handle_logs_list))
        .route(AUTH_REGISTER_ENDPOINT, post(handle_auth_register))
        .route(AUTH_LOGIN_ENDPOINT, post(handle_auth_login))
        .route(SIMULATE_INBOUND_ENDPOINT, post(handle_simulate_inbound))
        .route(SIMULATE_OUTBOUND_ENDPOINT, post(handle_simulate_outbound))
        .route(WEB_ENDPOINT, get(handle_web_page))
        .with_state(state)
}

/// Paging parameters accepted by the list endpoints.
#[derive(Debug, Default, Deserialize)]
struct PageParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

impl PageParams {
    fn to_query(&self) -> PageQuery {
        PageQuery {
            limit: Some(self.limit.unwrap_or(DEFAULT_PAGE_LIMIT)),
            offset: self.offset.unwrap_or(0),
        }
    }
}

async fn handle_health(State(state): State<Arc<ServerState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "sync_mode": state.config.sync.mode.as_str(),
            "auth": collect_auth_status_report(&state),
        })),
    )
        .into_response()
}

async fn handle_webhook(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let event = match serde_json::from_slice::<WebhookEvent>(&body) {
        Ok(event) => event,
        Err(error) => {
            return MirrorApiError::bad_request(
                "malformed_json",
                format!("failed to parse webhook body: {error}"),
            )
            .into_response();
        }
    };

    match state.reconciler.reconcile_webhook(&event).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "mirrorKey": outcome.mirror_key,
                "created": outcome.created,
            })),
        )
            .into_response(),
        Err(error) => reconcile_error_response(&state, error).await,
    }
}

async fn handle_tickets_list(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Response {
    if let Err(error) = authorize_request(&state, &headers) {
        return error.into_response();
    }
    match state.store.list_tickets(params.to_query()).await {
        Ok(tickets) => (StatusCode::OK, Json(tickets)).into_response(),
        Err(error) => internal_error_response(&state, "failed to list tickets", error).await,
    }
}

async fn handle_ticket_detail(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    AxumPath(primary_key): AxumPath<String>,
) -> Response {
    if let Err(error) = authorize_request(&state, &headers) {
        return error.into_response();
    }
    match state.store.get_ticket(&primary_key).await {
        Ok(Some(ticket)) => (StatusCode::OK, Json(ticket)).into_response(),
        Ok(None) => MirrorApiError::not_found(
            "ticket_not_found",
            format!("ticket '{primary_key}' not found"),
        )
        .into_response(),
        Err(error) => internal_error_response(&state, "failed to load ticket", error).await,
    }
}

async fn handle_logs_list(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Response {
    if let Err(error) = authorize_request(&state, &headers) {
        return error.into_response();
    }
    match state.store.list_logs(params.to_query()).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(error) => internal_error_response(&state, "failed to list event log", error).await,
    }
}

async fn handle_request_info(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    AxumPath(primary_key): AxumPath<String>,
    body: Bytes,
) -> Response {
    let session = match authorize_request(&state, &headers) {
        Ok(session) => session,
        Err(error) => return error.into_response(),
    };
    let request = match serde_json::from_slice::<FlowActionRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            return MirrorApiError::bad_request(
                "malformed_json",
                format!("failed to parse request body: {error}"),
            )
            .into_response();
        }
    };

    match state
        .flows
        .request_info(&primary_key, &request.dialog, request.attachments)
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                primary_key = primary_key.as_str(),
                operator = session.email.as_str(),
                success = outcome.is_success(),
                "request info dispatched"
            );
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(error) => flow_error_response(&state, "request info failed", error).await,
    }
}

async fn handle_propose_resolution(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    AxumPath(primary_key): AxumPath<String>,
    body: Bytes,
) -> Response {
    let session = match authorize_request(&state, &headers) {
        Ok(session) => session,
        Err(error) => return error.into_response(),
    };
    let request = match serde_json::from_slice::<ProposeResolutionRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            return MirrorApiError::bad_request(
                "malformed_json",
                format!("failed to parse request body: {error}"),
            )
            .into_response();
        }
    };
    let restore_date = match DateTime::parse_from_rfc3339(&request.date_restore_service) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(error) => {
            return MirrorApiError::bad_request(
                "invalid_date",
                format!("dateRestoreService must be RFC 3339: {error}"),
            )
            .into_response();
        }
    };

    let resolution = ResolutionRequest {
        restore_date,
        raw_resolution: request.raw_resolution,
        dialog: request.dialog.unwrap_or_default(),
        certification: request.certification,
        department: request.department,
        raw_real_tipification: request.raw_real_tipification,
        attachments: request.attachments,
    };
    match state
        .flows
        .propose_resolution(&primary_key, resolution)
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                primary_key = primary_key.as_str(),
                operator = session.email.as_str(),
                success = outcome.is_success(),
                "resolution proposal dispatched"
            );
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(error) => flow_error_response(&state, "resolution proposal failed", error).await,
    }
}

async fn handle_send_report(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    AxumPath(primary_key): AxumPath<String>,
    body: Bytes,
) -> Response {
    let session = match authorize_request(&state, &headers) {
        Ok(session) => session,
        Err(error) => return error.into_response(),
    };
    let request = match serde_json::from_slice::<FlowActionRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            return MirrorApiError::bad_request(
                "malformed_json",
                format!("failed to parse request body: {error}"),
            )
            .into_response();
        }
    };

    match state
        .flows
        .send_report(&primary_key, &request.dialog, request.attachments)
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                primary_key = primary_key.as_str(),
                operator = session.email.as_str(),
                success = outcome.is_success(),
                "work report dispatched"
            );
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(error) => flow_error_response(&state, "work report failed", error).await,
    }
}

async fn handle_retry(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    AxumPath(primary_key): AxumPath<String>,
) -> Response {
    let session = match authorize_request(&state, &headers) {
        Ok(session) => session,
        Err(error) => return error.into_response(),
    };
    match state.reconciler.retry_sync(&primary_key).await {
        Ok(result) => {
            tracing::info!(
                primary_key = primary_key.as_str(),
                operator = session.email.as_str(),
                success = !result.is_error(),
                "manual retry dispatched"
            );
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(error) => reconcile_error_response(&state, error).await,
    }
}

async fn handle_auth_register(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let request = match serde_json::from_slice::<RegisterRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            return MirrorApiError::bad_request(
                "malformed_json",
                format!("failed to parse request body: {error}"),
            )
            .into_response();
        }
    };

    let email = request.email.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return MirrorApiError::bad_request("invalid_email", "email must contain '@'")
            .into_response();
    }
    if request.password.is_empty() {
        return MirrorApiError::bad_request("invalid_password", "password must not be empty")
            .into_response();
    }
    let role = request
        .role
        .as_deref()
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .unwrap_or(DEFAULT_OPERATOR_ROLE)
        .to_string();

    let user = User::new(email.clone(), hash_password(&request.password), role.clone());
    match state.store.insert_user(user).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "email": email, "role": role }))).into_response(),
        Err(TicketStoreError::UserAlreadyExists(_)) => MirrorApiError::bad_request(
            "user_exists",
            "a user with this email already exists",
        )
        .into_response(),
        Err(error) => internal_error_response(&state, "failed to register user", error).await,
    }
}

async fn handle_auth_login(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let request = match serde_json::from_slice::<LoginRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            return MirrorApiError::bad_request(
                "malformed_json",
                format!("failed to parse request body: {error}"),
            )
            .into_response();
        }
    };

    let email = request.email.trim().to_ascii_lowercase();
    let user = match state.store.get_user(&email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            note_auth_failure(&state);
            return MirrorApiError::invalid_credentials().into_response();
        }
        Err(error) => return internal_error_response(&state, "failed to load user", error).await,
    };
    if !verify_password(&request.password, &user.password_digest) {
        note_auth_failure(&state);
        return MirrorApiError::invalid_credentials().into_response();
    }

    match issue_session_token(&state, &user) {
        Ok(token) => (StatusCode::OK, Json(token)).into_response(),
        Err(error) => error.into_response(),
    }
}

async fn handle_simulate_inbound(State(state): State<Arc<ServerState>>) -> Response {
    let event = WebhookEvent {
        primary_key: Some(SIMULATED_PRIMARY_KEY.to_string()),
        mirror_key: None,
        state: Some(OPEN_ACTIVE_STATE.to_string()),
        dialog: Some("simulated incident pushed by Adamo (local mode)".to_string()),
    };
    let outcome = match state.reconciler.reconcile_webhook(&event).await {
        Ok(outcome) => outcome,
        Err(error) => return reconcile_error_response(&state, error).await,
    };
    let ticket = match state.store.get_ticket(SIMULATED_PRIMARY_KEY).await {
        Ok(ticket) => ticket,
        Err(error) => {
            return internal_error_response(&state, "failed to load simulated ticket", error).await;
        }
    };
    (
        StatusCode::OK,
        Json(json!({
            "status": "received",
            "mirrorKey": outcome.mirror_key,
            "ticket": ticket,
        })),
    )
        .into_response()
}

async fn handle_simulate_outbound(State(state): State<Arc<ServerState>>) -> Response {
    let tickets = match state
        .store
        .list_tickets(PageQuery {
            limit: Some(1),
            offset: 0,
        })
        .await
    {
        Ok(tickets) => tickets,
        Err(error) => return internal_error_response(&state, "failed to list tickets", error).await,
    };
    let Some(ticket) = tickets.into_iter().next() else {
        return MirrorApiError::not_found("no_tickets", "no tickets available to send")
            .into_response();
    };

    let resolution = ResolutionRequest {
        restore_date: Utc::now(),
        raw_resolution: "FTTH_REVENTA_ACTUACION_EN_RED".to_string(),
        dialog: "simulated resolution proposal (local mode)".to_string(),
        certification: None,
        department: None,
        raw_real_tipification: Some("FTTH_INS_NOK_CORTES".to_string()),
        attachments: Vec::new(),
    };
    match state
        .flows
        .propose_resolution(&ticket.primary_key, resolution)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "sent",
                "primaryKey": ticket.primary_key,
                "outcome": outcome,
            })),
        )
            .into_response(),
        Err(error) => flow_error_response(&state, "simulated resolution failed", error).await,
    }
}

async fn handle_web_page(State(state): State<Arc<ServerState>>) -> Response {
    match state
        .store
        .list_tickets(PageQuery {
            limit: Some(DEFAULT_PAGE_LIMIT),
            offset: 0,
        })
        .await
    {
        Ok(tickets) => Html(render_operator_page(&tickets)).into_response(),
        Err(error) => internal_error_response(&state, "failed to render ticket board", error).await,
    }
}

async fn reconcile_error_response(state: &ServerState, error: ReconcileError) -> Response {
    match error {
        ReconcileError::MissingPrimaryKey => {
            MirrorApiError::bad_request("missing_primary_key", "webhook event is missing primaryKey")
                .into_response()
        }
        ReconcileError::TicketNotFound(primary_key) => MirrorApiError::not_found(
            "ticket_not_found",
            format!("ticket '{primary_key}' not found"),
        )
        .into_response(),
        ReconcileError::SyncFailed { error } => {
            MirrorApiError::sync_failed(format!("outbound sync failed: {error}")).into_response()
        }
        ReconcileError::Store(error) => {
            internal_error_response(state, "store failure during reconcile", error).await
        }
    }
}

async fn flow_error_response(
    state: &ServerState,
    context: &str,
    error: TicketStoreError,
) -> Response {
    match error {
        TicketStoreError::TicketNotFound(primary_key) => MirrorApiError::not_found(
            "ticket_not_found",
            format!("ticket '{primary_key}' not found"),
        )
        .into_response(),
        error => internal_error_response(state, context, error).await,
    }
}

/// Records an `error` event and answers with an opaque 500.
///
/// The event log keeps the detail; the response body stays generic so
/// internal failure text never leaks to callers.
async fn internal_error_response(
    state: &ServerState,
    context: &str,
    error: impl std::fmt::Display,
) -> Response {
    tracing::error!(context, error = %error, "request failed");
    let entry =
        NewLogEntry::new(ERROR_EVENT, LogStatus::Error).with_payload(format!("{context}: {error}"));
    if let Err(log_error) = state.store.append_log(entry).await {
        tracing::error!(error = %log_error, "failed to record error event");
    }
    MirrorApiError::internal("internal error handling request").into_response()
}
