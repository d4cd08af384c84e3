pub mod address;
pub mod chatbot;
pub mod config;
pub mod connector;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod metadata;
pub mod qr;
pub mod registry;
pub mod session;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};

use self::address::AddressPolicy;
use self::chatbot::{AutoReply, ChatbotAdmin, ChatbotEngine, OptionInput};
use self::config::{expand_tilde, load_config, resolve_database_url};
use self::connector::sidecar::{SidecarConnectorFactory, SidecarEventPayload, SidecarHub};
use self::connector::ConnectorFactory;
use self::db::{ChatbotStore, SqlChatbotStore};
use self::dispatch::{BulkDispatcher, BulkPayload, BulkSendResult};
use self::metadata::{JsonFileMetadataStore, MetadataStore};
use self::registry::SessionRegistry;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub const TOKEN_HEADER: &str = "X-Keepconnect-Token";

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: BulkDispatcher,
    pub admin: ChatbotAdmin,
    pub hub: SidecarHub,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Stops the auto-reply worker and the registry, persisting a final
    /// snapshot.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.shutdown().await;
    }
}

/// External collaborators the daemon is wired to.
pub struct Dependencies {
    pub connectors: Arc<dyn ConnectorFactory>,
    pub hub: SidecarHub,
    pub store: Arc<dyn ChatbotStore>,
    pub metadata: Arc<dyn MetadataStore>,
}

#[derive(Debug, Deserialize)]
pub struct AccountRequest {
    pub account_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub account_id: String,
    pub to: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMediaRequest {
    pub account_id: String,
    pub to: String,
    pub media_url: String,
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Deserialize)]
pub struct SendManyRequest {
    pub account_id: String,
    pub recipients: Vec<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendManyMediaRequest {
    pub account_id: String,
    pub recipients: Vec<String>,
    pub media_url: String,
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveChatbotRequest {
    pub account_id: String,
    pub welcome_message: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct BulkSendResponse {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<BulkSendResult>,
}

impl From<Vec<BulkSendResult>> for BulkSendResponse {
    fn from(results: Vec<BulkSendResult>) -> Self {
        let sent = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            sent,
            failed: results.len() - sent,
            results,
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::SessionNotFound(_) | Error::ConfigNotFound(_) => StatusCode::NOT_FOUND,
            Error::SessionNotReady(_) => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::PairingFailed(_) | Error::Connector(_) => StatusCode::BAD_GATEWAY,
            Error::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), "request failed: {self}");
        }
        (
            status,
            Json(json!({"error": self.to_string(), "kind": self.kind()})),
        )
            .into_response()
    }
}

fn require_account(account_id: &str) -> Result<&str> {
    let account_id = account_id.trim();
    if account_id.is_empty() {
        return Err(Error::Validation("account_id is required".to_string()));
    }
    Ok(account_id)
}

fn require_recipients(recipients: &[String]) -> Result<()> {
    if recipients.is_empty() {
        return Err(Error::Validation("recipients must not be empty".to_string()));
    }
    Ok(())
}

/// Wires the core components and starts the auto-reply worker.
pub fn build_state(config: Config, deps: Dependencies) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.connector.request_timeout_secs.max(1)))
        .build()?;

    let (inbound_tx, inbound_rx) = mpsc::channel(config.sessions.inbound_queue.max(1));
    let registry = Arc::new(SessionRegistry::new(
        deps.connectors,
        deps.metadata,
        inbound_tx,
        config.sessions.clone(),
    ));
    let dispatcher = BulkDispatcher::new(
        registry.clone(),
        AddressPolicy::new(&config.addressing),
        http.clone(),
        config.bulk.max_concurrency,
    );
    let admin = ChatbotAdmin::new(deps.store.clone());
    let shutdown = CancellationToken::new();

    AutoReply::new(ChatbotEngine::new(deps.store), registry.clone(), http)
        .spawn(inbound_rx, shutdown.child_token());

    Ok(AppState {
        config,
        registry,
        dispatcher,
        admin,
        hub: deps.hub,
        shutdown,
    })
}

pub async fn create_app() -> anyhow::Result<(AppState, Router)> {
    let config = load_config();
    let db_url = resolve_database_url(&config);
    let store = SqlChatbotStore::connect(&db_url).await?;

    let hub = SidecarHub::new();
    let connectors = SidecarConnectorFactory::new(&config.connector, hub.clone())?;
    let metadata = JsonFileMetadataStore::new(expand_tilde(&config.sessions.metadata_path));

    let state = build_state(
        config,
        Dependencies {
            connectors: Arc::new(connectors),
            hub,
            store: Arc::new(store),
            metadata: Arc::new(metadata),
        },
    )?;
    let app = router(state.clone());
    Ok((state, app))
}

pub fn router(state: AppState) -> Router {
    let authed_routes = Router::new()
        .route("/v1/sessions", get(list_sessions))
        .route("/v1/sessions/init", post(init_session))
        .route("/v1/sessions/logout", post(logout_session))
        .route("/v1/sessions/:account_id/status", get(session_status))
        .route("/v1/sessions/:account_id/qr", get(session_qr))
        .route("/v1/messages/send", post(send_message))
        .route("/v1/messages/send-media", post(send_media))
        .route("/v1/messages/send-many", post(send_many))
        .route("/v1/messages/send-many-media", post(send_many_media))
        .route("/v1/chatbot", post(save_chatbot))
        .route(
            "/v1/chatbot/:account_id",
            get(get_chatbot).delete(delete_chatbot),
        )
        .route("/v1/chatbot/:account_id/options", post(upsert_option))
        .route("/v1/chatbot/:account_id/options/:key", delete(delete_option))
        .route("/v1/chatbot/:account_id/toggle", patch(toggle_chatbot))
        .route("/v1/connector/events", post(connector_event))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public_routes = Router::new().route("/v1/health", get(health));

    Router::new()
        .merge(authed_routes)
        .merge(public_routes)
        .with_state(state)
}

async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> impl IntoResponse {
    if let Some(token) = state.config.auth.token.as_ref() {
        let header = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok());
        if header != Some(token.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    next.run(req).await
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.registry.list_all();
    Json(json!({"total": sessions.len(), "sessions": sessions}))
}

async fn init_session(
    State(state): State<AppState>,
    Json(req): Json<AccountRequest>,
) -> Result<Json<Value>> {
    let account_id = require_account(&req.account_id)?;
    let session = state.registry.initialize(account_id).await?;
    let code = session.pairing_payload();
    let qr = code.as_deref().map(qr::png_data_url).transpose()?;
    Ok(Json(json!({
        "account_id": session.account_id(),
        "status": session.status(),
        "qr": qr,
        "code": code,
    })))
}

async fn session_status(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.lookup(&account_id) {
        Some(session) => {
            let summary = session.summary();
            Json(json!({
                "account_id": summary.account_id,
                "status": summary.status,
                "is_ready": summary.is_ready,
                "has_qr": session.pairing_payload().is_some(),
            }))
        }
        None => Json(json!({
            "account_id": account_id,
            "status": "not_initialized",
            "is_ready": false,
            "has_qr": false,
        })),
    }
}

async fn session_qr(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Value>> {
    let session = state
        .registry
        .lookup(&account_id)
        .ok_or_else(|| Error::SessionNotFound(account_id.clone()))?;
    match session.pairing_payload() {
        Some(code) => Ok(Json(json!({
            "account_id": account_id,
            "status": session.status(),
            "qr": qr::png_data_url(&code)?,
            "code": code,
        }))),
        None => Err(Error::SessionNotReady(format!(
            "{}, no pairing code available",
            session.status()
        ))),
    }
}

async fn logout_session(
    State(state): State<AppState>,
    Json(req): Json<AccountRequest>,
) -> Result<Json<Value>> {
    let account_id = require_account(&req.account_id)?;
    state.registry.logout(account_id).await?;
    if let Err(err) = state.admin.deactivate(account_id).await {
        warn!(account_id, "could not deactivate chatbot after logout: {err}");
    }
    Ok(Json(json!({"account_id": account_id, "status": "logged_out"})))
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<Value>> {
    let account_id = require_account(&req.account_id)?;
    let receipt = state
        .dispatcher
        .send_text(account_id, &req.to, &req.message)
        .await?;
    Ok(Json(json!({"status": "sent", "receipt": receipt})))
}

async fn send_media(
    State(state): State<AppState>,
    Json(req): Json<SendMediaRequest>,
) -> Result<Json<Value>> {
    let account_id = require_account(&req.account_id)?;
    let receipt = state
        .dispatcher
        .send_media(account_id, &req.to, &req.media_url, &req.caption)
        .await?;
    Ok(Json(json!({"status": "sent", "receipt": receipt})))
}

async fn send_many(
    State(state): State<AppState>,
    Json(req): Json<SendManyRequest>,
) -> Result<Json<BulkSendResponse>> {
    let account_id = require_account(&req.account_id)?;
    require_recipients(&req.recipients)?;
    let results = state
        .dispatcher
        .send_many_for(account_id, &req.recipients, BulkPayload::Text(req.message))
        .await;
    Ok(Json(results.into()))
}

async fn send_many_media(
    State(state): State<AppState>,
    Json(req): Json<SendManyMediaRequest>,
) -> Result<Json<BulkSendResponse>> {
    let account_id = require_account(&req.account_id)?;
    require_recipients(&req.recipients)?;
    let payload = BulkPayload::Media {
        url: req.media_url,
        caption: req.caption,
    };
    let results = state
        .dispatcher
        .send_many_for(account_id, &req.recipients, payload)
        .await;
    Ok(Json(results.into()))
}

async fn save_chatbot(
    State(state): State<AppState>,
    Json(req): Json<SaveChatbotRequest>,
) -> Result<Json<Value>> {
    let config = state
        .admin
        .save_chatbot(
            &req.account_id,
            &req.welcome_message,
            req.media_url,
            req.is_active,
        )
        .await?;
    Ok(Json(json!({"chatbot": config})))
}

async fn get_chatbot(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Value>> {
    let view = state.admin.get_chatbot(&account_id).await?;
    Ok(Json(json!({"chatbot": view})))
}

async fn upsert_option(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(input): Json<OptionInput>,
) -> Result<Json<Value>> {
    let option = state.admin.upsert_option(&account_id, input).await?;
    Ok(Json(json!({"option": option})))
}

async fn delete_option(
    State(state): State<AppState>,
    Path((account_id, key)): Path<(String, String)>,
) -> Result<Json<Value>> {
    state.admin.delete_option(&account_id, &key).await?;
    Ok(Json(json!({"status": "deleted", "key": key})))
}

async fn toggle_chatbot(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<Value>> {
    let config = state.admin.set_active(&account_id, req.is_active).await?;
    Ok(Json(json!({"chatbot": config})))
}

async fn delete_chatbot(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Value>> {
    state.admin.delete_chatbot(&account_id).await?;
    Ok(Json(json!({"status": "deleted"})))
}

async fn connector_event(
    State(state): State<AppState>,
    Json(payload): Json<SidecarEventPayload>,
) -> Result<impl IntoResponse> {
    if !state.hub.deliver(&payload.account_id, payload.event) {
        return Err(Error::SessionNotFound(payload.account_id));
    }
    Ok((StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))))
}
