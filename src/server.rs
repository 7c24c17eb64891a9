//! HTTP server.
//!
//! Serves the chat relay's JSON API and an OpenAI-compatible completions
//! endpoint for external tools.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/chat` | Send a message, get the assistant reply with sources |
//! | `POST` | `/api/search` | Run a web search directly |
//! | `GET` `DELETE` | `/api/sessions` | List / delete chat sessions |
//! | `GET`  | `/api/messages` | Messages of one session |
//! | `GET` `POST` | `/api/projects` | List / create projects |
//! | `GET` `PUT` `DELETE` | `/api/projects/{id}` | Fetch / update / delete one project |
//! | `GET` `POST` `DELETE` | `/api/projects/{id}/documents` | List / upload / delete documents |
//! | `GET` `POST` `DELETE` | `/api/keys` | List (masked) / issue / revoke API keys |
//! | `POST` | `/v1/chat/completions` | Bearer-key gated passthrough to the model backend |
//!
//! # Error Contract
//!
//! `/api/*` errors:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Message and userId are required" } }
//! ```
//!
//! Request bodies that are not JSON, or lack a required field, are
//! `bad_request` as well.
//!
//! Codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `inference_error` (502), `internal` (500). Internal failures are logged in
//! full and reported as `Internal server error`.
//!
//! `/v1/chat/completions` errors mirror OpenAI's shape:
//!
//! ```json
//! { "error": { "message": "Invalid API key", "type": "invalid_request_error" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::assembler::PromptAssembler;
use crate::chat::{ChatRequest, ChatResponse, ChatService};
use crate::config::Config;
use crate::db;
use crate::error::ChatError;
use crate::inference::InferenceClient;
use crate::ingest::{ingest_document, Upload};
use crate::keys;
use crate::migrate::apply_schema;
use crate::models::{
    ChatMessage, ChatSession, Document, NewProject, Project, ProjectUpdate, SearchResult,
};
use crate::retrieval::ContextRetriever;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::websearch::WebSearchGateway;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub web: Arc<WebSearchGateway>,
    pub inference: Arc<InferenceClient>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    /// Wire the pipeline components around a store.
    pub fn new(config: Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let web = Arc::new(WebSearchGateway::from_config(&config.search)?);
        let inference = Arc::new(InferenceClient::new(&config.inference)?);
        let assembler = PromptAssembler::new(
            store.clone(),
            web.clone(),
            ContextRetriever::from_config(&config.retrieval),
        );
        let chat = Arc::new(ChatService::new(store.clone(), assembler, inference.clone()));

        Ok(Self {
            config: Arc::new(config),
            store,
            web,
            inference,
            chat,
        })
    }

    /// Open the configured database (creating the schema if needed) and wire everything.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        apply_schema(&pool).await?;
        Self::new(config.clone(), Arc::new(SqliteStore::new(pool)))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .route("/api/search", post(handle_search))
        .route(
            "/api/sessions",
            get(handle_list_sessions).delete(handle_delete_session),
        )
        .route("/api/messages", get(handle_messages))
        .route(
            "/api/projects",
            get(handle_list_projects).post(handle_create_project),
        )
        .route(
            "/api/projects/{id}",
            get(handle_get_project)
                .put(handle_update_project)
                .delete(handle_delete_project),
        )
        .route(
            "/api/projects/{id}/documents",
            get(handle_list_documents)
                .post(handle_upload_document)
                .delete(handle_delete_document),
        )
        .route(
            "/api/keys",
            get(handle_list_keys)
                .post(handle_create_key)
                .delete(handle_revoke_key),
        )
        .route("/v1/chat/completions", post(handle_completions))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "ragchat server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error responses ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// `/api/*` error: converts a [`ChatError`] into a status and JSON body.
pub struct AppError(ChatError);

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        AppError(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError(ChatError::Internal(err))
    }
}

fn status_of(err: &ChatError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn log_failure(err: &ChatError) {
    match err {
        ChatError::Internal(e) => tracing::error!(error = ?e, "request failed"),
        ChatError::Inference(e) => tracing::error!(error = %e, "inference request failed"),
        other => tracing::debug!(error = %other, "request rejected"),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        log_failure(&self.0);
        let code = match &self.0 {
            ChatError::Validation(_) => "bad_request",
            ChatError::Unauthorized(_) => "unauthorized",
            ChatError::NotFound(_) => "not_found",
            ChatError::Inference(_) => "inference_error",
            ChatError::Internal(_) => "internal",
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message: self.0.public_message(),
            },
        };
        (status_of(&self.0), Json(body)).into_response()
    }
}

/// `/v1/*` error in OpenAI's `{error: {message, type}}` shape.
pub struct OpenAiError(ChatError);

impl From<ChatError> for OpenAiError {
    fn from(err: ChatError) -> Self {
        OpenAiError(err)
    }
}

impl IntoResponse for OpenAiError {
    fn into_response(self) -> Response {
        log_failure(&self.0);
        let kind = match &self.0 {
            ChatError::Validation(_) | ChatError::Unauthorized(_) => "invalid_request_error",
            _ => "api_error",
        };
        let body = json!({
            "error": {
                "message": self.0.public_message(),
                "type": kind,
            }
        });
        (status_of(&self.0), Json(body)).into_response()
    }
}

/// JSON body extractor whose rejections use the `/api/*` error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError(ChatError::validation(rejection.body_text()))),
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError(ChatError::validation(format!("{} is required", name))))
}

#[derive(Serialize)]
struct Success {
    success: bool,
}

const SUCCESS: Success = Success { success: true };

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/chat ============

async fn handle_chat(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    Ok(Json(state.chat.handle(req).await?))
}

// ============ POST /api/search ============

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
    query: String,
    timestamp: String,
}

async fn handle_search(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = required(&req.query, "query")?.to_string();
    let results = state.web.search(&query).await;
    Ok(Json(SearchResponse {
        results,
        query,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

// ============ /api/sessions, /api/messages ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRef {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn handle_list_sessions(
    State(state): State<AppState>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<ChatSession>>, AppError> {
    let user_id = required(&q.user_id, "userId")?;
    Ok(Json(state.store.list_sessions(user_id).await?))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SessionRef>,
) -> Result<Json<Success>, AppError> {
    let session_id = required(&req.session_id, "sessionId")?;
    let user_id = required(&req.user_id, "userId")?;
    if !state.store.delete_session(session_id, user_id).await? {
        return Err(ChatError::not_found("Session not found").into());
    }
    Ok(Json(SUCCESS))
}

async fn handle_messages(
    State(state): State<AppState>,
    Query(q): Query<SessionRef>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let session_id = required(&q.session_id, "sessionId")?;
    let user_id = required(&q.user_id, "userId")?;
    state
        .store
        .get_session(session_id, user_id)
        .await?
        .ok_or_else(|| ChatError::not_found("Session not found"))?;
    Ok(Json(state.store.session_messages(session_id).await?))
}

// ============ /api/projects ============

async fn handle_list_projects(
    State(state): State<AppState>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<Project>>, AppError> {
    let user_id = required(&q.user_id, "userId")?;
    Ok(Json(state.store.list_projects(user_id).await?))
}

async fn handle_create_project(
    State(state): State<AppState>,
    ApiJson(new): ApiJson<NewProject>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    if new.user_id.trim().is_empty() || new.name.trim().is_empty() {
        return Err(ChatError::validation("userId and name are required").into());
    }
    let project = state.store.create_project(&new).await?;
    tracing::info!(project_id = %project.id, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn handle_get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Project>, AppError> {
    let user_id = required(&q.user_id, "userId")?;
    let project = state
        .store
        .get_project(&id, user_id)
        .await?
        .ok_or_else(|| ChatError::not_found("Project not found"))?;
    Ok(Json(project))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProjectRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
}

async fn handle_update_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateProjectRequest>,
) -> Result<Json<Project>, AppError> {
    let user_id = required(&req.user_id, "userId")?;
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ChatError::validation("name must not be empty").into());
    }
    let changes = ProjectUpdate {
        name: req.name.map(|n| n.trim().to_string()),
        icon: req.icon,
        description: req.description,
        system_prompt: req.system_prompt,
    };
    let project = state
        .store
        .update_project(&id, user_id, &changes)
        .await?
        .ok_or_else(|| ChatError::not_found("Project not found"))?;
    tracing::info!(project_id = %project.id, "project updated");
    Ok(Json(project))
}

async fn handle_delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Success>, AppError> {
    let user_id = required(&q.user_id, "userId")?;
    if !state.store.delete_project(&id, user_id).await? {
        return Err(ChatError::not_found("Project not found").into());
    }
    Ok(Json(SUCCESS))
}

// ============ /api/projects/{id}/documents ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    content_base64: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRef {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    document_id: Option<String>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<Document>>, AppError> {
    let user_id = required(&q.user_id, "userId")?;
    Ok(Json(
        state.store.project_documents(&project_id, user_id).await?,
    ))
}

async fn handle_upload_document(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    ApiJson(req): ApiJson<UploadRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let user_id = required(&req.user_id, "userId")?.to_string();
    let filename = required(&req.filename, "filename")?.to_string();
    let encoded = required(&req.content_base64, "contentBase64")?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| ChatError::validation(format!("contentBase64 is not valid base64: {}", e)))?;

    let doc = ingest_document(
        state.store.as_ref(),
        state.config.chunking.chunk_chars,
        Upload {
            user_id,
            project_id,
            filename,
            bytes,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(q): Query<DocumentRef>,
) -> Result<Json<Success>, AppError> {
    let user_id = required(&q.user_id, "userId")?;
    let document_id = required(&q.document_id, "documentId")?;
    if !state
        .store
        .delete_document(document_id, &project_id, user_id)
        .await?
    {
        return Err(ChatError::not_found("Document not found").into());
    }
    Ok(Json(SUCCESS))
}

// ============ /api/keys ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyRef {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    key_id: Option<String>,
}

async fn handle_list_keys(
    State(state): State<AppState>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<keys::MaskedKey>>, AppError> {
    let user_id = required(&q.user_id, "userId")?;
    Ok(Json(keys::list_keys(state.store.as_ref(), user_id).await?))
}

async fn handle_create_key(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateKeyRequest>,
) -> Result<(StatusCode, Json<keys::IssuedKey>), AppError> {
    let user_id = required(&req.user_id, "userId")?;
    let name = required(&req.name, "name")?;
    let issued = keys::issue_key(state.store.as_ref(), user_id, name).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn handle_revoke_key(
    State(state): State<AppState>,
    Query(q): Query<KeyRef>,
) -> Result<Json<Success>, AppError> {
    let user_id = required(&q.user_id, "userId")?;
    let key_id = required(&q.key_id, "keyId")?;
    keys::revoke_key(state.store.as_ref(), key_id, user_id).await?;
    Ok(Json(SUCCESS))
}

// ============ POST /v1/chat/completions ============

/// Fill generation defaults the caller left out and force a non-streaming reply.
pub fn prepare_passthrough(
    mut body: Value,
    default_model: &str,
    temperature: f32,
    max_tokens: u32,
) -> Result<Value, ChatError> {
    let obj = body
        .as_object_mut()
        .ok_or_else(|| ChatError::validation("Request body must be a JSON object"))?;
    if !obj.get("messages").map(Value::is_array).unwrap_or(false) {
        return Err(ChatError::validation("messages must be an array"));
    }
    obj.entry("model").or_insert_with(|| json!(default_model));
    obj.entry("temperature").or_insert_with(|| json!(temperature));
    obj.entry("max_tokens").or_insert_with(|| json!(max_tokens));
    obj.insert("stream".to_string(), Value::Bool(false));
    Ok(body)
}

async fn handle_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: Bytes,
) -> Result<Json<Value>, OpenAiError> {
    let auth = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let key = keys::authenticate(state.store.as_ref(), auth).await?;

    let body: Value = serde_json::from_slice(&raw)
        .map_err(|e| ChatError::validation(format!("Invalid JSON body: {}", e)))?;
    let body = prepare_passthrough(
        body,
        state.inference.default_model(),
        state.inference.temperature(),
        state.inference.max_tokens(),
    )?;

    tracing::info!(key_id = %key.id, user_id = %key.user_id, "forwarding completion request");
    let reply = state
        .inference
        .forward(&body)
        .await
        .map_err(ChatError::from)?;
    Ok(Json(reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_fills_defaults() {
        let body = prepare_passthrough(
            json!({"messages": [{"role": "user", "content": "hi"}], "stream": true}),
            "local-model",
            0.7,
            2000,
        )
        .unwrap();
        assert_eq!(body["model"], "local-model");
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["stream"], false);
        assert!(body["temperature"].as_f64().unwrap() > 0.69);
    }

    #[test]
    fn test_passthrough_keeps_caller_values() {
        let body = prepare_passthrough(
            json!({"messages": [], "model": "qwen", "temperature": 0.1, "max_tokens": 5}),
            "local-model",
            0.7,
            2000,
        )
        .unwrap();
        assert_eq!(body["model"], "qwen");
        assert_eq!(body["max_tokens"], 5);
        assert_eq!(body["temperature"], 0.1);
    }

    #[test]
    fn test_passthrough_requires_message_array() {
        for bad in [json!({"messages": "hi"}), json!({}), json!([1, 2])] {
            let err = prepare_passthrough(bad, "m", 0.7, 10).unwrap_err();
            assert_eq!(err.status_code(), 400);
        }
    }
}
