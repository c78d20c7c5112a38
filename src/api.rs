use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AtelierConfig;
use crate::db::DbHandle;
use crate::errors::{BuildFailure, PipelineError};
use crate::models::SourceFile;
use crate::pipeline::{BuildPipeline, ensure_safe_paths};
use crate::preview::{preview_handler, proxy_base};
use crate::sandbox::SandboxProvider;
use crate::status::StatusHub;
use crate::storage::ObjectStore;

/// Owner applied when a project is created without one.
const DEFAULT_OWNER: &str = "anonymous";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub store: Arc<dyn ObjectStore>,
    pub sandbox: Arc<dyn SandboxProvider>,
    pub status: Arc<StatusHub>,
    pub config: Arc<AtelierConfig>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub owner_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    pub files: Vec<SourceFile>,
    pub request_id: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub success: bool,
    pub url: String,
    pub build_hash: String,
    pub version: i64,
    pub has_issues: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub request_id: String,
    pub all: Option<bool>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// The generated code failed to build; carries the structured failure
    /// so the client can surface diagnostics.
    BuildFailed(BuildFailure),
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(msg) => ApiError::NotFound(msg),
            PipelineError::Build(failure) => ApiError::BuildFailed(failure),
            PipelineError::Infra(e) => ApiError::Internal(format!("{e:#}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({"error": msg}),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": msg}),
            ),
            ApiError::BuildFailed(failure) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({
                    "success": false,
                    "error": {
                        "kind": failure.kind(),
                        "message": failure.to_string(),
                        "diagnostics": failure.diagnostics(),
                    }
                }),
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": msg}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/projects", post(create_project))
        .route("/projects/{id}", get(get_project))
        .route("/projects/{id}/builds", get(list_project_builds))
        .route("/projects/{id}/save", post(save_project))
        .route("/generate/status", get(generate_status))
        .route("/preview/{owner_id}/{project_id}", get(preview_handler))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_project(
    State(state): State<SharedState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Project name is required".to_string()));
    }
    let owner = req
        .owner_id
        .unwrap_or_else(|| DEFAULT_OWNER.to_string());
    let project = state
        .db
        .call(move |db| db.create_project(&owner, &name))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = id.clone();
    let project = state
        .db
        .call(move |db| db.get_project(&lookup))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match project {
        Some(project) => Ok(Json(project)),
        None => Err(ApiError::NotFound(format!("Project {} not found", id))),
    }
}

async fn list_project_builds(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = id.clone();
    let (project, builds) = state
        .db
        .call(move |db| {
            let project = db.get_project(&lookup)?;
            let builds = db.list_builds(&lookup)?;
            Ok((project, builds))
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if project.is_none() {
        return Err(ApiError::NotFound(format!("Project {} not found", id)));
    }
    Ok(Json(builds))
}

async fn save_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<SaveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.files.is_empty() {
        return Err(ApiError::BadRequest("No files provided".to_string()));
    }
    ensure_safe_paths(&req.files).map_err(ApiError::BadRequest)?;

    let lookup = id.clone();
    let project = state
        .db
        .call(move |db| db.get_project(&lookup))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", id)))?;

    // Clients that want progress pass a request id; without one the run is
    // still tracked under a fresh id until the sweeper reclaims it.
    let request_id = req
        .request_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let pipeline = BuildPipeline::new(
        state.db.clone(),
        Arc::clone(&state.store),
        Arc::clone(&state.sandbox),
        Arc::clone(&state.status),
        &state.config,
    );
    let published = pipeline
        .run(&project, req.files, &request_id, req.prompt.as_deref())
        .await?;

    Ok(Json(SaveResponse {
        success: true,
        url: proxy_base(&state.config, &project.owner_id, &project.id),
        build_hash: published.artifact_hash,
        version: published.version,
        has_issues: published.has_issues,
    }))
}

async fn generate_status(
    State(state): State<SharedState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    if query.all.unwrap_or(false) {
        let updates = state.status.history(&query.request_id);
        Json(serde_json::json!({"updates": updates})).into_response()
    } else {
        // `None` serializes to JSON null; an unknown request id is not an
        // error, the client just sees no progress yet.
        Json(state.status.latest(&query.request_id)).into_response()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
