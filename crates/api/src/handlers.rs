use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};
use analysis::{AnalysisError, AnalysisOrchestrator};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use extract::AnalysisKind;
use ingest::{FileReader, ManuscriptFormat, UploadType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use store::{AnalysisRun, Manuscript, NewManuscript, PovSegmentRecord, RunStatus, Store, StoreError};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub orchestrator: Arc<AnalysisOrchestrator>,
    pub metrics: Arc<Metrics>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/manuscripts", post(upload_manuscript))
        .route("/manuscripts/:id", get(get_manuscript).delete(delete_manuscript))
        .route("/manuscripts/:id/analyses", post(run_analysis).get(list_analyses))
        .route("/manuscripts/:id/analyses/:analysis_id", delete(delete_analysis))
        .route("/manuscripts/:id/pov-segments", get(list_pov_segments))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
    analysis_id: Option<Uuid>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis_id: Option<Uuid>,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
            analysis_id: None,
        }
    }

    fn manuscript_not_found(id: Uuid) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "manuscript_not_found",
            format!("manuscript {id} not found"),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            message: &self.message,
            analysis_id: self.analysis_id,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "Storage error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
    }
}

/// Missing, malformed or mistyped request bodies.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
    }
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        let message = e.to_string();
        match e {
            AnalysisError::ManuscriptNotFound(id) => Self::manuscript_not_found(id),
            AnalysisError::MissingText(_) => {
                Self::new(StatusCode::BAD_REQUEST, "missing_text", message)
            }
            AnalysisError::AlreadyRunning { .. } => {
                Self::new(StatusCode::CONFLICT, "analysis_in_progress", message)
            }
            AnalysisError::RunFailed { run_id, message } => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: "analysis_failed",
                message,
                analysis_id: Some(run_id),
            },
            AnalysisError::Store(e) => e.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// health & metrics
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: String,
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "ok".to_string(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                database: format!("error: {}", e),
            }),
        ),
    }
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

// ---------------------------------------------------------------------------
// manuscripts
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct UploadRequest {
    path: String,
}

/// A manuscript without its text.
#[derive(Debug, Serialize)]
struct ManuscriptSummary {
    id: Uuid,
    file_name: String,
    file_path: String,
    format: ManuscriptFormat,
    word_count: usize,
    upload_type: UploadType,
    has_text: bool,
    created_at: DateTime<Utc>,
}

impl From<&Manuscript> for ManuscriptSummary {
    fn from(manuscript: &Manuscript) -> Self {
        Self {
            id: manuscript.id,
            file_name: manuscript.file_name.clone(),
            file_path: manuscript.file_path.clone(),
            format: manuscript.format,
            word_count: manuscript.word_count,
            upload_type: manuscript.upload_type,
            has_text: manuscript.analyzable_text().is_some(),
            created_at: manuscript.created_at,
        }
    }
}

async fn upload_manuscript(
    State(state): State<AppState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ManuscriptSummary>), ApiError> {
    let Json(req) = payload?;
    let path = PathBuf::from(&req.path);

    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "file_not_found",
            format!("no file at {}", req.path),
        ));
    }

    let extracted = FileReader::read_manuscript(&path).await.map_err(|e| {
        ApiError::new(StatusCode::BAD_REQUEST, "unreadable_manuscript", format!("{e:#}"))
    })?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| req.path.clone());

    let manuscript = state
        .store
        .insert_manuscript(NewManuscript {
            file_name,
            file_path: req.path,
            format: extracted.format,
            word_count: extracted.word_count,
            upload_type: extracted.upload_type,
            extracted_text: Some(extracted.text),
        })
        .await?;

    state.metrics.record_upload();
    info!(
        manuscript_id = %manuscript.id,
        format = manuscript.format.as_str(),
        words = manuscript.word_count,
        upload_type = manuscript.upload_type.as_str(),
        "Manuscript stored"
    );

    Ok((StatusCode::CREATED, Json(ManuscriptSummary::from(&manuscript))))
}

async fn get_manuscript(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ManuscriptSummary>, ApiError> {
    let manuscript = state
        .store
        .get_manuscript(id)
        .await?
        .ok_or_else(|| ApiError::manuscript_not_found(id))?;
    Ok(Json(ManuscriptSummary::from(&manuscript)))
}

/// Removes the manuscript with its runs and segments. The source file on
/// disk belongs to the caller and is left alone.
async fn delete_manuscript(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete_manuscript(id).await? {
        info!(manuscript_id = %id, "Manuscript deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::manuscript_not_found(id))
    }
}

// ---------------------------------------------------------------------------
// analyses
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RunAnalysisRequest {
    analysis_type: String,
}

#[derive(Serialize)]
struct RunAnalysisResponse {
    analysis_id: Uuid,
    status: RunStatus,
    results: Value,
}

async fn run_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<RunAnalysisRequest>, JsonRejection>,
) -> Result<Json<RunAnalysisResponse>, ApiError> {
    let Json(req) = payload?;
    let kind: AnalysisKind = match req.analysis_type.parse() {
        Ok(kind) => kind,
        Err(e) => {
            state.metrics.record_run_rejected();
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "unknown_analysis_type",
                format!("{e}"),
            ));
        }
    };

    let handle = match state.orchestrator.start(id, kind).await {
        Ok(handle) => handle,
        Err(e) => {
            state.metrics.record_run_rejected();
            return Err(e.into());
        }
    };
    state.metrics.record_run_started();

    let timer = TimedOperation::start();
    match handle.finish().await {
        Ok(outcome) => {
            state.metrics.record_run_completed(timer.elapsed(), &outcome);
            Ok(Json(RunAnalysisResponse {
                analysis_id: outcome.run.id,
                status: outcome.run.status,
                results: outcome.run.results,
            }))
        }
        Err(e) => {
            state.metrics.record_run_failed(timer.elapsed());
            Err(e.into())
        }
    }
}

async fn list_analyses(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AnalysisRun>>, ApiError> {
    Ok(Json(state.orchestrator.list_runs(id).await?))
}

async fn delete_analysis(
    State(state): State<AppState>,
    Path((id, analysis_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    if state.orchestrator.delete_run(id, analysis_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "analysis_not_found",
            format!("no analysis {analysis_id} for manuscript {id}"),
        ))
    }
}

async fn list_pov_segments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PovSegmentRecord>>, ApiError> {
    if state.store.get_manuscript(id).await?.is_none() {
        return Err(ApiError::manuscript_not_found(id));
    }
    Ok(Json(state.store.list_pov_segments(id).await?))
}
