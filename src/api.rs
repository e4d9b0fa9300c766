use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::error::ChatError;
use crate::export::{export_file_name, ExportFormat};
use crate::models::ChatReport;
use crate::pipeline::{ChatExtractor, REPLAY_SUFFIX};

const MAX_CACHED_REPORTS: usize = 16;
const INDEX_HTML: &str = include_str!("../frontend/index.html");
const ERROR_HINT: &str = "Please make sure you uploaded a valid WOWS replay file.";

struct AppState {
    extractor: ChatExtractor,
    /// Most recent reports, oldest first
    reports: Mutex<VecDeque<ChatReport>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
            hint: None,
        }),
    )
}

fn processing_failed(e: ChatError) -> ApiError {
    tracing::warn!("Replay processing failed: {}", e);
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorBody {
            error: format!("Error processing replay file: {}", e),
            hint: Some(ERROR_HINT.to_string()),
        }),
    )
}

pub fn create_router(extractor: ChatExtractor, max_upload_bytes: usize) -> Router {
    let state = Arc::new(AppState {
        extractor,
        reports: Mutex::new(VecDeque::new()),
    });

    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/replays", post(upload_replay))
        .route("/api/reports/{id}", get(get_report))
        .route("/api/reports/{id}/export/{format}", get(export_report))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn upload_replay(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ChatReport>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(sanitize_file_name)
            .unwrap_or_default();
        let data = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e)))?;
        upload = Some((filename, data.to_vec()));
        break;
    }

    let (filename, data) =
        upload.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No replay file uploaded"))?;
    if !filename.to_ascii_lowercase().ends_with(REPLAY_SUFFIX) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Only {} files are accepted", REPLAY_SUFFIX),
        ));
    }
    tracing::info!("Processing replay file: {} ({} bytes)", filename, data.len());

    let extractor = state.extractor.clone();
    let report = tokio::task::spawn_blocking(move || extractor.extract(&filename, &data))
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Task failed: {}", e),
            )
        })?
        .map_err(processing_failed)?;

    {
        let mut reports = state.reports.lock().await;
        reports.push_back(report.clone());
        while reports.len() > MAX_CACHED_REPORTS {
            reports.pop_front();
        }
    }

    Ok(Json(report))
}

async fn find_report(state: &AppState, id: u64) -> Result<ChatReport, ApiError> {
    state
        .reports
        .lock()
        .await
        .iter()
        .find(|r| r.id == id)
        .cloned()
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Report not found"))
}

async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<ChatReport>, ApiError> {
    find_report(&state, id).await.map(Json)
}

async fn export_report(
    State(state): State<Arc<AppState>>,
    Path((id, format)): Path<(u64, ExportFormat)>,
) -> Result<Response, ApiError> {
    let report = find_report(&state, id).await?;
    let body = format.render(&report.messages).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Export failed: {}", e),
        )
    })?;

    let headers = [
        (header::CONTENT_TYPE, format.mime().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                export_file_name(&report.filename, format)
            ),
        ),
    ];
    Ok((headers, body).into_response())
}

/// Last path component, without quotes or control characters
fn sanitize_file_name(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| *c != '"' && !c.is_control())
        .collect()
}
