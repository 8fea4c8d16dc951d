use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::task;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ragkit_core::{
    export, list_projects, read_workbook, run_batch, FatalBatchError, LlmScorer, Scorer,
    SearchEngine, SearchMethod, SearchRequest, XLSX_MIME,
};
use ragkit_search::AppConfig;

const DEFAULT_REPORT_NAME: &str = "results.xlsx";

type AppState = Arc<AppConfig>;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = AppConfig::from_env()?;
    let default = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let addr: SocketAddr = config.bind_addr.parse()?;
    let app = router(Arc::new(config));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/projects", get(handle_projects))
        .route("/query", post(handle_query))
        .route("/batch", post(handle_batch).layer(upload_limit))
        .with_state(state)
}

async fn handle_projects(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    let projects = list_projects(&state.projects_root).map_err(AppError::internal)?;
    Ok(Json(projects))
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    project: String,
    query: String,
    method: Option<String>,
    community_level: Option<u32>,
    response_type: Option<String>,
    #[serde(default)]
    dynamic_community_selection: bool,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    response: String,
    context_data: Value,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, AppError> {
    let response = task::spawn_blocking(move || execute_query(&state, body))
        .await
        .map_err(AppError::internal)??;
    Ok(Json(response))
}

fn execute_query(config: &AppConfig, body: QueryBody) -> Result<QueryResponse, AppError> {
    let method = match body.method.as_deref() {
        Some(name) => SearchMethod::from_str(name)
            .ok_or_else(|| AppError::bad_request(format!("unknown search method {name}")))?,
        None => SearchMethod::Local,
    };
    let settings = config
        .batch_settings(&body.project)
        .map_err(AppError::bad_request)?;
    if body.query.trim().is_empty() {
        return Err(AppError::bad_request("query must not be empty"));
    }
    let response_type = body.response_type.unwrap_or(settings.response_type);
    let request = SearchRequest {
        method,
        root_dir: &settings.project_root,
        query: &body.query,
        community_level: body.community_level.unwrap_or(settings.community_level),
        response_type: &response_type,
        dynamic_community_selection: body.dynamic_community_selection,
    };
    let engine = config.search_engine().map_err(AppError::internal)?;
    let result = engine.search(&request).map_err(AppError::internal)?;
    Ok(QueryResponse {
        response: result.response,
        context_data: result.context_data,
    })
}

#[derive(Debug, Deserialize)]
struct BatchParams {
    project: String,
    community_level: Option<u32>,
    response_type: Option<String>,
    #[serde(default)]
    score: bool,
}

async fn handle_batch(
    State(state): State<AppState>,
    Query(params): Query<BatchParams>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let upload = extract_file(&mut multipart).await?;
    let filename = upload
        .filename
        .clone()
        .unwrap_or_else(|| DEFAULT_REPORT_NAME.to_string());
    let bytes = task::spawn_blocking(move || execute_batch(&state, &upload.data, params))
        .await
        .map_err(AppError::internal)??;
    let disposition = HeaderValue::from_str(&attachment(&filename)).map_err(AppError::internal)?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(XLSX_MIME)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn execute_batch(config: &AppConfig, data: &[u8], params: BatchParams) -> Result<Vec<u8>, AppError> {
    let mut settings = config
        .batch_settings(&params.project)
        .map_err(AppError::bad_request)?;
    if let Some(level) = params.community_level {
        settings.community_level = level;
    }
    if let Some(response_type) = params.response_type {
        settings.response_type = response_type;
    }
    settings.score = params.score;
    let sheets = read_workbook(data).map_err(AppError::bad_request)?;
    let engine = config.search_engine().map_err(AppError::internal)?;
    let cache = config.cache();
    let scorer: Option<LlmScorer> = if settings.score {
        Some(config.scorer().map_err(AppError::internal)?)
    } else {
        None
    };
    info!(
        project = %settings.project,
        sheets = sheets.len(),
        rows = sheets.total_rows(),
        "batch upload"
    );
    let outcome = run_batch(
        sheets,
        &settings,
        engine.as_ref(),
        &cache,
        scorer.as_ref().map(|s| s as &dyn Scorer),
    )?;
    for warning in &outcome.warnings {
        warn!("{warning}");
    }
    export(&outcome.sheets).map_err(AppError::internal)
}

/// `attachment; filename="..."` with characters that would break the header
/// replaced.
fn attachment(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' | '\r' | '\n' => '_',
            ch if ch.is_ascii() && !ch.is_ascii_control() => ch,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

struct UploadedFile {
    data: Vec<u8>,
    filename: Option<String>,
}

async fn extract_file(multipart: &mut Multipart) -> Result<UploadedFile, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(AppError::bad_request)?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().map(|s| s.to_string());
            let data = field.bytes().await.map_err(AppError::bad_request)?;
            return Ok(UploadedFile {
                data: data.to_vec(),
                filename,
            });
        }
    }
    Err(AppError::bad_request("missing file"))
}

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Batch(#[from] FatalBatchError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Batch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::BadRequest(msg) => (status, msg).into_response(),
            AppError::Batch(err) => {
                warn!("batch_error" = %err);
                (status, err.to_string()).into_response()
            }
            AppError::Internal(err) => {
                error!("internal_error" = %err);
                (status, "internal error").into_response()
            }
        }
    }
}
