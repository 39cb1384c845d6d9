//! HTTP server for medscan.
//!
//! One session per browser tab; sessions are created on upload and
//! cached for reuse. Every transition is driven by an explicit request
//! from the UI; model calls run synchronously inside the handler.

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::analysis::Analyst;
use crate::config::Config;
use crate::media::{SpoolError, SpooledImage};
use crate::provider::{CompletionProvider, LlmError, OpenAiProvider};
use crate::session::{Phase, SessionManager};

use super::assets;

pub struct Server {
    config: Config,
    provider: Arc<dyn CompletionProvider>,
}

struct AppState {
    config: Config,
    analyst: Analyst,
    sessions: SessionManager,
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        let provider = Arc::new(OpenAiProvider::new(
            &config.api.base_url,
            &config.api.api_key_env,
        ));
        Ok(Self::with_provider(config, provider))
    }

    /// Build a server over any completion provider. Tests use this to
    /// substitute a deterministic stand-in for the live API.
    pub fn with_provider(config: &Config, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            config: config.clone(),
            provider,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            analyst: Analyst::new(self.provider.clone(), self.config.api.clone()),
            sessions: SessionManager::new(),
        });

        // Spawn session cleanup task
        let cleanup_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                cleanup_state.sessions.cleanup_expired().await;
            }
        });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // Multipart overhead on top of the raw image bytes
        let body_limit = self.config.upload.max_file_size_bytes as usize + 64 * 1024;

        let app = Router::new()
            .route("/", get(assets::index))
            .route("/health", get(health_check))
            .route("/api/status", get(status))
            .route("/api/upload", post(upload))
            .route("/api/analyze", post(analyze))
            .route("/api/simplify", post(simplify))
            .route("/api/session", get(session_state))
            .fallback(get(assets::static_file))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(state);

        let addr: SocketAddr =
            format!("{}:{}", self.config.server.bind, self.config.server.port).parse()?;

        info!("Starting HTTP server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

// Error response type
struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

fn llm_error_status(error: &LlmError) -> StatusCode {
    if error.is_rate_limit() {
        return StatusCode::TOO_MANY_REQUESTS;
    }
    match error {
        LlmError::MissingApiKey(_) | LlmError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

// Status endpoint
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    vision_model: String,
    text_model: String,
    active_sessions: usize,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        vision_model: state.config.api.vision_model.clone(),
        text_model: state.config.api.text_model.clone(),
        active_sessions: state.sessions.len().await,
    })
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    session_id: String,
    phase: Phase,
    filename: String,
    size_bytes: u64,
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
    mut multipart: Multipart,
) -> Response {
    let mut session_id = query.session_id;
    let mut image: Option<(Vec<u8>, String)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return AppError(StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };

        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("image") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                match field.bytes().await {
                    Ok(bytes) => image = Some((bytes.to_vec(), filename)),
                    Err(e) => {
                        return AppError(StatusCode::BAD_REQUEST, e.to_string()).into_response()
                    }
                }
            }
            Some("session_id") => {
                if let Ok(text) = field.text().await {
                    if !text.is_empty() {
                        session_id = Some(text);
                    }
                }
            }
            _ => {}
        }
    }

    let Some((bytes, filename)) = image else {
        return AppError(
            StatusCode::BAD_REQUEST,
            "Missing multipart field 'image'".to_string(),
        )
        .into_response();
    };

    let spooled = match SpooledImage::spool(&bytes, &filename, state.config.upload.max_file_size_bytes)
    {
        Ok(spooled) => spooled,
        Err(e @ SpoolError::UnsupportedType(_)) => {
            return AppError(StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string()).into_response()
        }
        Err(e @ SpoolError::TooLarge { .. }) => {
            return AppError(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response()
        }
        Err(e) => {
            return AppError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    };

    let (session_id, session) = state.sessions.get_or_create(session_id).await;
    let mut session = session.lock().await;

    info!(
        session = %session_id,
        filename = %spooled.original_name(),
        bytes = spooled.size_bytes(),
        "image uploaded"
    );

    let filename = spooled.original_name().to_string();
    let size_bytes = spooled.size_bytes();
    session.attach_image(spooled);

    Json(UploadResponse {
        session_id,
        phase: session.phase(),
        filename,
        size_bytes,
    })
    .into_response()
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    session_id: String,
}

#[derive(Serialize)]
struct AnalyzeResponse {
    session_id: String,
    phase: Phase,
    report: String,
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Response {
    let Some(session) = state.sessions.get(&request.session_id).await else {
        return AppError(StatusCode::NOT_FOUND, "Session not found".to_string()).into_response();
    };

    let mut session = session.lock().await;
    let Some(image) = session.begin_analysis() else {
        return AppError(StatusCode::CONFLICT, "No image uploaded".to_string()).into_response();
    };

    // `image` owns the temp file; dropping it below removes the file on
    // both the success and the failure path.
    let result = state
        .analyst
        .analyze(image.path(), image.media_type())
        .await;
    drop(image);

    match result {
        Ok(report) => {
            session.complete_analysis(report.clone());
            Json(AnalyzeResponse {
                session_id: request.session_id,
                phase: session.phase(),
                report,
            })
            .into_response()
        }
        Err(e) => {
            error!(session = %request.session_id, "analysis failed: {}", e);
            session.fail(e.to_string());
            AppError(llm_error_status(&e), e.to_string()).into_response()
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum SimplifyChoice {
    Yes,
    No,
}

#[derive(Deserialize)]
struct SimplifyRequest {
    session_id: String,
    choice: SimplifyChoice,
}

#[derive(Serialize)]
struct SimplifyResponse {
    session_id: String,
    phase: Phase,
    simplified: Option<String>,
}

async fn simplify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SimplifyRequest>,
) -> Response {
    let Some(session) = state.sessions.get(&request.session_id).await else {
        return AppError(StatusCode::NOT_FOUND, "Session not found".to_string()).into_response();
    };

    let mut session = session.lock().await;

    if let SimplifyChoice::No = request.choice {
        // "No" never reaches the provider
        session.decline_simplify();
        return Json(SimplifyResponse {
            session_id: request.session_id,
            phase: session.phase(),
            simplified: None,
        })
        .into_response();
    }

    let Some(report) = session.begin_simplify() else {
        return AppError(StatusCode::CONFLICT, "No report to simplify".to_string()).into_response();
    };

    match state.analyst.simplify(&report).await {
        Ok(simplified) => {
            session.complete_simplify(simplified.clone());
            Json(SimplifyResponse {
                session_id: request.session_id,
                phase: session.phase(),
                simplified: Some(simplified),
            })
            .into_response()
        }
        Err(e) => {
            error!(session = %request.session_id, "simplification failed: {}", e);
            session.fail(e.to_string());
            AppError(llm_error_status(&e), e.to_string()).into_response()
        }
    }
}

#[derive(Serialize)]
struct SessionStateResponse {
    session_id: String,
    phase: Phase,
    report: Option<String>,
    simplified: Option<String>,
    error: Option<String>,
}

async fn session_state(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let Some(id) = query.session_id else {
        return AppError(StatusCode::BAD_REQUEST, "Missing session_id".to_string()).into_response();
    };

    let Some(session) = state.sessions.get(&id).await else {
        return AppError(StatusCode::NOT_FOUND, "Session not found".to_string()).into_response();
    };

    let session = session.lock().await;
    Json(SessionStateResponse {
        session_id: id,
        phase: session.phase(),
        report: session.report().map(str::to_string),
        simplified: session.simplified().map(str::to_string),
        error: session.error().map(str::to_string),
    })
    .into_response()
}
