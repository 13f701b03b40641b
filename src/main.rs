mod batch;
mod config;
mod fetch;
mod http;
mod logbook;
mod manifest;
mod metrics;
mod models;
mod page;
mod pipeline;
mod proxy;
mod sheet;
#[cfg(test)]
mod testing;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use batch::{BatchError, BatchRunner, StatusSnapshot};
use config::AppConfig;
use fetch::RetryingFetcher;
use http::{ReqwestTransport, Transport};
use logbook::BoundedLog;
use models::{ApiError, AuctionRecord, ManifestPayload, ProcessResult, ProcessSingleRequest, SheetSettings};
use page::PageParser;
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use proxy::ProxyRotator;
use serde::Deserialize;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "tl.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let transport = Arc::new(ReqwestTransport::new(
        &config.proxy_pool,
        &config.user_agent,
        config.connect_timeout,
    )?);
    let rotator = Arc::new(ProxyRotator::new(config.proxy_pool.clone())?);
    let log = BoundedLog::new(config.log_capacity);

    let pipeline = Arc::new(Pipeline::new(
        RetryingFetcher::proxied(
            transport.clone(),
            rotator.clone(),
            config.upstream_timeout,
            config.retry,
        ),
        PageParser::new(config.site_root.clone()),
        config.manifest_policy,
    ));
    let sheet_fetcher = RetryingFetcher::direct(transport, config.sheet_timeout, config.retry)
        .with_log(log.clone());
    let batch = BatchRunner::new(pipeline.clone(), sheet_fetcher, log.clone(), config.item_delay);

    let state = AppState {
        pipeline,
        batch,
        proxy_count: rotator.len(),
    };
    let app = router(state, config.request_max_bytes);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(
        target = "tl.api",
        proxies = rotator.len(),
        manifest_policy = ?config.manifest_policy,
        "listening on {addr}"
    );
    log.info(format!("Server started with {} proxies", rotator.len()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

struct AppState<T> {
    pipeline: Arc<Pipeline<T>>,
    batch: BatchRunner<T>,
    proxy_count: usize,
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            batch: self.batch.clone(),
            proxy_count: self.proxy_count,
        }
    }
}

fn router<T: Transport>(state: AppState<T>, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let batch = Router::new()
        .route("/start", post(batch_start::<T>))
        .route("/cancel", post(batch_cancel::<T>))
        .route("/status", get(batch_status::<T>));

    Router::new()
        .route("/api/health", get(health::<T>))
        .route("/api/auction", get(get_auction::<T>))
        .route("/api/manifest", get(get_manifest::<T>))
        .route("/api/process", get(get_process::<T>))
        .route("/api/process_single", post(process_single::<T>))
        .route("/api/logs", get(logs::<T>).delete(clear_logs::<T>))
        .nest("/api/batch", batch)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

#[derive(Debug, Deserialize)]
struct UrlQuery {
    #[serde(default)]
    url: String,
}

/// Liveness plus the size of the proxy pool.
///
/// - Method: `GET`
/// - Path: `/api/health`
async fn health<T: Transport>(State(state): State<AppState<T>>) -> Json<Value> {
    crate::metrics::api_request("/api/health");
    Json(json!({
        "status": "ok",
        "proxyCount": state.proxy_count,
    }))
}

/// Parsed auction page.
///
/// - Method: `GET`
/// - Path: `/api/auction?url=<auction page>`
async fn get_auction<T: Transport>(
    State(state): State<AppState<T>>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<AuctionRecord>, AppError> {
    crate::metrics::api_request("/api/auction");
    let record = state.pipeline.fetch_auction(&query.url).await?;
    Ok(Json(record))
}

/// Normalized manifest rows.
///
/// - Method: `GET`
/// - Path: `/api/manifest?url=<manifest file>`
async fn get_manifest<T: Transport>(
    State(state): State<AppState<T>>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<ManifestPayload>, AppError> {
    crate::metrics::api_request("/api/manifest");
    let items = state.pipeline.fetch_manifest(&query.url).await?;
    Ok(Json(ManifestPayload::new(items)))
}

/// Auction page and its manifest in one call.
///
/// - Method: `GET`
/// - Path: `/api/process?url=<auction page>`
async fn get_process<T: Transport>(
    State(state): State<AppState<T>>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<ProcessResult>, AppError> {
    crate::metrics::api_request("/api/process");
    let result = state.pipeline.process_one(&query.url).await?;
    Ok(Json(result))
}

/// Popup entry point: fetches one auction and pushes it to the sheet.
///
/// Failures carry the human-readable message in `error`, since that is the field the
/// popup shows; the failing stage moves to `detail`.
async fn process_single<T: Transport>(
    State(state): State<AppState<T>>,
    Json(request): Json<ProcessSingleRequest>,
) -> Result<Json<ProcessResult>, AppError> {
    crate::metrics::api_request("/api/process_single");
    let result = state
        .batch
        .process_single(request)
        .await
        .map_err(AppError::Popup)?;
    Ok(Json(result))
}

/// Starts a background batch. `started` is false when one is already running.
async fn batch_start<T: Transport>(
    State(state): State<AppState<T>>,
    Json(settings): Json<SheetSettings>,
) -> Result<Json<Value>, AppError> {
    crate::metrics::api_request("/api/batch/start");
    match state.batch.start(settings).await {
        Ok(_run) => Ok(Json(json!({"started": true}))),
        Err(BatchError::AlreadyRunning) => Ok(Json(json!({"started": false}))),
        Err(BatchError::Invalid(err)) => Err(err.into()),
    }
}

async fn batch_cancel<T: Transport>(State(state): State<AppState<T>>) -> Json<Value> {
    crate::metrics::api_request("/api/batch/cancel");
    state.batch.cancel().await;
    Json(json!({"cancelled": true}))
}

async fn batch_status<T: Transport>(State(state): State<AppState<T>>) -> Json<StatusSnapshot> {
    Json(state.batch.status().await)
}

async fn logs<T: Transport>(State(state): State<AppState<T>>) -> Json<Value> {
    Json(json!({"logs": state.batch.logs()}))
}

async fn clear_logs<T: Transport>(State(state): State<AppState<T>>) -> Json<Value> {
    crate::metrics::api_request("/api/logs");
    state.batch.clear_logs();
    Json(json!({"cleared": true}))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    /// Same status mapping, with message and stage swapped for the popup.
    Popup(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err.kind() {
        PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        PipelineErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineErrorKind::Upstream => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => (
                status_for(&err),
                ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                },
            ),
            AppError::Popup(err) => (
                status_for(&err),
                ApiError {
                    error: err.detail().to_string(),
                    detail: Some(err.stage().to_string()),
                },
            ),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
