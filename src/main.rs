use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderName, Method},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

mod config;
mod error;
mod gemini;
mod interpreter;
mod logging;
mod models;
mod prompt;
mod store;


use config::AppConfig;
use error::ApiError;
use gemini::{GeminiClient, TextGenerator};
use interpreter::Interpreter;
use models::{Activity, GenerateRequest, LearningPlan, StatusUpdate, StoredPath};
use store::{PathStore, StoreError};

/// Learning path HTTP API
/// The interpreter never writes state; plans are saved here, after generation
#[derive(Clone)]
struct AppState {
    interpreter: Interpreter,
    store: PathStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logging()?;

    let config = AppConfig::from_env()?;

    let generator: Option<Arc<dyn TextGenerator>> = match &config.api_key {
        Some(key) => Some(Arc::new(GeminiClient::new(key.clone(), &config.gemini)?)),
        None => {
            warn!("GEMINI_API_KEY is not set, generation requests will be rejected");
            None
        }
    };

    let state = AppState {
        interpreter: Interpreter::new(generator, config.strict_upstream),
        store: PathStore::open(&config.database_path)?,
    };

    let app = build_router(state);

    info!(
        model = %config.gemini.model,
        strict_upstream = config.strict_upstream,
        "learning path API listening on http://{}",
        config.bind_addr
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("learning path API shut down");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/generate-learning-path", post(generate_learning_path))
        .route("/children/:child_id/learning-path", get(get_learning_path))
        .route(
            "/children/:child_id/activities/:activity_id",
            patch(update_activity_status),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Permissive CORS on every response, errors included
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ])
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn root() -> &'static str {
    "Learning Path API v0.1.0"
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Generate a learning path for a child
/// Saving the result is best effort and never fails the request
async fn generate_learning_path(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<LearningPlan>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidBody(e.body_text()))?;

    let plan = state.interpreter.plan(&request).await?;

    if let Some(child_id) = request.child_id.as_deref().map(str::trim) {
        let store = state.store.clone();
        let child_id = child_id.to_string();
        let to_save = plan.clone();

        match blocking(move || store.save(&child_id, &to_save)).await {
            Ok(saved) => debug!(path_id = %saved.id, fallback = plan.is_fallback(), "saved learning path"),
            Err(e) => warn!(error = %e, "failed to save learning path"),
        }
    }

    Ok(Json(plan))
}

/// Most recent plan generated for a child
async fn get_learning_path(
    State(state): State<AppState>,
    Path(child_id): Path<String>,
) -> Result<Json<StoredPath>, ApiError> {
    let store = state.store.clone();
    let lookup_id = child_id.clone();

    blocking(move || store.latest(&lookup_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No learning path found for child {child_id}")))
}

/// Mark an activity complete (or not) and optionally attach a memo
async fn update_activity_status(
    State(state): State<AppState>,
    Path((child_id, activity_id)): Path<(String, i64)>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<Activity>, ApiError> {
    let Json(update) = payload.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let store = state.store.clone();

    let activity = blocking(move || store.update_activity_status(&child_id, activity_id, &update))
        .await?;

    Ok(Json(activity))
}

// Helper functions

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}
