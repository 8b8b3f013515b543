// Forecast scoring service: resolves questions, persists scores, serves track records
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use forecast_engine::config::Config;
use forecast_engine::database;
use forecast_engine::error::ScoringError;
use forecast_engine::scoring_api::{self, ResolveRequest};

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    config: Arc<Config>,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Debug, Deserialize)]
struct AtQuery {
    at: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,forecast_engine=debug")),
        )
        .init();

    info!("🦀 Starting Forecast Scoring Engine...");

    let config = Config::from_env();
    config.log_config();

    // Connect to PostgreSQL database
    let pool = database::create_pool(&config.server.database_url).await?;
    database::setup_schema(&pool).await?;

    let addr: SocketAddr = config.server.bind_addr.parse()?;
    let state = AppState {
        pool,
        config: Arc::new(config),
    };

    // Create our web application routes with shared state
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/questions/:question_id/resolve", post(resolve_question))
        .route("/questions/:question_id/scores", get(get_question_scores))
        .route("/questions/:question_id/community", get(get_community_forecast))
        .route("/users/:user_id/track-record", get(get_track_record))
        .route("/leaderboard", get(get_leaderboard))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("🚀 Server running on http://{}", addr);
    info!("📊 Available endpoints:");
    info!("  GET  /health - Health check");
    info!("  POST /questions/:question_id/resolve - Resolve and score a question");
    info!("  GET  /questions/:question_id/scores - Scores for a resolved question");
    info!("  GET  /questions/:question_id/community - Community forecast");
    info!("  GET  /users/:user_id/track-record - Recent and all-time scores");
    info!("  GET  /leaderboard - Top forecasters by relative score");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Map service errors to HTTP responses
fn error_response(e: anyhow::Error) -> (StatusCode, Json<Value>) {
    if let Some(scoring_error) = e.downcast_ref::<ScoringError>() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": scoring_error.to_string()})),
        );
    }

    let message = e.to_string();
    if message.contains("not found") {
        return (StatusCode::NOT_FOUND, Json(json!({"error": message})));
    }

    error!("Request failed: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "forecast-engine"
    }))
}

async fn resolve_question(
    State(state): State<AppState>,
    Path(question_id): Path<i32>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult {
    let result = scoring_api::resolve_question(
        &state.pool,
        &state.config.scoring,
        question_id,
        request.resolution,
        Utc::now(),
    )
    .await
    .map_err(error_response)?;

    Ok(Json(json!(result)))
}

async fn get_question_scores(
    State(state): State<AppState>,
    Path(question_id): Path<i32>,
) -> ApiResult {
    let scores = scoring_api::question_scores(&state.pool, question_id)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "question_id": question_id,
        "scores": scores
    })))
}

async fn get_community_forecast(
    State(state): State<AppState>,
    Path(question_id): Path<i32>,
    Query(query): Query<AtQuery>,
) -> ApiResult {
    let at = query.at.unwrap_or_else(Utc::now);
    let view = scoring_api::community_view(&state.pool, &state.config.scoring, question_id, at)
        .await
        .map_err(error_response)?;

    Ok(Json(json!(view)))
}

async fn get_track_record(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> ApiResult {
    match scoring_api::track_record(&state.pool, &state.config.scoring, user_id, Utc::now()).await {
        Ok(Some(record)) => Ok(Json(json!(record))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "User not found"})),
        )),
        Err(e) => Err(error_response(e)),
    }
}

async fn get_leaderboard(State(state): State<AppState>) -> ApiResult {
    let entries = scoring_api::leaderboard(&state.pool, &state.config.scoring)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "leaderboard": entries
    })))
}
