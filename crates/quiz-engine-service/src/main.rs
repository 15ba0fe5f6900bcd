use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use quiz_engine_api::{
    AddCategoryRequest, AnswerResult, LearnerStats, MigrateResult, NewItem, QuizEngineApi,
    RecordResultsRequest, RecordResultsResult, API_CONTRACT_VERSION,
};
use quiz_engine_core::{
    Category, CategoryId, Item, ItemId, ItemPairSimilarity, LearnerId, RecommendationOutcome,
    StrategyDescriptor, StrategyInput,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Debug, Clone)]
struct ServiceState {
    api: QuizEngineApi,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MigrateRequest {
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemListQuery {
    category_id: Option<CategoryId>,
}

/// Body of a results submission; the learner comes from the path.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResultsRequest {
    results: Vec<AnswerResult>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    answered_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "quiz-engine-service")]
#[command(about = "Local HTTP service for the quiz recommendation engine")]
struct Args {
    #[arg(long, env = "QUIZ_ENGINE_DB", default_value = "./quiz_engine.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "QUIZ_ENGINE_BIND", default_value = "127.0.0.1:3014")]
    bind: SocketAddr,
    /// Fixed RNG seed for reproducible selections.
    #[arg(long, env = "QUIZ_ENGINE_SEED")]
    seed: Option<u64>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(err: &anyhow::Error) -> ServiceError {
        warn!(error = %format!("{err:#}"), "request failed");
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: format!("{err:#}") }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

type ServiceResult<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/db/schema-version", get(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/strategies", get(strategies_list))
        .route("/v1/strategies/:name/run", post(strategy_run))
        .route("/v1/categories", get(categories_list).post(category_add))
        .route("/v1/items", get(items_list).post(item_add))
        .route("/v1/learners/:learner_id/results", post(learner_results))
        .route("/v1/learners/:learner_id/stats", get(learner_stats))
        .route("/v1/similarity/items/:item_a/:item_b", get(similarity_items))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let state = ServiceState { api: QuizEngineApi::new(args.db.clone()).with_seed(args.seed) };
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, db = %args.db.display(), seeded = args.seed.is_some(), "quiz engine service listening");
    axum::serve(listener, app(state)).await.context("service terminated")?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> ServiceResult<quiz_engine_api::SchemaStatus> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> ServiceResult<MigrateResult> {
    let result = state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn strategies_list(State(state): State<ServiceState>) -> Json<ServiceEnvelope<Vec<StrategyDescriptor>>> {
    Json(envelope(state.api.list_strategies()))
}

/// Error outcomes still answer 200; the envelope's `status` carries the result.
async fn strategy_run(
    State(state): State<ServiceState>,
    Path(name): Path<String>,
    Json(input): Json<StrategyInput>,
) -> ServiceResult<RecommendationOutcome> {
    let outcome = state.api.run_strategy(&name, input).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(outcome)))
}

async fn categories_list(State(state): State<ServiceState>) -> ServiceResult<Vec<Category>> {
    let categories = state.api.list_categories().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(categories)))
}

async fn category_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddCategoryRequest>,
) -> ServiceResult<Category> {
    let category = state.api.add_category(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(category)))
}

async fn items_list(
    State(state): State<ServiceState>,
    Query(query): Query<ItemListQuery>,
) -> ServiceResult<Vec<Item>> {
    let items = state.api.list_items(query.category_id).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(items)))
}

async fn item_add(
    State(state): State<ServiceState>,
    Json(request): Json<NewItem>,
) -> ServiceResult<Item> {
    let item = state.api.add_item(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(item)))
}

async fn learner_results(
    State(state): State<ServiceState>,
    Path(learner_id): Path<i64>,
    Json(request): Json<SubmitResultsRequest>,
) -> ServiceResult<RecordResultsResult> {
    let result = state
        .api
        .record_results(RecordResultsRequest {
            learner_id: LearnerId(learner_id),
            results: request.results,
            answered_at: request.answered_at,
        })
        .map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn learner_stats(
    State(state): State<ServiceState>,
    Path(learner_id): Path<i64>,
) -> ServiceResult<LearnerStats> {
    let stats = state.api.learner_stats(LearnerId(learner_id)).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(stats)))
}

async fn similarity_items(
    State(state): State<ServiceState>,
    Path((item_a, item_b)): Path<(i64, i64)>,
) -> ServiceResult<ItemPairSimilarity> {
    let similarity = state
        .api
        .item_similarity(ItemId(item_a), ItemId(item_b))
        .map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(similarity)))
}
