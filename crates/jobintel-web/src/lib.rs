//! JSON API behind the JobIntel dashboard.
//!
//! Every response is wrapped in `{ "data": ..., "error": ... }`. When an analytics
//! query fails the handler still answers with an empty value of the expected shape
//! in `data`, so the dashboard can render an error state instead of stale numbers.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use jobintel_adapters::{RegistryError, SourceRegistry};
use jobintel_analytics::{
    get_kpis, get_skill_trends, get_top_skills, get_top_skills_by_source, AnalyticsFilter, Kpis,
    SkillTrends,
};
use jobintel_core::{Environment, Granularity};
use jobintel_storage::{redact_database_url, Database, HttpFetcher};
use jobintel_sync::{IngestPipeline, SyncConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::net::TcpListener;
use tracing::{error, info};

const DEFAULT_TOP_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 200;
const DEFAULT_RUNS_LIMIT: i64 = 20;
const DEFAULT_TREND_SKILLS: i64 = 5;
const DEFAULT_INGEST_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: IngestPipeline,
    /// Environment that manual ingests are tagged with unless the request names one.
    pub environment: Environment,
}

impl AppState {
    pub fn new(pipeline: IngestPipeline, environment: Environment) -> Self {
        Self {
            pipeline,
            environment,
        }
    }

    fn db(&self) -> &Database {
        self.pipeline.database()
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DashboardQuery {
    source: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    search: Option<String>,
    environment: Option<String>,
    limit: Option<String>,
    skills: Option<String>,
    granularity: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl DashboardQuery {
    fn date(name: &str, value: &Option<String>) -> Result<Option<NaiveDate>, String> {
        present(value)
            .map(|v| {
                NaiveDate::parse_from_str(v, "%Y-%m-%d")
                    .map_err(|_| format!("{name} must be YYYY-MM-DD, got {v:?}"))
            })
            .transpose()
    }

    fn environment(&self) -> Result<Option<Environment>, String> {
        present(&self.environment)
            .map(|v| v.parse().map_err(|err: jobintel_core::InvalidEnvironment| err.to_string()))
            .transpose()
    }

    fn filter(&self) -> Result<AnalyticsFilter, String> {
        Ok(AnalyticsFilter {
            source: present(&self.source).map(str::to_string),
            date_from: Self::date("date_from", &self.date_from)?,
            date_to: Self::date("date_to", &self.date_to)?,
            search: present(&self.search).map(str::to_string),
            environment: self.environment()?.unwrap_or(Environment::Production),
        })
    }

    fn limit(&self, default: i64) -> Result<i64, String> {
        match present(&self.limit) {
            None => Ok(default),
            Some(v) => v
                .parse::<i64>()
                .map(|n| n.clamp(1, MAX_LIMIT))
                .map_err(|_| format!("limit must be a number, got {v:?}")),
        }
    }

    fn skills(&self) -> Vec<String> {
        present(&self.skills)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn granularity(&self) -> Result<Option<Granularity>, String> {
        present(&self.granularity)
            .map(|v| v.parse().map_err(|err: jobintel_core::InvalidGranularity| err.to_string()))
            .transpose()
    }
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    source: String,
    #[serde(default)]
    search: String,
    limit: Option<usize>,
    environment: Option<Environment>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/sources", get(sources_handler))
        .route("/api/kpis", get(kpis_handler))
        .route("/api/skills/top", get(top_skills_handler))
        .route("/api/skills/by-source", get(skills_by_source_handler))
        .route("/api/skills/trends", get(skill_trends_handler))
        .route("/api/runs", get(runs_handler))
        .route("/api/ingest", post(ingest_handler))
        .with_state(Arc::new(state))
}

/// Connect, migrate and serve the API on `config.web_port` until the process stops.
pub async fn serve_from_config(config: &SyncConfig) -> anyhow::Result<()> {
    let db = Database::connect_and_migrate(&config.database_url).await?;
    let http = HttpFetcher::new(config.http_client_config())?;
    let registry = Arc::new(SourceRegistry::with_builtin_sources(http));
    let state = AppState::new(IngestPipeline::new(db, registry), config.environment);

    let listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("binding port {}", config.web_port))?;
    info!(
        port = config.web_port,
        database = %redact_database_url(&config.database_url),
        environment = %config.environment,
        "serving dashboard api"
    );
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope { data, error: None }).into_response()
}

fn failed<T: Serialize>(status: StatusCode, data: T, message: String) -> Response {
    (
        status,
        Json(Envelope {
            data,
            error: Some(message),
        }),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    failed(StatusCode::BAD_REQUEST, JsonValue::Null, message)
}

fn respond<T: Serialize>(result: anyhow::Result<T>, fallback: T) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(err) => {
            let message = format!("{err:#}");
            error!(error = %message, "analytics query failed");
            failed(StatusCode::INTERNAL_SERVER_ERROR, fallback, message)
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    ok(serde_json::json!({
        "status": "ok",
        "environment": state.environment,
        "database": state.db().dialect().as_str(),
    }))
}

async fn sources_handler(State(state): State<Arc<AppState>>) -> Response {
    ok(state.pipeline.registry().list())
}

async fn kpis_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let filter = match query.filter() {
        Ok(filter) => filter,
        Err(message) => return bad_request(message),
    };
    respond(get_kpis(state.db(), &filter).await, Kpis::default())
}

async fn top_skills_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let (filter, limit) = match query.filter().and_then(|f| Ok((f, query.limit(DEFAULT_TOP_LIMIT)?))) {
        Ok(scope) => scope,
        Err(message) => return bad_request(message),
    };
    respond(get_top_skills(state.db(), &filter, limit).await, Vec::new())
}

async fn skills_by_source_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let (filter, limit) = match query.filter().and_then(|f| Ok((f, query.limit(DEFAULT_TOP_LIMIT)?))) {
        Ok(scope) => scope,
        Err(message) => return bad_request(message),
    };
    respond(
        get_top_skills_by_source(state.db(), &filter, limit).await,
        Default::default(),
    )
}

/// Without `skills` the currently top-ranked skills in scope are charted.
async fn skill_trends_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let (filter, granularity) = match query.filter().and_then(|f| Ok((f, query.granularity()?))) {
        Ok(scope) => scope,
        Err(message) => return bad_request(message),
    };
    let fallback = SkillTrends {
        granularity: granularity.unwrap_or_else(|| {
            Granularity::auto(filter.date_from, filter.date_to, Utc::now().date_naive())
        }),
        points: Vec::new(),
    };

    let result: anyhow::Result<SkillTrends> = async {
        let mut skills = query.skills();
        if skills.is_empty() {
            skills = get_top_skills(state.db(), &filter, DEFAULT_TREND_SKILLS)
                .await?
                .into_iter()
                .map(|s| s.skill)
                .collect();
        }
        get_skill_trends(state.db(), &skills, &filter, granularity).await
    }
    .await;
    respond(result, fallback)
}

async fn runs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let (environment, limit) = match query
        .environment()
        .and_then(|env| Ok((env, query.limit(DEFAULT_RUNS_LIMIT)?)))
    {
        Ok(scope) => scope,
        Err(message) => return bad_request(message),
    };
    respond(
        state.pipeline.list_recent_runs(limit, environment).await,
        Vec::new(),
    )
}

async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Response {
    let environment = request.environment.unwrap_or(state.environment);
    let limit = request.limit.unwrap_or(DEFAULT_INGEST_LIMIT);
    match state
        .pipeline
        .run_ingest(&request.source, &request.search, limit, environment)
        .await
    {
        Ok(result) => ok(result),
        Err(err) => {
            let status = match err.downcast_ref::<RegistryError>() {
                Some(RegistryError::UnknownSource(_)) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            failed(status, JsonValue::Null, format!("{err:#}"))
        }
    }
}

#[cfg(test)]
mod tests;
