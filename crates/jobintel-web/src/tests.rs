use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use http_body_util::BodyExt;
use jobintel_adapters::{AdapterError, JobSource};
use jobintel_core::RawPayload;
use jobintel_storage::testing::memory_db;
use serde_json::json;
use tower::ServiceExt;

use super::*;

struct StaticSource;

#[async_trait]
impl JobSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _search: &str, limit: usize) -> Result<Vec<RawPayload>, AdapterError> {
        Ok(vec![RawPayload {
            description: Some("Go and Docker".into()),
            ..RawPayload::new("static", "https://jobs.test/static-1", "Platform Engineer")
        }]
        .into_iter()
        .take(limit)
        .collect())
    }
}

fn listing(source: &str, n: u32, description: &str) -> RawPayload {
    RawPayload {
        company: Some(format!("Company {n}")),
        location: Some("Remote".into()),
        posted_at: Some("2026-10-01".into()),
        description: Some(description.into()),
        ..RawPayload::new(source, &format!("https://jobs.test/{source}/{n}"), &format!("Role {n}"))
    }
}

async fn state() -> AppState {
    let db = memory_db().await;
    let mut registry = SourceRegistry::new();
    registry.register(Arc::new(StaticSource));
    let pipeline = IngestPipeline::new(db, Arc::new(registry));

    pipeline
        .run_etl_from_payloads(
            &[
                listing("remotive", 1, "Python, SQL and AWS"),
                listing("remotive", 2, "Python with pandas"),
                listing("remoteok", 3, "Python and Docker"),
            ],
            Environment::Production,
        )
        .await
        .unwrap();
    pipeline
        .run_etl_from_payloads(&[listing("sample", 9, "Terraform")], Environment::Test)
        .await
        .unwrap();
    AppState::new(pipeline, Environment::Test)
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app.oneshot(request).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    call(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn health_reports_ok() {
    let (status, body) = get_json(app(state().await), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["database"], "sqlite");
    assert!(body["error"].is_null());
}

#[tokio::test]
async fn sources_lists_registered_names() {
    let (_, body) = get_json(app(state().await), "/api/sources").await;
    assert_eq!(body["data"], json!(["static"]));
}

#[tokio::test]
async fn top_skills_default_to_production() {
    let app = app(state().await);

    let (status, body) = get_json(app.clone(), "/api/skills/top?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!([{"skill": "python", "count": 3}, {"skill": "aws", "count": 1}])
    );

    let (_, body) = get_json(app, "/api/skills/top?environment=test").await;
    assert_eq!(body["data"], json!([{"skill": "terraform", "count": 1}]));
}

#[tokio::test]
async fn kpis_and_by_source_respect_filters() {
    let app = app(state().await);

    let (_, body) = get_json(app.clone(), "/api/kpis?source=remotive").await;
    assert_eq!(body["data"]["total_jobs"], 2);
    assert_eq!(body["data"]["unique_companies"], 2);

    let (_, body) = get_json(app, "/api/skills/by-source?limit=1").await;
    assert_eq!(body["data"]["remoteok"], json!([{"skill": "docker", "count": 1}]));
    assert_eq!(body["data"]["remotive"], json!([{"skill": "python", "count": 2}]));
}

#[tokio::test]
async fn trends_fall_back_to_top_skills() {
    let (status, body) = get_json(app(state().await), "/api/skills/trends?granularity=day").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["granularity"], "day");
    let skills: Vec<&str> = body["data"]["points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["skill"].as_str().unwrap())
        .collect();
    assert!(skills.contains(&"python"));
    assert!(!skills.contains(&"terraform"));
}

#[tokio::test]
async fn bad_parameters_are_rejected() {
    let app = app(state().await);
    for uri in [
        "/api/kpis?date_from=01-10-2026",
        "/api/skills/top?environment=staging",
        "/api/skills/top?limit=ten",
        "/api/skills/trends?granularity=month",
    ] {
        let (status, body) = get_json(app.clone(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["data"].is_null());
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn analytics_failure_returns_empty_fallback() {
    let state = state().await;
    state.db().close().await;
    let app = app(state);

    let (status, body) = get_json(app.clone(), "/api/skills/top").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["data"], json!([]));
    assert!(body["error"].is_string());

    let (status, body) = get_json(app, "/api/kpis").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["data"]["total_jobs"], 0);
}

fn post_ingest(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ingest")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn ingest_runs_pipeline_and_shows_in_history() {
    let app = app(state().await);

    let (status, body) = call(app.clone(), post_ingest(json!({"source": "static"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["inserted_jobs"], 1);
    assert_eq!(body["data"]["inserted_skills"], 1);

    let (_, body) = get_json(app, "/api/runs?environment=test").await;
    let runs = body["data"].as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], "success");
    assert_eq!(runs[0]["source"], "static");
}

#[tokio::test]
async fn ingest_of_unknown_source_is_a_bad_request() {
    let app = app(state().await);
    let (status, body) = call(app.clone(), post_ingest(json!({"source": "nowhere"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("nowhere"));

    let (_, body) = get_json(app, "/api/runs").await;
    assert_eq!(body["data"][0]["status"], "failed");
}

#[tokio::test]
async fn single_payload_flows_through_to_top_skills() {
    let db = memory_db().await;
    let payload: RawPayload = serde_json::from_value(json!({
        "source": "remotive",
        "url": "https://x/1",
        "title": "Data Engineer",
        "description": "Uses Python and AWS",
    }))
    .unwrap();

    assert!(db.upsert_raw(&payload, Environment::Production).await.unwrap());
    assert_eq!(jobintel_sync::transform_pending(&db).await.unwrap(), 1);
    let extractor = jobintel_sync::SkillExtractor::default();
    assert_eq!(extractor.extract_for_all_jobs(&db).await.unwrap(), 2);

    let top = get_top_skills(&db, &AnalyticsFilter::default(), 10).await.unwrap();
    assert_eq!(
        top,
        vec![
            jobintel_analytics::SkillCount::new("aws", 1),
            jobintel_analytics::SkillCount::new("python", 1),
        ]
    );

    let test_scope = AnalyticsFilter::for_environment(Environment::Test);
    assert!(get_top_skills(&db, &test_scope, 10).await.unwrap().is_empty());
}
