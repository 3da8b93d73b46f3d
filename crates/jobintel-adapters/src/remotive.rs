use async_trait::async_trait;
use jobintel_core::RawPayload;
use jobintel_storage::HttpFetcher;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::text::{non_blank, strip_html};
use crate::{AdapterError, JobSource};

pub const REMOTIVE_ENDPOINT: &str = "https://remotive.com/api/remote-jobs";

#[derive(Debug, Default, Deserialize)]
struct RemotiveResponse {
    #[serde(default)]
    jobs: Vec<RemotiveJob>,
}

#[derive(Debug, Default, Deserialize)]
struct RemotiveJob {
    #[serde(default)]
    id: JsonValue,
    url: Option<String>,
    title: Option<String>,
    company_name: Option<String>,
    candidate_required_location: Option<String>,
    publication_date: Option<String>,
    description: Option<String>,
    tags: Option<Vec<String>>,
    job_type: Option<String>,
    category: Option<String>,
}

/// Remotive's public API; search and limit are applied server-side.
#[derive(Debug, Clone)]
pub struct RemotiveSource {
    http: HttpFetcher,
    endpoint: String,
}

impl RemotiveSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self::with_endpoint(http, REMOTIVE_ENDPOINT)
    }

    pub fn with_endpoint(http: HttpFetcher, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    async fn fetch_listing(&self, search: &str, limit: usize) -> Result<Vec<RawPayload>, AdapterError> {
        let mut query = vec![("limit", limit.to_string())];
        if !search.trim().is_empty() {
            query.push(("search", search.trim().to_string()));
        }
        let response: RemotiveResponse = self.http.fetch_json(&self.endpoint, &query).await?;
        Ok(normalize_response(response, limit))
    }
}

fn external_id(id: &JsonValue) -> Option<String> {
    match id {
        JsonValue::String(s) => non_blank(Some(s.clone())),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn normalize_job(job: RemotiveJob) -> RawPayload {
    let mut extra = serde_json::Map::new();
    if let Some(job_type) = job.job_type {
        extra.insert("job_type".into(), JsonValue::String(job_type));
    }
    if let Some(category) = job.category {
        extra.insert("category".into(), JsonValue::String(category));
    }
    RawPayload {
        source: Some("remotive".into()),
        external_id: external_id(&job.id),
        url: job.url,
        title: job.title,
        company: job.company_name,
        location: job.candidate_required_location,
        posted_at: job.publication_date,
        description: Some(strip_html(job.description.as_deref().unwrap_or_default())),
        tags: job.tags,
        content_hash: None,
        extra,
    }
}

fn normalize_response(response: RemotiveResponse, limit: usize) -> Vec<RawPayload> {
    response
        .jobs
        .into_iter()
        .take(limit)
        .map(normalize_job)
        .collect()
}

#[async_trait]
impl JobSource for RemotiveSource {
    fn name(&self) -> &str {
        "remotive"
    }

    async fn fetch(&self, search: &str, limit: usize) -> Result<Vec<RawPayload>, AdapterError> {
        match self.fetch_listing(search, limit).await {
            Ok(payloads) => Ok(payloads),
            Err(err) => {
                warn!(source = "remotive", error = %err, "fetch failed, returning no jobs");
                Ok(Vec::new())
            }
        }
    }
}
