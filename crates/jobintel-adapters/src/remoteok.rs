use async_trait::async_trait;
use jobintel_core::RawPayload;
use jobintel_storage::{compute_content_hash, HttpFetcher};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::text::{epoch_to_rfc3339, non_blank};
use crate::{matches_search, AdapterError, JobSource};

pub const REMOTEOK_ENDPOINT: &str = "https://remoteok.com/api";

#[derive(Debug, Default, Deserialize)]
struct RemoteOkJob {
    #[serde(default)]
    id: JsonValue,
    url: Option<String>,
    position: Option<String>,
    title: Option<String>,
    company: Option<String>,
    location: Option<String>,
    description: Option<String>,
    date: Option<String>,
    epoch: Option<i64>,
    #[serde(default)]
    tags: Vec<String>,
}

/// RemoteOK's feed. One unfiltered request; search runs client-side.
///
/// The endpoint rejects clients without a User-Agent, which [`HttpFetcher`] always sends.
#[derive(Debug, Clone)]
pub struct RemoteOkSource {
    http: HttpFetcher,
    endpoint: String,
}

impl RemoteOkSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self::with_endpoint(http, REMOTEOK_ENDPOINT)
    }

    pub fn with_endpoint(http: HttpFetcher, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    async fn fetch_listing(&self, search: &str, limit: usize) -> Result<Vec<RawPayload>, AdapterError> {
        let body: JsonValue = self.http.fetch_json(&self.endpoint, &[]).await?;
        let JsonValue::Array(items) = body else {
            return Err(AdapterError::Message("expected a JSON array".into()));
        };
        Ok(normalize_feed(items, search, limit))
    }
}

fn id_text(id: &JsonValue) -> String {
    match id {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn normalize_job(job: RemoteOkJob) -> RawPayload {
    let external_id = id_text(&job.id);
    let url = non_blank(job.url)
        .unwrap_or_else(|| format!("https://remoteok.com/remote-jobs/{external_id}"));
    let posted_at = non_blank(job.date).or_else(|| job.epoch.and_then(epoch_to_rfc3339));

    let mut payload = RawPayload {
        source: Some("remoteok".into()),
        external_id: Some(external_id),
        url: Some(url),
        title: Some(job.position.or(job.title).unwrap_or_default()),
        company: Some(job.company.unwrap_or_default()),
        location: non_blank(job.location).or_else(|| Some("Remote".into())),
        description: Some(job.description.unwrap_or_default()),
        posted_at,
        tags: Some(job.tags),
        ..Default::default()
    };
    payload.content_hash = Some(compute_content_hash(&payload));
    payload
}

/// The first element of the feed is a legal notice, not a job.
fn normalize_feed(items: Vec<JsonValue>, search: &str, limit: usize) -> Vec<RawPayload> {
    items
        .into_iter()
        .skip(1)
        .filter_map(|item| match serde_json::from_value::<RemoteOkJob>(item) {
            Ok(job) => Some(job),
            Err(err) => {
                debug!(error = %err, "skipping malformed remoteok entry");
                None
            }
        })
        .map(normalize_job)
        .filter(|payload| matches_search(search, payload))
        .take(limit)
        .collect()
}

#[async_trait]
impl JobSource for RemoteOkSource {
    fn name(&self) -> &str {
        "remoteok"
    }

    async fn fetch(&self, search: &str, limit: usize) -> Result<Vec<RawPayload>, AdapterError> {
        match self.fetch_listing(search, limit).await {
            Ok(payloads) => Ok(payloads),
            Err(err) => {
                warn!(source = "remoteok", error = %err, "fetch failed, returning no jobs");
                Ok(Vec::new())
            }
        }
    }
}
