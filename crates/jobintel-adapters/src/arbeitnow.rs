use std::time::Duration;

use async_trait::async_trait;
use jobintel_core::RawPayload;
use jobintel_storage::{sha256_hex, BackoffPolicy, HttpFetcher};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::text::{epoch_to_rfc3339, non_blank};
use crate::{matches_search, JobSource};

pub const ARBEITNOW_ENDPOINT: &str = "https://arbeitnow.com/api/job-board-api";

#[derive(Debug, Default, Deserialize)]
struct ArbeitnowPage {
    #[serde(default)]
    data: Vec<ArbeitnowJob>,
    #[serde(default)]
    links: ArbeitnowLinks,
}

#[derive(Debug, Default, Deserialize)]
struct ArbeitnowLinks {
    next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ArbeitnowJob {
    slug: Option<String>,
    company_name: Option<String>,
    title: Option<String>,
    description: Option<String>,
    #[serde(default)]
    remote: bool,
    url: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    job_types: Vec<String>,
    location: Option<String>,
    created_at: Option<i64>,
}

/// Arbeitnow's paginated board. Pages are walked politely and throttling is
/// retried with a linear backoff before giving up on the remaining pages.
#[derive(Debug, Clone)]
pub struct ArbeitnowSource {
    http: HttpFetcher,
    endpoint: String,
    max_pages: usize,
    max_attempts: usize,
    page_delay: Duration,
    retry_backoff: Duration,
}

impl ArbeitnowSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self::with_endpoint(http, ARBEITNOW_ENDPOINT)
    }

    pub fn with_endpoint(http: HttpFetcher, endpoint: impl Into<String>) -> Self {
        Self {
            // 429 handling lives here, so the shared client must not retry on its own.
            http: http.with_backoff(BackoffPolicy::none()),
            endpoint: endpoint.into(),
            max_pages: 10,
            max_attempts: 3,
            page_delay: Duration::from_millis(2500),
            retry_backoff: Duration::from_secs(5),
        }
    }

    pub fn with_timing(mut self, page_delay: Duration, retry_backoff: Duration) -> Self {
        self.page_delay = page_delay;
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    async fn fetch_page_with_retry(&self, page: usize) -> Option<ArbeitnowPage> {
        let query = [("page", page.to_string())];
        for attempt in 1..=self.max_attempts {
            match self.http.fetch_json::<ArbeitnowPage>(&self.endpoint, &query).await {
                Ok(data) => return Some(data),
                Err(err) if err.status() == Some(429) => {
                    if attempt == self.max_attempts {
                        break;
                    }
                    let wait = self
                        .retry_backoff
                        .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX));
                    warn!(page, attempt, max = self.max_attempts, ?wait, "arbeitnow rate limited");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    warn!(page, error = %err, "arbeitnow request failed");
                    return None;
                }
            }
        }
        warn!(page, "arbeitnow exhausted retries");
        None
    }
}

fn normalize_job(job: ArbeitnowJob) -> Option<RawPayload> {
    let (Some(url), Some(title)) = (non_blank(job.url), non_blank(job.title)) else {
        debug!(slug = ?job.slug, "skipping arbeitnow job without url or title");
        return None;
    };
    let external_id = non_blank(job.slug).unwrap_or_else(|| {
        let mut digest = sha256_hex(url.as_bytes());
        digest.truncate(16);
        digest
    });
    let description = job.description.unwrap_or_default();
    let company = job.company_name;
    let content_hash = sha256_hex(
        format!(
            "{title}|{}|{description}",
            company.as_deref().unwrap_or_default()
        )
        .as_bytes(),
    );
    let mut tags = job.tags;
    tags.extend(job.job_types);

    let mut extra = serde_json::Map::new();
    extra.insert("remote".into(), JsonValue::Bool(job.remote));

    Some(RawPayload {
        source: Some("arbeitnow".into()),
        external_id: Some(external_id),
        url: Some(url),
        title: Some(title),
        company,
        location: job.location,
        description: Some(description),
        posted_at: job.created_at.and_then(epoch_to_rfc3339),
        tags: (!tags.is_empty()).then_some(tags),
        content_hash: Some(content_hash),
        extra,
    })
}

#[async_trait]
impl JobSource for ArbeitnowSource {
    fn name(&self) -> &str {
        "arbeitnow"
    }

    async fn fetch(&self, search: &str, limit: usize) -> Result<Vec<RawPayload>, crate::AdapterError> {
        let mut payloads = Vec::new();
        let mut page = 1;

        while page <= self.max_pages && payloads.len() < limit {
            let Some(data) = self.fetch_page_with_retry(page).await else {
                break;
            };
            if data.data.is_empty() {
                break;
            }
            for job in data.data {
                if payloads.len() >= limit {
                    break;
                }
                let Some(payload) = normalize_job(job) else {
                    continue;
                };
                if matches_search(search, &payload) {
                    payloads.push(payload);
                }
            }
            if non_blank(data.links.next).is_none() {
                break;
            }
            page += 1;
            tokio::time::sleep(self.page_delay).await;
        }

        info!(source = "arbeitnow", fetched = payloads.len(), pages = page, "fetched jobs");
        Ok(payloads)
    }
}
