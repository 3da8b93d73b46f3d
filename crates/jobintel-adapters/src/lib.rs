//! Job-board source contract, registry and the built-in adapters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jobintel_core::RawPayload;
use jobintel_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::{info, warn};

mod arbeitnow;
mod remoteok;
mod remotive;
mod text;

pub use arbeitnow::ArbeitnowSource;
pub use remoteok::RemoteOkSource;
pub use remotive::RemotiveSource;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// A job board that can hand back listings in the canonical payload shape.
///
/// Built-in sources absorb transport failures themselves and return whatever they
/// collected; an `Err` here is reserved for failures the caller must see.
#[async_trait]
pub trait JobSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, search: &str, limit: usize) -> Result<Vec<RawPayload>, AdapterError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown source {name:?} (available: {})", available.join(", "))]
pub struct UnknownSourceError {
    pub name: String,
    pub available: Vec<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    UnknownSource(#[from] UnknownSourceError),
    #[error("source {source_name} failed: {error}")]
    Source {
        source_name: String,
        #[source]
        error: AdapterError,
    },
}

/// Drop payloads that miss a required key; one warning per rejected payload.
pub fn validate_payloads(
    payloads: Vec<RawPayload>,
    source_name: &str,
) -> (Vec<RawPayload>, Vec<String>) {
    let mut valid = Vec::with_capacity(payloads.len());
    let mut warnings = Vec::new();
    for (index, payload) in payloads.into_iter().enumerate() {
        let missing = payload.missing_required_keys();
        if missing.is_empty() {
            valid.push(payload);
        } else {
            warnings.push(format!(
                "[{source_name}] Payload {index}: Missing required keys: {}",
                missing.join(", ")
            ));
        }
    }
    (valid, warnings)
}

/// Name → source lookup, built once at startup and shared by reference.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn JobSource>>,
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.list())
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remotive, RemoteOK and Arbeitnow against their public endpoints.
    pub fn with_builtin_sources(http: HttpFetcher) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RemotiveSource::new(http.clone())));
        registry.register(Arc::new(RemoteOkSource::new(http.clone())));
        registry.register(Arc::new(ArbeitnowSource::new(http)));
        registry
    }

    /// Returns `false` when a source with the same name is already registered.
    pub fn register(&mut self, source: Arc<dyn JobSource>) -> bool {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return false;
        }
        self.sources.insert(name, source);
        true
    }

    pub fn list(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn JobSource>, UnknownSourceError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownSourceError {
                name: name.to_string(),
                available: self.list(),
            })
    }

    pub async fn fetch_and_validate(
        &self,
        name: &str,
        search: &str,
        limit: usize,
    ) -> Result<(Vec<RawPayload>, Vec<String>), RegistryError> {
        let source = self.get(name)?;
        let payloads = source
            .fetch(search, limit)
            .await
            .map_err(|error| RegistryError::Source {
                source_name: name.to_string(),
                error,
            })?;
        let fetched = payloads.len();
        let (valid, warnings) = validate_payloads(payloads, name);
        if !warnings.is_empty() {
            warn!(source = name, rejected = warnings.len(), "dropped invalid payloads");
        }
        info!(source = name, fetched, valid = valid.len(), "fetched payloads");
        Ok((valid, warnings))
    }
}

/// Case-insensitive substring match over title, company and description.
pub(crate) fn matches_search(search: &str, payload: &RawPayload) -> bool {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    let haystack = format!(
        "{} {} {}",
        payload.title.as_deref().unwrap_or_default(),
        payload.company.as_deref().unwrap_or_default(),
        payload.description.as_deref().unwrap_or_default(),
    )
    .to_lowercase();
    haystack.contains(&needle)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use axum::Router;
    use jobintel_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};

    pub fn fixture_path(source: &str, file: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .join(source)
            .join(file)
    }

    pub fn read_fixture(source: &str, file: &str) -> serde_json::Value {
        let text = std::fs::read_to_string(fixture_path(source, file)).expect("read fixture");
        serde_json::from_str(&text).expect("parse fixture")
    }

    pub fn quick_fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: Some("jobintel-tests".into()),
            backoff: BackoffPolicy::none(),
        })
        .expect("client")
    }

    pub async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        addr
    }
}
