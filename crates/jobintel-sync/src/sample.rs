use std::path::Path;

use anyhow::{Context, Result};
use jobintel_core::{Environment, RawPayload};
use jobintel_storage::Database;
use thiserror::Error;
use tracing::{info, warn};

/// Environment every sample row is tagged with, whatever the deployment runs as.
pub const SAMPLE_ENVIRONMENT: Environment = Environment::Test;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("refusing to load sample data into a production deployment")]
pub struct SampleInProduction;

/// Load one payload per line of a JSONL file into the raw store.
///
/// Blank lines are skipped, lines that do not parse are logged and skipped, and a
/// missing `source` becomes `sample`. Already stored payloads are not counted, so
/// re-running a file returns 0.
pub async fn load_raw_jsonl(
    db: &Database,
    path: impl AsRef<Path>,
    environment: Environment,
) -> Result<usize> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let mut inserted = 0;
    let mut skipped = 0;
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut payload: RawPayload = match serde_json::from_str(line) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(path = %path.display(), line = index + 1, error = %err, "skipping unparsable payload");
                skipped += 1;
                continue;
            }
        };
        if payload.source.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            payload.source = Some("sample".into());
        }
        if db.upsert_raw(&payload, environment).await? {
            inserted += 1;
        }
    }
    info!(path = %path.display(), inserted, skipped, %environment, "loaded sample payloads");
    Ok(inserted)
}
