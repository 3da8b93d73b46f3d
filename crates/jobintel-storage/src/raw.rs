//! Raw record store: fingerprinting and idempotent upsert.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use jobintel_core::{Environment, RawPayload, RawRecord};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{with_pool, Database};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim)
}

/// Stable fingerprint over the identity-bearing fields of a payload.
///
/// Keys are serialized sorted with compact separators, so field order and
/// surrounding whitespace do not change the result.
pub fn compute_content_hash(payload: &RawPayload) -> String {
    let stable = json!({
        "source": trimmed(&payload.source),
        "external_id": trimmed(&payload.external_id),
        "url": trimmed(&payload.url),
        "title": trimmed(&payload.title),
        "company": trimmed(&payload.company),
        "location": trimmed(&payload.location),
        "posted_at": trimmed(&payload.posted_at),
        "description": trimmed(&payload.description),
    });
    sha256_hex(stable.to_string().as_bytes())
}

#[derive(Debug, sqlx::FromRow)]
struct RawRecordRow {
    id: i64,
    source: String,
    url: Option<String>,
    content_hash: String,
    payload: String,
    ingested_at: NaiveDateTime,
    environment: String,
}

impl TryFrom<RawRecordRow> for RawRecord {
    type Error = anyhow::Error;

    fn try_from(row: RawRecordRow) -> Result<Self> {
        Ok(RawRecord {
            payload: serde_json::from_str(&row.payload)
                .with_context(|| format!("decoding payload of raw record {}", row.id))?,
            environment: row.environment.parse()?,
            id: row.id,
            source: row.source,
            url: row.url,
            content_hash: row.content_hash,
            ingested_at: row.ingested_at,
        })
    }
}

const FIND_RAW_BY_FINGERPRINT: &str = r#"
    SELECT id
      FROM raw_records
     WHERE content_hash = $1
       AND (CAST($2 AS TEXT) IS NULL OR url = $2)
     LIMIT 1
"#;

const INSERT_RAW: &str = r#"
    INSERT INTO raw_records (source, url, content_hash, payload, ingested_at, environment)
    VALUES ($1, $2, $3, $4, $5, $6)
"#;

impl Database {
    /// Insert `payload` unless a record with the same fingerprint (and URL, when the
    /// payload has one) already exists. Returns `true` when a row was written.
    pub async fn upsert_raw(&self, payload: &RawPayload, environment: Environment) -> Result<bool> {
        self.upsert_raw_at(payload, environment, Utc::now().naive_utc())
            .await
    }

    pub async fn upsert_raw_at(
        &self,
        payload: &RawPayload,
        environment: Environment,
        ingested_at: NaiveDateTime,
    ) -> Result<bool> {
        let mut payload = payload.clone();
        if payload
            .content_hash
            .as_deref()
            .map(|h| h.trim().is_empty())
            .unwrap_or(true)
        {
            payload.content_hash = Some(compute_content_hash(&payload));
        }
        let content_hash = payload.content_hash.clone().unwrap_or_default();
        let url = payload.non_empty_url().map(ToString::to_string);
        let source = payload
            .source
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let body = serde_json::to_string(&payload).context("encoding raw payload")?;

        // Read-then-write: two concurrent callers can both miss and both insert.
        let existing: Option<i64> = with_pool!(self, |pool| {
            sqlx::query_scalar(FIND_RAW_BY_FINGERPRINT)
                .bind(&content_hash)
                .bind(url.as_deref())
                .fetch_optional(pool)
                .await
                .context("checking raw record fingerprint")?
        });
        if let Some(id) = existing {
            debug!(raw_id = id, %content_hash, "raw payload already stored");
            return Ok(false);
        }

        let inserted = with_pool!(self, |pool| {
            sqlx::query(INSERT_RAW)
                .bind(&source)
                .bind(url.as_deref())
                .bind(&content_hash)
                .bind(&body)
                .bind(ingested_at)
                .bind(environment.as_str())
                .execute(pool)
                .await
                .context("inserting raw record")?
                .rows_affected()
        });
        Ok(inserted > 0)
    }

    pub async fn list_raw_records(&self) -> Result<Vec<RawRecord>> {
        let rows: Vec<RawRecordRow> = with_pool!(self, |pool| {
            sqlx::query_as(
                r#"
                SELECT id, source, url, content_hash, payload, ingested_at, environment
                  FROM raw_records
                 ORDER BY id
                "#,
            )
            .fetch_all(pool)
            .await
            .context("listing raw records")?
        });
        rows.into_iter().map(RawRecord::try_from).collect()
    }

    pub async fn count_raw_records(&self) -> Result<i64> {
        let n: i64 = with_pool!(self, |pool| {
            sqlx::query_scalar("SELECT COUNT(*) FROM raw_records")
                .fetch_one(pool)
                .await
                .context("counting raw records")?
        });
        Ok(n)
    }

    /// Raw record counts keyed by stored environment label.
    pub async fn raw_environment_counts(&self) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = with_pool!(self, |pool| {
            sqlx::query_as(
                "SELECT environment, COUNT(*) FROM raw_records GROUP BY environment ORDER BY environment",
            )
            .fetch_all(pool)
            .await
            .context("counting raw records per environment")?
        });
        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_db;

    fn payload() -> RawPayload {
        RawPayload {
            company: Some("TechCorp".into()),
            description: Some("Python and AWS".into()),
            posted_at: Some("2026-01-10".into()),
            ..RawPayload::new("remotive", "https://remotive.com/job/1001", "Data Engineer")
        }
    }

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn fingerprint_ignores_whitespace_and_extras() {
        let a = payload();
        let mut b = payload();
        b.title = Some("  Data Engineer ".into());
        b.tags = Some(vec!["python".into()]);
        b.extra.insert("remote".into(), serde_json::Value::Bool(true));
        assert_eq!(compute_content_hash(&a), compute_content_hash(&b));

        let mut c = payload();
        c.company = Some("OtherCorp".into());
        assert_ne!(compute_content_hash(&a), compute_content_hash(&c));
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let db = memory_db().await;
        assert!(db.upsert_raw(&payload(), Environment::Production).await.unwrap());
        assert!(!db.upsert_raw(&payload(), Environment::Production).await.unwrap());
        assert_eq!(db.count_raw_records().await.unwrap(), 1);

        let stored = db.list_raw_records().await.unwrap();
        assert_eq!(stored[0].source, "remotive");
        assert_eq!(stored[0].environment, Environment::Production);
        assert_eq!(stored[0].url.as_deref(), Some("https://remotive.com/job/1001"));
        assert_eq!(
            stored[0].payload.content_hash.as_deref(),
            Some(compute_content_hash(&payload()).as_str())
        );
    }

    #[tokio::test]
    async fn supplied_hash_requires_matching_url() {
        let db = memory_db().await;
        let mut first = payload();
        first.content_hash = Some("vendor-hash".into());
        let mut second = first.clone();
        second.url = Some("https://remotive.com/job/9999".into());

        assert!(db.upsert_raw(&first, Environment::Production).await.unwrap());
        assert!(db.upsert_raw(&second, Environment::Production).await.unwrap());

        let mut no_url = first.clone();
        no_url.url = None;
        assert!(!db.upsert_raw(&no_url, Environment::Production).await.unwrap());
        assert_eq!(db.count_raw_records().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn environment_tag_and_default_source_are_stored() {
        let db = memory_db().await;
        let mut sample = payload();
        sample.source = None;
        db.upsert_raw(&sample, Environment::Test).await.unwrap();
        db.upsert_raw(&payload(), Environment::Production).await.unwrap();

        let counts = db.raw_environment_counts().await.unwrap();
        assert_eq!(counts.get("test"), Some(&1));
        assert_eq!(counts.get("production"), Some(&1));

        let stored = db.list_raw_records().await.unwrap();
        assert!(stored.iter().any(|r| r.source == "unknown"));
    }
}
