//! Ingest orchestration: fetch → raw upsert → transform → skill extraction,
//! with every orchestrated run recorded in `ingest_runs`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jobintel_adapters::SourceRegistry;
use jobintel_core::{Environment, IngestResult, IngestRun, RawPayload};
use jobintel_storage::{Database, HttpClientConfig};
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};

mod audit;
mod sample;
mod skills;
mod transform;

pub use audit::{AuditVerdict, EnvironmentAudit};
pub use sample::{load_raw_jsonl, SampleInProduction, SAMPLE_ENVIRONMENT};
pub use skills::{SkillExtractor, SKILL_PATTERNS};
pub use transform::{job_hash, normalize_record, transform_pending};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://jobintel.db";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub environment: Environment,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub web_port: u16,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable numbers fall back to their
    /// defaults; an unknown `JOBINTEL_ENV` is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = match lookup("JOBINTEL_ENV") {
            Some(value) if !value.trim().is_empty() => {
                value.parse().context("reading JOBINTEL_ENV")?
            }
            _ => Environment::Development,
        };
        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            environment,
            user_agent: lookup("JOBINTEL_USER_AGENT")
                .unwrap_or_else(|| format!("jobintel/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: lookup("JOBINTEL_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            web_port: lookup("JOBINTEL_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..HttpClientConfig::default()
        }
    }
}

/// Counts from an ETL pass that was not recorded as an ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EtlResult {
    pub inserted_raw: usize,
    pub inserted_jobs: usize,
    pub inserted_skills: usize,
}

#[derive(Debug, Clone)]
pub struct IngestPipeline {
    db: Database,
    registry: Arc<SourceRegistry>,
    skills: SkillExtractor,
}

impl IngestPipeline {
    pub fn new(db: Database, registry: Arc<SourceRegistry>) -> Self {
        Self {
            db,
            registry,
            skills: SkillExtractor::default(),
        }
    }

    pub fn with_skill_extractor(mut self, skills: SkillExtractor) -> Self {
        self.skills = skills;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Transform pending raw records and tag skills, returning `(jobs, skills)` inserted.
    pub async fn run_postprocess(&self) -> Result<(usize, usize)> {
        let inserted_jobs = transform_pending(&self.db).await?;
        let inserted_skills = self.skills.extract_for_all_jobs(&self.db).await?;
        Ok((inserted_jobs, inserted_skills))
    }

    pub async fn run_etl_from_payloads(
        &self,
        payloads: &[RawPayload],
        environment: Environment,
    ) -> Result<EtlResult> {
        let mut inserted_raw = 0;
        for payload in payloads {
            if self.db.upsert_raw(payload, environment).await? {
                inserted_raw += 1;
            }
        }
        let (inserted_jobs, inserted_skills) = self.run_postprocess().await?;
        Ok(EtlResult {
            inserted_raw,
            inserted_jobs,
            inserted_skills,
        })
    }

    /// Load a JSONL sample file tagged [`SAMPLE_ENVIRONMENT`] and postprocess it.
    ///
    /// Fails with [`SampleInProduction`] when `deployment` is production, before
    /// anything is read.
    pub async fn load_sample(
        &self,
        path: impl AsRef<Path>,
        deployment: Environment,
    ) -> Result<EtlResult> {
        if deployment.is_production() {
            return Err(SampleInProduction.into());
        }
        let inserted_raw = load_raw_jsonl(&self.db, path, SAMPLE_ENVIRONMENT).await?;
        let (inserted_jobs, inserted_skills) = self.run_postprocess().await?;
        Ok(EtlResult {
            inserted_raw,
            inserted_jobs,
            inserted_skills,
        })
    }

    /// Fetch from `source_name` and push the results through the whole pipeline.
    ///
    /// The run row is committed as `running` before anything is fetched. Any
    /// failure after that is written to the row and then returned unchanged.
    pub async fn run_ingest(
        &self,
        source_name: &str,
        search: &str,
        limit: usize,
        environment: Environment,
    ) -> Result<IngestResult> {
        let run_limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let run_id = self
            .db
            .start_ingest_run(source_name, Some(search), run_limit, environment)
            .await?;
        let span = info_span!("ingest_run", run_id, source = source_name, %environment);

        match self
            .ingest_stages(source_name, search, limit, environment)
            .instrument(span)
            .await
        {
            Ok(result) => {
                self.db.finish_ingest_run_success(run_id, &result).await?;
                info!(
                    run_id,
                    source = source_name,
                    fetched = result.fetched,
                    inserted_raw = result.inserted_raw,
                    inserted_jobs = result.inserted_jobs,
                    inserted_skills = result.inserted_skills,
                    "ingest run succeeded"
                );
                Ok(result)
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(run_id, source = source_name, error = %message, "ingest run failed");
                if let Err(record_err) = self.db.finish_ingest_run_failed(run_id, &message).await {
                    error!(run_id, error = %record_err, "could not record failed run");
                }
                Err(err)
            }
        }
    }

    async fn ingest_stages(
        &self,
        source_name: &str,
        search: &str,
        limit: usize,
        environment: Environment,
    ) -> Result<IngestResult> {
        let (payloads, warnings) = self
            .registry
            .fetch_and_validate(source_name, search, limit)
            .await?;
        let etl = self.run_etl_from_payloads(&payloads, environment).await?;
        Ok(IngestResult {
            fetched: payloads.len(),
            inserted_raw: etl.inserted_raw,
            inserted_jobs: etl.inserted_jobs,
            inserted_skills: etl.inserted_skills,
            warnings,
        })
    }

    pub async fn list_recent_runs(
        &self,
        limit: i64,
        environment: Option<Environment>,
    ) -> Result<Vec<IngestRun>> {
        self.db.recent_ingest_runs(limit, environment).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use jobintel_adapters::{AdapterError, JobSource, RegistryError};
    use jobintel_core::IngestStatus;
    use jobintel_storage::testing::memory_db;

    use super::*;

    struct FixedSource(Vec<RawPayload>);

    #[async_trait]
    impl JobSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch(&self, _search: &str, limit: usize) -> Result<Vec<RawPayload>, AdapterError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct DownSource;

    #[async_trait]
    impl JobSource for DownSource {
        fn name(&self) -> &str {
            "down"
        }

        async fn fetch(&self, _search: &str, _limit: usize) -> Result<Vec<RawPayload>, AdapterError> {
            Err(AdapterError::Message("board unreachable".into()))
        }
    }

    fn listing(n: u32, description: &str) -> RawPayload {
        RawPayload {
            company: Some(format!("Company {n}")),
            description: Some(description.into()),
            posted_at: Some("2026-10-01".into()),
            ..RawPayload::new("fixed", &format!("https://jobs.test/{n}"), &format!("Role {n}"))
        }
    }

    async fn pipeline(payloads: Vec<RawPayload>) -> IngestPipeline {
        let db = memory_db().await;
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(FixedSource(payloads)));
        registry.register(Arc::new(DownSource));
        IngestPipeline::new(db, Arc::new(registry))
    }

    #[tokio::test]
    async fn successful_run_is_recorded_with_counts() {
        let pipeline = pipeline(vec![
            listing(1, "Python and SQL on AWS"),
            listing(2, "Docker, Kubernetes"),
            RawPayload {
                url: None,
                ..listing(3, "no url")
            },
        ])
        .await;

        let result = pipeline
            .run_ingest("fixed", "", 10, Environment::Test)
            .await
            .unwrap();
        assert_eq!(result.fetched, 2);
        assert_eq!(result.inserted_raw, 2);
        assert_eq!(result.inserted_jobs, 2);
        assert_eq!(result.inserted_skills, 5);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("url"));

        let runs = pipeline.list_recent_runs(10, None).await.unwrap();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.status, IngestStatus::Success);
        assert!(run.finished_at.is_some());
        assert!(run.error.is_none());
        assert_eq!(run.search, None);
        assert_eq!(run.environment, Environment::Test);
        assert_eq!(run.inserted_skills, 5);
        assert_eq!(run.warnings.as_ref().map(Vec::len), Some(1));

        let again = pipeline
            .run_ingest("fixed", "", 10, Environment::Test)
            .await
            .unwrap();
        assert_eq!(
            (again.inserted_raw, again.inserted_jobs, again.inserted_skills),
            (0, 0, 0)
        );
    }

    #[tokio::test]
    async fn failing_source_is_recorded_and_still_returned() {
        let pipeline = pipeline(Vec::new()).await;

        let err = pipeline
            .run_ingest("down", "python", 5, Environment::Production)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::Source { .. })
        ));

        let runs = pipeline.list_recent_runs(5, Some(Environment::Production)).await.unwrap();
        let run = &runs[0];
        assert_eq!(run.status, IngestStatus::Failed);
        assert!(run.finished_at.is_some());
        assert_eq!(run.search.as_deref(), Some("python"));
        assert!(run.error.as_deref().unwrap().contains("board unreachable"));
    }

    #[tokio::test]
    async fn unknown_source_fails_the_run() {
        let pipeline = pipeline(Vec::new()).await;

        let err = pipeline
            .run_ingest("nope", "", 5, Environment::Test)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::UnknownSource(_))
        ));
        let run = &pipeline.list_recent_runs(1, None).await.unwrap()[0];
        assert_eq!(run.source, "nope");
        assert_eq!(run.status, IngestStatus::Failed);
    }

    #[tokio::test]
    async fn etl_without_run_record() {
        let pipeline = pipeline(Vec::new()).await;
        let etl = pipeline
            .run_etl_from_payloads(&[listing(7, "pandas and pytest")], Environment::Development)
            .await
            .unwrap();
        assert_eq!(
            etl,
            EtlResult {
                inserted_raw: 1,
                inserted_jobs: 1,
                inserted_skills: 2,
            }
        );
        assert!(pipeline.list_recent_runs(10, None).await.unwrap().is_empty());
        assert_eq!(pipeline.run_postprocess().await.unwrap(), (0, 0));
    }

    fn bundled_sample() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data/sample_jobs.jsonl")
    }

    #[tokio::test]
    async fn sample_is_refused_in_production() {
        let pipeline = pipeline(Vec::new()).await;
        let err = pipeline
            .load_sample(bundled_sample(), Environment::Production)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<SampleInProduction>().is_some());
        assert_eq!(pipeline.database().count_raw_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sample_rows_are_always_tagged_test() {
        let pipeline = pipeline(Vec::new()).await;
        let etl = pipeline
            .load_sample(bundled_sample(), Environment::Development)
            .await
            .unwrap();
        assert!(etl.inserted_raw >= 8);
        assert!(etl.inserted_jobs > 0);

        let counts = pipeline.database().raw_environment_counts().await.unwrap();
        assert_eq!(counts.keys().collect::<Vec<_>>(), vec!["test"]);
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.web_port, 8000);
        assert!(config.user_agent.starts_with("jobintel/"));
    }

    #[test]
    fn config_overrides_and_bad_numbers() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://u:p@db/jobs"),
            ("JOBINTEL_ENV", "Production"),
            ("JOBINTEL_HTTP_TIMEOUT_SECS", "abc"),
            ("JOBINTEL_WEB_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.web_port, 9100);
        assert_eq!(config.http_client_config().timeout, Duration::from_secs(30));
    }

    #[test]
    fn config_rejects_unknown_environment() {
        let err = SyncConfig::from_lookup(lookup(&[("JOBINTEL_ENV", "staging")])).unwrap_err();
        assert!(format!("{err:#}").contains("staging"));
    }
}
