//! Ingest run audit log.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, Utc};
use jobintel_core::{Environment, IngestResult, IngestRun};

use crate::{with_pool, Database};

#[derive(Debug, sqlx::FromRow)]
struct IngestRunRow {
    id: i64,
    source: String,
    search: Option<String>,
    search_limit: i64,
    environment: String,
    status: String,
    started_at: NaiveDateTime,
    finished_at: Option<NaiveDateTime>,
    fetched: i64,
    inserted_raw: i64,
    inserted_jobs: i64,
    inserted_skills: i64,
    warnings: Option<String>,
    error: Option<String>,
}

impl TryFrom<IngestRunRow> for IngestRun {
    type Error = anyhow::Error;

    fn try_from(row: IngestRunRow) -> Result<Self> {
        let warnings = row
            .warnings
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()
            .with_context(|| format!("decoding warnings of ingest run {}", row.id))?;
        Ok(IngestRun {
            id: row.id,
            source: row.source,
            search: row.search,
            limit: row.search_limit,
            environment: row.environment.parse()?,
            status: row.status.parse()?,
            started_at: row.started_at,
            finished_at: row.finished_at,
            fetched: row.fetched,
            inserted_raw: row.inserted_raw,
            inserted_jobs: row.inserted_jobs,
            inserted_skills: row.inserted_skills,
            warnings,
            error: row.error,
        })
    }
}

const RUN_COLUMNS: &str = "id, source, search, search_limit, environment, status, started_at, \
     finished_at, fetched, inserted_raw, inserted_jobs, inserted_skills, warnings, error";

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl Database {
    /// Open a run in `running` state and return its id. Blank searches are stored as NULL.
    pub async fn start_ingest_run(
        &self,
        source: &str,
        search: Option<&str>,
        limit: i64,
        environment: Environment,
    ) -> Result<i64> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let started_at = Utc::now().naive_utc();
        let id: i64 = with_pool!(self, |pool| {
            sqlx::query_scalar(
                r#"
                INSERT INTO ingest_runs (source, search, search_limit, environment, status, started_at)
                VALUES ($1, $2, $3, $4, 'running', $5)
                RETURNING id
                "#,
            )
            .bind(source)
            .bind(search)
            .bind(limit)
            .bind(environment.as_str())
            .bind(started_at)
            .fetch_one(pool)
            .await
            .context("opening ingest run")?
        });
        Ok(id)
    }

    pub async fn finish_ingest_run_success(&self, run_id: i64, result: &IngestResult) -> Result<()> {
        let warnings = if result.warnings.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&result.warnings).context("encoding run warnings")?)
        };
        let finished_at = Utc::now().naive_utc();
        let affected = with_pool!(self, |pool| {
            sqlx::query(
                r#"
                UPDATE ingest_runs
                   SET status = 'success', finished_at = $2, fetched = $3, inserted_raw = $4,
                       inserted_jobs = $5, inserted_skills = $6, warnings = $7
                 WHERE id = $1 AND status = 'running'
                "#,
            )
            .bind(run_id)
            .bind(finished_at)
            .bind(count(result.fetched))
            .bind(count(result.inserted_raw))
            .bind(count(result.inserted_jobs))
            .bind(count(result.inserted_skills))
            .bind(warnings)
            .execute(pool)
            .await
            .context("closing ingest run")?
            .rows_affected()
        });
        if affected == 0 {
            bail!("ingest run {run_id} is not running");
        }
        Ok(())
    }

    pub async fn finish_ingest_run_failed(&self, run_id: i64, error: &str) -> Result<()> {
        let finished_at = Utc::now().naive_utc();
        let affected = with_pool!(self, |pool| {
            sqlx::query(
                r#"
                UPDATE ingest_runs
                   SET status = 'failed', finished_at = $2, error = $3
                 WHERE id = $1 AND status = 'running'
                "#,
            )
            .bind(run_id)
            .bind(finished_at)
            .bind(error)
            .execute(pool)
            .await
            .context("failing ingest run")?
            .rows_affected()
        });
        if affected == 0 {
            bail!("ingest run {run_id} is not running");
        }
        Ok(())
    }

    pub async fn get_ingest_run(&self, run_id: i64) -> Result<Option<IngestRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM ingest_runs WHERE id = $1");
        let row: Option<IngestRunRow> = with_pool!(self, |pool| {
            sqlx::query_as(&sql)
                .bind(run_id)
                .fetch_optional(pool)
                .await
                .context("loading ingest run")?
        });
        row.map(IngestRun::try_from).transpose()
    }

    /// Most recent runs first, optionally restricted to one environment.
    pub async fn recent_ingest_runs(
        &self,
        limit: i64,
        environment: Option<Environment>,
    ) -> Result<Vec<IngestRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM ingest_runs \
             WHERE (CAST($1 AS TEXT) IS NULL OR environment = $1) \
             ORDER BY started_at DESC, id DESC LIMIT $2"
        );
        let rows: Vec<IngestRunRow> = with_pool!(self, |pool| {
            sqlx::query_as(&sql)
                .bind(environment.map(Environment::as_str))
                .bind(limit.max(0))
                .fetch_all(pool)
                .await
                .context("listing ingest runs")?
        });
        rows.into_iter().map(IngestRun::try_from).collect()
    }

    pub async fn ingest_run_environment_counts(&self) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = with_pool!(self, |pool| {
            sqlx::query_as(
                "SELECT environment, COUNT(*) FROM ingest_runs GROUP BY environment ORDER BY environment",
            )
            .fetch_all(pool)
            .await
            .context("counting ingest runs per environment")?
        });
        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use jobintel_core::IngestStatus;

    use super::*;
    use crate::testing::memory_db;

    #[tokio::test]
    async fn run_moves_from_running_to_success_once() {
        let db = memory_db().await;
        let id = db
            .start_ingest_run("remotive", Some("  "), 25, Environment::Test)
            .await
            .unwrap();

        let open = db.get_ingest_run(id).await.unwrap().unwrap();
        assert_eq!(open.status, IngestStatus::Running);
        assert_eq!(open.search, None);
        assert!(open.finished_at.is_none());

        let result = IngestResult {
            fetched: 3,
            inserted_raw: 2,
            inserted_jobs: 2,
            inserted_skills: 5,
            warnings: vec!["[remotive] Payload 2: Missing required keys: url".into()],
        };
        db.finish_ingest_run_success(id, &result).await.unwrap();

        let done = db.get_ingest_run(id).await.unwrap().unwrap();
        assert_eq!(done.status, IngestStatus::Success);
        assert_eq!(done.inserted_skills, 5);
        assert_eq!(done.warnings, Some(result.warnings.clone()));
        assert!(done.finished_at.is_some());

        assert!(db.finish_ingest_run_failed(id, "late").await.is_err());
    }

    #[tokio::test]
    async fn failed_run_keeps_error_and_filters_by_environment() {
        let db = memory_db().await;
        let first = db
            .start_ingest_run("remoteok", Some("python"), 10, Environment::Production)
            .await
            .unwrap();
        db.finish_ingest_run_failed(first, "boom").await.unwrap();
        db.start_ingest_run("arbeitnow", None, 10, Environment::Development)
            .await
            .unwrap();

        let prod = db
            .recent_ingest_runs(10, Some(Environment::Production))
            .await
            .unwrap();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].status, IngestStatus::Failed);
        assert_eq!(prod[0].error.as_deref(), Some("boom"));
        assert_eq!(prod[0].search.as_deref(), Some("python"));
        assert_eq!(prod[0].warnings, None);

        assert_eq!(db.recent_ingest_runs(10, None).await.unwrap().len(), 2);
        assert_eq!(db.recent_ingest_runs(1, None).await.unwrap().len(), 1);

        let counts = db.ingest_run_environment_counts().await.unwrap();
        assert_eq!(counts.get("development"), Some(&1));
    }
}
