use std::collections::BTreeMap;

use anyhow::Result;
use jobintel_core::Environment;
use jobintel_storage::Database;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditVerdict {
    Clean,
    /// Non-production rows exist, tolerated outside production.
    Warning,
    /// Non-production rows exist in a production deployment.
    Failure,
}

/// Row counts per stored environment label for raw records and ingest runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentAudit {
    pub environment: Environment,
    pub raw_records: BTreeMap<String, i64>,
    pub ingest_runs: BTreeMap<String, i64>,
}

impl EnvironmentAudit {
    pub async fn collect(db: &Database, environment: Environment) -> Result<Self> {
        Ok(Self {
            environment,
            raw_records: db.raw_environment_counts().await?,
            ingest_runs: db.ingest_run_environment_counts().await?,
        })
    }

    pub fn non_production_rows(&self) -> i64 {
        self.raw_records
            .iter()
            .chain(self.ingest_runs.iter())
            .filter(|(env, _)| env.as_str() != Environment::Production.as_str())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn verdict(&self) -> AuditVerdict {
        match (self.non_production_rows() > 0, self.environment.is_production()) {
            (false, _) => AuditVerdict::Clean,
            (true, false) => AuditVerdict::Warning,
            (true, true) => AuditVerdict::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use jobintel_core::RawPayload;
    use jobintel_storage::testing::memory_db;

    use super::*;

    #[tokio::test]
    async fn non_production_rows_fail_only_in_production() {
        let db = memory_db().await;
        db.upsert_raw(
            &RawPayload::new("remotive", "https://jobs.test/1", "Dev"),
            Environment::Production,
        )
        .await
        .unwrap();

        let clean = EnvironmentAudit::collect(&db, Environment::Production).await.unwrap();
        assert_eq!(clean.verdict(), AuditVerdict::Clean);

        db.start_ingest_run("sample", None, 10, Environment::Test)
            .await
            .unwrap();
        let prod = EnvironmentAudit::collect(&db, Environment::Production).await.unwrap();
        assert_eq!(prod.non_production_rows(), 1);
        assert_eq!(prod.verdict(), AuditVerdict::Failure);

        let dev = EnvironmentAudit::collect(&db, Environment::Development).await.unwrap();
        assert_eq!(dev.verdict(), AuditVerdict::Warning);
    }
}
