use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use jobintel_core::{Job, NewJob, SkillTag};

use crate::{with_pool, Database};

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    title: String,
    company: Option<String>,
    location: Option<String>,
    url: Option<String>,
    posted_at: Option<NaiveDate>,
    description: Option<String>,
    content_hash: Option<String>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            title: row.title,
            company: row.company,
            location: row.location,
            url: row.url,
            posted_at: row.posted_at,
            description: row.description,
            content_hash: row.content_hash,
        }
    }
}

/// URLs and fingerprints already present in `jobs`.
#[derive(Debug, Default, Clone)]
pub struct JobIdentities {
    pub urls: HashSet<String>,
    pub content_hashes: HashSet<String>,
}

impl JobIdentities {
    pub fn contains(&self, url: &str, content_hash: &str) -> bool {
        self.urls.contains(url) || self.content_hashes.contains(content_hash)
    }

    pub fn insert(&mut self, url: &str, content_hash: &str) {
        self.urls.insert(url.to_string());
        self.content_hashes.insert(content_hash.to_string());
    }
}

const INSERT_JOB: &str = r#"
    INSERT INTO jobs (title, company, location, url, posted_at, description, content_hash)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT DO NOTHING
"#;

const INSERT_SKILL: &str = r#"
    INSERT INTO job_skills (job_id, skill)
    VALUES ($1, $2)
    ON CONFLICT DO NOTHING
"#;

impl Database {
    pub async fn job_identities(&self) -> Result<JobIdentities> {
        let rows: Vec<(Option<String>, Option<String>)> = with_pool!(self, |pool| {
            sqlx::query_as("SELECT url, content_hash FROM jobs")
                .fetch_all(pool)
                .await
                .context("loading job identities")?
        });
        let mut identities = JobIdentities::default();
        for (url, hash) in rows {
            if let Some(url) = url {
                identities.urls.insert(url);
            }
            if let Some(hash) = hash {
                identities.content_hashes.insert(hash);
            }
        }
        Ok(identities)
    }

    /// Insert jobs in a single transaction; rows colliding on URL or fingerprint are skipped.
    /// Returns how many rows were written.
    pub async fn insert_jobs(&self, jobs: &[NewJob]) -> Result<usize> {
        if jobs.is_empty() {
            return Ok(0);
        }
        let inserted: u64 = with_pool!(self, |pool| {
            let mut tx = pool.begin().await.context("starting job transaction")?;
            let mut inserted = 0u64;
            for job in jobs {
                inserted += sqlx::query(INSERT_JOB)
                    .bind(&job.title)
                    .bind(job.company.as_deref())
                    .bind(job.location.as_deref())
                    .bind(&job.url)
                    .bind(job.posted_at)
                    .bind(job.description.as_deref())
                    .bind(&job.content_hash)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("inserting job {}", job.url))?
                    .rows_affected();
            }
            tx.commit().await.context("committing jobs")?;
            inserted
        });
        Ok(usize::try_from(inserted).unwrap_or(usize::MAX))
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = with_pool!(self, |pool| {
            sqlx::query_as(
                r#"
                SELECT id, title, company, location, url, posted_at, description, content_hash
                  FROM jobs
                 ORDER BY id
                "#,
            )
            .fetch_all(pool)
            .await
            .context("listing jobs")?
        });
        Ok(rows.into_iter().map(Job::from).collect())
    }

    pub async fn count_jobs(&self) -> Result<i64> {
        let n: i64 = with_pool!(self, |pool| {
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
                .fetch_one(pool)
                .await
                .context("counting jobs")?
        });
        Ok(n)
    }

    pub async fn delete_job(&self, job_id: i64) -> Result<bool> {
        let affected = with_pool!(self, |pool| {
            sqlx::query("DELETE FROM jobs WHERE id = $1")
                .bind(job_id)
                .execute(pool)
                .await
                .context("deleting job")?
                .rows_affected()
        });
        Ok(affected > 0)
    }

    /// Write skill tags in one transaction, ignoring pairs that already exist.
    pub async fn insert_skill_tags(&self, tags: &[SkillTag]) -> Result<usize> {
        if tags.is_empty() {
            return Ok(0);
        }
        let inserted: u64 = with_pool!(self, |pool| {
            let mut tx = pool.begin().await.context("starting skill transaction")?;
            let mut inserted = 0u64;
            for tag in tags {
                inserted += sqlx::query(INSERT_SKILL)
                    .bind(tag.job_id)
                    .bind(&tag.skill)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("tagging job {} with {}", tag.job_id, tag.skill))?
                    .rows_affected();
            }
            tx.commit().await.context("committing skill tags")?;
            inserted
        });
        Ok(usize::try_from(inserted).unwrap_or(usize::MAX))
    }

    pub async fn list_skill_tags(&self) -> Result<Vec<SkillTag>> {
        let rows: Vec<(i64, String)> = with_pool!(self, |pool| {
            sqlx::query_as("SELECT job_id, skill FROM job_skills ORDER BY job_id, skill")
                .fetch_all(pool)
                .await
                .context("listing skill tags")?
        });
        Ok(rows
            .into_iter()
            .map(|(job_id, skill)| SkillTag { job_id, skill })
            .collect())
    }
}
