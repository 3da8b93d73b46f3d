//! Dashboard analytics over the jobs store.
//!
//! Jobs carry no environment or source of their own; both come from the raw
//! records whose URL matches the job's URL, so every query joins through
//! `raw_records`. Errors are returned to the caller untouched.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use jobintel_core::{Environment, Granularity, BUCKET_FORMAT};
use jobintel_storage::{with_pool, Database, Dialect};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scope shared by every analytics query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsFilter {
    pub source: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
    pub environment: Environment,
}

impl Default for AnalyticsFilter {
    fn default() -> Self {
        Self {
            source: None,
            date_from: None,
            date_to: None,
            search: None,
            environment: Environment::Production,
        }
    }
}

impl AnalyticsFilter {
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// `%term%`, lowercased, or `None` for a blank search.
    fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.to_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kpis {
    pub total_jobs: i64,
    pub jobs_last_7d: i64,
    pub unique_companies: i64,
    pub sources_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCount {
    pub skill: String,
    pub count: i64,
}

impl SkillCount {
    pub fn new(skill: &str, count: i64) -> Self {
        Self {
            skill: skill.to_string(),
            count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub bucket: NaiveDateTime,
    pub skill: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillTrends {
    pub granularity: Granularity,
    pub points: Vec<TrendPoint>,
}

/// SQL yielding the bucket start of `column` as `YYYY-MM-DD HH:MM:SS` text.
///
/// Both dialects agree with [`Granularity::bucket_start`]: 6h buckets start at
/// 00/06/12/18 and weeks start on Monday.
pub fn bucket_expr(dialect: Dialect, granularity: Granularity, column: &str) -> String {
    match (dialect, granularity) {
        (Dialect::Sqlite, Granularity::SixHours) => format!(
            "(strftime('%Y-%m-%d ', {column}) || printf('%02d', (CAST(strftime('%H', {column}) AS INTEGER) / 6) * 6) || ':00:00')"
        ),
        (Dialect::Sqlite, Granularity::Day) => {
            format!("strftime('%Y-%m-%d 00:00:00', {column})")
        }
        (Dialect::Sqlite, Granularity::Week) => format!(
            "strftime('%Y-%m-%d 00:00:00', {column}, '-' || ((CAST(strftime('%w', {column}) AS INTEGER) + 6) % 7) || ' days')"
        ),
        (Dialect::Postgres, Granularity::SixHours) => format!(
            "to_char(date_trunc('day', {column}) + floor(extract(hour from {column}) / 6) * interval '6 hours', 'YYYY-MM-DD HH24:MI:SS')"
        ),
        (Dialect::Postgres, Granularity::Day) => {
            format!("to_char(date_trunc('day', {column}), 'YYYY-MM-DD HH24:MI:SS')")
        }
        (Dialect::Postgres, Granularity::Week) => {
            format!("to_char(date_trunc('week', {column}), 'YYYY-MM-DD HH24:MI:SS')")
        }
    }
}

const JOB_FILTERS: &str = r#"
   WHERE r.environment = $1
     AND (CAST($2 AS TEXT) IS NULL OR r.source = $2)
     AND (CAST($3 AS DATE) IS NULL OR j.posted_at >= $3)
     AND (CAST($4 AS DATE) IS NULL OR j.posted_at <= $4)
     AND (CAST($5 AS TEXT) IS NULL
          OR LOWER(j.title) LIKE $5
          OR LOWER(j.company) LIKE $5
          OR LOWER(j.location) LIKE $5)
"#;

macro_rules! bind_scope {
    ($query:expr, $filter:expr, $date_from:expr, $date_to:expr) => {
        $query
            .bind($filter.environment.as_str())
            .bind($filter.source())
            .bind($date_from)
            .bind($date_to)
            .bind($filter.search_pattern())
    };
}

async fn count_in_scope(
    db: &Database,
    select: &str,
    filter: &AnalyticsFilter,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
) -> Result<i64> {
    let sql =
        format!("SELECT {select} FROM jobs j JOIN raw_records r ON r.url = j.url {JOB_FILTERS}");
    let n: i64 = with_pool!(db, |pool| {
        bind_scope!(sqlx::query_scalar(&sql), filter, date_from, date_to)
            .fetch_one(pool)
            .await
            .with_context(|| format!("running {select}"))?
    });
    Ok(n)
}

pub async fn get_kpis(db: &Database, filter: &AnalyticsFilter) -> Result<Kpis> {
    get_kpis_as_of(db, filter, Utc::now().date_naive()).await
}

/// KPIs with "last 7 days" measured back from `today`.
pub async fn get_kpis_as_of(
    db: &Database,
    filter: &AnalyticsFilter,
    today: NaiveDate,
) -> Result<Kpis> {
    let total_jobs = count_in_scope(
        db,
        "COUNT(DISTINCT j.id)",
        filter,
        filter.date_from,
        filter.date_to,
    )
    .await?;
    let jobs_last_7d = count_in_scope(
        db,
        "COUNT(DISTINCT j.id)",
        filter,
        Some(today - Duration::days(7)),
        None,
    )
    .await?;
    let unique_companies = count_in_scope(
        db,
        "COUNT(DISTINCT j.company)",
        filter,
        filter.date_from,
        filter.date_to,
    )
    .await?;
    let sources_count: i64 = with_pool!(db, |pool| {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT source)
              FROM ingest_runs
             WHERE status = 'success' AND environment = $1
            "#,
        )
        .bind(filter.environment.as_str())
        .fetch_one(pool)
        .await
        .context("counting successful sources")?
    });

    Ok(Kpis {
        total_jobs,
        jobs_last_7d,
        unique_companies,
        sources_count,
    })
}

/// Skills ranked by the number of distinct jobs mentioning them; ties by name.
pub async fn get_top_skills(
    db: &Database,
    filter: &AnalyticsFilter,
    limit: i64,
) -> Result<Vec<SkillCount>> {
    let sql = format!(
        r#"
        SELECT s.skill, COUNT(DISTINCT j.id) AS n
          FROM job_skills s
          JOIN jobs j ON j.id = s.job_id
          JOIN raw_records r ON r.url = j.url
        {JOB_FILTERS}
         GROUP BY s.skill
         ORDER BY n DESC, s.skill ASC
         LIMIT $6
        "#
    );
    let rows: Vec<(String, i64)> = with_pool!(db, |pool| {
        bind_scope!(sqlx::query_as(&sql), filter, filter.date_from, filter.date_to)
            .bind(limit.max(0))
            .fetch_all(pool)
            .await
            .context("ranking top skills")?
    });
    Ok(rows
        .into_iter()
        .map(|(skill, count)| SkillCount { skill, count })
        .collect())
}

/// Top skills computed separately for every source present in the environment.
pub async fn get_top_skills_by_source(
    db: &Database,
    filter: &AnalyticsFilter,
    limit: i64,
) -> Result<BTreeMap<String, Vec<SkillCount>>> {
    let sources: Vec<String> = with_pool!(db, |pool| {
        sqlx::query_scalar(
            "SELECT DISTINCT source FROM raw_records WHERE environment = $1 ORDER BY source",
        )
        .bind(filter.environment.as_str())
        .fetch_all(pool)
        .await
        .context("listing sources")?
    });

    let mut by_source = BTreeMap::new();
    for source in sources {
        let scoped = AnalyticsFilter {
            source: Some(source.clone()),
            ..filter.clone()
        };
        let skills = get_top_skills(db, &scoped, limit).await?;
        by_source.insert(source, skills);
    }
    Ok(by_source)
}

/// Distinct-job counts per skill and time bucket of the raw record's `ingested_at`.
///
/// The date range selects whole calendar days of `ingested_at`. Without an explicit
/// granularity one is picked from the range via [`Granularity::auto`].
pub async fn get_skill_trends(
    db: &Database,
    skills: &[String],
    filter: &AnalyticsFilter,
    granularity: Option<Granularity>,
) -> Result<SkillTrends> {
    let today = Utc::now().date_naive();
    let granularity =
        granularity.unwrap_or_else(|| Granularity::auto(filter.date_from, filter.date_to, today));
    let skills: Vec<String> = skills
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if skills.is_empty() {
        return Ok(SkillTrends {
            granularity,
            points: Vec::new(),
        });
    }

    let from_ts = filter.date_from.map(|d| d.and_time(NaiveTime::default()));
    let to_ts = filter
        .date_to
        .and_then(|d| d.succ_opt())
        .map(|d| d.and_time(NaiveTime::default()));
    let placeholders = (0..skills.len())
        .map(|i| format!("${}", i + 6))
        .collect::<Vec<_>>()
        .join(", ");
    let bucket = bucket_expr(db.dialect(), granularity, "r.ingested_at");
    let sql = format!(
        r#"
        SELECT {bucket} AS bucket, s.skill, COUNT(DISTINCT j.id) AS n
          FROM job_skills s
          JOIN jobs j ON j.id = s.job_id
          JOIN raw_records r ON r.url = j.url
         WHERE r.environment = $1
           AND (CAST($2 AS TEXT) IS NULL OR r.source = $2)
           AND (CAST($3 AS TIMESTAMP) IS NULL OR r.ingested_at >= $3)
           AND (CAST($4 AS TIMESTAMP) IS NULL OR r.ingested_at < $4)
           AND (CAST($5 AS TEXT) IS NULL
                OR LOWER(j.title) LIKE $5
                OR LOWER(j.company) LIKE $5
                OR LOWER(j.location) LIKE $5)
           AND s.skill IN ({placeholders})
         GROUP BY 1, s.skill
         ORDER BY 1, s.skill
        "#
    );
    debug!(%granularity, skills = skills.len(), "querying skill trends");

    let rows: Vec<(String, String, i64)> = with_pool!(db, |pool| {
        let mut query = bind_scope!(sqlx::query_as(&sql), filter, from_ts, to_ts);
        for skill in &skills {
            query = query.bind(skill.as_str());
        }
        query
            .fetch_all(pool)
            .await
            .context("bucketing skill trends")?
    });

    let points = rows
        .into_iter()
        .map(|(bucket, skill, count)| {
            let bucket = NaiveDateTime::parse_from_str(&bucket, BUCKET_FORMAT)
                .with_context(|| format!("parsing bucket {bucket:?}"))?;
            Ok(TrendPoint {
                bucket,
                skill,
                count,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SkillTrends {
        granularity,
        points,
    })
}
