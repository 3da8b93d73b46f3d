//! Core domain model for JobIntel: environments, raw payloads, canonical jobs and ingest runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Keys every payload must carry (non-empty) before it enters the pipeline.
pub const REQUIRED_KEYS: [&str; 3] = ["source", "url", "title"];

/// Text form shared by SQL bucket expressions and [`Granularity::bucket_start`].
pub const BUCKET_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid environment {0:?} (expected development, test or production)")]
pub struct InvalidEnvironment(pub String);

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Development,
        Environment::Test,
        Environment::Production,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = InvalidEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" => Ok(Environment::Production),
            _ => Err(InvalidEnvironment(s.to_string())),
        }
    }
}

/// Listing as handed over by a source adapter, before normalization into a [`Job`].
///
/// Canonical keys are typed; anything vendor specific lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "PayloadFields")]
pub struct RawPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Incoming shape of a payload. `content_fingerprint` is the older name of
/// `content_hash`; both may appear and `content_hash` wins.
#[derive(Deserialize)]
struct PayloadFields {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, deserialize_with = "text_or_epoch")]
    posted_at: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    content_hash: Option<String>,
    #[serde(default)]
    content_fingerprint: Option<String>,
    #[serde(flatten)]
    extra: Map<String, JsonValue>,
}

impl From<PayloadFields> for RawPayload {
    fn from(fields: PayloadFields) -> Self {
        Self {
            source: fields.source,
            external_id: fields.external_id,
            url: fields.url,
            title: fields.title,
            company: fields.company,
            location: fields.location,
            description: fields.description,
            posted_at: fields.posted_at,
            tags: fields.tags,
            content_hash: fields.content_hash.or(fields.content_fingerprint),
            extra: fields.extra,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrEpoch {
    Text(String),
    Seconds(i64),
    FractionalSeconds(f64),
}

/// Accept a date string, or unix seconds which become an RFC 3339 UTC timestamp.
fn text_or_epoch<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let epoch = |secs: i64| DateTime::from_timestamp(secs, 0).map(|dt| dt.to_rfc3339());
    Ok(match Option::<TextOrEpoch>::deserialize(deserializer)? {
        None => None,
        Some(TextOrEpoch::Text(text)) => Some(text),
        Some(TextOrEpoch::Seconds(secs)) => epoch(secs),
        Some(TextOrEpoch::FractionalSeconds(secs)) => epoch(secs.trunc() as i64),
    })
}

impl RawPayload {
    pub fn new(source: &str, url: &str, title: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            url: Some(url.to_string()),
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    fn required_value(&self, key: &str) -> Option<&str> {
        match key {
            "source" => self.source.as_deref(),
            "url" => self.url.as_deref(),
            "title" => self.title.as_deref(),
            _ => None,
        }
    }

    /// Required keys that are absent or blank, in [`REQUIRED_KEYS`] order.
    pub fn missing_required_keys(&self) -> Vec<&'static str> {
        REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| {
                self.required_value(key)
                    .map(|v| v.trim().is_empty())
                    .unwrap_or(true)
            })
            .collect()
    }

    pub fn non_empty_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    /// Calendar date of `posted_at`, when it is an ISO date or an ISO/RFC 3339 date-time.
    pub fn posted_date(&self) -> Option<NaiveDate> {
        self.posted_at.as_deref().and_then(parse_iso_date)
    }
}

pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.date());
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: i64,
    pub source: String,
    pub payload: RawPayload,
    pub url: Option<String>,
    pub content_hash: String,
    pub ingested_at: NaiveDateTime,
    pub environment: Environment,
}

/// Canonical, de-duplicated posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub posted_at: Option<NaiveDate>,
    pub description: Option<String>,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: String,
    pub posted_at: Option<NaiveDate>,
    pub description: Option<String>,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkillTag {
    pub job_id: i64,
    pub skill: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ingest status {0:?}")]
pub struct InvalidIngestStatus(pub String);

impl IngestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestStatus::Running => "running",
            IngestStatus::Success => "success",
            IngestStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, IngestStatus::Running)
    }
}

impl FromStr for IngestStatus {
    type Err = InvalidIngestStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(IngestStatus::Running),
            "success" => Ok(IngestStatus::Success),
            "failed" => Ok(IngestStatus::Failed),
            other => Err(InvalidIngestStatus(other.to_string())),
        }
    }
}

/// Audit record for one orchestrated ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRun {
    pub id: i64,
    pub source: String,
    pub search: Option<String>,
    pub limit: i64,
    pub environment: Environment,
    pub status: IngestStatus,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub fetched: i64,
    pub inserted_raw: i64,
    pub inserted_jobs: i64,
    pub inserted_skills: i64,
    pub warnings: Option<Vec<String>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResult {
    pub fetched: usize,
    pub inserted_raw: usize,
    pub inserted_jobs: usize,
    pub inserted_skills: usize,
    pub warnings: Vec<String>,
}

/// Trend bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid granularity {0:?} (expected 6h, day or week)")]
pub struct InvalidGranularity(pub String);

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::SixHours => "6h",
            Granularity::Day => "day",
            Granularity::Week => "week",
        }
    }

    /// Pick a width from the requested range: up to 7 days → 6h, up to 60 → day, else week.
    pub fn auto(date_from: Option<NaiveDate>, date_to: Option<NaiveDate>, today: NaiveDate) -> Self {
        let Some(from) = date_from else {
            return if date_to.is_some() {
                Granularity::Week
            } else {
                Granularity::SixHours
            };
        };
        let span = (date_to.unwrap_or(today) - from).num_days();
        if span <= 7 {
            Granularity::SixHours
        } else if span <= 60 {
            Granularity::Day
        } else {
            Granularity::Week
        }
    }

    /// Start of the bucket containing `ts`. 6h buckets start at 00/06/12/18, weeks on Monday.
    pub fn bucket_start(self, ts: NaiveDateTime) -> NaiveDateTime {
        let day = ts.date();
        match self {
            Granularity::SixHours => {
                let hour = (ts.hour() / 6) * 6;
                day.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default())
            }
            Granularity::Day => day.and_time(NaiveTime::default()),
            Granularity::Week => {
                let back = i64::from(day.weekday().num_days_from_monday());
                (day - Duration::days(back)).and_time(NaiveTime::default())
            }
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = InvalidGranularity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "6h" => Ok(Granularity::SixHours),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            other => Err(InvalidGranularity(other.to_string())),
        }
    }
}
