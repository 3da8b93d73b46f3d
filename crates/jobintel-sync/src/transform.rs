//! Raw records → canonical jobs.

use anyhow::Result;
use chrono::NaiveDate;
use jobintel_core::{NewJob, RawRecord};
use jobintel_storage::{sha256_hex, Database};
use tracing::{debug, info};

/// Secondary identity over the normalized (title, company, location, posted_at) tuple,
/// catching the same posting reached through different URLs.
pub fn job_hash(
    title: Option<&str>,
    company: Option<&str>,
    location: Option<&str>,
    posted_at: Option<NaiveDate>,
) -> String {
    let part = |v: Option<&str>| v.unwrap_or_default().trim().to_lowercase();
    let joined = [
        part(title),
        part(company),
        part(location),
        posted_at.map(|d| d.to_string()).unwrap_or_default(),
    ]
    .join("|");
    sha256_hex(joined.as_bytes())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// `None` when the record has no URL or no title to build a job from.
pub fn normalize_record(record: &RawRecord) -> Option<NewJob> {
    let payload = &record.payload;
    let url = payload.non_empty_url()?.to_string();
    let title = non_blank(payload.title.as_deref())?;
    let company = non_blank(payload.company.as_deref());
    let location = non_blank(payload.location.as_deref());
    let posted_at = payload.posted_date();
    let content_hash = job_hash(
        Some(&title),
        company.as_deref(),
        location.as_deref(),
        posted_at,
    );
    Some(NewJob {
        title,
        company,
        location,
        url,
        posted_at,
        description: payload.description.clone(),
        content_hash,
    })
}

/// Create jobs for every raw record not yet represented, returning how many were created.
///
/// Seen URLs and hashes start from the jobs table and grow with the batch, so
/// duplicates are caught both across runs and within one call.
pub async fn transform_pending(db: &Database) -> Result<usize> {
    let mut seen = db.job_identities().await?;
    let records = db.list_raw_records().await?;

    let mut batch = Vec::new();
    for record in &records {
        let Some(job) = normalize_record(record) else {
            debug!(raw_id = record.id, "raw record lacks url or title");
            continue;
        };
        if seen.contains(&job.url, &job.content_hash) {
            continue;
        }
        seen.insert(&job.url, &job.content_hash);
        batch.push(job);
    }

    let inserted = db.insert_jobs(&batch).await?;
    info!(scanned = records.len(), inserted, "transformed raw records");
    Ok(inserted)
}
