//! Keyword skill tagging over job descriptions.

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use jobintel_core::SkillTag;
use jobintel_storage::Database;
use regex::Regex;
use tracing::info;

/// Skill name → pattern, matched against the lowercased description.
pub const SKILL_PATTERNS: &[(&str, &str)] = &[
    ("python", r"\bpython\b"),
    ("sql", r"\bsql\b"),
    ("pandas", r"\bpandas\b"),
    ("aws", r"\baws\b|\bamazon web services\b"),
    ("fastapi", r"\bfastapi\b"),
    ("postgres", r"\bpostgres(?:ql)?\b"),
    ("docker", r"\bdocker\b"),
    ("scikit-learn", r"\bscikit[- ]learn\b|\bsklearn\b"),
    ("pytest", r"\bpytest\b"),
    ("ci", r"\bci\b|\bcontinuous integration\b"),
    ("kubernetes", r"\bkubernetes\b|\bk8s\b"),
    ("terraform", r"\bterraform\b"),
    ("react", r"\breact(?:\.js|js)?\b"),
    ("typescript", r"\btypescript\b"),
    ("gcp", r"\bgcp\b|\bgoogle cloud\b"),
    ("django", r"\bdjango\b"),
];

#[derive(Debug, Clone)]
pub struct SkillExtractor {
    patterns: Vec<(String, Regex)>,
}

impl Default for SkillExtractor {
    fn default() -> Self {
        Self::from_patterns(SKILL_PATTERNS).expect("built-in skill patterns compile")
    }
}

impl SkillExtractor {
    pub fn from_patterns(patterns: &[(&str, &str)]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|(skill, pattern)| Ok((skill.to_string(), Regex::new(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { patterns })
    }

    pub fn skills(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(skill, _)| skill.as_str())
    }

    pub fn extract(&self, text: &str) -> BTreeSet<String> {
        let text = text.to_lowercase();
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(&text))
            .map(|(skill, _)| skill.clone())
            .collect()
    }

    /// Tag every job with the skills its description mentions. Pairs that already
    /// exist are skipped, so a second run with no new jobs inserts nothing.
    pub async fn extract_for_all_jobs(&self, db: &Database) -> Result<usize> {
        let mut existing: HashSet<(i64, String)> = db
            .list_skill_tags()
            .await?
            .into_iter()
            .map(|tag| (tag.job_id, tag.skill))
            .collect();
        let jobs = db.list_jobs().await?;

        let mut pending = Vec::new();
        for job in &jobs {
            let Some(description) = job.description.as_deref() else {
                continue;
            };
            for skill in self.extract(description) {
                if existing.insert((job.id, skill.clone())) {
                    pending.push(SkillTag {
                        job_id: job.id,
                        skill,
                    });
                }
            }
        }

        let inserted = db.insert_skill_tags(&pending).await?;
        info!(jobs = jobs.len(), inserted, "extracted skills");
        Ok(inserted)
    }
}
