use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::types::QuestionAnswer;
use crate::utils::Metrics;

/// On-disk entry, one JSON file per syllabus/topic pair
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    #[serde(default)]
    questions_answers: Vec<QuestionAnswer>,
    /// Milliseconds since the Unix epoch; entries without it never expire
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    created_at: Option<i64>,
}

/// Generated Q&A cache with a time-to-live.
///
/// Entries live under `cache_dir` as `<sha256>.json`. Expiry is checked on
/// read and expired files are removed then. Read failures count as misses
/// so a broken entry never fails a request.
#[derive(Clone)]
pub struct QaCache {
    dir: PathBuf,
    ttl: Duration,
    metrics: Option<Metrics>,
}

impl QaCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, metrics: Option<Metrics>) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            metrics,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for a syllabus and topic title: SHA-256 of `content::title`, hex encoded
    pub fn generate_key(content: &str, topic_title: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update(b"::");
        hasher.update(topic_title.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub async fn get(&self, key: &str) -> Option<Vec<QuestionAnswer>> {
        self.get_at(key, chrono::Utc::now().timestamp_millis()).await
    }

    pub(crate) async fn get_at(&self, key: &str, now_ms: i64) -> Option<Vec<QuestionAnswer>> {
        let found = self.read_fresh(key, now_ms).await;

        if let Some(ref m) = self.metrics {
            match found {
                Some(_) => m.record_cache_hit(),
                None => m.record_cache_miss(),
            }
        }

        found
    }

    async fn read_fresh(&self, key: &str, now_ms: i64) -> Option<Vec<QuestionAnswer>> {
        let path = self.entry_path(key);

        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Q&A cache read error for {}: {}", path.display(), e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Q&A cache entry {} is not valid JSON: {}", path.display(), e);
                return None;
            }
        };

        if let Some(created_at) = entry.created_at.filter(|ms| *ms > 0) {
            let age_secs = (now_ms - created_at).div_euclid(1000);
            if age_secs > self.ttl.as_secs() as i64 {
                debug!("Q&A cache entry {} expired ({}s old)", key, age_secs);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove expired Q&A cache {}: {}", path.display(), e);
                }
                return None;
            }
        }

        Some(entry.questions_answers)
    }

    pub async fn put(&self, key: &str, questions_answers: &[QuestionAnswer]) -> Result<()> {
        self.put_at(key, questions_answers, chrono::Utc::now().timestamp_millis())
            .await
    }

    pub(crate) async fn put_at(
        &self,
        key: &str,
        questions_answers: &[QuestionAnswer],
        created_at_ms: i64,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create Q&A cache directory")?;

        let entry = CacheEntry {
            questions_answers: questions_answers.to_vec(),
            created_at: Some(created_at_ms),
        };
        let json = serde_json::to_string(&entry).context("Failed to serialize Q&A cache entry")?;

        tokio::fs::write(self.entry_path(key), json)
            .await
            .context("Failed to write Q&A cache entry")?;

        Ok(())
    }

    /// Delete every cached entry, returning how many files were removed.
    ///
    /// Files that cannot be removed are logged and skipped.
    pub async fn clear(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("Failed to read Q&A cache directory"),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to list Q&A cache directory")?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove cache file {}: {}", path.display(), e),
            }
        }

        Ok(removed)
    }
}
