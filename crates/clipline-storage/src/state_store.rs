//! Per-job state persistence and terminal-job history.
//!
//! One JSON record per job under `jobs/`, keyed by job id, written through
//! on every state transition so a crash mid-stage leaves the last completed
//! stage's data intact. Terminal jobs are additionally appended to
//! `history.json`, which is never rewritten except to append.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use clipline_models::{Job, JobId};

use crate::error::StorageResult;
use crate::fsio;

/// Local store of job records.
#[derive(Debug, Clone)]
pub struct StateStore {
    jobs_dir: PathBuf,
    history_path: PathBuf,
}

impl StateStore {
    /// Open (or create) a store rooted at `data_dir`.
    pub async fn open(data_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let data_dir = data_dir.as_ref();
        let jobs_dir = data_dir.join("jobs");
        fs::create_dir_all(&jobs_dir).await?;

        Ok(Self {
            jobs_dir,
            history_path: data_dir.join("history.json"),
        })
    }

    fn job_path(&self, id: &JobId) -> PathBuf {
        self.jobs_dir.join(format!("{}.json", id))
    }

    /// Persist the full job snapshot (write-through).
    pub async fn save(&self, job: &Job) -> StorageResult<()> {
        fsio::write_json(self.job_path(&job.id), job).await
    }

    /// Load one job record; `None` when unknown.
    pub async fn load(&self, id: &JobId) -> StorageResult<Option<Job>> {
        fsio::read_json(self.job_path(id)).await
    }

    /// All persisted job records, newest first. Corrupt records are skipped.
    pub async fn list(&self) -> StorageResult<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(&self.jobs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(job) = fsio::read_json_lenient::<Job>(&path).await {
                jobs.push(job);
            }
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    /// Remove one job record (used after terminal persistence + cleanup).
    pub async fn remove(&self, id: &JobId) -> StorageResult<()> {
        match fs::remove_file(self.job_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append a terminal job to the history file.
    pub async fn append_history(&self, job: &Job) -> StorageResult<()> {
        let mut history: Vec<Job> = fsio::read_json_lenient(&self.history_path)
            .await
            .unwrap_or_default();
        history.push(job.clone());
        debug!(job_id = %job.id, entries = history.len(), "Appending job to history");
        fsio::write_json(&self.history_path, &history).await
    }

    /// Full history of terminal jobs, in append order.
    pub async fn history(&self) -> StorageResult<Vec<Job>> {
        Ok(fsio::read_json_lenient(&self.history_path)
            .await
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipline_models::{JobConfig, JobStatus, VideoId};
    use tempfile::TempDir;

    fn job(url: &str) -> Job {
        Job::new(
            JobId::new(),
            url,
            VideoId::from_string("abc123def45"),
            JobConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).await.unwrap();

        let job = job("https://youtube.com/watch?v=abc123def45");
        store.save(&job).await.unwrap();

        let loaded = store.load(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, JobStatus::Queued);

        assert!(store.load(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_records() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).await.unwrap();

        store.save(&job("https://example.com/a")).await.unwrap();
        fs::write(dir.path().join("jobs").join("broken.json"), b"nope")
            .await
            .unwrap();

        let jobs = store.list().await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_history_appends() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).await.unwrap();

        let mut a = job("https://example.com/a");
        a.complete();
        let mut b = job("https://example.com/b");
        b.fail("Download failed");

        store.append_history(&a).await.unwrap();
        store.append_history(&b).await.unwrap();

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, a.id);
        assert_eq!(history[1].status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).await.unwrap();

        let job = job("https://example.com/a");
        store.save(&job).await.unwrap();
        store.remove(&job.id).await.unwrap();
        store.remove(&job.id).await.unwrap();
        assert!(store.load(&job.id).await.unwrap().is_none());
    }
}
