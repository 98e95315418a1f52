//! Analysis cache: transcript + selected moments keyed by video id.
//!
//! Transcription and LLM analysis are the expensive stages, so their outputs
//! are cached per video id. A moments entry is only reused when the
//! requesting job's model matches the model that produced it; a fresh
//! analysis overwrites the entry (never appends). Writers for the same video
//! id are serialized through a per-id async lock; readers tolerate a
//! concurrent writer because replacement is atomic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use clipline_models::{Moment, Transcript, VideoId};

use crate::error::StorageResult;
use crate::fsio;

/// One cached analysis for one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEntry {
    pub video_id: VideoId,
    pub video_url: String,

    /// Model that produced the cached moments.
    pub model: String,

    pub transcript: Transcript,
    pub moments: Vec<Moment>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    pub duration_seconds: f64,

    pub cached_at: DateTime<Utc>,
}

/// Cache introspection result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInfo {
    pub exists: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub moments_count: usize,
}

impl CacheInfo {
    fn missing() -> Self {
        Self {
            exists: false,
            model: None,
            moments_count: 0,
        }
    }
}

/// Content-addressed store of analysis entries.
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    dir: PathBuf,
    write_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AnalysisCache {
    /// Open (or create) the cache directory.
    pub async fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn entry_path(&self, video_id: &VideoId) -> PathBuf {
        self.dir.join(format!("{}.json", video_id))
    }

    /// Acquire the per-video-id write lock. Two concurrent jobs on the same
    /// video serialize their cache writes through this guard; last writer
    /// wins, but neither can corrupt the entry.
    pub async fn lock(&self, video_id: &VideoId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.write_locks.lock().await;
            locks
                .entry(video_id.as_str().to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Load the entry for a video id. Corrupt entries read as a miss.
    pub async fn load(&self, video_id: &VideoId) -> Option<AnalysisEntry> {
        let entry: AnalysisEntry = fsio::read_json_lenient(self.entry_path(video_id)).await?;
        if entry.video_id != *video_id {
            debug!(video_id = %video_id, "Cache entry id mismatch, treating as miss");
            return None;
        }
        Some(entry)
    }

    /// Load the entry only when its moments came from `model`.
    /// A transcript-only reuse path goes through [`Self::load`] instead.
    pub async fn load_for_model(&self, video_id: &VideoId, model: &str) -> Option<AnalysisEntry> {
        let entry = self.load(video_id).await?;
        if entry.model != model {
            debug!(
                video_id = %video_id,
                cached_model = %entry.model,
                requested_model = %model,
                "Cached analysis produced by a different model, treating as miss"
            );
            return None;
        }
        Some(entry)
    }

    /// Store (overwrite) the entry for a video id.
    pub async fn store(&self, entry: &AnalysisEntry) -> StorageResult<()> {
        debug!(
            video_id = %entry.video_id,
            model = %entry.model,
            moments = entry.moments.len(),
            "Storing analysis cache entry"
        );
        fsio::write_json(self.entry_path(&entry.video_id), entry).await
    }

    /// Report whether cached analysis exists, which model produced it and
    /// how many moments are cached.
    pub async fn info(&self, video_id: &VideoId) -> CacheInfo {
        match self.load(video_id).await {
            Some(entry) => CacheInfo {
                exists: true,
                model: Some(entry.model),
                moments_count: entry.moments.len(),
            },
            None => CacheInfo::missing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipline_models::Word;
    use tempfile::TempDir;

    fn entry(video_id: &str, model: &str) -> AnalysisEntry {
        AnalysisEntry {
            video_id: VideoId::from_string(video_id),
            video_url: format!("https://youtube.com/watch?v={}", video_id),
            model: model.to_string(),
            transcript: Transcript::from_words(vec![
                Word::new("hello", 0.0, 0.4),
                Word::new("world", 0.4, 0.9),
            ]),
            moments: vec![Moment::new(0.0, 30.0, "Opening")],
            video_title: Some("Test".to_string()),
            channel: None,
            thumbnail: None,
            duration_seconds: 600.0,
            cached_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_store_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = AnalysisCache::open(dir.path()).await.unwrap();

        let e = entry("abc123def45", "google/gemini-2.0-flash-001");
        cache.store(&e).await.unwrap();

        let loaded = cache.load(&e.video_id).await.unwrap();
        assert_eq!(loaded.moments.len(), 1);
        assert_eq!(loaded.transcript.word_count(), 2);
    }

    #[tokio::test]
    async fn test_model_mismatch_is_miss() {
        let dir = TempDir::new().unwrap();
        let cache = AnalysisCache::open(dir.path()).await.unwrap();

        let e = entry("abc123def45", "google/gemini-2.0-flash-001");
        cache.store(&e).await.unwrap();

        assert!(cache
            .load_for_model(&e.video_id, "google/gemini-2.0-flash-001")
            .await
            .is_some());
        assert!(cache
            .load_for_model(&e.video_id, "anthropic/claude-sonnet-4")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_store_overwrites_not_appends() {
        let dir = TempDir::new().unwrap();
        let cache = AnalysisCache::open(dir.path()).await.unwrap();

        let first = entry("abc123def45", "model-a");
        cache.store(&first).await.unwrap();

        let mut second = entry("abc123def45", "model-b");
        second.moments = vec![
            Moment::new(0.0, 30.0, "One"),
            Moment::new(60.0, 100.0, "Two"),
        ];
        cache.store(&second).await.unwrap();

        let info = cache.info(&first.video_id).await;
        assert!(info.exists);
        assert_eq!(info.model.as_deref(), Some("model-b"));
        assert_eq!(info.moments_count, 2);

        // One file on disk, not an accumulating list
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_entry_info() {
        let dir = TempDir::new().unwrap();
        let cache = AnalysisCache::open(dir.path()).await.unwrap();

        let info = cache.info(&VideoId::from_string("nothere1234")).await;
        assert!(!info.exists);
        assert_eq!(info.moments_count, 0);
    }

    #[tokio::test]
    async fn test_per_video_lock_serializes_writers() {
        let dir = TempDir::new().unwrap();
        let cache = AnalysisCache::open(dir.path()).await.unwrap();
        let video_id = VideoId::from_string("abc123def45");

        let guard = cache.lock(&video_id).await;
        let cache2 = cache.clone();
        let video_id2 = video_id.clone();
        let contender = tokio::spawn(async move {
            let _guard = cache2.lock(&video_id2).await;
        });

        // The second writer cannot acquire the lock while we hold it
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }
}
