//! Downloaded source video cache with a TTL.
//!
//! A cache hit lets a repeat job skip the download stage entirely. Entries
//! expire after 24 hours; expired files are removed on lookup and by the
//! periodic sweep at job start.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, info, warn};

use clipline_models::VideoId;

use crate::error::StorageResult;

/// Default time-to-live for cached video files.
pub const DEFAULT_VIDEO_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache of downloaded source files keyed by video id.
#[derive(Debug, Clone)]
pub struct VideoFileCache {
    dir: PathBuf,
    ttl: Duration,
}

impl VideoFileCache {
    /// Open (or create) the cache directory with the default TTL.
    pub async fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with_ttl(dir, DEFAULT_VIDEO_TTL).await
    }

    pub async fn open_with_ttl(dir: impl AsRef<Path>, ttl: Duration) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir, ttl })
    }

    /// Destination path for a video id's cached file.
    pub fn path_for(&self, video_id: &VideoId) -> PathBuf {
        self.dir.join(format!("{}.mp4", video_id))
    }

    /// Return the cached file path when present and fresh. An expired entry
    /// is deleted and reads as a miss.
    pub async fn lookup(&self, video_id: &VideoId) -> Option<PathBuf> {
        let path = self.path_for(video_id);
        let metadata = fs::metadata(&path).await.ok()?;

        if self.is_expired(&metadata) {
            if fs::remove_file(&path).await.is_ok() {
                info!(video_id = %video_id, "Expired video cache entry removed");
            }
            return None;
        }

        debug!(video_id = %video_id, path = %path.display(), "Video cache hit");
        Some(path)
    }

    /// Copy a freshly downloaded file into the cache. Best-effort: an
    /// existing entry is kept, a copy failure only logs. The copy lands in
    /// a temp file first so concurrent readers never see a partial entry.
    pub async fn store(&self, video_id: &VideoId, source: impl AsRef<Path>) {
        let source = source.as_ref();
        let dest = self.path_for(video_id);

        if dest == source || dest.exists() {
            return;
        }

        let tmp = dest.with_extension("mp4.tmp");
        let result = async {
            let bytes = fs::copy(source, &tmp).await?;
            fs::rename(&tmp, &dest).await?;
            Ok::<u64, std::io::Error>(bytes)
        }
        .await;

        match result {
            Ok(bytes) => info!(
                video_id = %video_id,
                size_mb = bytes as f64 / (1024.0 * 1024.0),
                "Cached source video"
            ),
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                warn!(video_id = %video_id, error = %e, "Failed to cache source video");
            }
        }
    }

    /// Remove every expired entry.
    pub async fn sweep_expired(&self) -> StorageResult<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if self.is_expired(&metadata) && fs::remove_file(&path).await.is_ok() {
                info!(path = %path.display(), "Swept expired video cache entry");
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn is_expired(&self, metadata: &std::fs::Metadata) -> bool {
        metadata
            .modified()
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }
}
