//! Atomic JSON file I/O.
//!
//! Writers serialize to a sibling `.tmp` file and rename it over the
//! destination. Rename is atomic on a single filesystem, so concurrent
//! readers see either the old or the new content, never a truncated file.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::warn;

use crate::error::StorageResult;

/// Write `value` as pretty JSON to `path` atomically.
pub async fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> StorageResult<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("tmp");

    fs::write(&tmp, &json).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    Ok(())
}

/// Read JSON from `path`. Returns `None` when the file is missing.
pub async fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> StorageResult<Option<T>> {
    let path = path.as_ref();
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read JSON, treating a corrupt file as absent (logged, not fatal).
pub async fn read_json_lenient<T: DeserializeOwned>(path: impl AsRef<Path>) -> Option<T> {
    let path = path.as_ref();
    match read_json(path).await {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("record.json");
        let record = Record {
            name: "a".to_string(),
            count: 3,
        };

        write_json(&path, &record).await.unwrap();
        let back: Record = read_json(&path).await.unwrap().unwrap();
        assert_eq!(back, record);

        // No stray temp file left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let got: Option<Record> = read_json(dir.path().join("missing.json")).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_lenient_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.json");
        fs::write(&path, b"{ not json").await.unwrap();

        let strict: StorageResult<Option<Record>> = read_json(&path).await;
        assert!(strict.is_err());

        let lenient: Option<Record> = read_json_lenient(&path).await;
        assert!(lenient.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record.json");

        write_json(&path, &Record { name: "old".into(), count: 1 })
            .await
            .unwrap();
        write_json(&path, &Record { name: "new".into(), count: 2 })
            .await
            .unwrap();

        let back: Record = read_json(&path).await.unwrap().unwrap();
        assert_eq!(back.name, "new");
        assert_eq!(back.count, 2);
    }
}
