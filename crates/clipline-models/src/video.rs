//! Stable video identifiers derived from source URLs.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Stable identifier for a source video.
///
/// YouTube URLs yield the platform's 11-character id; anything else falls
/// back to the SHA-256 hex digest of the trimmed URL so cache keys stay
/// stable across resubmissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VideoIdError {
    #[error("URL could not be parsed")]
    InvalidUrl,
}

/// Derive the stable video id for a source URL.
pub fn extract_video_id(url: &str) -> Result<VideoId, VideoIdError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(VideoIdError::InvalidUrl);
    }
    let parsed = Url::parse(trimmed).map_err(|_| VideoIdError::InvalidUrl)?;

    if let Some(id) = youtube_id(&parsed) {
        return Ok(VideoId(id));
    }

    let digest = Sha256::digest(trimmed.as_bytes());
    Ok(VideoId(format!("{:x}", digest)))
}

/// Extract a YouTube video id from a parsed URL, if it is one.
fn youtube_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_start_matches("www.");

    let candidate = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" | "m.youtube.com" | "music.youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.to_string()),
                Some("shorts") | Some("embed") | Some("live") => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        }
        _ => None,
    }?;

    if is_valid_youtube_id(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

/// YouTube ids are exactly 11 characters of [A-Za-z0-9_-].
fn is_valid_youtube_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_watch_url() {
        let id = extract_video_id("https://youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(id.as_str(), "dQw4w9WgXcQ");
    }

    #[test]
    fn test_youtube_short_forms() {
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ").unwrap().0,
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/shorts/dQw4w9WgXcQ")
                .unwrap()
                .0,
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            extract_video_id("https://youtube.com/embed/dQw4w9WgXcQ")
                .unwrap()
                .0,
            "dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_watch_url_with_extra_params() {
        let id = extract_video_id("https://youtube.com/watch?v=dQw4w9WgXcQ&list=xyz&t=42").unwrap();
        assert_eq!(id.as_str(), "dQw4w9WgXcQ");
    }

    #[test]
    fn test_non_youtube_url_hashes() {
        let id = extract_video_id("https://vimeo.com/123456").unwrap();
        assert_eq!(id.as_str().len(), 64);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));

        // Stable across calls and surrounding whitespace
        let again = extract_video_id("  https://vimeo.com/123456 ").unwrap();
        assert_eq!(id, again);
    }

    #[test]
    fn test_invalid_youtube_id_falls_back_to_hash() {
        // Wrong id length: treated as a generic URL, not rejected
        let id = extract_video_id("https://youtube.com/watch?v=short").unwrap();
        assert_eq!(id.as_str().len(), 64);
    }

    #[test]
    fn test_unparseable_url() {
        assert_eq!(extract_video_id("not a url"), Err(VideoIdError::InvalidUrl));
        assert_eq!(extract_video_id(""), Err(VideoIdError::InvalidUrl));
    }
}
