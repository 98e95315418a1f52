//! Rendered clip records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One rendered output file. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    pub file_path: PathBuf,
    pub filename: String,
    pub title: String,
    /// Source-relative start of the clip window, seconds.
    pub start: f64,
    /// Source-relative end of the clip window, seconds.
    pub end: f64,
    /// Duration of the clip window, seconds (teaser excluded).
    pub duration: f64,
    pub size_bytes: u64,
}

impl Clip {
    pub fn new(
        file_path: impl Into<PathBuf>,
        title: impl Into<String>,
        start: f64,
        end: f64,
        size_bytes: u64,
    ) -> Self {
        let file_path = file_path.into();
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            file_path,
            filename,
            title: title.into(),
            start,
            end,
            duration: end - start,
            size_bytes,
        }
    }
}

/// Entry in a job's clip list. A failed render is recorded as a skipped
/// entry with an error note instead of aborting the sibling renders.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClipOutcome {
    Rendered(Clip),
    Skipped { title: String, error: String },
}

impl ClipOutcome {
    pub fn skipped(title: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Skipped {
            title: title.into(),
            error: error.into(),
        }
    }

    pub fn as_clip(&self) -> Option<&Clip> {
        match self {
            ClipOutcome::Rendered(clip) => Some(clip),
            ClipOutcome::Skipped { .. } => None,
        }
    }
}
