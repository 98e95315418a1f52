//! Uniform detector interface for the speaker-tracking cascade.
//!
//! Each tier of the cascade (person detector, face-landmark detector,
//! classical cascade) implements the same trait and produces the same
//! result type, so the tracker can try them as an ordered list.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use clipline_models::Rect;

use crate::error::MediaResult;
use crate::tracking::frames::SampledFrame;

/// Which tier of the cascade produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorSource {
    /// General person/object detector tuned for the person class.
    Person,
    /// Face-landmark detector.
    FaceLandmark,
    /// Classical cascade-based face detector.
    Cascade,
    /// No detector fired; centered default crop.
    Default,
}

impl DetectorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorSource::Person => "person",
            DetectorSource::FaceLandmark => "face_landmark",
            DetectorSource::Cascade => "cascade",
            DetectorSource::Default => "default",
        }
    }
}

/// The dominant subject found in one sampled frame.
#[derive(Debug, Clone)]
pub struct FrameDetection {
    /// Source-relative timestamp of the frame, seconds.
    pub timestamp: f64,
    /// Subject bounding box in source pixels.
    pub bbox: Rect,
    pub confidence: f64,
    pub source: DetectorSource,
}

/// One tier of the detection cascade.
#[async_trait]
pub trait SubjectDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn source(&self) -> DetectorSource;

    /// Detect the dominant subject in each sampled frame. Frames without a
    /// subject contribute no entry; an empty result sends the cascade to
    /// the next tier.
    async fn detect(&self, frames: &[SampledFrame]) -> MediaResult<Vec<FrameDetection>>;
}
