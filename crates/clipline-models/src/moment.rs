//! LLM-proposed candidate clip windows.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One candidate moment proposed by the language model.
///
/// Invariants (enforced by the selector before a moment is accepted):
/// `end > start`, duration within the configured bounds, and the window
/// inside the transcript range.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Moment {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    pub title: String,

    /// 1-10 score of how likely the opening seconds stop a scroller.
    #[serde(default = "default_hook_score")]
    pub hook_score: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_reason: Option<String>,

    /// Seconds from the clip start to the most compelling spoken moment,
    /// used as the teaser window. `None` when no standout moment exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_offset: Option<f64>,
}

fn default_hook_score() -> f64 {
    7.0
}

impl Moment {
    pub fn new(start: f64, end: f64, title: impl Into<String>) -> Self {
        Self {
            start,
            end,
            title: title.into(),
            hook_score: default_hook_score(),
            reason: None,
            hook_reason: None,
            peak_offset: None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Seconds of overlap between two windows (0 when disjoint).
    pub fn overlap_with(&self, other: &Moment) -> f64 {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (end - start).max(0.0)
    }

    /// True when the windows intersect by more than `tolerance` seconds.
    pub fn overlaps(&self, other: &Moment, tolerance: f64) -> bool {
        self.overlap_with(other) > tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let m = Moment::new(10.0, 55.0, "Reversal");
        assert_eq!(m.duration(), 45.0);
    }

    #[test]
    fn test_overlap() {
        let a = Moment::new(10.0, 40.0, "a");
        let b = Moment::new(38.0, 70.0, "b");
        let c = Moment::new(41.0, 70.0, "c");

        assert_eq!(a.overlap_with(&b), 2.0);
        assert!(a.overlaps(&b, 1.0));
        assert!(!a.overlaps(&b, 2.0));
        assert!(!a.overlaps(&c, 1.0));
    }

    #[test]
    fn test_hook_score_default_on_deserialize() {
        let m: Moment =
            serde_json::from_str(r#"{"start": 1.0, "end": 30.0, "title": "t"}"#).unwrap();
        assert_eq!(m.hook_score, 7.0);
        assert!(m.peak_offset.is_none());
    }
}
