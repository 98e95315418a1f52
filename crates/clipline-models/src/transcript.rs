//! Word-level transcript model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single transcribed word with its spoken window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Word {
    pub word: String,
    /// Start time in seconds from the beginning of the source.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
}

impl Word {
    pub fn new(word: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
        }
    }
}

/// Word-level transcript for one video. Immutable after creation and cached
/// keyed by video id so repeated jobs skip re-transcription.
///
/// Both transcription providers produce this exact shape, so everything
/// downstream is provider-agnostic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Transcript {
    pub words: Vec<Word>,
    pub text: String,
}

impl Transcript {
    /// Build a transcript from an ordered word list. The full text is joined
    /// from the words.
    pub fn from_words(words: Vec<Word>) -> Self {
        let text = words
            .iter()
            .map(|w| w.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self { words, text }
    }

    /// Empty/silent audio produces an empty word list, not an error.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Duration in seconds (end of the last word).
    pub fn duration(&self) -> f64 {
        self.words.last().map(|w| w.end).unwrap_or(0.0)
    }

    /// Words whose spoken window lies inside `[start, end]`, with a small
    /// slack at both edges for words straddling the cut.
    pub fn words_between(&self, start: f64, end: f64) -> Vec<Word> {
        const EDGE_SLACK: f64 = 0.5;
        self.words
            .iter()
            .filter(|w| w.start >= start - EDGE_SLACK && w.end <= end + EDGE_SLACK)
            .cloned()
            .collect()
    }

    /// Average spoken words per second over the whole transcript.
    pub fn words_per_second(&self) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            return 0.0;
        }
        self.words.len() as f64 / duration
    }
}
