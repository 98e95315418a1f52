//! Per-job configuration and the job submission request.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Transcription backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionProvider {
    /// Fully offline inference via a local whisper.cpp binary.
    #[default]
    Local,
    /// Hosted speech API (OpenAI-compatible audio transcription endpoint).
    Remote,
}

impl TranscriptionProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionProvider::Local => "local",
            TranscriptionProvider::Remote => "remote",
        }
    }

    /// The other provider, used only when fallback is explicitly configured.
    pub fn alternate(&self) -> Self {
        match self {
            TranscriptionProvider::Local => TranscriptionProvider::Remote,
            TranscriptionProvider::Remote => TranscriptionProvider::Local,
        }
    }
}

impl fmt::Display for TranscriptionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Visual layout of the rendered vertical clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipFormat {
    /// Aspect-preserved source over a blurred letterbox fill.
    #[default]
    Fullscreen,
    /// Letterboxed full frame on top, zoomed subject crop below.
    Split,
    /// Zoomed subject crop fills the whole frame.
    Center,
}

impl ClipFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipFormat::Fullscreen => "fullscreen",
            ClipFormat::Split => "split",
            ClipFormat::Center => "center",
        }
    }
}

impl fmt::Display for ClipFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Horizontal reference point for the zoom crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CropAnchor {
    /// Face/person tracking decides the crop center.
    Auto,
    Left,
    #[default]
    Center,
    Right,
}

impl CropAnchor {
    /// Fixed normalized x for non-auto anchors. `None` means centered.
    pub fn fixed_x(&self) -> Option<f64> {
        match self {
            CropAnchor::Left => Some(0.2),
            CropAnchor::Right => Some(0.8),
            CropAnchor::Center | CropAnchor::Auto => None,
        }
    }
}

/// Title overlay placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TitlePosition {
    /// Shown in the caption zone from clip start, fades out after the intro
    /// duration. Captions are suppressed while the title is visible.
    #[default]
    Intro,
    /// Pinned at the top for the full clip, concurrent with captions.
    Top,
}

/// The recognized per-job options. Supplied once per job and immutable for
/// the run; serde defaults apply for any omitted field.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct JobConfig {
    /// LLM used for moment selection (OpenRouter model identifier).
    pub model: String,

    pub max_clips: usize,

    /// Minimum clip duration in seconds.
    pub min_duration: f64,

    /// Maximum clip duration in seconds.
    pub max_duration: f64,

    /// Re-run LLM analysis even when cached moments exist.
    pub reanalyze: bool,

    pub transcription_provider: TranscriptionProvider,

    /// Retry transcription with the alternate provider on failure.
    /// Off by default: provider failure is terminal unless opted in.
    pub transcription_fallback: bool,

    pub clip_format: ClipFormat,

    pub crop_anchor: CropAnchor,

    pub captions: bool,

    pub caption_font_size: u32,

    /// Caption distance from the bottom edge, in PlayRes pixels.
    pub caption_margin_v: u32,

    /// Words per caption group.
    pub caption_chunk_size: usize,

    pub caption_highlight: bool,

    /// #RRGGBB color for the currently-spoken word.
    pub caption_highlight_color: String,

    pub caption_font: String,

    pub title_enabled: bool,

    pub title_position: TitlePosition,

    /// Seconds the intro title stays visible before fading out.
    pub title_intro_duration: f64,

    pub title_font_size: u32,

    /// Title distance from the top edge in `top` mode, in PlayRes pixels.
    pub title_margin_v: u32,

    pub title_font: String,

    pub teaser_enabled: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            model: "google/gemini-2.0-flash-001".to_string(),
            max_clips: 5,
            min_duration: 20.0,
            max_duration: 90.0,
            reanalyze: false,
            transcription_provider: TranscriptionProvider::default(),
            transcription_fallback: false,
            clip_format: ClipFormat::default(),
            crop_anchor: CropAnchor::default(),
            captions: true,
            caption_font_size: 78,
            caption_margin_v: 350,
            caption_chunk_size: 3,
            caption_highlight: true,
            caption_highlight_color: "#ffff00".to_string(),
            caption_font: "Montserrat ExtraBold".to_string(),
            title_enabled: true,
            title_position: TitlePosition::default(),
            title_intro_duration: 3.5,
            title_font_size: 78,
            title_margin_v: 200,
            title_font: "Montserrat ExtraBold".to_string(),
            teaser_enabled: true,
        }
    }
}

/// Job submission request. Omitted fields fall back to persisted defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate, Default)]
pub struct JobRequest {
    #[validate(url(message = "source URL is not a valid URL"))]
    pub url: String,

    #[validate(range(min = 1, max = 20))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_clips: Option<usize>,

    #[validate(range(min = 5.0, max = 600.0))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<f64>,

    #[validate(range(min = 5.0, max = 600.0))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reanalyze: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
}

impl JobRequest {
    /// Merge the request over a defaults config, producing the job snapshot.
    pub fn apply_to(&self, mut config: JobConfig) -> JobConfig {
        if let Some(max_clips) = self.max_clips {
            config.max_clips = max_clips;
        }
        if let Some(min_duration) = self.min_duration {
            config.min_duration = min_duration;
        }
        if let Some(max_duration) = self.max_duration {
            config.max_duration = max_duration;
        }
        if let Some(reanalyze) = self.reanalyze {
            config.reanalyze = reanalyze;
        }
        if let Some(model) = &self.model_override {
            if !model.is_empty() {
                config.model = model.clone();
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_omitted_fields() {
        let config: JobConfig = serde_json::from_str(r#"{"max_clips": 3}"#).unwrap();
        assert_eq!(config.max_clips, 3);
        assert_eq!(config.min_duration, 20.0);
        assert_eq!(config.caption_chunk_size, 3);
        assert!(config.caption_highlight);
        assert_eq!(config.clip_format, ClipFormat::Fullscreen);
    }

    #[test]
    fn test_request_merge() {
        let request = JobRequest {
            url: "https://youtube.com/watch?v=abc123def45".to_string(),
            max_clips: Some(2),
            model_override: Some("anthropic/claude-sonnet-4".to_string()),
            ..Default::default()
        };
        let config = request.apply_to(JobConfig::default());
        assert_eq!(config.max_clips, 2);
        assert_eq!(config.model, "anthropic/claude-sonnet-4");
        assert_eq!(config.max_duration, 90.0);
    }

    #[test]
    fn test_request_validation() {
        let bad = JobRequest {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let good = JobRequest {
            url: "https://youtube.com/watch?v=abc123def45".to_string(),
            ..Default::default()
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_anchor_fixed_x() {
        assert_eq!(CropAnchor::Left.fixed_x(), Some(0.2));
        assert_eq!(CropAnchor::Right.fixed_x(), Some(0.8));
        assert_eq!(CropAnchor::Center.fixed_x(), None);
        assert_eq!(CropAnchor::Auto.fixed_x(), None);
    }
}
