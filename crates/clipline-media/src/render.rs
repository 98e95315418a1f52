//! Clip renderer: layout, captions, title overlay and teaser prepend.
//!
//! One render request produces one output file. A failure anywhere in here
//! is a per-moment failure: the caller records it and keeps rendering the
//! other moments.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use clipline_models::{Clip, ClipFormat, CropAnchor, JobConfig, Moment, VideoId, Word};

use crate::command::{CommandRunner, FfmpegCommand, LogSink};
use crate::error::{MediaError, MediaResult};
use crate::filters::{self, ZoomCrop};
use crate::probe::{probe_video, VideoInfo};
use crate::teaser::{self, TEASER_DURATION};
use crate::tracking::SpeakerTracker;
use crate::captions;

/// Encoding settings shared by every render pass.
const VIDEO_CODEC: &str = "libx264";
const PRESET: &str = "veryfast";
const CRF: u8 = 21;
const AUDIO_CODEC: &str = "aac";
const AUDIO_BITRATE: &str = "128k";

/// Outputs smaller than this are treated as silent encoder failures.
const MIN_OUTPUT_BYTES: u64 = 100_000;

/// Tolerated difference between requested and encoded duration, seconds.
const DURATION_DRIFT_WARN: f64 = 10.0;

/// Everything needed to render one moment into one clip file.
pub struct RenderRequest {
    pub source: PathBuf,
    pub video_id: VideoId,
    /// 0-based moment index; the output filename uses index + 1.
    pub index: usize,
    pub total: usize,
    pub moment: Moment,
    /// Full transcript word list (window filtering happens here).
    pub words: Vec<Word>,
    pub config: JobConfig,
    pub output_dir: PathBuf,
    /// Directory of caption font files passed to libass.
    pub fonts_dir: Option<PathBuf>,
    pub cancel: Option<watch::Receiver<bool>>,
    pub log_sink: Option<LogSink>,
}

/// Renders selected moments into vertical clips.
pub struct ClipRenderer {
    tracker: Arc<SpeakerTracker>,
    /// Per-FFmpeg-invocation timeout, seconds.
    timeout_secs: u64,
}

impl ClipRenderer {
    pub fn new() -> Self {
        Self {
            tracker: Arc::new(SpeakerTracker::new()),
            timeout_secs: 1800,
        }
    }

    pub fn with_tracker(tracker: Arc<SpeakerTracker>) -> Self {
        Self {
            tracker,
            timeout_secs: 1800,
        }
    }

    fn runner(&self, req: &RenderRequest) -> CommandRunner {
        let mut runner = CommandRunner::new().with_timeout(self.timeout_secs);
        if let Some(cancel) = &req.cancel {
            runner = runner.with_cancel(cancel.clone());
        }
        if let Some(sink) = &req.log_sink {
            runner = runner.with_log_sink(sink.clone());
        }
        runner
    }

    /// Render one moment to its output file.
    pub async fn render(&self, req: &RenderRequest) -> MediaResult<Clip> {
        let info = probe_video(&req.source).await?;
        let moment = &req.moment;

        tokio::fs::create_dir_all(&req.output_dir).await?;
        let output_path = req
            .output_dir
            .join(clip_filename(req.index, &moment.title));

        // When the teaser carries the title, the main clip starts straight
        // into captions and the intro never triggers twice.
        let peak_start = if req.config.teaser_enabled {
            teaser::resolve_peak_window(moment, &req.words)
        } else {
            None
        };
        let title_on_main = req.config.title_enabled && peak_start.is_none();

        info!(
            clip = req.index + 1,
            total = req.total,
            start = moment.start,
            end = moment.end,
            format = %req.config.clip_format,
            "Rendering clip"
        );

        let crop = self
            .resolve_zoom_crop(&req.source, moment.start, moment.end, &info, &req.config)
            .await;

        // Caption document (also carries the title overlay)
        let clip_words = clip_window_words(&req.words, moment.start, moment.end);
        let ass_dir = tempfile::tempdir()?;
        let ass_path = self
            .write_captions(
                &ass_dir,
                &clip_words,
                moment,
                title_on_main.then_some(moment.title.as_str()),
                &req.config,
            )
            .await?;

        let filter = build_layout_filter(
            &info,
            req.config.clip_format,
            crop,
            ass_path.as_deref(),
            req.fonts_dir.as_deref(),
        );

        let cmd = FfmpegCommand::new(&req.source, &output_path)
            .seek(moment.start)
            .stop_at(moment.end)
            .filter_complex(filter)
            .map("[out]")
            .map("0:a?")
            .video_codec(VIDEO_CODEC)
            .preset(PRESET)
            .crf(CRF)
            .audio_codec(AUDIO_CODEC)
            .audio_bitrate(AUDIO_BITRATE)
            .faststart();

        self.runner(req).run_ffmpeg(&cmd).await?;
        self.quality_gate(&output_path, moment.duration()).await?;

        // Teaser prepend, best-effort: a failed teaser keeps the main clip
        if let Some(peak_start) = peak_start {
            if let Err(e) = self
                .prepend_teaser(req, &info, &output_path, peak_start)
                .await
            {
                if e.is_cancelled() {
                    return Err(e);
                }
                warn!(clip = req.index + 1, error = %e, "Teaser prepend failed, keeping main clip");
            }
        }

        let size = tokio::fs::metadata(&output_path).await?.len();
        let size_mb = size as f64 / (1024.0 * 1024.0);
        info!(clip = req.index + 1, size_mb, "Clip saved");

        Ok(Clip::new(
            output_path,
            moment.title.clone(),
            moment.start,
            moment.end,
            size,
        ))
    }

    /// Decide how the zoomed portion of the layout is positioned.
    async fn resolve_zoom_crop(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        info: &VideoInfo,
        config: &JobConfig,
    ) -> ZoomCrop {
        if !info.is_landscape() || config.clip_format == ClipFormat::Fullscreen {
            return ZoomCrop::Centered;
        }

        match config.crop_anchor {
            CropAnchor::Auto => {
                let track = self
                    .tracker
                    .track(source, start, end, info.width, info.height)
                    .await;

                if track.is_default() {
                    return ZoomCrop::Centered;
                }
                // Tight zoom only makes sense for the split bottom panel
                if config.clip_format == ClipFormat::Split {
                    if let Some(bbox) = track.primary_bbox {
                        return ZoomCrop::Bbox(bbox);
                    }
                }
                ZoomCrop::CenterX(track.normalized_x())
            }
            anchor => match anchor.fixed_x() {
                Some(fx) => ZoomCrop::CenterX(fx),
                None => ZoomCrop::Centered,
            },
        }
    }

    /// Write the ASS caption file; `None` when there is nothing to burn.
    async fn write_captions(
        &self,
        dir: &tempfile::TempDir,
        clip_words: &[Word],
        moment: &Moment,
        title: Option<&str>,
        config: &JobConfig,
    ) -> MediaResult<Option<String>> {
        let captions_wanted = config.captions && !clip_words.is_empty();
        if !captions_wanted && title.is_none() {
            return Ok(None);
        }

        let words: &[Word] = if captions_wanted { clip_words } else { &[] };
        let doc = captions::generate_ass(words, moment.start, moment.duration(), title, config);

        let path = dir.path().join("captions.ass");
        tokio::fs::write(&path, doc).await?;
        Ok(Some(path.to_string_lossy().to_string()))
    }

    /// Reject undersized outputs and log duration drift.
    async fn quality_gate(&self, path: &Path, expected_duration: f64) -> MediaResult<()> {
        let size = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(_) => return Err(MediaError::invalid_output("Output file not created")),
        };

        if size < MIN_OUTPUT_BYTES {
            let _ = tokio::fs::remove_file(path).await;
            return Err(MediaError::invalid_output(format!(
                "Output too small ({} bytes), discarding",
                size
            )));
        }

        if let Ok(rendered) = probe_video(path).await {
            let drift = (rendered.duration - expected_duration).abs();
            if drift > DURATION_DRIFT_WARN {
                warn!(
                    path = %path.display(),
                    rendered = rendered.duration,
                    expected = expected_duration,
                    "Rendered duration drifts from the requested window"
                );
            }
        }

        Ok(())
    }

    /// Render the teaser excerpt, burn the title onto it, and concat it
    /// before the main clip.
    async fn prepend_teaser(
        &self,
        req: &RenderRequest,
        info: &VideoInfo,
        main_path: &Path,
        peak_start: f64,
    ) -> MediaResult<()> {
        let peak_end = peak_start + TEASER_DURATION;
        let workdir = tempfile::tempdir()?;
        let teaser_path = workdir.path().join("teaser.mp4");
        let combined_path = workdir.path().join("combined.mp4");

        // Same layout as the main clip, no captions; the title fades out
        // at the teaser's end instead
        let crop = self
            .resolve_zoom_crop(&req.source, peak_start, peak_end, info, &req.config)
            .await;

        let title_ass = if req.config.title_enabled {
            let doc = teaser_title_ass(&req.moment.title, TEASER_DURATION, &req.config);
            let path = workdir.path().join("teaser_title.ass");
            tokio::fs::write(&path, doc).await?;
            Some(path.to_string_lossy().to_string())
        } else {
            None
        };

        let filter = build_layout_filter(
            info,
            req.config.clip_format,
            crop,
            title_ass.as_deref(),
            req.fonts_dir.as_deref(),
        );

        let cmd = FfmpegCommand::new(&req.source, &teaser_path)
            .seek(peak_start)
            .stop_at(peak_end)
            .filter_complex(filter)
            .map("[out]")
            .map("0:a?")
            .video_codec(VIDEO_CODEC)
            .preset(PRESET)
            .crf(CRF)
            .audio_codec(AUDIO_CODEC)
            .audio_bitrate(AUDIO_BITRATE)
            .faststart();

        let runner = self.runner(req);
        runner.run_ffmpeg(&cmd).await?;

        let teaser_size = tokio::fs::metadata(&teaser_path).await?.len();
        if teaser_size < 10_000 {
            return Err(MediaError::invalid_output("Teaser render produced no data"));
        }

        // Concat teaser + main with a uniform re-encode
        let concat = FfmpegCommand::new(&teaser_path, &combined_path)
            .extra_input(main_path)
            .filter_complex("[0:v][0:a][1:v][1:a]concat=n=2:v=1:a=1[v][a]")
            .map("[v]")
            .map("[a]")
            .video_codec(VIDEO_CODEC)
            .preset(PRESET)
            .crf(CRF)
            .audio_codec(AUDIO_CODEC)
            .audio_bitrate(AUDIO_BITRATE)
            .faststart();

        runner.run_ffmpeg(&concat).await?;

        let combined_size = tokio::fs::metadata(&combined_path).await?.len();
        if combined_size == 0 {
            return Err(MediaError::invalid_output("Concat produced an empty file"));
        }

        crate::fs_utils::move_file(&combined_path, main_path).await?;
        info!(
            clip = req.index + 1,
            peak = peak_start,
            "Teaser hook prepended"
        );
        Ok(())
    }
}

impl Default for ClipRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the filter graph for the source shape and configured layout.
fn build_layout_filter(
    info: &VideoInfo,
    format: ClipFormat,
    crop: ZoomCrop,
    ass_path: Option<&str>,
    fonts_dir: Option<&Path>,
) -> String {
    let fonts = fonts_dir.map(|d| d.to_string_lossy().to_string());
    let fonts = fonts.as_deref();

    if !info.is_landscape() {
        return filters::portrait_filter(ass_path, fonts);
    }

    match format {
        ClipFormat::Fullscreen => filters::fullscreen_filter(ass_path, fonts),
        ClipFormat::Split => filters::split_filter(info.width, info.height, crop, ass_path, fonts),
        ClipFormat::Center => {
            filters::center_filter(info.width, info.height, crop, ass_path, fonts)
        }
    }
}

/// Words spoken inside the clip window.
fn clip_window_words(words: &[Word], start: f64, end: f64) -> Vec<Word> {
    const EDGE_SLACK: f64 = 0.5;
    words
        .iter()
        .filter(|w| w.start >= start - EDGE_SLACK && w.end <= end + EDGE_SLACK)
        .cloned()
        .collect()
}

/// Deterministic, collision-free output filename for a moment.
pub fn clip_filename(index: usize, title: &str) -> String {
    format!("clip_{:02}_{}.mp4", index + 1, sanitize_title(title))
}

/// Keep word characters, collapse whitespace to underscores, cap length.
fn sanitize_title(title: &str) -> String {
    let filtered: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();

    filtered
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .take(40)
        .collect()
}

/// Title-only ASS document for the teaser (fades out at the end).
fn teaser_title_ass(title: &str, duration: f64, config: &JobConfig) -> String {
    format!(
        "[Script Info]\n\
         Title: TeaserTitle\n\
         ScriptType: v4.00+\n\
         WrapStyle: 0\n\
         ScaledBorderAndShadow: yes\n\
         PlayResX: {resx}\n\
         PlayResY: {resy}\n\
         \n\
         [V4+ Styles]\n\
         Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
         Style: Title,{font},{size},&H00FFFFFF,&H000000FF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,5,2,2,40,40,{margin},1\n\
         \n\
         [Events]\n\
         Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n\
         Dialogue: 0,{start},{end},Title,,0,0,0,,{{\\fad(0,500)}}{text}\n",
        resx = captions::PLAY_RES_X,
        resy = captions::PLAY_RES_Y,
        font = config.title_font,
        size = config.title_font_size,
        margin = config.caption_margin_v,
        start = captions::format_ass_time(0.0),
        end = captions::format_ass_time(duration + 0.1),
        text = captions::wrap_title(title, 16),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_filename_deterministic() {
        assert_eq!(
            clip_filename(0, "The Market Reversed!"),
            "clip_01_The_Market_Reversed.mp4"
        );
        assert_eq!(clip_filename(0, "The Market Reversed!"), clip_filename(0, "The Market Reversed!"));
        // Same title, different index: no collision
        assert_ne!(clip_filename(0, "Title"), clip_filename(1, "Title"));
    }

    #[test]
    fn test_sanitize_title_strips_and_truncates() {
        assert_eq!(sanitize_title("a/b\\c:d"), "abcd");
        assert_eq!(sanitize_title("  spaced   out  "), "spaced_out");
        let long = "x".repeat(100);
        assert_eq!(sanitize_title(&long).len(), 40);
    }

    #[test]
    fn test_clip_window_words_slack() {
        let words = vec![
            Word::new("before", 9.0, 9.4),
            Word::new("edge", 9.6, 10.1),
            Word::new("inside", 15.0, 15.5),
            Word::new("after", 20.8, 21.2),
        ];
        let selected = clip_window_words(&words, 10.0, 20.0);
        let names: Vec<&str> = selected.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(names, vec!["edge", "inside"]);
    }

    #[test]
    fn test_layout_filter_portrait_ignores_format() {
        let info = VideoInfo {
            duration: 60.0,
            width: 1080,
            height: 1920,
            fps: 30.0,
            codec: "h264".to_string(),
            size: 0,
        };
        let filter = build_layout_filter(&info, ClipFormat::Split, ZoomCrop::Centered, None, None);
        assert!(filter.contains("pad=1080:1920"));
        assert!(!filter.contains("vstack"));
    }

    #[test]
    fn test_teaser_title_ass_fades() {
        let config = JobConfig::default();
        let doc = teaser_title_ass("Hook Title", 6.0, &config);
        assert!(doc.contains("\\fad(0,500)"));
        assert!(doc.contains("HOOK TITLE"));
    }
}
