//! Frame sampling for detection.
//!
//! Detection runs on a handful of still frames extracted with FFmpeg, not
//! on a decoded stream. Subject position is stable enough that at most
//! eight samples per clip window are needed.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::command::{CommandRunner, FfmpegCommand};
use crate::error::{MediaError, MediaResult};

/// Upper bound on frames scanned per clip window.
pub const MAX_SCAN_FRAMES: usize = 8;

/// Minimum spacing between samples, seconds.
const MIN_SAMPLE_INTERVAL: f64 = 3.0;

/// One extracted still frame.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Source-relative timestamp, seconds.
    pub timestamp: f64,
    /// PNG file on disk.
    pub path: PathBuf,
}

impl SampledFrame {
    /// Decode the frame as RGB.
    pub fn load_rgb(&self) -> MediaResult<image::RgbImage> {
        let img = image::open(&self.path)
            .map_err(|e| MediaError::detection_failed(format!("Frame decode failed: {}", e)))?;
        Ok(img.to_rgb8())
    }
}

/// Timestamps to sample across `[start, end]`, spread so long windows do
/// not get scanned frame-by-frame.
pub fn sample_timestamps(start: f64, end: f64, max_frames: usize) -> Vec<f64> {
    let duration = (end - start).max(1.0);
    let interval = MIN_SAMPLE_INTERVAL.max(duration / max_frames.max(1) as f64);

    let mut timestamps = Vec::new();
    let mut t = start;
    while t < end && timestamps.len() < max_frames {
        timestamps.push(t);
        t += interval;
    }
    if timestamps.is_empty() {
        timestamps.push(start);
    }
    timestamps
}

/// Extract one PNG per timestamp into `dir`.
///
/// A timestamp past the end of the stream simply yields no frame; the
/// remaining timestamps are still attempted.
pub async fn extract_frames(
    video: impl AsRef<Path>,
    timestamps: &[f64],
    dir: impl AsRef<Path>,
) -> MediaResult<Vec<SampledFrame>> {
    let video = video.as_ref();
    let dir = dir.as_ref();
    let runner = CommandRunner::new().with_timeout(30);

    let mut frames = Vec::new();
    for (i, &t) in timestamps.iter().enumerate() {
        let path = dir.join(format!("frame_{:03}.png", i));
        let cmd = FfmpegCommand::new(video, &path)
            .seek(t)
            .output_args(["-vframes", "1", "-q:v", "2"]);

        match runner.run_ffmpeg(&cmd).await {
            Ok(()) if path.exists() => frames.push(SampledFrame { timestamp: t, path }),
            Ok(()) => {}
            Err(e) => {
                debug!(timestamp = t, error = %e, "Frame extraction failed, skipping sample");
            }
        }
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_timestamps_short_window() {
        // 10s window: 3s minimum interval gives 4 samples
        let ts = sample_timestamps(100.0, 110.0, MAX_SCAN_FRAMES);
        assert_eq!(ts.len(), 4);
        assert_eq!(ts[0], 100.0);
        assert!((ts[1] - 103.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_timestamps_long_window_capped() {
        // 80s window: interval widens to 10s so at most 8 frames are scanned
        let ts = sample_timestamps(0.0, 80.0, MAX_SCAN_FRAMES);
        assert_eq!(ts.len(), 8);
        assert!((ts[1] - ts[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_timestamps_degenerate_window() {
        let ts = sample_timestamps(5.0, 5.0, MAX_SCAN_FRAMES);
        assert_eq!(ts, vec![5.0]);
    }
}
