//! Media acquisition using yt-dlp.
//!
//! Resolves a source URL to a local file. The first attempt impersonates a
//! desktop browser (most public content needs no cookies that way); on
//! failure the download is retried once without impersonation, since some
//! sites block the impersonated UA. Both attempts stream their output into
//! the job log. A non-zero exit after both attempts is an acquisition
//! failure the driver treats as terminal.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::command::{CommandRunner, LogSink};
use crate::error::{MediaError, MediaResult};

/// Download format selector: prefer mp4 up to 1080p for seekability; the
/// vertical render scales everything to 1080x1920 anyway.
const VIDEO_FORMAT: &str =
    "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[height<=1080][ext=mp4]/best[height<=1080]/best";

/// Audio-only selector used for the fast transcription download.
const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio";

/// Extensions yt-dlp may produce for a merged video download.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm"];

/// Extensions yt-dlp may produce for an audio-only download.
const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "webm", "ogg", "opus"];

/// Options threaded through both download entry points.
#[derive(Clone, Default)]
pub struct DownloadOptions {
    pub cancel: Option<tokio::sync::watch::Receiver<bool>>,
    pub log_sink: Option<LogSink>,
    /// Timeout for a single yt-dlp invocation, seconds.
    pub timeout_secs: Option<u64>,
}

impl DownloadOptions {
    fn runner(&self) -> CommandRunner {
        let mut runner = CommandRunner::new();
        if let Some(cancel) = &self.cancel {
            runner = runner.with_cancel(cancel.clone());
        }
        if let Some(sink) = &self.log_sink {
            runner = runner.with_log_sink(sink.clone());
        }
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }
        runner
    }
}

/// Download the full video for `url` into `dest_dir`.
///
/// Returns the path of the downloaded file.
pub async fn download_video(
    url: &str,
    dest_dir: impl AsRef<Path>,
    options: &DownloadOptions,
) -> MediaResult<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)?;

    let template = dest_dir.join("source.%(ext)s");
    let template_str = template.to_string_lossy().to_string();

    info!(url = %url, "Downloading video");

    let base_args = |impersonate: bool| {
        let mut args: Vec<String> = Vec::new();
        if impersonate {
            args.push("--impersonate".to_string());
            args.push("chrome-120".to_string());
        }
        args.extend(
            [
                "-f",
                VIDEO_FORMAT,
                "--merge-output-format",
                "mp4",
                "-o",
                &template_str,
                "--no-playlist",
                "--retries",
                "3",
                "--fragment-retries",
                "3",
                "--concurrent-fragments",
                "8",
                url,
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args
    };

    let runner = options.runner();
    let summary = runner.run("yt-dlp", &base_args(true)).await?;

    let summary = if summary.success {
        summary
    } else {
        warn!("Impersonation failed, retrying without impersonation flag");
        runner.run("yt-dlp", &base_args(false)).await?
    };

    if !summary.success {
        return Err(MediaError::download_failed(
            summary
                .stderr_tail
                .lines()
                .last()
                .unwrap_or("yt-dlp exited with non-zero status"),
        ));
    }

    let path = find_downloaded(dest_dir, "source", VIDEO_EXTENSIONS)
        .await?
        .ok_or_else(|| MediaError::download_failed("Output file not created"))?;

    let size = path.metadata()?.len();
    info!(
        path = %path.display(),
        size_mb = size as f64 / (1024.0 * 1024.0),
        "Downloaded video"
    );

    Ok(path)
}

/// Download only the audio stream, used to start transcription while the
/// full video is still downloading. Much faster than the full download.
pub async fn download_audio(
    url: &str,
    dest_dir: impl AsRef<Path>,
    options: &DownloadOptions,
) -> MediaResult<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)?;

    let template = dest_dir.join("audio_only.%(ext)s");
    let template_str = template.to_string_lossy().to_string();

    let args = |impersonate: bool| {
        let mut args: Vec<String> = Vec::new();
        if impersonate {
            args.push("--impersonate".to_string());
            args.push("chrome-120".to_string());
        }
        args.extend(
            [
                "-f",
                AUDIO_FORMAT,
                "-o",
                &template_str,
                "--no-playlist",
                "--retries",
                "2",
                "--concurrent-fragments",
                "8",
                url,
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args
    };

    let runner = options.runner();
    let summary = runner.run("yt-dlp", &args(true)).await?;
    let summary = if summary.success {
        summary
    } else {
        runner.run("yt-dlp", &args(false)).await?
    };

    if !summary.success {
        return Err(MediaError::download_failed(
            summary
                .stderr_tail
                .lines()
                .last()
                .unwrap_or("audio download failed"),
        ));
    }

    find_downloaded(dest_dir, "audio_only", AUDIO_EXTENSIONS)
        .await?
        .ok_or_else(|| MediaError::download_failed("Audio output file not created"))
}

/// Find the largest file in `dir` matching `stem.*` with an allowed
/// extension. yt-dlp may leave partial fragments next to the merged result,
/// so size decides.
async fn find_downloaded(
    dir: &Path,
    stem: &str,
    extensions: &[&str],
) -> MediaResult<Option<PathBuf>> {
    let mut best: Option<(u64, PathBuf)> = None;
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !name.starts_with(stem) {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !extensions.contains(&ext) {
            continue;
        }
        let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
        if best.as_ref().map(|(s, _)| size > *s).unwrap_or(true) {
            best = Some((size, path));
        }
    }

    Ok(best.map(|(_, path)| path))
}
