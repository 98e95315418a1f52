//! FFmpeg command builder and subprocess runner.
//!
//! The runner streams stderr line-by-line into an optional log sink as it
//! arrives (external tool output belongs in the job log, not a buffer held
//! until exit), keeps a bounded tail for error messages, and kills the child
//! promptly on cancellation or timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Receives one line of subprocess output at a time.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Maximum bytes of stderr retained for error reporting.
const STDERR_TAIL_LIMIT: usize = 64 * 1024;

/// Builder for FFmpeg invocations.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed before `-i` (seek, extra inputs).
    input_args: Vec<String>,
    /// Arguments placed after `-i` (filters, codecs, maps).
    output_args: Vec<String>,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Seek position before the input (fast seek).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Absolute stop position (`-to`), paired with [`Self::seek`].
    pub fn stop_at(self, seconds: f64) -> Self {
        self.input_arg("-to").input_arg(format!("{:.3}", seconds))
    }

    /// Additional input file after the primary one.
    pub fn extra_input(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().to_string();
        self.output_arg("-i").output_arg(path)
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Moov atom up front for streamable output.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Assemble the final argument vector.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-v".to_string(), self.log_level.clone()];
        args.extend(self.input_args.clone());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());
        args
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }
}

/// Exit summary of a streamed subprocess run.
#[derive(Debug)]
pub struct ExitSummary {
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Bounded tail of stderr for diagnostics.
    pub stderr_tail: String,
    /// Captured stdout lines (tools like ffprobe/yt-dlp print results here).
    pub stdout: Vec<String>,
}

/// Runner for external commands with streaming, timeout and cancellation.
#[derive(Clone, Default)]
pub struct CommandRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout_secs: Option<u64>,
    log_sink: Option<LogSink>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child and fail with `Cancelled` when the signal flips.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Mirror subprocess output lines into the given sink as they arrive.
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Run an FFmpeg command to completion.
    pub async fn run_ffmpeg(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let summary = self.run("ffmpeg", &args).await?;
        if summary.success {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                last_meaningful_line(&summary.stderr_tail)
                    .unwrap_or("FFmpeg exited with non-zero status"),
                Some(summary.stderr_tail.clone()),
                summary.exit_code,
            ))
        }
    }

    /// Spawn `program` with `args`, streaming output until exit.
    pub async fn run(&self, program: &str, args: &[String]) -> MediaResult<ExitSummary> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout not captured");
        let stderr = child.stderr.take().expect("stderr not captured");

        let sink = self.log_sink.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Some(sink) = &sink {
                    sink(trimmed);
                }
                collected.push(trimmed.to_string());
            }
            collected
        });

        let sink = self.log_sink.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Some(sink) = &sink {
                    sink(trimmed);
                }
                tail.push_str(trimmed);
                tail.push('\n');
                if tail.len() > STDERR_TAIL_LIMIT {
                    let cut = tail.len() - STDERR_TAIL_LIMIT;
                    tail.drain(..cut);
                }
            }
            tail
        });

        let status = self.wait_for_exit(&mut child, program).await?;

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr_tail = stderr_task.await.unwrap_or_default();

        Ok(ExitSummary {
            exit_code: status.code(),
            success: status.success(),
            stderr_tail,
            stdout,
        })
    }

    /// Wait for the child, honoring cancellation and timeout.
    async fn wait_for_exit(
        &self,
        child: &mut tokio::process::Child,
        program: &str,
    ) -> MediaResult<std::process::ExitStatus> {
        let mut cancel_rx = self.cancel_rx.clone();

        let wait = async {
            loop {
                match &mut cancel_rx {
                    Some(rx) => {
                        tokio::select! {
                            status = child.wait() => return status,
                            changed = rx.changed() => {
                                if changed.is_err() || *rx.borrow() {
                                    return Err(std::io::Error::other("cancelled"));
                                }
                            }
                        }
                    }
                    None => return child.wait().await,
                }
            }
        };

        let status = match self.timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(std::time::Duration::from_secs(secs), wait).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("{} timed out after {} seconds, killing process", program, secs);
                        let _ = child.kill().await;
                        return Err(MediaError::Timeout(secs));
                    }
                }
            }
            None => wait.await,
        };

        match status {
            Ok(status) => Ok(status),
            Err(e) if e.to_string() == "cancelled" => {
                warn!("{} cancelled, killing process", program);
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Last stderr line that looks like an actual message.
fn last_meaningful_line(stderr: &str) -> Option<&str> {
    stderr.lines().rev().find(|l| !l.trim().is_empty())
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Check if yt-dlp is available.
pub fn check_ytdlp() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_argument_order() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .stop_at(40.0)
            .video_codec("libx264")
            .crf(21)
            .faststart();

        let args = cmd.build_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        let cv = args.iter().position(|a| a == "-c:v").unwrap();

        assert!(ss < i, "seek must precede the input");
        assert!(i < cv, "codec must follow the input");
        assert_eq!(args[ss + 1], "10.000");
        assert!(args.contains(&"-to".to_string()));
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[test]
    fn test_last_meaningful_line() {
        let stderr = "frame=100\nError opening filter\n\n";
        assert_eq!(last_meaningful_line(stderr), Some("Error opening filter"));
        assert_eq!(last_meaningful_line("\n\n"), None);
    }

    #[tokio::test]
    async fn test_run_streams_stdout_and_exit_code() {
        let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let runner = CommandRunner::new().with_log_sink(Arc::new(move |line: &str| {
            captured.lock().unwrap().push(line.to_string());
        }));

        let summary = runner
            .run("sh", &["-c".to_string(), "echo one; echo two".to_string()])
            .await
            .unwrap();

        assert!(summary.success);
        assert_eq!(summary.stdout, vec!["one", "two"]);
        assert_eq!(lines.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_reports_failure_with_stderr_tail() {
        let runner = CommandRunner::new();
        let summary = runner
            .run("sh", &["-c".to_string(), "echo bad >&2; exit 3".to_string()])
            .await
            .unwrap();

        assert!(!summary.success);
        assert_eq!(summary.exit_code, Some(3));
        assert!(summary.stderr_tail.contains("bad"));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let (tx, rx) = watch::channel(false);
        let runner = CommandRunner::new().with_cancel(rx);

        let handle = tokio::spawn(async move {
            runner
                .run("sh", &["-c".to_string(), "sleep 30".to_string()])
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = CommandRunner::new().with_timeout(1);
        let result = runner
            .run("sh", &["-c".to_string(), "sleep 30".to_string()])
            .await;
        assert!(matches!(result, Err(MediaError::Timeout(1))));
    }
}
