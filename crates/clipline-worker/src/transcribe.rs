//! Transcription providers.
//!
//! Two providers behind one contract: both produce the exact same
//! word-level [`Transcript`], so everything downstream is
//! provider-agnostic. `Local` shells out to a whisper.cpp binary; `Remote`
//! calls an OpenAI-compatible audio transcription endpoint. A provider
//! failure is a `TranscriptionError`; there is no silent fallback; the
//! driver decides whether to retry with the alternate provider.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use clipline_media::{CommandRunner, FfmpegCommand, LogSink};
use clipline_models::{Transcript, TranscriptionProvider, Word};

use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};

/// Remote APIs cap uploads; larger audio is a provider error, not a
/// silent switch to the local engine.
const REMOTE_AUDIO_LIMIT_BYTES: u64 = 24 * 1024 * 1024;

/// Default whisper.cpp model locations, checked in order.
const WHISPER_MODEL_PATHS: &[&str] = &[
    "./models/ggml-small.bin",
    "./models/ggml-base.en.bin",
    "/app/models/ggml-small.bin",
    "/usr/share/whisper/ggml-small.bin",
];

/// Shared plumbing for one transcription run.
pub struct TranscribeContext<'a> {
    pub config: &'a WorkerConfig,
    pub cancel: Option<watch::Receiver<bool>>,
    pub log_sink: Option<LogSink>,
}

impl TranscribeContext<'_> {
    fn runner(&self) -> CommandRunner {
        let mut runner =
            CommandRunner::new().with_timeout(self.config.transcribe_timeout.as_secs());
        if let Some(cancel) = &self.cancel {
            runner = runner.with_cancel(cancel.clone());
        }
        if let Some(sink) = &self.log_sink {
            runner = runner.with_log_sink(sink.clone());
        }
        runner
    }
}

/// Transcribe a media file with the selected provider.
pub async fn transcribe(
    media: &Path,
    provider: TranscriptionProvider,
    ctx: &TranscribeContext<'_>,
) -> PipelineResult<Transcript> {
    match provider {
        TranscriptionProvider::Local => transcribe_local(media, ctx).await,
        TranscriptionProvider::Remote => transcribe_remote(media, ctx).await,
    }
}

// ---------------------------------------------------------------------------
// Local provider (whisper.cpp)
// ---------------------------------------------------------------------------

/// whisper.cpp JSON output shape (`-oj`).
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    offsets: WhisperOffsets,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    /// Milliseconds.
    from: u64,
    to: u64,
}

async fn transcribe_local(media: &Path, ctx: &TranscribeContext<'_>) -> PipelineResult<Transcript> {
    let config = ctx.config;

    which::which(&config.whisper_bin).map_err(|_| {
        PipelineError::transcription(format!("{} not found in PATH", config.whisper_bin))
    })?;

    let model = resolve_whisper_model(config).ok_or_else(|| {
        PipelineError::transcription(
            "whisper model not found; set CLIPLINE_WHISPER_MODEL or place one under ./models/",
        )
    })?;

    let workdir = tempfile::tempdir()?;

    // whisper.cpp wants 16 kHz mono wav input
    let wav_path = workdir.path().join("audio.wav");
    extract_audio(media, &wav_path, "pcm_s16le", ctx).await?;

    let out_prefix = workdir.path().join("transcript");
    // -ml 1 caps segments at one token, which yields word-level timing
    let args: Vec<String> = vec![
        "-m".to_string(),
        model.to_string_lossy().to_string(),
        "-f".to_string(),
        wav_path.to_string_lossy().to_string(),
        "-ml".to_string(),
        "1".to_string(),
        "-oj".to_string(),
        "-of".to_string(),
        out_prefix.to_string_lossy().to_string(),
        "-np".to_string(),
    ];

    info!(model = %model.display(), "Transcribing locally");

    let summary = ctx.runner().run(&config.whisper_bin, &args).await.map_err(|e| {
        if e.is_cancelled() {
            PipelineError::Cancelled
        } else {
            PipelineError::transcription(e.to_string())
        }
    })?;

    if !summary.success {
        return Err(PipelineError::transcription(format!(
            "{} exited with code {:?}: {}",
            config.whisper_bin,
            summary.exit_code,
            summary.stderr_tail.lines().last().unwrap_or("")
        )));
    }

    let json_path = out_prefix.with_extension("json");
    let bytes = tokio::fs::read(&json_path).await.map_err(|_| {
        PipelineError::transcription("whisper produced no transcript output")
    })?;

    let output: WhisperOutput = serde_json::from_slice(&bytes)
        .map_err(|e| PipelineError::transcription(format!("whisper JSON unreadable: {}", e)))?;

    let transcript = whisper_to_transcript(output);
    info!(
        words = transcript.word_count(),
        duration = transcript.duration(),
        "Local transcription complete"
    );
    Ok(transcript)
}

fn whisper_to_transcript(output: WhisperOutput) -> Transcript {
    let words = output
        .transcription
        .into_iter()
        .filter_map(|segment| {
            let text = segment.text.trim().to_string();
            // Token segments carry punctuation-only and marker entries too
            if text.is_empty() || text.chars().all(|c| !c.is_alphanumeric()) {
                return None;
            }
            Some(Word::new(
                text,
                segment.offsets.from as f64 / 1000.0,
                segment.offsets.to as f64 / 1000.0,
            ))
        })
        .collect();
    Transcript::from_words(words)
}

fn resolve_whisper_model(config: &WorkerConfig) -> Option<PathBuf> {
    if let Some(model) = &config.whisper_model {
        if model.exists() {
            return Some(model.clone());
        }
        warn!(model = %model.display(), "Configured whisper model missing, checking defaults");
    }
    WHISPER_MODEL_PATHS
        .iter()
        .copied()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

// ---------------------------------------------------------------------------
// Remote provider (OpenAI-compatible audio transcriptions)
// ---------------------------------------------------------------------------

/// `verbose_json` response with word granularity.
#[derive(Debug, Deserialize)]
struct RemoteTranscription {
    #[serde(default)]
    words: Vec<RemoteWord>,
}

#[derive(Debug, Deserialize)]
struct RemoteWord {
    word: String,
    start: f64,
    end: f64,
}

async fn transcribe_remote(media: &Path, ctx: &TranscribeContext<'_>) -> PipelineResult<Transcript> {
    let config = ctx.config;

    let api_key = config.remote_stt_api_key.as_deref().ok_or_else(|| {
        PipelineError::transcription("remote transcription selected but no API key configured")
    })?;

    let workdir = tempfile::tempdir()?;

    // Compact mono AAC keeps a long video under the upload cap
    let audio_path = workdir.path().join("audio.m4a");
    extract_audio(media, &audio_path, "aac", ctx).await?;

    let audio_size = tokio::fs::metadata(&audio_path).await?.len();
    if audio_size > REMOTE_AUDIO_LIMIT_BYTES {
        return Err(PipelineError::transcription(format!(
            "audio too large for the remote API ({:.1} MB > 24 MB)",
            audio_size as f64 / (1024.0 * 1024.0)
        )));
    }

    info!(
        size_mb = audio_size as f64 / (1024.0 * 1024.0),
        model = %config.remote_stt_model,
        "Transcribing via remote API"
    );

    let audio_bytes = tokio::fs::read(&audio_path).await?;
    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(audio_bytes)
                .file_name("audio.m4a")
                .mime_str("audio/mp4")
                .map_err(|e| PipelineError::transcription(e.to_string()))?,
        )
        .text("model", config.remote_stt_model.clone())
        .text("response_format", "verbose_json")
        .text("timestamp_granularities[]", "word")
        .text("language", "en");

    let client = reqwest::Client::builder()
        .timeout(config.transcribe_timeout)
        .build()
        .map_err(|e| PipelineError::transcription(e.to_string()))?;

    let response = client
        .post(format!(
            "{}/audio/transcriptions",
            config.remote_stt_base_url.trim_end_matches('/')
        ))
        .bearer_auth(api_key)
        .multipart(form)
        .send()
        .await
        .map_err(|e| PipelineError::transcription(format!("remote API request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(PipelineError::transcription(format!(
            "remote API returned {}: {}",
            status,
            body.chars().take(300).collect::<String>()
        )));
    }

    let parsed: RemoteTranscription = response
        .json()
        .await
        .map_err(|e| PipelineError::transcription(format!("remote response unreadable: {}", e)))?;

    let words = parsed
        .words
        .into_iter()
        .map(|w| Word::new(w.word.trim().to_string(), w.start, w.end))
        .filter(|w| !w.word.is_empty())
        .collect();

    let transcript = Transcript::from_words(words);
    info!(
        words = transcript.word_count(),
        duration = transcript.duration(),
        "Remote transcription complete"
    );
    Ok(transcript)
}

/// Extract a 16 kHz mono audio track for transcription input.
async fn extract_audio(
    media: &Path,
    dest: &Path,
    codec: &str,
    ctx: &TranscribeContext<'_>,
) -> PipelineResult<()> {
    let cmd = FfmpegCommand::new(media, dest)
        .no_video()
        .audio_codec(codec)
        .audio_bitrate("64k")
        .output_args(["-ar", "16000", "-ac", "1"]);

    ctx.runner().run_ffmpeg(&cmd).await.map_err(|e| {
        if e.is_cancelled() {
            PipelineError::Cancelled
        } else {
            PipelineError::transcription(format!("audio extraction failed: {}", e))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whisper_output_to_words() {
        let json = r#"{
            "transcription": [
                {"offsets": {"from": 0, "to": 400}, "text": " the"},
                {"offsets": {"from": 400, "to": 900}, "text": " market"},
                {"offsets": {"from": 900, "to": 950}, "text": ","},
                {"offsets": {"from": 950, "to": 1500}, "text": " reversed"}
            ]
        }"#;
        let output: WhisperOutput = serde_json::from_str(json).unwrap();
        let transcript = whisper_to_transcript(output);

        assert_eq!(transcript.word_count(), 3);
        assert_eq!(transcript.words[0].word, "the");
        assert_eq!(transcript.words[0].start, 0.0);
        assert_eq!(transcript.words[1].end, 0.9);
        assert_eq!(transcript.text, "the market reversed");
    }

    #[test]
    fn test_whisper_empty_audio_gives_empty_transcript() {
        let output: WhisperOutput = serde_json::from_str(r#"{"transcription": []}"#).unwrap();
        let transcript = whisper_to_transcript(output);
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_remote_response_shape() {
        let json = r#"{
            "text": "the market reversed",
            "words": [
                {"word": "the", "start": 0.0, "end": 0.4},
                {"word": "market", "start": 0.4, "end": 0.9},
                {"word": "reversed", "start": 0.9, "end": 1.5}
            ]
        }"#;
        let parsed: RemoteTranscription = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.words.len(), 3);
        assert_eq!(parsed.words[2].end, 1.5);
    }

    #[test]
    fn test_remote_response_without_words_is_empty() {
        let parsed: RemoteTranscription =
            serde_json::from_str(r#"{"text": "silence"}"#).unwrap();
        assert!(parsed.words.is_empty());
    }
}
