//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use clipline_models::JobConfig;

/// Process-level configuration, distinct from the per-job [`JobConfig`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root for job records and history.
    pub data_dir: PathBuf,
    /// Root for the analysis and video caches.
    pub cache_dir: PathBuf,
    /// Root for rendered clips (one subdirectory per video id).
    pub output_dir: PathBuf,
    /// Caption font files for libass, when bundled.
    pub fonts_dir: Option<PathBuf>,

    /// Global cap on concurrent FFmpeg renders across all jobs.
    pub max_concurrent_renders: usize,

    /// Timeout for one yt-dlp invocation.
    pub download_timeout: Duration,
    /// Timeout for one transcription run.
    pub transcribe_timeout: Duration,
    /// Timeout for one LLM call.
    pub llm_timeout: Duration,

    /// OpenRouter credentials for moment selection.
    pub openrouter_api_key: Option<String>,
    pub openrouter_base_url: String,

    /// Remote speech API (OpenAI-compatible audio transcription).
    pub remote_stt_api_key: Option<String>,
    pub remote_stt_base_url: String,
    pub remote_stt_model: String,

    /// Local whisper.cpp binary and model.
    pub whisper_bin: String,
    pub whisper_model: Option<PathBuf>,

    /// Defaults applied to submissions that omit fields.
    pub default_job: JobConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_dir: PathBuf::from("./cache"),
            output_dir: PathBuf::from("./clips"),
            fonts_dir: None,
            max_concurrent_renders: 6,
            download_timeout: Duration::from_secs(1200),
            transcribe_timeout: Duration::from_secs(1800),
            llm_timeout: Duration::from_secs(300),
            openrouter_api_key: None,
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            remote_stt_api_key: None,
            remote_stt_base_url: "https://api.groq.com/openai/v1".to_string(),
            remote_stt_model: "whisper-large-v3-turbo".to_string(),
            whisper_bin: "whisper-cli".to_string(),
            whisper_model: None,
            default_job: JobConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            data_dir: env_path("CLIPLINE_DATA_DIR").unwrap_or(defaults.data_dir),
            cache_dir: env_path("CLIPLINE_CACHE_DIR").unwrap_or(defaults.cache_dir),
            output_dir: env_path("CLIPLINE_OUTPUT_DIR").unwrap_or(defaults.output_dir),
            fonts_dir: env_path("CLIPLINE_FONTS_DIR"),
            max_concurrent_renders: env_parse("CLIPLINE_MAX_RENDERS")
                .unwrap_or(defaults.max_concurrent_renders),
            download_timeout: env_secs("CLIPLINE_DOWNLOAD_TIMEOUT")
                .unwrap_or(defaults.download_timeout),
            transcribe_timeout: env_secs("CLIPLINE_TRANSCRIBE_TIMEOUT")
                .unwrap_or(defaults.transcribe_timeout),
            llm_timeout: env_secs("CLIPLINE_LLM_TIMEOUT").unwrap_or(defaults.llm_timeout),
            openrouter_api_key: std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty()),
            openrouter_base_url: std::env::var("OPENROUTER_BASE_URL")
                .unwrap_or(defaults.openrouter_base_url),
            remote_stt_api_key: std::env::var("GROQ_API_KEY").ok().filter(|k| !k.is_empty()),
            remote_stt_base_url: std::env::var("REMOTE_STT_BASE_URL")
                .unwrap_or(defaults.remote_stt_base_url),
            remote_stt_model: std::env::var("REMOTE_STT_MODEL")
                .unwrap_or(defaults.remote_stt_model),
            whisper_bin: std::env::var("CLIPLINE_WHISPER_BIN").unwrap_or(defaults.whisper_bin),
            whisper_model: env_path("CLIPLINE_WHISPER_MODEL"),
            default_job: defaults.default_job,
        }
    }

    /// Load persisted job defaults from `settings.json` under the data dir,
    /// when present. Missing or unreadable settings keep the built-ins.
    pub async fn load_job_defaults(&mut self) {
        let path = self.data_dir.join("settings.json");
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<JobConfig>(&bytes) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded job defaults");
                    self.default_job = config;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable settings")
                }
            },
            Err(_) => {}
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
