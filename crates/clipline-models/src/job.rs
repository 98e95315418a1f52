//! Job state, stage timings and log entries.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clip::ClipOutcome;
use crate::config::JobConfig;
use crate::video::VideoId;

/// Unique identifier for a pipeline job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from a caller-supplied string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall job status. Mirrors the currently active stage while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Downloading,
    Transcribing,
    Analyzing,
    Clipping,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Clipping => "clipping",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pipeline stage. Each stage is entered at most once per run, except via
/// the cache short-circuit which records a `cached` marker instead.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Downloading,
    Transcribing,
    Analyzing,
    Clipping,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Downloading => "downloading",
            Stage::Transcribing => "transcribing",
            Stage::Analyzing => "analyzing",
            Stage::Clipping => "clipping",
        }
    }

    /// The job status shown while this stage is active.
    pub fn status(&self) -> JobStatus {
        match self {
            Stage::Downloading => JobStatus::Downloading,
            Stage::Transcribing => JobStatus::Transcribing,
            Stage::Analyzing => JobStatus::Analyzing,
            Stage::Clipping => JobStatus::Clipping,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Active,
    Done,
    Error,
}

/// Timing record for one stage of one run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepTiming {
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: StageStatus,

    /// True when the stage was satisfied from cache instead of executing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

impl StepTiming {
    pub fn begin() -> Self {
        Self {
            started_at: Utc::now(),
            ended_at: None,
            status: StageStatus::Active,
            cached: false,
        }
    }
}

/// Log severity for job log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One line of the job's log, mirrored from tracing output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// One pipeline run for one (video, configuration) pair.
///
/// Mutated exclusively by the job state machine; persisted write-through
/// after every stage transition. Terminal states are `done` and `error`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    /// Source URL the job was submitted with.
    pub url: String,

    /// Stable identifier derived from the URL.
    pub video_id: VideoId,

    #[serde(default)]
    pub status: JobStatus,

    /// Per-stage timing records, keyed by stage.
    #[serde(default)]
    pub steps: BTreeMap<Stage, StepTiming>,

    #[serde(default)]
    pub logs: Vec<LogEntry>,

    /// Produced clips, including skipped entries for failed renders.
    #[serde(default)]
    pub clips: Vec<ClipOutcome>,

    /// Human-readable failure message when status is `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Configuration snapshot used for this run.
    pub config: JobConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    /// Source duration in seconds, recorded after download.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(id: JobId, url: impl Into<String>, video_id: VideoId, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            url: url.into(),
            video_id,
            status: JobStatus::Queued,
            steps: BTreeMap::new(),
            logs: Vec::new(),
            clips: Vec::new(),
            error: None,
            config,
            video_title: None,
            channel: None,
            thumbnail: None,
            duration: None,
            created_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    /// Enter a stage: record its start time and move the status.
    pub fn begin_stage(&mut self, stage: Stage) {
        self.status = stage.status();
        self.steps.insert(stage, StepTiming::begin());
        self.touch();
    }

    /// Leave a stage with the given outcome.
    pub fn end_stage(&mut self, stage: Stage, status: StageStatus) {
        if let Some(step) = self.steps.get_mut(&stage) {
            step.ended_at = Some(Utc::now());
            step.status = status;
        }
        self.touch();
    }

    /// Record a stage as satisfied from cache (entered and immediately done).
    pub fn mark_stage_cached(&mut self, stage: Stage) {
        let now = Utc::now();
        self.steps.insert(
            stage,
            StepTiming {
                started_at: now,
                ended_at: Some(now),
                status: StageStatus::Done,
                cached: true,
            },
        );
        self.touch();
    }

    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry::new(level, message));
        self.touch();
    }

    /// Transition to the terminal `error` state.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Error;
        self.error = Some(message.into());
        self.ended_at = Some(Utc::now());
        self.touch();
    }

    /// Transition to the terminal `done` state.
    pub fn complete(&mut self) {
        self.status = JobStatus::Done;
        self.ended_at = Some(Utc::now());
        self.touch();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Count of successfully rendered clips (skipped entries excluded).
    pub fn rendered_clip_count(&self) -> usize {
        self.clips
            .iter()
            .filter(|c| matches!(c, ClipOutcome::Rendered(_)))
            .count()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
