//! Job state machine.
//!
//! Wraps one [`Job`] and its persistence: every stage transition mutates
//! the snapshot and writes it through to the state store, so a crash
//! mid-stage leaves the last completed stage's data intact. Log lines from
//! external subprocesses are appended in memory as they stream and reach
//! disk with the next transition.

use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use clipline_media::LogSink;
use clipline_models::{
    Clip, ClipOutcome, Job, JobId, JobStatus, LogLevel, Stage, StageStatus, VideoId,
};
use clipline_storage::StateStore;

use crate::error::PipelineError;

/// Cap on retained log entries per job; oldest entries fall off first.
const MAX_LOG_ENTRIES: usize = 5000;

/// Cap on a single log line; longer subprocess lines are truncated.
const MAX_LOG_LINE: usize = 500;

/// Handle to one job's mutable state, shared between the driver and the
/// subprocess log sinks.
#[derive(Clone)]
pub struct JobStateMachine {
    job: Arc<Mutex<Job>>,
    store: StateStore,
}

impl JobStateMachine {
    pub fn new(job: Job, store: StateStore) -> Self {
        Self {
            job: Arc::new(Mutex::new(job)),
            store,
        }
    }

    pub fn id(&self) -> JobId {
        self.job.lock().unwrap().id.clone()
    }

    pub fn video_id(&self) -> VideoId {
        self.job.lock().unwrap().video_id.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.job.lock().unwrap().status
    }

    /// Current full snapshot.
    pub fn snapshot(&self) -> Job {
        self.job.lock().unwrap().clone()
    }

    fn mutate<F: FnOnce(&mut Job)>(&self, f: F) {
        let mut job = self.job.lock().unwrap();
        f(&mut job);
    }

    /// Write the current snapshot through to the store. A persistence
    /// failure is logged, not propagated: the in-memory run continues and
    /// the next transition retries.
    pub async fn persist(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            error!(job_id = %snapshot.id, error = %e, "Failed to persist job snapshot");
        }
    }

    /// Enter a stage and persist.
    pub async fn begin_stage(&self, stage: Stage) {
        info!(job_id = %self.id(), stage = %stage, "Stage started");
        self.mutate(|job| {
            job.begin_stage(stage);
            push_log(job, LogLevel::Info, format!("Step started: {}", stage));
        });
        self.persist().await;
    }

    /// Leave a stage with the given outcome and persist.
    pub async fn end_stage(&self, stage: Stage, status: StageStatus) {
        info!(job_id = %self.id(), stage = %stage, ?status, "Stage finished");
        self.mutate(|job| {
            job.end_stage(stage, status);
            push_log(
                job,
                LogLevel::Info,
                format!("Step finished: {} ({:?})", stage, status),
            );
        });
        self.persist().await;
    }

    /// Record a stage as satisfied from cache and persist.
    pub async fn mark_stage_cached(&self, stage: Stage) {
        info!(job_id = %self.id(), stage = %stage, "Stage served from cache");
        self.mutate(|job| {
            job.mark_stage_cached(stage);
            push_log(job, LogLevel::Info, format!("Step cached: {}", stage));
        });
        self.persist().await;
    }

    /// Append a log entry (in memory; persisted with the next transition).
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!(job_id = %self.id(), "{}", message),
            LogLevel::Warning => warn!(job_id = %self.id(), "{}", message),
            LogLevel::Error => error!(job_id = %self.id(), "{}", message),
        }
        self.mutate(|job| push_log(job, level, message));
    }

    /// Sink for streamed subprocess output lines.
    pub fn log_sink(&self) -> LogSink {
        let job = Arc::clone(&self.job);
        Arc::new(move |line: &str| {
            if let Ok(mut job) = job.lock() {
                push_log(&mut job, LogLevel::Info, line.to_string());
            }
        })
    }

    /// Record source metadata once known.
    pub async fn set_video_metadata(
        &self,
        title: Option<String>,
        channel: Option<String>,
        thumbnail: Option<String>,
    ) {
        self.mutate(|job| {
            if job.video_title.is_none() {
                job.video_title = title;
            }
            if job.channel.is_none() {
                job.channel = channel;
            }
            if job.thumbnail.is_none() {
                job.thumbnail = thumbnail;
            }
        });
        self.persist().await;
    }

    pub async fn set_duration(&self, duration: f64) {
        self.mutate(|job| job.duration = Some(duration));
        self.persist().await;
    }

    /// Record a rendered clip and persist (clips appear as they finish).
    pub async fn push_clip(&self, clip: Clip) {
        self.mutate(|job| job.clips.push(ClipOutcome::Rendered(clip)));
        self.persist().await;
    }

    /// Record a failed render as a skipped entry and persist.
    pub async fn push_skipped_clip(&self, title: impl Into<String>, error: impl Into<String>) {
        let title = title.into();
        let error = error.into();
        self.log(
            LogLevel::Warning,
            format!("Clip skipped: {} ({})", title, error),
        );
        self.mutate(|job| job.clips.push(ClipOutcome::skipped(title, error)));
        self.persist().await;
    }

    /// Terminal failure: set `error` status, persist, append history.
    pub async fn fail(&self, err: &PipelineError) {
        let message = err.job_message();
        self.mutate(|job| {
            // Close the stage the failure interrupted
            if let Some((stage, _)) = job
                .steps
                .iter()
                .find(|(_, step)| step.status == StageStatus::Active)
                .map(|(stage, step)| (*stage, step.clone()))
            {
                job.end_stage(stage, StageStatus::Error);
            }
            push_log(job, LogLevel::Error, message.clone());
            job.fail(message);
        });
        self.persist().await;
        self.append_history().await;
    }

    /// Terminal success: set `done`, persist, append history.
    pub async fn complete(&self) {
        self.mutate(|job| job.complete());
        self.persist().await;
        self.append_history().await;
    }

    async fn append_history(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.store.append_history(&snapshot).await {
            error!(job_id = %snapshot.id, error = %e, "Failed to append job history");
        }
    }
}

/// Bounded log append with line truncation.
fn push_log(job: &mut Job, level: LogLevel, message: String) {
    let message = if message.len() > MAX_LOG_LINE {
        let mut truncated: String = message.chars().take(MAX_LOG_LINE).collect();
        truncated.push('…');
        truncated
    } else {
        message
    };
    job.push_log(level, message);
    if job.logs.len() > MAX_LOG_ENTRIES {
        let excess = job.logs.len() - MAX_LOG_ENTRIES;
        job.logs.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipline_models::{JobConfig, JobRequest};
    use tempfile::TempDir;

    async fn machine(dir: &TempDir) -> JobStateMachine {
        let store = StateStore::open(dir.path()).await.unwrap();
        let job = Job::new(
            JobId::new(),
            "https://youtube.com/watch?v=abc123def45",
            VideoId::from_string("abc123def45"),
            JobRequest::default().apply_to(JobConfig::default()),
        );
        let machine = JobStateMachine::new(job, store);
        machine.persist().await;
        machine
    }

    #[tokio::test]
    async fn test_transitions_are_written_through() {
        let dir = TempDir::new().unwrap();
        let machine = machine(&dir).await;
        let store = StateStore::open(dir.path()).await.unwrap();

        machine.begin_stage(Stage::Downloading).await;
        let on_disk = store.load(&machine.id()).await.unwrap().unwrap();
        assert_eq!(on_disk.status, JobStatus::Downloading);
        assert!(on_disk.steps.contains_key(&Stage::Downloading));

        machine.end_stage(Stage::Downloading, StageStatus::Done).await;
        let on_disk = store.load(&machine.id()).await.unwrap().unwrap();
        assert_eq!(
            on_disk.steps[&Stage::Downloading].status,
            StageStatus::Done
        );
    }

    #[tokio::test]
    async fn test_fail_closes_active_stage_and_appends_history() {
        let dir = TempDir::new().unwrap();
        let machine = machine(&dir).await;
        let store = StateStore::open(dir.path()).await.unwrap();

        machine.begin_stage(Stage::Transcribing).await;
        machine.fail(&PipelineError::Cancelled).await;

        let on_disk = store.load(&machine.id()).await.unwrap().unwrap();
        assert_eq!(on_disk.status, JobStatus::Error);
        assert_eq!(on_disk.error.as_deref(), Some("Manually stopped"));
        assert_eq!(
            on_disk.steps[&Stage::Transcribing].status,
            StageStatus::Error
        );
        assert!(on_disk.steps[&Stage::Transcribing].ended_at.is_some());

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, machine.id());
    }

    #[tokio::test]
    async fn test_log_sink_appends_without_persisting() {
        let dir = TempDir::new().unwrap();
        let machine = machine(&dir).await;

        let sink = machine.log_sink();
        sink("yt-dlp: downloading fragment 1");
        sink("yt-dlp: downloading fragment 2");

        assert_eq!(machine.snapshot().logs.len(), 2);
    }

    #[tokio::test]
    async fn test_log_truncation() {
        let dir = TempDir::new().unwrap();
        let machine = machine(&dir).await;

        machine.log(LogLevel::Info, "x".repeat(2000));
        let logs = machine.snapshot().logs;
        assert!(logs[0].message.len() <= MAX_LOG_LINE + 4);
        assert!(logs[0].message.ends_with('…'));
    }

    #[tokio::test]
    async fn test_clip_outcomes_recorded() {
        let dir = TempDir::new().unwrap();
        let machine = machine(&dir).await;

        machine
            .push_clip(Clip::new("/out/clip_01_a.mp4", "a", 0.0, 30.0, 500_000))
            .await;
        machine.push_skipped_clip("b", "ffmpeg exited with code 1").await;

        let job = machine.snapshot();
        assert_eq!(job.clips.len(), 2);
        assert_eq!(job.rendered_clip_count(), 1);
    }
}
