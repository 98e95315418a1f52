//! Job registry and the pipeline service surface.
//!
//! The service owns an explicit map from job id to execution handle:
//! inserted on submit, removed once the terminal snapshot is persisted and
//! the handle is reaped. Submission validates the request, applies
//! persisted defaults, persists the queued snapshot and spawns the driver
//! as an independent task. Stop flips the job's cancel signal, which kills
//! its in-flight subprocess.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use validator::Validate;

use clipline_models::{extract_video_id, Job, JobId, JobRequest, VideoId};
use clipline_storage::CacheInfo;

use crate::driver::{run_job, DriverContext};
use crate::error::{PipelineError, PipelineResult};
use crate::state_machine::JobStateMachine;

/// Execution handle for one active job.
struct JobHandle {
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

/// Submission receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub video_id: VideoId,
}

/// Top-level pipeline service: submission, control and observation.
pub struct PipelineService {
    ctx: Arc<DriverContext>,
    jobs: Mutex<HashMap<JobId, JobHandle>>,
}

impl PipelineService {
    pub async fn new(config: crate::config::WorkerConfig) -> PipelineResult<Self> {
        let ctx = Arc::new(DriverContext::new(config).await?);
        Ok(Self {
            ctx,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn context(&self) -> &Arc<DriverContext> {
        &self.ctx
    }

    /// Submit a new job. Effective configuration is the persisted defaults
    /// overlaid with the request's fields.
    pub async fn submit(&self, request: JobRequest) -> PipelineResult<SubmitReceipt> {
        self.submit_with_id(request, JobId::new()).await
    }

    /// Submit with a caller-supplied job id.
    pub async fn submit_with_id(
        &self,
        request: JobRequest,
        job_id: JobId,
    ) -> PipelineResult<SubmitReceipt> {
        request
            .validate()
            .map_err(|e| PipelineError::invalid_request(e.to_string()))?;

        let video_id = extract_video_id(&request.url)
            .map_err(|e| PipelineError::invalid_request(e.to_string()))?;

        let config = request.apply_to(self.ctx.config.default_job.clone());
        let job = Job::new(job_id.clone(), &request.url, video_id.clone(), config);
        let machine = JobStateMachine::new(job, self.ctx.store.clone());
        machine.persist().await;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = Arc::clone(&self.ctx);
        let task_machine = machine.clone();
        let task = tokio::spawn(async move {
            run_job(ctx, task_machine, cancel_rx).await;
        });

        let mut jobs = self.jobs.lock().await;
        reap_finished(&mut jobs);
        jobs.insert(
            job_id.clone(),
            JobHandle {
                cancel: cancel_tx,
                task: Some(task),
            },
        );

        info!(job_id = %job_id, video_id = %video_id, "Job submitted");
        Ok(SubmitReceipt { job_id, video_id })
    }

    /// Stop one job. Returns false when the job is unknown or already
    /// finished. The stopped job transitions to `error` ("Manually
    /// stopped") and its external subprocess is killed.
    pub async fn stop(&self, job_id: &JobId) -> bool {
        let jobs = self.jobs.lock().await;
        match jobs.get(job_id) {
            Some(handle) => {
                let active = handle
                    .task
                    .as_ref()
                    .map(|t| !t.is_finished())
                    .unwrap_or(false);
                if active {
                    info!(job_id = %job_id, "Stop requested");
                    let _ = handle.cancel.send(true);
                }
                active
            }
            None => {
                warn!(job_id = %job_id, "Stop requested for unknown job");
                false
            }
        }
    }

    /// Stop every active job. Returns how many were signalled.
    pub async fn stop_all(&self) -> usize {
        let jobs = self.jobs.lock().await;
        let mut stopped = 0;
        for (job_id, handle) in jobs.iter() {
            let active = handle
                .task
                .as_ref()
                .map(|t| !t.is_finished())
                .unwrap_or(false);
            if active {
                info!(job_id = %job_id, "Stop requested");
                let _ = handle.cancel.send(true);
                stopped += 1;
            }
        }
        stopped
    }

    /// Wait for a job's task to finish (used by the CLI).
    pub async fn wait(&self, job_id: &JobId) -> PipelineResult<Job> {
        let task = {
            let mut jobs = self.jobs.lock().await;
            jobs.get_mut(job_id).and_then(|handle| handle.task.take())
        };

        if let Some(task) = task {
            task.await
                .map_err(|e| PipelineError::config(format!("job task panicked: {}", e)))?;
        }

        self.ctx
            .store
            .load(job_id)
            .await?
            .ok_or_else(|| PipelineError::invalid_request(format!("unknown job {}", job_id)))
    }

    /// All known jobs (active and historical snapshots), newest first.
    pub async fn list_jobs(&self) -> PipelineResult<Vec<Job>> {
        Ok(self.ctx.store.list().await?)
    }

    /// One job's snapshot.
    pub async fn job(&self, job_id: &JobId) -> PipelineResult<Option<Job>> {
        Ok(self.ctx.store.load(job_id).await?)
    }

    /// Append-only history of terminal jobs.
    pub async fn history(&self) -> PipelineResult<Vec<Job>> {
        Ok(self.ctx.store.history().await?)
    }

    /// Cached-analysis introspection for a video id.
    pub async fn cache_info(&self, video_id: &VideoId) -> CacheInfo {
        self.ctx.analysis_cache.info(video_id).await
    }

    /// Remove a terminal job's record (history is untouched).
    pub async fn clear_job(&self, job_id: &JobId) -> PipelineResult<()> {
        {
            let mut jobs = self.jobs.lock().await;
            if let Some(handle) = jobs.get(job_id) {
                let active = handle
                    .task
                    .as_ref()
                    .map(|t| !t.is_finished())
                    .unwrap_or(false);
                if active {
                    return Err(PipelineError::invalid_request(
                        "job is still running; stop it first",
                    ));
                }
            }
            jobs.remove(job_id);
        }
        Ok(self.ctx.store.remove(job_id).await?)
    }
}

/// Drop handles whose tasks have finished.
fn reap_finished(jobs: &mut HashMap<JobId, JobHandle>) {
    jobs.retain(|_, handle| {
        handle
            .task
            .as_ref()
            .map(|t| !t.is_finished())
            // A taken task means someone is waiting on it; keep the handle
            .unwrap_or(true)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use clipline_models::JobStatus;
    use tempfile::TempDir;

    async fn service(dir: &TempDir) -> PipelineService {
        let config = WorkerConfig {
            data_dir: dir.path().join("data"),
            cache_dir: dir.path().join("cache"),
            output_dir: dir.path().join("clips"),
            // Keep acquisition failures fast in tests
            download_timeout: std::time::Duration::from_secs(5),
            transcribe_timeout: std::time::Duration::from_secs(5),
            ..WorkerConfig::default()
        };
        PipelineService::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_url() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let err = service
            .submit(JobRequest {
                url: "not a url".to_string(),
                ..JobRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_submit_persists_and_runs_to_terminal_state() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        // No yt-dlp target here: the job fails at acquisition, which is a
        // terminal state and exactly what submit must surface
        let receipt = service
            .submit(JobRequest {
                url: "https://youtube.com/watch?v=abc123def45".to_string(),
                max_clips: Some(2),
                ..JobRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(receipt.video_id.as_str(), "abc123def45");

        let job = service.wait(&receipt.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.is_some());
        assert_eq!(job.config.max_clips, 2);

        let listed = service.list_jobs().await.unwrap();
        assert_eq!(listed.len(), 1);

        let history = service.history().await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_unknown_job_is_false() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;
        assert!(!service.stop(&JobId::new()).await);
    }

    #[tokio::test]
    async fn test_stopped_job_ends_in_error_not_done() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let receipt = service
            .submit(JobRequest {
                url: "https://youtube.com/watch?v=abc123def45".to_string(),
                ..JobRequest::default()
            })
            .await
            .unwrap();

        service.stop(&receipt.job_id).await;
        let job = service.wait(&receipt.job_id).await.unwrap();

        // Either the stop landed first or acquisition failed first; both
        // are the error state, never done
        assert_eq!(job.status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_cache_info_for_unknown_video() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let info = service
            .cache_info(&VideoId::from_string("unknown12345"))
            .await;
        assert!(!info.exists);
    }

    #[tokio::test]
    async fn test_clear_job_removes_record() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let receipt = service
            .submit(JobRequest {
                url: "https://youtube.com/watch?v=abc123def45".to_string(),
                ..JobRequest::default()
            })
            .await
            .unwrap();

        service.wait(&receipt.job_id).await.unwrap();
        service.clear_job(&receipt.job_id).await.unwrap();
        assert!(service.job(&receipt.job_id).await.unwrap().is_none());
        // History keeps the terminal record
        assert_eq!(service.history().await.unwrap().len(), 1);
    }
}
