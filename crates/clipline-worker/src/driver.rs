//! Pipeline driver.
//!
//! Runs one job's state machine end to end: acquisition, transcription,
//! moment selection and clip rendering, with cache short-circuiting at
//! every stage that has a cached artifact. Stages are strictly sequential
//! except rendering, which fans out over a process-wide render semaphore.
//! A stage failure lands the job in `error`; a per-moment render failure
//! only skips that moment.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use clipline_media::{
    download_audio, download_video, probe_video, ClipRenderer, DownloadOptions, MediaError,
    MediaResult, RenderRequest,
};
use clipline_models::{
    JobConfig, LogLevel, Moment, Stage, StageStatus, Transcript, VideoId, Word,
};
use clipline_storage::{AnalysisCache, AnalysisEntry, StateStore, VideoFileCache};

use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult, Stage as ErrorStage};
use crate::llm::OpenRouterClient;
use crate::selector::select_moments;
use crate::state_machine::JobStateMachine;
use crate::transcribe::{transcribe, TranscribeContext};

/// Shared process-level context for all job runs.
pub struct DriverContext {
    pub config: WorkerConfig,
    pub store: StateStore,
    pub analysis_cache: AnalysisCache,
    pub video_cache: VideoFileCache,
    pub renderer: Arc<ClipRenderer>,
    /// Global cap on concurrent FFmpeg renders across all jobs.
    pub render_slots: Arc<Semaphore>,
    pub llm: Option<OpenRouterClient>,
}

impl DriverContext {
    pub async fn new(config: WorkerConfig) -> PipelineResult<Self> {
        let store = StateStore::open(&config.data_dir).await?;
        let analysis_cache = AnalysisCache::open(config.cache_dir.join("analysis")).await?;
        let video_cache = VideoFileCache::open(config.cache_dir.join("videos")).await?;

        let llm = match &config.openrouter_api_key {
            Some(key) => Some(OpenRouterClient::with_base_url(
                key.clone(),
                config.openrouter_base_url.clone(),
                config.llm_timeout,
            )?),
            None => None,
        };

        Ok(Self {
            render_slots: Arc::new(Semaphore::new(config.max_concurrent_renders)),
            renderer: Arc::new(ClipRenderer::new()),
            store,
            analysis_cache,
            video_cache,
            llm,
            config,
        })
    }
}

/// Run one job to a terminal state. Never panics the caller: all errors
/// end up on the job record.
pub async fn run_job(
    ctx: Arc<DriverContext>,
    machine: JobStateMachine,
    cancel: watch::Receiver<bool>,
) {
    let job_id = machine.id();
    match run_pipeline(&ctx, &machine, cancel).await {
        Ok(()) => {
            machine.complete().await;
            info!(job_id = %job_id, clips = machine.snapshot().rendered_clip_count(), "Job done");
        }
        Err(e) => {
            machine.fail(&e).await;
            if e.is_cancelled() {
                info!(job_id = %job_id, "Job stopped");
            } else {
                warn!(job_id = %job_id, error = %e, "Job failed");
            }
        }
    }
}

fn check_cancelled(cancel: &watch::Receiver<bool>) -> PipelineResult<()> {
    if *cancel.borrow() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// The source file, either on disk already or still downloading.
enum VideoHandle {
    Ready(PathBuf),
    Pending(JoinHandle<MediaResult<PathBuf>>),
}

/// Aborts the background download when the pipeline exits early.
///
/// Aborting the task drops the in-flight subprocess future, which kills
/// the yt-dlp child (spawned with kill-on-drop).
struct DownloadGuard(Option<tokio::task::AbortHandle>);

impl DownloadGuard {
    fn arm(handle: tokio::task::AbortHandle) -> Self {
        Self(Some(handle))
    }

    fn none() -> Self {
        Self(None)
    }

    /// The download is about to be awaited; stop guarding it.
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

async fn run_pipeline(
    ctx: &Arc<DriverContext>,
    machine: &JobStateMachine,
    cancel: watch::Receiver<bool>,
) -> PipelineResult<()> {
    let job = machine.snapshot();
    let video_id = job.video_id.clone();
    let config = job.config.clone();
    let sink = machine.log_sink();

    if let Ok(removed) = ctx.video_cache.sweep_expired().await {
        if removed > 0 {
            machine.log(LogLevel::Info, format!("Swept {} expired cached videos", removed));
        }
    }

    check_cancelled(&cancel)?;

    // Cache probe. With `reanalyze` the transcript is reused but the
    // moments are recomputed; otherwise a hit must match the model.
    let cached_entry = if config.reanalyze {
        ctx.analysis_cache.load(&video_id).await
    } else {
        ctx.analysis_cache
            .load_for_model(&video_id, &config.model)
            .await
    };
    let moments_cached = !config.reanalyze && cached_entry.is_some();

    if let Some(entry) = &cached_entry {
        machine
            .set_video_metadata(
                entry.video_title.clone(),
                entry.channel.clone(),
                entry.thumbnail.clone(),
            )
            .await;
        machine.log(
            LogLevel::Info,
            format!(
                "Analysis cache hit for {} (model {}, {} moments)",
                video_id,
                entry.model,
                entry.moments.len()
            ),
        );
    }

    let download_options = DownloadOptions {
        cancel: Some(cancel.clone()),
        log_sink: Some(sink.clone()),
        timeout_secs: Some(ctx.config.download_timeout.as_secs()),
    };

    let workdir = tempfile::tempdir()?;
    let need_transcription = cached_entry.is_none();

    // ── Download ──
    // When transcription is needed, the audio-only stream downloads first
    // so transcription and analysis can run while the full video is still
    // coming down.
    machine.begin_stage(Stage::Downloading).await;

    let mut transcribe_source: Option<PathBuf> = None;
    let mut download_guard = DownloadGuard::none();
    let video_handle: VideoHandle = if let Some(cached) = ctx.video_cache.lookup(&video_id).await {
        machine.mark_stage_cached(Stage::Downloading).await;
        VideoHandle::Ready(cached)
    } else if need_transcription {
        let url = job.url.clone();
        let options = download_options.clone();
        let video_workdir = workdir.path().to_path_buf();
        let video_task =
            tokio::spawn(
                async move { download_video(&url, &video_workdir, &options).await },
            );
        download_guard = DownloadGuard::arm(video_task.abort_handle());

        match download_audio(&job.url, workdir.path(), &download_options).await {
            Ok(audio) => {
                machine.log(
                    LogLevel::Info,
                    "Audio downloaded, transcribing while the video downloads",
                );
                transcribe_source = Some(audio);
                VideoHandle::Pending(video_task)
            }
            Err(MediaError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                machine.log(
                    LogLevel::Warning,
                    format!("Audio-only download failed ({}), waiting for the video", e),
                );
                download_guard.disarm();
                let path = finish_video_download(machine, video_task).await?;
                transcribe_source = Some(path.clone());
                VideoHandle::Ready(path)
            }
        }
    } else {
        let path = download_video(&job.url, workdir.path(), &download_options)
            .await
            .map_err(|e| downloading_error(machine, e))?;
        VideoHandle::Ready(path)
    };

    if let VideoHandle::Ready(path) = &video_handle {
        finish_downloading_stage(ctx, machine, &video_id, path).await;
    }

    check_cancelled(&cancel)?;

    // ── Transcribe ──
    let transcript: Transcript = if let Some(entry) = &cached_entry {
        machine.mark_stage_cached(Stage::Transcribing).await;
        entry.transcript.clone()
    } else {
        machine.begin_stage(Stage::Transcribing).await;
        let source = match &transcribe_source {
            Some(path) => path.clone(),
            None => match &video_handle {
                VideoHandle::Ready(path) => path.clone(),
                VideoHandle::Pending(_) => unreachable!("pending video implies audio source"),
            },
        };

        let transcribe_ctx = TranscribeContext {
            config: &ctx.config,
            cancel: Some(cancel.clone()),
            log_sink: Some(sink.clone()),
        };

        let transcript =
            run_transcription(machine, &source, &config, &transcribe_ctx).await?;
        machine.end_stage(Stage::Transcribing, StageStatus::Done).await;
        machine.log(
            LogLevel::Info,
            format!(
                "Transcribed {} words ({:.1} words/sec)",
                transcript.word_count(),
                transcript.words_per_second()
            ),
        );
        transcript
    };

    check_cancelled(&cancel)?;

    // ── Analyze ──
    let moments: Vec<Moment> = if moments_cached {
        let entry = cached_entry.as_ref().expect("cache hit");
        machine.mark_stage_cached(Stage::Analyzing).await;
        entry.moments.clone()
    } else {
        machine.begin_stage(Stage::Analyzing).await;

        let llm = ctx.llm.as_ref().ok_or_else(|| {
            PipelineError::selection("no LLM API key configured (set OPENROUTER_API_KEY)")
        })?;

        let moments = select_moments(llm, &transcript, &config).await?;
        store_analysis(ctx, machine, &video_id, &job.url, &config, &transcript, &moments).await;
        machine.end_stage(Stage::Analyzing, StageStatus::Done).await;
        moments
    };

    check_cancelled(&cancel)?;

    // ── Wait for the video if it is still downloading ──
    let video_path = match video_handle {
        VideoHandle::Ready(path) => path,
        VideoHandle::Pending(task) => {
            machine.log(LogLevel::Info, "Waiting for the video download to finish");
            download_guard.disarm();
            let path = finish_video_download(machine, task).await?;
            finish_downloading_stage(ctx, machine, &video_id, &path).await;
            path
        }
    };

    check_cancelled(&cancel)?;

    // ── Clip ──
    machine.begin_stage(Stage::Clipping).await;
    render_moments(ctx, machine, &cancel, &video_path, &video_id, &config, &transcript, moments)
        .await?;
    machine.end_stage(Stage::Clipping, StageStatus::Done).await;

    // A stop that landed during the last render must still win: a stopped
    // job never transitions to done
    check_cancelled(&cancel)?;

    Ok(())
}

/// Transcribe with the configured provider; retry with the alternate one
/// only when fallback is explicitly enabled.
async fn run_transcription(
    machine: &JobStateMachine,
    source: &PathBuf,
    config: &JobConfig,
    ctx: &TranscribeContext<'_>,
) -> PipelineResult<Transcript> {
    let provider = config.transcription_provider;
    match transcribe(source, provider, ctx).await {
        Ok(transcript) => Ok(transcript),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) if config.transcription_fallback => {
            let alternate = provider.alternate();
            machine.log(
                LogLevel::Warning,
                format!(
                    "{} transcription failed ({}), retrying with {} provider",
                    provider, e, alternate
                ),
            );
            transcribe(source, alternate, ctx).await
        }
        Err(e) => Err(e),
    }
}

/// Await the background video download, mapping failures to acquisition
/// errors on the job.
async fn finish_video_download(
    machine: &JobStateMachine,
    task: JoinHandle<MediaResult<PathBuf>>,
) -> PipelineResult<PathBuf> {
    match task.await {
        Ok(Ok(path)) => Ok(path),
        Ok(Err(e)) => Err(downloading_error(machine, e)),
        Err(e) => Err(PipelineError::acquisition(format!(
            "download task panicked: {}",
            e
        ))),
    }
}

fn downloading_error(machine: &JobStateMachine, e: MediaError) -> PipelineError {
    let err = PipelineError::from_media(ErrorStage::Acquisition, e);
    if !err.is_cancelled() {
        machine.log(LogLevel::Error, err.job_message());
    }
    err
}

/// Close the downloading stage (if still open), record duration, and copy
/// the source into the video cache.
async fn finish_downloading_stage(
    ctx: &DriverContext,
    machine: &JobStateMachine,
    video_id: &VideoId,
    video_path: &PathBuf,
) {
    let step_open = machine
        .snapshot()
        .steps
        .get(&Stage::Downloading)
        .map(|s| s.ended_at.is_none())
        .unwrap_or(false);
    if step_open {
        machine.end_stage(Stage::Downloading, StageStatus::Done).await;
    }

    if let Ok(info) = probe_video(video_path).await {
        machine.set_duration(info.duration).await;
    }

    // Serialize same-video cache writes across concurrent jobs
    let _guard = ctx.analysis_cache.lock(video_id).await;
    ctx.video_cache.store(video_id, video_path).await;
}

/// Overwrite the analysis cache entry for this video (best-effort).
async fn store_analysis(
    ctx: &DriverContext,
    machine: &JobStateMachine,
    video_id: &VideoId,
    url: &str,
    config: &JobConfig,
    transcript: &Transcript,
    moments: &[Moment],
) {
    let job = machine.snapshot();
    let entry = AnalysisEntry {
        video_id: video_id.clone(),
        video_url: url.to_string(),
        model: config.model.clone(),
        transcript: transcript.clone(),
        moments: moments.to_vec(),
        video_title: job.video_title,
        channel: job.channel,
        thumbnail: job.thumbnail,
        duration_seconds: transcript.duration(),
        cached_at: Utc::now(),
    };

    let _guard = ctx.analysis_cache.lock(video_id).await;
    match ctx.analysis_cache.store(&entry).await {
        Ok(()) => machine.log(
            LogLevel::Info,
            format!("Analysis cached for {} ({} moments)", video_id, moments.len()),
        ),
        Err(e) => machine.log(
            LogLevel::Warning,
            format!("Failed to cache analysis: {}", e),
        ),
    }
}

/// Render all selected moments with bounded parallelism.
///
/// Each moment renders independently; a failed render is recorded as a
/// skipped entry and never aborts the siblings. Cancellation aborts the
/// whole job.
#[allow(clippy::too_many_arguments)]
async fn render_moments(
    ctx: &Arc<DriverContext>,
    machine: &JobStateMachine,
    cancel: &watch::Receiver<bool>,
    video_path: &PathBuf,
    video_id: &VideoId,
    config: &JobConfig,
    transcript: &Transcript,
    moments: Vec<Moment>,
) -> PipelineResult<()> {
    let total = moments.len();
    let words: Arc<Vec<Word>> = Arc::new(transcript.words.clone());
    let output_dir = ctx.config.output_dir.join(video_id.as_str());

    machine.log(LogLevel::Info, format!("Rendering {} clips", total));

    let mut tasks = Vec::with_capacity(total);
    for (index, moment) in moments.into_iter().enumerate() {
        let ctx = Arc::clone(ctx);
        let machine = machine.clone();
        let cancel = cancel.clone();
        let words = Arc::clone(&words);
        let video_path = video_path.clone();
        let video_id = video_id.clone();
        let config = config.clone();
        let output_dir = output_dir.clone();

        tasks.push(tokio::spawn(async move {
            let _permit = match ctx.render_slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Err(PipelineError::Cancelled),
            };
            if *cancel.borrow() {
                return Err(PipelineError::Cancelled);
            }

            let title = moment.title.clone();
            let request = RenderRequest {
                source: video_path,
                video_id,
                index,
                total,
                moment,
                words: words.as_ref().clone(),
                config,
                output_dir,
                fonts_dir: ctx.config.fonts_dir.clone(),
                cancel: Some(cancel.clone()),
                log_sink: Some(machine.log_sink()),
            };

            match ctx.renderer.render(&request).await {
                Ok(clip) => {
                    machine.log(
                        LogLevel::Info,
                        format!("Clip {}/{} done: {}", index + 1, total, clip.title),
                    );
                    machine.push_clip(clip).await;
                    Ok(())
                }
                Err(MediaError::Cancelled) => Err(PipelineError::Cancelled),
                Err(e) => {
                    let err = PipelineError::from_media(ErrorStage::Render, e);
                    machine.push_skipped_clip(title, err.job_message()).await;
                    Ok(())
                }
            }
        }));
    }

    let mut cancelled = false;
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => cancelled = true,
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                machine.log(LogLevel::Error, format!("Render task panicked: {}", e));
            }
        }
    }
    if cancelled {
        return Err(PipelineError::Cancelled);
    }

    let rendered = machine.snapshot().rendered_clip_count();
    machine.log(
        LogLevel::Info,
        format!("{}/{} clips rendered", rendered, total),
    );
    if rendered == 0 && total > 0 {
        machine.log(LogLevel::Warning, "Every render failed for this job");
    }

    Ok(())
}
