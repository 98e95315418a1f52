//! Clipline worker binary: run one clipping job end to end.

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipline_models::{ClipOutcome, JobId, JobRequest, JobStatus};
use clipline_worker::{PipelineService, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "clipline-worker", about = "Turn a source video into captioned vertical clips")]
struct Cli {
    /// Source video URL
    url: String,

    /// Maximum number of clips to produce
    #[arg(long)]
    max_clips: Option<usize>,

    /// Minimum clip duration in seconds
    #[arg(long)]
    min_duration: Option<f64>,

    /// Maximum clip duration in seconds
    #[arg(long)]
    max_duration: Option<f64>,

    /// Re-run LLM analysis even when cached moments exist
    #[arg(long)]
    reanalyze: bool,

    /// Use this model instead of the configured default
    #[arg(long)]
    model_override: Option<String>,

    /// Directory for rendered clips
    #[arg(long, env = "CLIPLINE_OUTPUT_DIR")]
    output_dir: Option<std::path::PathBuf>,

    /// Caller-supplied job id (generated when omitted)
    #[arg(long)]
    job_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("clipline=info".parse().unwrap())
        .add_directive("ort=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    let cli = Cli::parse();

    // Tool preflight keeps failures early and obvious
    for check in [
        clipline_media::check_ffmpeg(),
        clipline_media::check_ffprobe(),
        clipline_media::check_ytdlp(),
    ] {
        if let Err(e) = check {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let mut config = WorkerConfig::from_env();
    if let Some(output_dir) = &cli.output_dir {
        config.output_dir = output_dir.clone();
    }
    config.load_job_defaults().await;

    let service = PipelineService::new(config)
        .await
        .context("Failed to start pipeline service")?;

    let request = JobRequest {
        url: cli.url,
        max_clips: cli.max_clips,
        min_duration: cli.min_duration,
        max_duration: cli.max_duration,
        reanalyze: cli.reanalyze.then_some(true),
        model_override: cli.model_override,
    };

    let receipt = match &cli.job_id {
        Some(id) => {
            service
                .submit_with_id(request, JobId::from_string(id.clone()))
                .await
        }
        None => service.submit(request).await,
    };

    let receipt = match receipt {
        Ok(receipt) => receipt,
        Err(e) => {
            error!("Submission rejected: {}", e);
            std::process::exit(1);
        }
    };

    info!(job_id = %receipt.job_id, video_id = %receipt.video_id, "Job started");

    // Ctrl-C stops the job cleanly instead of orphaning subprocesses
    tokio::select! {
        job = service.wait(&receipt.job_id) => {
            match job {
                Ok(job) => report(&job),
                Err(e) => {
                    error!("Job lost: {}", e);
                    std::process::exit(1);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, stopping job");
            service.stop(&receipt.job_id).await;

            // The driver kills its subprocess and persists the terminal
            // snapshot; give it a bounded window to land
            let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(30);
            loop {
                if let Ok(Some(job)) = service.job(&receipt.job_id).await {
                    if job.is_terminal() {
                        report(&job);
                        break;
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    error!("Job did not reach a terminal state before shutdown");
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            std::process::exit(130);
        }
    }

    Ok(())
}

fn report(job: &clipline_models::Job) {
    let rendered: Vec<_> = job
        .clips
        .iter()
        .filter_map(ClipOutcome::as_clip)
        .collect();

    match job.status {
        JobStatus::Done if !rendered.is_empty() => {
            println!("Generated {} clips:", rendered.len());
            for clip in rendered {
                println!("  -> {}", clip.file_path.display());
            }
        }
        JobStatus::Done => {
            println!("Job finished but no clips were produced");
            std::process::exit(1);
        }
        _ => {
            println!(
                "Job ended with status '{}': {}",
                job.status,
                job.error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
    }
}
