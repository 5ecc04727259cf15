//! Job command handlers
//!
//! Submitting image and video jobs, inspecting them, and watching one until
//! it finishes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use colored::*;
use kiln_client::{JobWatcher, OrchestratorClient, WatchOptions, WatchOutcome};
use kiln_core::domain::config::{ImageGenerationConfig, JobConfig, VideoClippingConfig};
use kiln_core::domain::job::JobStatus;
use kiln_core::domain::subtask::SubtaskStatus;
use kiln_core::dto::job::JobSummary;
use kiln_core::dto::status::JobStatusView;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit an image generation job
    SubmitImage {
        /// Text prompt
        prompt: String,

        /// Number of variants to generate
        #[arg(short, long, default_value_t = 4)]
        variations: u32,

        #[arg(long)]
        negative_prompt: Option<String>,

        /// One of 1:1, 4:5, 9:16, 16:9
        #[arg(long)]
        aspect_ratio: Option<String>,

        /// URL of a reference image
        #[arg(long)]
        reference_image: Option<String>,

        #[arg(long)]
        style: Option<String>,

        /// Watch the job after submitting it
        #[arg(short, long)]
        watch: bool,
    },
    /// Submit a video clipping job
    SubmitVideo {
        /// URL of the source video
        source_url: String,

        /// Number of clips to extract
        #[arg(short, long, default_value_t = 3)]
        clips: u32,

        /// Clip length in seconds
        #[arg(short, long, default_value_t = 30)]
        duration: u32,

        /// Skip caption burn-in
        #[arg(long)]
        no_captions: bool,

        #[arg(long)]
        caption_style: Option<String>,

        #[arg(long)]
        language: Option<String>,

        /// Watch the job after submitting it
        #[arg(short, long)]
        watch: bool,
    },
    /// List jobs, newest first
    List,
    /// Get job status
    Get {
        /// Job ID or unambiguous prefix
        id: String,

        /// Print the raw status payload
        #[arg(long)]
        json: bool,
    },
    /// Watch a job until it completes or fails
    ///
    /// Ctrl-C stops watching; the job keeps running.
    Watch {
        /// Job ID or unambiguous prefix
        id: String,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 3000)]
        interval_ms: u64,
    },
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        JobCommands::SubmitImage {
            prompt,
            variations,
            negative_prompt,
            aspect_ratio,
            reference_image,
            style,
            watch,
        } => {
            let mut image = ImageGenerationConfig::new(prompt, variations);
            image.negative_prompt = negative_prompt;
            image.aspect_ratio = aspect_ratio;
            image.reference_image_url = reference_image;
            image.style = style;
            submit(client, JobConfig::ImageGeneration(image), watch).await
        }
        JobCommands::SubmitVideo {
            source_url,
            clips,
            duration,
            no_captions,
            caption_style,
            language,
            watch,
        } => {
            let mut video = VideoClippingConfig::new(source_url, clips);
            video.clip_duration_secs = duration;
            video.captions = !no_captions;
            video.caption_style = caption_style;
            video.language = language;
            submit(client, JobConfig::VideoClipping(video), watch).await
        }
        JobCommands::List => list_jobs(&client).await,
        JobCommands::Get { id, json } => get_job(&client, &id, json).await,
        JobCommands::Watch { id, interval_ms } => {
            let job_id = resolve_job_id(&client, &IdOrPrefix::parse(&id)).await?;
            watch_job(client, job_id, Duration::from_millis(interval_ms)).await
        }
    }
}

/// Checks `GET /health`
pub async fn check_health(config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);
    let health = client
        .health()
        .await
        .with_context(|| format!("Orchestrator at {} is unreachable", client.base_url()))?;

    println!(
        "{} {} {} ({})",
        "✓".green(),
        health.service,
        health.version.dimmed(),
        health.status
    );
    Ok(())
}

async fn submit(client: OrchestratorClient, config: JobConfig, watch: bool) -> Result<()> {
    // Fail fast locally with the same rules the orchestrator applies
    if let Err(e) = config.validate() {
        bail!("Invalid job config: {}", e);
    }

    let submitted = client
        .submit_job(&config)
        .await
        .context("Failed to submit job")?;

    println!("{}", "✓ Job submitted".green().bold());
    println!("  ID:     {}", submitted.job_id.to_string().cyan());
    println!("  Kind:   {}", config.kind());
    println!("  Status: {}", colorize_status(&submitted.status));

    if watch {
        println!();
        watch_job(client, submitted.job_id, Duration::from_millis(3000)).await?;
    }

    Ok(())
}

async fn list_jobs(client: &OrchestratorClient) -> Result<()> {
    let jobs = client.list_jobs().await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

async fn get_job(client: &OrchestratorClient, id: &str, json: bool) -> Result<()> {
    let job_id = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;
    let view = client.get_job_status(job_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_job_details(&view);
    }

    Ok(())
}

async fn watch_job(client: OrchestratorClient, job_id: Uuid, interval: Duration) -> Result<()> {
    let options = WatchOptions {
        interval,
        ..WatchOptions::default()
    };
    let watcher = JobWatcher::spawn(Arc::new(client), job_id, options);
    stop_on_ctrl_c(watcher.cancellation_token());

    println!(
        "{}",
        format!("Watching job {} (Ctrl-C to stop watching)", job_id).bold()
    );

    let mut updates = watcher.subscribe();
    let mut last: Option<(JobStatus, u8)> = None;
    while updates.changed().await.is_ok() {
        let Some(view) = updates.borrow_and_update().clone() else {
            continue;
        };
        // Only print when something moved
        if last != Some((view.status, view.progress)) {
            print_progress_line(&view);
            last = Some((view.status, view.progress));
        }
    }

    match watcher.wait().await? {
        WatchOutcome::Finished(view) => {
            println!();
            print_job_details(&view);
            if view.status == JobStatus::Failed {
                bail!("Job {} failed", job_id);
            }
        }
        WatchOutcome::Stopped(_) => {
            println!();
            println!(
                "{}",
                "Stopped watching. The job is still running on the orchestrator.".yellow()
            );
        }
    }

    Ok(())
}

fn stop_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    token.cancel();
                }
            }
        }
    });
}

fn print_progress_line(view: &JobStatusView) {
    let done = view
        .subtasks
        .iter()
        .filter(|s| s.status.is_terminal())
        .count();
    println!(
        "  {} {:>3}%  {}  {}",
        "▸".cyan(),
        view.progress,
        colorize_status(&view.status),
        format!("{}/{} subtasks settled", done, view.subtasks.len()).dimmed()
    );
}

fn print_job_summary(job: &JobSummary) {
    println!("  {} Job {}", "▸".cyan(), job.id.to_string().dimmed());
    println!("    Kind:     {}", job.kind);
    println!(
        "    Status:   {} ({}%)",
        colorize_status(&job.status),
        job.progress
    );
    println!(
        "    Created:  {}",
        job.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_job_details(view: &JobStatusView) {
    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", view.job_id.to_string().cyan());
    println!("  Kind:      {}", view.kind);
    println!("  Status:    {}", colorize_status(&view.status));
    println!("  Progress:  {}%", view.progress);
    println!("  Created:   {}", view.created_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(started) = view.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = view.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
        if let Some(started) = view.started_at {
            let seconds = completed.signed_duration_since(started).num_seconds();
            println!("  Duration:  {}s", seconds);
        }
    }

    if let Some(error) = &view.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }

    if !view.subtasks.is_empty() {
        println!("\n{}", "Subtasks:".bold());
        for subtask in &view.subtasks {
            let status = colorize_subtask_status(&subtask.status);
            let score = subtask
                .score
                .map(|s| format!(" score {:.2}", s))
                .unwrap_or_default();
            println!("  #{:<2} {}{}", subtask.index, status, score.dimmed());
            if let Some(url) = &subtask.result_url {
                println!("      {}", url.cyan());
            }
            if let Some(error) = &subtask.error {
                println!("      {}", error.red());
            }
        }
    }
}

fn colorize_status(status: &JobStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        JobStatus::Pending => text.yellow(),
        JobStatus::Completed => text.green(),
        JobStatus::Failed => text.red(),
        _ => text.cyan(),
    }
}

fn colorize_subtask_status(status: &SubtaskStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        SubtaskStatus::Pending => text.yellow(),
        SubtaskStatus::Completed => text.green(),
        SubtaskStatus::Failed => text.red(),
        SubtaskStatus::Processing | SubtaskStatus::Captioning => text.cyan(),
    }
}
