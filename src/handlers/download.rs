//! # Download Endpoints
//!
//! POST creates a job and spawns the acquisition pipeline; GET snapshots it;
//! DELETE cancels it. The pipeline task is the job's single writer: every
//! mutation goes through `registry.update`, which silently discards writes
//! once the job is terminal, so a client cancellation never races a
//! completion into an inconsistent record.

use crate::error::{AppError, AppResult};
use crate::jobs::registry::CancelOutcome;
use crate::jobs::{DownloadJob, JobStatus, StepStatus};
use crate::pipeline::audio::{extract_audio, AudioQuality};
use crate::pipeline::download::download_video;
use crate::pipeline::url::{fetch_metadata, validate_url};
use crate::pipeline::cleanup_file;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: Option<String>,
    #[serde(default)]
    pub quality: AudioQuality,
}

pub async fn start_download(
    state: web::Data<AppState>,
    body: web::Json<DownloadRequest>,
) -> AppResult<HttpResponse> {
    let url = body
        .url
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::BadRequest("URL parameter is required".to_string()))?;

    if !validate_url(&url) {
        return Err(AppError::InvalidUrl(
            "URL must be from YouTube, TikTok, Instagram, Twitter, or Facebook".to_string(),
        ));
    }

    let job = DownloadJob::new(url.clone(), body.quality);
    let job_id = job.id;
    let token = state.downloads.insert(job).await;
    info!(%job_id, url, "Download job created");

    let task_state = state.get_ref().clone();
    tokio::spawn(async move {
        run_download_pipeline(task_state, job_id, token).await;
    });

    Ok(HttpResponse::Accepted().json(json!({
        "jobId": job_id,
        "status": "pending",
        "message": "Download queued for processing",
        "statusUrl": format!("/api/download/{job_id}")
    })))
}

pub async fn get_download(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let job_id = path.into_inner();
    let job = state
        .downloads
        .get(job_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Download job {job_id} not found")))?;

    let elapsed = job
        .completed_at
        .unwrap_or_else(Utc::now)
        .signed_duration_since(job.started_at)
        .num_seconds();

    let mut body = json!({
        "jobId": job.id,
        "status": job.status,
        "progress": job.progress,
        "elapsed": format!("{elapsed}s"),
        "steps": job.steps,
    });
    if job.status == JobStatus::Completed {
        body["result"] = json!({
            "audioPath": job.audio_path,
            "audioId": job.audio_id,
            "duration": job.duration_seconds,
            "size": job.size_bytes,
            "quality": job.quality,
        });
    }
    if let Some(err) = &job.error {
        body["error"] = json!(err);
    }
    Ok(HttpResponse::Ok().json(body))
}

pub async fn cancel_download(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let job_id = path.into_inner();
    // Snapshot before cancelling so transient files can be removed.
    let snapshot = state.downloads.get(job_id).await;

    match state.downloads.cancel(job_id).await {
        CancelOutcome::NotFound => {
            Err(AppError::NotFound(format!("Download job {job_id} not found")))
        }
        CancelOutcome::AlreadyTerminal => Err(AppError::BadRequest(format!(
            "Cannot cancel a finished job ({job_id})"
        ))),
        CancelOutcome::Cancelled => {
            if let Some(job) = snapshot {
                cleanup_job_files(job.video_path.as_deref(), job.audio_path.as_deref()).await;
            }
            Ok(HttpResponse::Ok().json(json!({
                "message": "Download job cancelled",
                "jobId": job_id
            })))
        }
    }
}

/// The owning background task: metadata probe, video download, audio
/// extraction, then cleanup of the video file (only the audio survives).
async fn run_download_pipeline(state: AppState, job_id: Uuid, cancel: CancellationToken) {
    let config = state.get_config();
    let out_dir = PathBuf::from(&config.pipeline.upload_dir);

    let (url, quality) = match state.downloads.get(job_id).await {
        Some(job) => (job.url, job.quality),
        None => return,
    };

    let mut video_path: Option<PathBuf> = None;
    let mut audio_path: Option<PathBuf> = None;
    let result = async {
        state
            .downloads
            .update(job_id, |job| {
                job.status = JobStatus::Processing;
                job.steps.metadata = StepStatus::Processing;
            })
            .await;

        fetch_metadata(&url, &config.pipeline).await?;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        state
            .downloads
            .update(job_id, |job| {
                job.steps.metadata = StepStatus::Completed;
                job.steps.download = StepStatus::Processing;
                job.progress = 25;
            })
            .await;

        let video = download_video(&url, &out_dir, &config.pipeline, &cancel).await?;
        video_path = Some(video.path.clone());
        state
            .downloads
            .update(job_id, |job| {
                job.steps.download = StepStatus::Completed;
                job.steps.audio_extraction = StepStatus::Processing;
                job.progress = 50;
                job.video_path = Some(video.path.clone());
            })
            .await;

        let audio = extract_audio(&video.path, &out_dir, quality, &config.pipeline, &cancel).await?;
        audio_path = Some(audio.path.clone());

        // The video file is transient; only the audio moves forward.
        cleanup_file(&video.path).await;
        video_path = None;

        let committed = state
            .downloads
            .update(job_id, |job| {
                job.status = JobStatus::Completed;
                job.steps.audio_extraction = StepStatus::Completed;
                job.progress = 100;
                job.video_path = None;
                job.audio_path = Some(audio.path.clone());
                job.audio_id = Some(audio.audio_id);
                job.duration_seconds = Some(audio.duration_seconds);
                job.size_bytes = Some(audio.size_bytes);
                job.completed_at = Some(Utc::now());
            })
            .await;
        if !committed {
            // Cancelled after extraction finished; the job is already
            // terminal, so the produced audio has no owner left.
            return Err(AppError::Cancelled);
        }

        info!(
            %job_id,
            duration = format!("{:.2}s", audio.duration_seconds),
            "Download and extraction complete"
        );
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(err) = result {
        // A cancelled job is already terminal; the update below is then a
        // no-op and only the file cleanup matters.
        if !matches!(err, AppError::Cancelled) {
            error!(%job_id, code = %err.code(), "Download pipeline failed");
        }
        cleanup_job_files(video_path.as_deref(), audio_path.as_deref()).await;
        state.downloads.update(job_id, |job| job.fail(&err)).await;
    }
}

async fn cleanup_job_files(video: Option<&Path>, audio: Option<&Path>) {
    if let Some(path) = video {
        cleanup_file(path).await;
    }
    if let Some(path) = audio {
        cleanup_file(path).await;
    }
}
