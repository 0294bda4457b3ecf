//! # Transcription Endpoints
//!
//! POST runs the budget pre-flight and spawns the transcription task; GET
//! snapshots the job; DELETE cancels it. The cost/cache read endpoints also
//! live here because they share the `/api/transcribe` scope.

use crate::error::{AppError, AppResult};
use crate::jobs::registry::CancelOutcome;
use crate::jobs::{JobStatus, StepStatus, TranscriptionJob, TranscriptionOutcome};
use crate::state::AppState;
use crate::transcription::audio_hash;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_LOG_LIMIT: usize = 1000;
const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    pub audio_path: Option<String>,
    pub language: Option<String>,
    /// Audio duration in minutes, used for cost estimation
    pub duration: Option<f64>,
}

pub async fn start_transcription(
    state: web::Data<AppState>,
    body: web::Json<TranscribeRequest>,
) -> AppResult<HttpResponse> {
    let audio_path = body
        .audio_path
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("audioPath parameter is required".to_string()))?;
    let duration = match body.duration {
        Some(d) if d > 0.0 => d,
        _ => {
            return Err(AppError::BadRequest(
                "duration must be a positive number of minutes".to_string(),
            ))
        }
    };

    // Budget pre-flight: reject before a job exists, so nothing is spawned
    // for work the ledger would refuse anyway.
    let estimated_cost = state.engine.estimate_cost(duration);
    state.costs.check_budget(estimated_cost).await?;

    let job = TranscriptionJob::new(PathBuf::from(audio_path), body.language.clone(), duration);
    let job_id = job.id;
    let token = state.transcriptions.insert(job).await;
    info!(%job_id, duration_minutes = duration, "Transcription job created");

    let task_state = state.get_ref().clone();
    tokio::spawn(async move {
        run_transcription(task_state, job_id, token).await;
    });

    Ok(HttpResponse::Accepted().json(json!({
        "jobId": job_id,
        "status": "queued",
        "estimatedCost": estimated_cost
    })))
}

pub async fn get_transcription(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let job_id = path.into_inner();
    let job = state
        .transcriptions
        .get(job_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Transcription job {job_id} not found")))?;

    let mut body = json!({
        "jobId": job.id,
        "status": job.status,
        "progress": job.progress,
        "steps": job.steps,
        "createdAt": job.created_at,
    });
    if let Some(result) = &job.result {
        body["result"] = json!(result);
    }
    if let Some(err) = &job.error {
        body["error"] = json!(err);
    }
    Ok(HttpResponse::Ok().json(body))
}

pub async fn cancel_transcription(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let job_id = path.into_inner();
    match state.transcriptions.cancel(job_id).await {
        CancelOutcome::NotFound => Err(AppError::NotFound(format!(
            "Transcription job {job_id} not found"
        ))),
        CancelOutcome::AlreadyTerminal => Err(AppError::BadRequest(format!(
            "Cannot cancel a finished job ({job_id})"
        ))),
        // The audio file belongs to the client (or to a download job), so
        // cancellation does not remove it.
        CancelOutcome::Cancelled => Ok(HttpResponse::Ok().json(json!({
            "message": "Transcription job cancelled",
            "jobId": job_id
        }))),
    }
}

pub async fn cost_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.costs.stats().await)
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

pub async fn cost_log(state: web::Data<AppState>, query: web::Query<LogQuery>) -> HttpResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    let entries = state.costs.recent(limit).await;
    HttpResponse::Ok().json(json!({
        "count": entries.len(),
        "entries": entries
    }))
}

pub async fn cache_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.cache.stats().await)
}

/// The owning background task: hash the audio, resolve the language, run the
/// engine (cache, retries, and cost tracking included), record the outcome.
async fn run_transcription(state: AppState, job_id: Uuid, cancel: CancellationToken) {
    let (audio_path, language_hint, duration) = match state.transcriptions.get(job_id).await {
        Some(job) => (job.audio_path, job.language, job.duration_minutes),
        None => return,
    };

    state
        .transcriptions
        .update(job_id, |job| {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
            job.steps.language_detection = StepStatus::Processing;
        })
        .await;

    let result = async {
        let hash_path = audio_path.clone();
        let hash = tokio::task::spawn_blocking(move || audio_hash(&hash_path))
            .await
            .map_err(|e| AppError::Internal(format!("Hashing task failed: {e}")))??;

        // A provided language hint skips the detection call entirely.
        let language = match &language_hint {
            Some(hint) => Some(hint.clone()),
            None => match state.engine.detect_language(&audio_path).await {
                Ok(detected) => Some(detected),
                Err(err) => {
                    // Detection is best-effort; transcription proceeds with
                    // auto-detection downstream.
                    warn!(%job_id, error = %err, "Language detection failed");
                    None
                }
            },
        };

        state
            .transcriptions
            .update(job_id, |job| {
                job.steps.language_detection = StepStatus::Completed;
                job.steps.transcription = StepStatus::Processing;
                job.progress = 33;
                job.audio_hash = Some(hash.clone());
                job.language = language.clone();
            })
            .await;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let transcription = state
            .engine
            .transcribe(&audio_path, &hash, language.as_deref(), duration, &cancel)
            .await?;

        state
            .transcriptions
            .update(job_id, |job| {
                job.steps.transcription = StepStatus::Completed;
                job.steps.cost_calculation = StepStatus::Processing;
                job.progress = 66;
            })
            .await;

        state
            .transcriptions
            .update(job_id, |job| {
                job.status = JobStatus::Completed;
                job.steps.cost_calculation = StepStatus::Completed;
                job.progress = 100;
                job.result = Some(TranscriptionOutcome {
                    text: transcription.text.clone(),
                    language: transcription.language.clone(),
                    cost: transcription.cost,
                    confidence: transcription.confidence,
                    cached: transcription.cached,
                });
                job.completed_at = Some(Utc::now());
            })
            .await;

        info!(%job_id, cached = transcription.cached, "Transcription job complete");
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(err) = result {
        if !matches!(err, AppError::Cancelled) {
            error!(%job_id, code = %err.code(), "Transcription job failed");
        }
        // No-op if the job was cancelled (already terminal).
        state.transcriptions.update(job_id, |job| job.fail(&err)).await;
    }
}
