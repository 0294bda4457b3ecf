//! # Job Model
//!
//! Records for the two asynchronous job categories the pipeline exposes:
//! download jobs (URL → local audio) and transcription jobs (local audio →
//! text). Clients observe these purely by polling; the records here are the
//! wire shape of those snapshots.
//!
//! ## Lifecycle invariants:
//! - Creation starts at `pending` (download) or `queued` (transcription)
//! - The owning background task moves a job to `processing`, then to exactly
//!   one terminal state
//! - Once terminal, step statuses are frozen and no further mutation happens
//! - `result` and `error` are mutually exclusive; a cancelled job never
//!   acquires a result

pub mod registry;

use crate::error::AppError;
use crate::pipeline::audio::AudioQuality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle state shared by both job categories.
///
/// `Pending` is the initial state for download jobs, `Queued` for
/// transcription jobs; the distinction only exists on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Progress of one named step within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
}

/// Structured error payload surfaced to pollers of a failed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&AppError> for JobError {
    fn from(err: &AppError) -> Self {
        JobError {
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
        }
    }
}

/// Named steps of a download job, each independently trackable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSteps {
    pub url_validation: StepStatus,
    pub metadata: StepStatus,
    pub download: StepStatus,
    pub audio_extraction: StepStatus,
}

impl Default for DownloadSteps {
    fn default() -> Self {
        Self {
            // The submission handler only creates a job after the URL passed
            // the whitelist, so this step is born completed.
            url_validation: StepStatus::Completed,
            metadata: StepStatus::Pending,
            download: StepStatus::Pending,
            audio_extraction: StepStatus::Pending,
        }
    }
}

/// A download-and-extract job tracked through the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    pub id: Uuid,
    pub url: String,
    pub status: JobStatus,
    pub progress: u8,
    pub steps: DownloadSteps,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub quality: AudioQuality,
    /// Transient video file owned by this job until cleanup
    #[serde(skip)]
    pub video_path: Option<PathBuf>,
    /// Produced audio file; owned by the job until a client takes it onward
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl DownloadJob {
    pub fn new(url: String, quality: AudioQuality) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            status: JobStatus::Pending,
            progress: 0,
            steps: DownloadSteps::default(),
            started_at: Utc::now(),
            completed_at: None,
            quality,
            video_path: None,
            audio_path: None,
            audio_id: None,
            duration_seconds: None,
            size_bytes: None,
            error: None,
        }
    }

    pub fn fail(&mut self, err: &AppError) {
        self.status = JobStatus::Failed;
        self.error = Some(JobError::from(err));
        self.completed_at = Some(Utc::now());
    }
}

/// Named steps of a transcription job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionSteps {
    pub language_detection: StepStatus,
    pub transcription: StepStatus,
    pub cost_calculation: StepStatus,
}

impl Default for TranscriptionSteps {
    fn default() -> Self {
        Self {
            language_detection: StepStatus::Pending,
            transcription: StepStatus::Pending,
            cost_calculation: StepStatus::Pending,
        }
    }
}

/// Final output of a successful transcription job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionOutcome {
    pub text: String,
    pub language: String,
    pub cost: f64,
    pub confidence: f64,
    pub cached: bool,
}

/// A transcription job tracked through the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionJob {
    pub id: Uuid,
    pub audio_path: PathBuf,
    /// Content hash of the audio, filled in by the owning task once computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub duration_minutes: f64,
    pub status: JobStatus,
    pub progress: u8,
    pub steps: TranscriptionSteps,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TranscriptionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl TranscriptionJob {
    pub fn new(audio_path: PathBuf, language: Option<String>, duration_minutes: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            audio_path,
            audio_hash: None,
            language,
            duration_minutes,
            status: JobStatus::Queued,
            progress: 0,
            steps: TranscriptionSteps::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn fail(&mut self, err: &AppError) {
        self.status = JobStatus::Failed;
        self.error = Some(JobError::from(err));
        self.result = None;
        self.completed_at = Some(Utc::now());
    }
}

/// The bookkeeping the registry sweeper needs, independent of job category.
///
/// The sweeper only ever reads `started_at` and flips nothing, which keeps it
/// safe to run concurrently with owning tasks (single-writer-per-key).
pub trait TrackedJob: Clone + Send + Sync + 'static {
    fn job_id(&self) -> Uuid;
    fn job_started_at(&self) -> DateTime<Utc>;
    fn job_status(&self) -> JobStatus;
    fn set_status(&mut self, status: JobStatus);
}

impl TrackedJob for DownloadJob {
    fn job_id(&self) -> Uuid {
        self.id
    }
    fn job_started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
    fn job_status(&self) -> JobStatus {
        self.status
    }
    fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }
}

impl TrackedJob for TranscriptionJob {
    fn job_id(&self) -> Uuid {
        self.id
    }
    fn job_started_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn job_status(&self) -> JobStatus {
        self.status
    }
    fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_new_download_job_shape() {
        let job = DownloadJob::new("https://youtu.be/x".into(), AudioQuality::Medium);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.steps.url_validation, StepStatus::Completed);
        assert_eq!(job.steps.download, StepStatus::Pending);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_fail_clears_result_and_freezes() {
        let mut job = TranscriptionJob::new(PathBuf::from("/tmp/a.wav"), None, 2.0);
        job.result = Some(TranscriptionOutcome {
            text: "x".into(),
            language: "en".into(),
            cost: 0.0,
            confidence: 0.85,
            cached: false,
        });
        job.fail(&AppError::TranscriptionFailed("boom".into()));
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert_eq!(job.error.as_ref().unwrap().code, "TRANSCRIPTION_FAILED");
        assert!(job.completed_at.is_some());
    }
}
