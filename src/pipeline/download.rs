//! # Download Orchestrator
//!
//! Spawns the external downloader for a validated URL, enforces a wall-clock
//! timeout, classifies failures from the tool's stderr, and guarantees that
//! a failed or cancelled download leaves no partial file behind.
//!
//! Cancellation and timeout both work by dropping the child future: the
//! process is spawned with `kill_on_drop`, so tearing down the future also
//! terminates the subprocess.

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::pipeline::cleanup_file;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// A successfully downloaded video file, owned by the calling job.
#[derive(Debug)]
pub struct DownloadedVideo {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Download the best available MP4 for `url` into `out_dir`.
///
/// The subprocess is raced against the configured timeout and the job's
/// cancellation token; whichever loses, the partial file is removed before
/// the error propagates.
pub async fn download_video(
    url: &str,
    out_dir: &Path,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> AppResult<DownloadedVideo> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    tokio::fs::create_dir_all(out_dir).await?;

    let file_id = Uuid::new_v4();
    let path = out_dir.join(format!("video_{file_id}.mp4"));
    info!(url, path = %path.display(), "Starting video download");

    let child = Command::new("yt-dlp")
        .args([
            "-f",
            "best[ext=mp4]",
            "-o",
            &path.to_string_lossy(),
            "--socket-timeout",
            "30",
            "--fragment-retries",
            "3",
            url,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::DownloadFailed(format!("Failed to spawn yt-dlp: {e}")))?;

    let timeout = Duration::from_secs(config.video_timeout_minutes * 60);
    let output = tokio::select! {
        _ = cancel.cancelled() => {
            cleanup_file(&path).await;
            return Err(AppError::Cancelled);
        }
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Err(_) => {
                cleanup_file(&path).await;
                return Err(AppError::DownloadTimeout(format!(
                    "Download timeout after {} minutes",
                    config.video_timeout_minutes
                )));
            }
            Ok(Err(e)) => {
                cleanup_file(&path).await;
                return Err(AppError::DownloadFailed(format!("yt-dlp process error: {e}")));
            }
            Ok(Ok(output)) => output,
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        let err = classify_downloader_failure(&stderr, config);
        error!(url, code = %err.code(), exit = ?output.status.code(), "Download failed");
        cleanup_file(&path).await;
        return Err(err);
    }

    let size_bytes = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.len() > 0 => meta.len(),
        Ok(_) => {
            cleanup_file(&path).await;
            return Err(AppError::DownloadFailed(
                "Downloaded file is empty".to_string(),
            ));
        }
        Err(e) => {
            cleanup_file(&path).await;
            return Err(AppError::DownloadFailed(format!(
                "Downloaded file missing: {e}"
            )));
        }
    };

    info!(
        path = %path.display(),
        size_mb = format!("{:.2}", size_bytes as f64 / 1024.0 / 1024.0),
        "Download complete"
    );
    Ok(DownloadedVideo { path, size_bytes })
}

/// Map the downloader's stderr onto the closed error taxonomy.
///
/// Substring matching against known failure phrases is brittle by nature, so
/// it lives in this one translation function; everything unrecognized falls
/// back to the generic download failure.
fn classify_downloader_failure(stderr: &str, config: &PipelineConfig) -> AppError {
    if stderr.contains("Video unavailable") {
        AppError::DownloadFailed("Video is unavailable or private".to_string())
    } else if stderr.contains("403") {
        AppError::DownloadFailed("Access denied to video (may be geoblocked)".to_string())
    } else if stderr.contains("404") {
        AppError::DownloadFailed("Video not found".to_string())
    } else if stderr.contains("too long") {
        AppError::VideoTooLong(format!(
            "Video is too long (max {} hour)",
            config.max_video_duration_hours
        ))
    } else {
        AppError::DownloadFailed("Video download failed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            upload_dir: "./temp".to_string(),
            video_timeout_minutes: 60,
            extraction_timeout_minutes: 10,
            metadata_timeout_seconds: 30,
            max_video_duration_hours: 1,
        }
    }

    #[test]
    fn test_classify_known_failure_phrases() {
        let cfg = config();
        let unavailable = classify_downloader_failure("ERROR: Video unavailable", &cfg);
        assert_eq!(unavailable.code(), "DOWNLOAD_FAILED");
        assert!(unavailable.to_string().contains("unavailable or private"));

        let geoblocked = classify_downloader_failure("HTTP Error 403: Forbidden", &cfg);
        assert!(geoblocked.to_string().contains("geoblocked"));

        let missing = classify_downloader_failure("HTTP Error 404: Not Found", &cfg);
        assert!(missing.to_string().contains("not found"));

        let too_long = classify_downloader_failure("rejected: video too long", &cfg);
        assert_eq!(too_long.code(), "VIDEO_TOO_LONG");
    }

    #[test]
    fn test_classify_unknown_failure_is_generic() {
        let err = classify_downloader_failure("some novel garbage", &config());
        assert_eq!(err.code(), "DOWNLOAD_FAILED");
        assert!(err.to_string().contains("Video download failed"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_returns_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = download_video("https://youtu.be/x", dir.path(), &config(), &token).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        // No partial file may remain.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
