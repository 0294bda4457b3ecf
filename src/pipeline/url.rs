//! # URL Validator / Metadata Probe
//!
//! Classifies submitted URLs against the whitelist of supported platforms and
//! probes video metadata with a non-destructive `yt-dlp --dump-json` call, so
//! over-long videos are rejected before any download bandwidth is spent.

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use regex::Regex;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

fn platform_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^https?://(www\.)?youtube\.com/",
            r"^https?://youtu\.be/",
            r"^https?://(www\.)?tiktok\.com/",
            r"^https?://(www\.)?instagram\.com/",
            r"^https?://(www\.)?twitter\.com/",
            r"^https?://(www\.)?x\.com/",
            r"^https?://(www\.)?facebook\.com/",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("platform pattern is valid"))
        .collect()
    })
}

/// True only for URLs matching one of the supported platform shapes.
/// No filesystem side effects.
pub fn validate_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    platform_patterns().iter().any(|p| p.is_match(url))
}

/// Metadata reported by the downloader without fetching the video itself.
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub duration_seconds: f64,
    pub title: String,
    pub uploader: String,
    pub upload_date: Option<String>,
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    duration: f64,
    title: Option<String>,
    uploader: Option<String>,
    upload_date: Option<String>,
}

/// Probe duration/title for a validated URL.
///
/// Surfaces [`AppError::VideoTooLong`] when the remote duration exceeds the
/// configured maximum, which is exactly the signal the orchestrator needs to
/// reject the job before committing resources.
pub async fn fetch_metadata(url: &str, config: &PipelineConfig) -> AppResult<VideoMetadata> {
    if !validate_url(url) {
        return Err(AppError::InvalidUrl(format!("Invalid video URL: {url}")));
    }

    info!(url, "Fetching video metadata");

    let child = Command::new("yt-dlp")
        .args(["--dump-json", "--socket-timeout", "30", url])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::DownloadFailed(format!("Failed to spawn yt-dlp: {e}")))?;

    let output = tokio::time::timeout(
        Duration::from_secs(config.metadata_timeout_seconds),
        child.wait_with_output(),
    )
    .await
    .map_err(|_| {
        AppError::DownloadTimeout(format!(
            "Metadata fetch timed out after {}s",
            config.metadata_timeout_seconds
        ))
    })?
    .map_err(|e| AppError::DownloadFailed(format!("yt-dlp process error: {e}")))?;

    if !output.status.success() {
        return Err(AppError::DownloadFailed(
            "Failed to fetch video metadata".to_string(),
        ));
    }

    let raw: RawMetadata = serde_json::from_slice(&output.stdout)
        .map_err(|e| AppError::DownloadFailed(format!("Unparseable metadata from yt-dlp: {e}")))?;

    let max_seconds = (config.max_video_duration_hours * 3600) as f64;
    if raw.duration > max_seconds {
        return Err(AppError::VideoTooLong(format!(
            "Video is too long ({:.2} hours, max {})",
            raw.duration / 3600.0,
            config.max_video_duration_hours
        )));
    }

    let metadata = VideoMetadata {
        duration_seconds: raw.duration,
        title: raw.title.unwrap_or_else(|| "Unknown".to_string()),
        uploader: raw.uploader.unwrap_or_else(|| "Unknown".to_string()),
        upload_date: raw.upload_date,
    };
    debug!(
        title = %metadata.title,
        duration_min = format!("{:.2}", metadata.duration_seconds / 60.0),
        "Metadata fetched"
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_supported_platforms() {
        let good = [
            "https://www.youtube.com/watch?v=X",
            "https://youtube.com/watch?v=X",
            "http://youtu.be/abc123",
            "https://www.tiktok.com/@cook/video/1",
            "https://instagram.com/reel/xyz",
            "https://twitter.com/user/status/1",
            "https://x.com/user/status/1",
            "https://www.facebook.com/watch?v=1",
        ];
        for url in good {
            assert!(validate_url(url), "should accept {url}");
        }
    }

    #[test]
    fn test_rejects_everything_else() {
        let bad = [
            "",
            "not a url",
            "https://example.com/page",
            "https://vimeo.com/12345",
            "ftp://youtube.com/watch?v=X",
            "youtube.com/watch?v=X",
            "https://myyoutube.com/watch?v=X",
        ];
        for url in bad {
            assert!(!validate_url(url), "should reject {url}");
        }
    }
}
