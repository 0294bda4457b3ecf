//! # Audio Extractor
//!
//! Converts a downloaded video into single-channel PCM audio with the
//! external encoder, at one of three quality tiers. Duration is parsed from
//! the encoder's textual report; cleanup mirrors the download orchestrator's
//! best-effort semantics.

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::pipeline::cleanup_file;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// Output quality tier, selecting a {bitrate, sample rate} pair.
///
/// Low and Medium target transcription (16 kHz is what speech models want);
/// High is the archival tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl AudioQuality {
    pub fn bitrate(&self) -> &'static str {
        match self {
            AudioQuality::Low => "64k",
            AudioQuality::Medium => "128k",
            AudioQuality::High => "192k",
        }
    }

    pub fn sample_rate(&self) -> &'static str {
        match self {
            AudioQuality::Low | AudioQuality::Medium => "16000",
            AudioQuality::High => "44100",
        }
    }
}

/// A successfully extracted audio file.
#[derive(Debug)]
pub struct ExtractedAudio {
    pub path: PathBuf,
    pub audio_id: Uuid,
    pub duration_seconds: f64,
    pub size_bytes: u64,
}

/// Extract mono PCM audio from `video_path` into `out_dir`.
pub async fn extract_audio(
    video_path: &Path,
    out_dir: &Path,
    quality: AudioQuality,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> AppResult<ExtractedAudio> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    if tokio::fs::metadata(video_path).await.is_err() {
        return Err(AppError::FileNotFound(format!(
            "Video file not found: {}",
            video_path.display()
        )));
    }
    tokio::fs::create_dir_all(out_dir).await?;

    let audio_id = Uuid::new_v4();
    let path = out_dir.join(format!("audio_{audio_id}.wav"));
    info!(
        video = %video_path.display(),
        quality = ?quality,
        "Extracting audio"
    );

    let child = Command::new("ffmpeg")
        .args([
            "-i",
            &video_path.to_string_lossy(),
            "-vn",
            "-acodec",
            "pcm_s16le",
            "-ar",
            quality.sample_rate(),
            "-ac",
            "1",
            &path.to_string_lossy(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::ExtractionFailed(format!("Failed to spawn ffmpeg: {e}")))?;

    let timeout = Duration::from_secs(config.extraction_timeout_minutes * 60);
    let output = tokio::select! {
        _ = cancel.cancelled() => {
            cleanup_file(&path).await;
            return Err(AppError::Cancelled);
        }
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Err(_) => {
                cleanup_file(&path).await;
                return Err(AppError::ExtractionTimeout(format!(
                    "Audio extraction timeout ({} min max)",
                    config.extraction_timeout_minutes
                )));
            }
            Ok(Err(e)) => {
                cleanup_file(&path).await;
                return Err(AppError::ExtractionFailed(format!("ffmpeg process error: {e}")));
            }
            Ok(Ok(output)) => output,
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        let err = classify_encoder_failure(&stderr);
        error!(code = %err.code(), exit = ?output.status.code(), "Audio extraction failed");
        cleanup_file(&path).await;
        return Err(err);
    }

    let size_bytes = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.len() > 0 => meta.len(),
        _ => {
            cleanup_file(&path).await;
            return Err(AppError::ExtractionFailed(
                "Extracted audio file is empty".to_string(),
            ));
        }
    };

    // The encoder usually reports the input duration on stderr; if that line
    // is missing, probe the produced file instead.
    let duration_seconds = match parse_duration(&stderr) {
        Some(seconds) => seconds,
        None => probe_duration(&path).await.unwrap_or(0.0),
    };
    info!(
        path = %path.display(),
        duration = format!("{duration_seconds:.2}s"),
        size_mb = format!("{:.2}", size_bytes as f64 / 1024.0 / 1024.0),
        "Audio extraction complete"
    );

    Ok(ExtractedAudio {
        path,
        audio_id,
        duration_seconds,
        size_bytes,
    })
}

/// Ask `ffprobe` for a file's duration in seconds.
pub async fn probe_duration(audio_path: &Path) -> AppResult<f64> {
    let child = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            &audio_path.to_string_lossy(),
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::ExtractionFailed(format!("Failed to spawn ffprobe: {e}")))?;

    let output = tokio::time::timeout(Duration::from_secs(30), child.wait_with_output())
        .await
        .map_err(|_| AppError::ExtractionTimeout("ffprobe timed out".to_string()))?
        .map_err(|e| AppError::ExtractionFailed(format!("ffprobe process error: {e}")))?;

    if !output.status.success() {
        return Err(AppError::ExtractionFailed(
            "Failed to get audio duration".to_string(),
        ));
    }
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .map_err(|e| AppError::ExtractionFailed(format!("Unparseable ffprobe duration: {e}")))
}

/// Parse the `Duration: HH:MM:SS.cs` line from the encoder's stderr.
pub fn parse_duration(stderr: &str) -> Option<f64> {
    static DURATION_RE: OnceLock<Regex> = OnceLock::new();
    let re = DURATION_RE
        .get_or_init(|| Regex::new(r"Duration: (\d+):(\d+):(\d+\.\d+)").expect("valid regex"));
    let caps = re.captures(stderr)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Map encoder stderr onto the closed error taxonomy; the single translation
/// point for the encoder's known failure phrases.
fn classify_encoder_failure(stderr: &str) -> AppError {
    if stderr.contains("No such file") {
        AppError::ExtractionFailed("Input file not found".to_string())
    } else if stderr.contains("Invalid data found") {
        AppError::ExtractionFailed("Invalid or corrupted video file".to_string())
    } else if stderr.contains("Unknown encoder") {
        AppError::ExtractionFailed("ffmpeg audio codec not available".to_string())
    } else {
        AppError::ExtractionFailed("Audio extraction failed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_tier_parameters() {
        assert_eq!(AudioQuality::Low.sample_rate(), "16000");
        assert_eq!(AudioQuality::Medium.sample_rate(), "16000");
        assert_eq!(AudioQuality::High.sample_rate(), "44100");
        assert_eq!(AudioQuality::Low.bitrate(), "64k");
        assert_eq!(AudioQuality::default(), AudioQuality::Medium);
    }

    #[test]
    fn test_parse_duration_from_encoder_output() {
        let stderr = "Input #0, mov,mp4\n  Duration: 00:03:25.48, start: 0.0, bitrate: 1205 kb/s\n";
        let duration = parse_duration(stderr).unwrap();
        assert!((duration - 205.48).abs() < 1e-9);

        let long = "  Duration: 01:02:03.50, start";
        assert!((parse_duration(long).unwrap() - 3723.5).abs() < 1e-9);

        assert!(parse_duration("no duration here").is_none());
    }

    #[test]
    fn test_classify_encoder_failures() {
        assert!(classify_encoder_failure("x: No such file or directory")
            .to_string()
            .contains("Input file not found"));
        assert!(classify_encoder_failure("Invalid data found when processing input")
            .to_string()
            .contains("corrupted"));
        assert!(classify_encoder_failure("Unknown encoder 'pcm_s16le'")
            .to_string()
            .contains("codec not available"));
        assert_eq!(
            classify_encoder_failure("???").code(),
            "EXTRACTION_FAILED"
        );
    }

    #[tokio::test]
    async fn test_missing_input_file_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let config = PipelineConfig {
            upload_dir: dir.path().to_string_lossy().into_owned(),
            video_timeout_minutes: 60,
            extraction_timeout_minutes: 10,
            metadata_timeout_seconds: 30,
            max_video_duration_hours: 1,
        };
        let result = extract_audio(
            Path::new("/nonexistent/video.mp4"),
            dir.path(),
            AudioQuality::Medium,
            &config,
            &token,
        )
        .await;
        assert!(matches!(result, Err(AppError::FileNotFound(_))));
    }
}
