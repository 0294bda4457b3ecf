//! # Transcription Engine
//!
//! Client for the remote chat-completions inference API. Responsibilities:
//! - cache lookup before any network or money is spent
//! - retry with exponential backoff for transient upstream failures
//! - terminal classification of everything else (bad credential, bad audio)
//! - cost accounting for both successful and failed attempts
//!
//! ## Retry policy:
//! Request timeouts and upstream 429/500/502/503 are retryable; 401 and 400
//! are terminal. `max_attempts` counts every attempt including the first, and
//! the backoff delay doubles per attempt from `initial_retry_delay_ms`.

use crate::config::TranscriptionConfig;
use crate::error::{AppError, AppResult};
use crate::transcription::cache::{CachedTranscription, TranscriptionCache};
use crate::transcription::cost::{CostLogEntry, CostOutcome, CostTracker};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str =
    "You are an expert transcription service specializing in recipe videos.";

const TRANSCRIBE_PROMPT: &str = "You are a professional transcription service. \
The audio file contains a recipe video. \
Please provide a detailed, accurate transcription of all spoken content in the audio. \
Include all ingredients mentioned, all cooking steps, cooking times and temperatures, \
and any tips or notes mentioned. \
Format the transcription clearly with proper punctuation and paragraph breaks.";

/// A finished transcription, whether freshly produced or served from cache.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: String,
    pub cost: f64,
    pub confidence: f64,
    pub cached: bool,
}

/// How a single API attempt failed, split by whether another attempt could
/// plausibly succeed. The wrapped error is what the caller sees if this
/// attempt turns out to be the last one.
enum ApiFailure {
    Retryable(AppError),
    Terminal(AppError),
}

impl ApiFailure {
    fn into_error(self) -> AppError {
        match self {
            ApiFailure::Retryable(err) | ApiFailure::Terminal(err) => err,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Remote transcription client. Cheap to clone; the HTTP client pools
/// connections internally.
#[derive(Clone)]
pub struct TranscriptionEngine {
    client: reqwest::Client,
    config: TranscriptionConfig,
    cache: TranscriptionCache,
    costs: CostTracker,
}

impl TranscriptionEngine {
    pub fn new(
        config: TranscriptionConfig,
        cache: TranscriptionCache,
        costs: CostTracker,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            cache,
            costs,
        }
    }

    /// Projected cost for a given audio duration, rounded to 4 decimals the
    /// same way tracked costs are.
    pub fn estimate_cost(&self, audio_minutes: f64) -> f64 {
        (audio_minutes * self.config.cost_per_minute * 10_000.0).round() / 10_000.0
    }

    /// Transcribe `audio_path`, identified by `audio_hash`.
    ///
    /// Cache hits short-circuit before any credential check or network call.
    /// On success the result is cached and the cost tracked; on failure the
    /// cost is still tracked (a failed remote attempt is billable) unless the
    /// duration is unknown.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        audio_hash: &str,
        language: Option<&str>,
        audio_minutes: f64,
        cancel: &CancellationToken,
    ) -> AppResult<TranscriptionResult> {
        if let Some(hit) = self.cache.get(audio_hash).await {
            return Ok(TranscriptionResult {
                text: hit.text,
                language: hit.language,
                cost: hit.cost,
                confidence: hit.confidence,
                cached: true,
            });
        }

        match self
            .transcribe_uncached(audio_path, audio_hash, language, audio_minutes, cancel)
            .await
        {
            Ok(result) => Ok(result),
            Err(err) => {
                if audio_minutes > 0.0 && !matches!(err, AppError::Cancelled) {
                    self.track(audio_hash, audio_minutes, CostOutcome::Failed).await;
                }
                Err(err)
            }
        }
    }

    async fn transcribe_uncached(
        &self,
        audio_path: &Path,
        audio_hash: &str,
        language: Option<&str>,
        audio_minutes: f64,
        cancel: &CancellationToken,
    ) -> AppResult<TranscriptionResult> {
        if tokio::fs::metadata(audio_path).await.is_err() {
            return Err(AppError::FileNotFound(format!(
                "Audio file not found: {}",
                audio_path.display()
            )));
        }
        let api_key = self.config.api_key.clone().ok_or_else(|| {
            AppError::InvalidApiKey(
                "Transcription API key not configured. Set TRANSCRIPTION_API_KEY.".to_string(),
            )
        })?;

        info!(audio_hash, ?language, audio_minutes, "Starting transcription");
        let text = self.request_with_retry(&api_key, cancel).await?;

        let language = language.map(str::to_string).unwrap_or_else(|| "auto-detected".to_string());
        let cost = self.estimate_cost(audio_minutes);
        let confidence = confidence_score(&text);
        self.track(audio_hash, audio_minutes, CostOutcome::Success).await;

        let cached_value = CachedTranscription {
            text: text.clone(),
            language: language.clone(),
            cost,
            confidence,
            timestamp: Utc::now(),
        };
        // Cache writes are never fatal to the transcription itself.
        self.cache.put(audio_hash.to_string(), cached_value).await;

        info!(audio_hash, cost, text_length = text.len(), "Transcription complete");
        Ok(TranscriptionResult {
            text,
            language,
            cost,
            confidence,
            cached: false,
        })
    }

    async fn request_with_retry(
        &self,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let request = self.request_transcription(api_key);
            let failure = tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                result = request => match result {
                    Ok(text) => return Ok(text),
                    Err(failure) => failure,
                }
            };

            let retryable = matches!(failure, ApiFailure::Retryable(_));
            let exhausted = attempt + 1 >= self.config.max_attempts;
            if !retryable || exhausted {
                return Err(failure.into_error());
            }

            let delay =
                Duration::from_millis(self.config.initial_retry_delay_ms << attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %failure.into_error(),
                "Transcription attempt failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn request_transcription(&self, api_key: &str) -> Result<String, ApiFailure> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": TRANSCRIBE_PROMPT },
            ],
            "temperature": 0,
            "top_p": 1,
            "max_tokens": 4096,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .timeout(Duration::from_secs(self.config.request_timeout_seconds))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status_failure(status, &detail));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            ApiFailure::Terminal(AppError::TranscriptionFailed(format!(
                "Unparseable API response: {e}"
            )))
        })?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    /// Best-effort language detection with a single short request. Callers
    /// fall back to auto-detection downstream, so failure here is reported
    /// as an error but must never abort the pipeline.
    pub async fn detect_language(&self, audio_path: &Path) -> AppResult<String> {
        if tokio::fs::metadata(audio_path).await.is_err() {
            return Err(AppError::FileNotFound(format!(
                "Audio file not found: {}",
                audio_path.display()
            )));
        }
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            AppError::InvalidApiKey("Transcription API key not configured".to_string())
        })?;

        let body = json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a language detection expert. Analyze the audio \
                                content and identify the primary language spoken."
                },
                {
                    "role": "user",
                    "content": "Based on the audio file provided, what is the primary \
                                language spoken? Respond with just the language code \
                                (e.g., \"en\" for English, \"es\" for Spanish)."
                },
            ],
            "temperature": 0,
            "max_tokens": 10,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .timeout(Duration::from_secs(self.config.language_timeout_seconds))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_failure(e).into_error())?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status_failure(status, &detail).into_error());
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            AppError::TranscriptionFailed(format!("Unparseable API response: {e}"))
        })?;
        let raw = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let language: String = raw.trim().to_lowercase().chars().take(2).collect();
        if language.is_empty() {
            return Ok("en".to_string());
        }
        info!(audio = %audio_path.display(), language, "Language detected");
        Ok(language)
    }

    async fn track(&self, audio_hash: &str, audio_minutes: f64, outcome: CostOutcome) {
        self.costs
            .track(CostLogEntry {
                timestamp: Utc::now(),
                operation: "transcription".to_string(),
                duration_minutes: audio_minutes,
                cost: self.estimate_cost(audio_minutes),
                audio_hash: audio_hash.to_string(),
                outcome,
            })
            .await;
    }
}

fn classify_transport_failure(err: reqwest::Error) -> ApiFailure {
    if err.is_timeout() {
        ApiFailure::Retryable(AppError::Timeout(format!("API request timed out: {err}")))
    } else {
        ApiFailure::Terminal(AppError::TranscriptionFailed(format!(
            "API request failed: {err}"
        )))
    }
}

fn classify_status_failure(status: reqwest::StatusCode, detail: &str) -> ApiFailure {
    use reqwest::StatusCode;
    match status {
        StatusCode::TOO_MANY_REQUESTS => ApiFailure::Retryable(AppError::ApiRateLimit(
            "Transcription API rate limit exceeded".to_string(),
        )),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => ApiFailure::Retryable(AppError::TranscriptionFailed(
            format!("Transcription API returned {status}"),
        )),
        StatusCode::UNAUTHORIZED => ApiFailure::Terminal(AppError::InvalidApiKey(
            "Transcription API rejected the credential".to_string(),
        )),
        StatusCode::BAD_REQUEST if detail.contains("audio") => ApiFailure::Terminal(
            AppError::InvalidAudioFormat("API rejected the audio payload".to_string()),
        ),
        _ => ApiFailure::Terminal(AppError::TranscriptionFailed(format!(
            "Transcription API returned {status}"
        ))),
    }
}

/// Heuristic confidence: the API reports none, so score from text shape.
/// Very short output suggests the model produced little; very long output
/// accumulates errors.
fn confidence_score(text: &str) -> f64 {
    let mut confidence: f64 = 0.85;
    if text.len() < 20 {
        confidence -= 0.10;
    }
    if text.len() > 50_000 {
        confidence -= 0.05;
    }
    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, CostConfig};
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn success_body(text: &str) -> serde_json::Value {
        json!({ "choices": [ { "message": { "role": "assistant", "content": text } } ] })
    }

    struct Fixture {
        engine: TranscriptionEngine,
        audio: std::path::PathBuf,
        _dir: tempfile::TempDir,
        _ledger: tokio::task::JoinHandle<()>,
    }

    fn fixture(api_url: String, api_key: Option<String>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio.wav");
        let mut file = std::fs::File::create(&audio).unwrap();
        file.write_all(b"pcm bytes").unwrap();

        let cache = TranscriptionCache::new(&CacheConfig {
            ttl_days: 30,
            max_entries: 100,
        });
        let (costs, handle) = CostTracker::spawn(CostConfig {
            log_dir: dir.path().to_string_lossy().into_owned(),
            daily_limit: 50.0,
            monthly_limit: 500.0,
            max_log_entries: 100,
        });
        let engine = TranscriptionEngine::new(
            TranscriptionConfig {
                api_url,
                model: "gpt-4o-mini".to_string(),
                api_key,
                cost_per_minute: 0.1,
                max_attempts: 3,
                initial_retry_delay_ms: 1,
                request_timeout_seconds: 5,
                language_timeout_seconds: 5,
            },
            cache,
            costs,
        );
        Fixture {
            engine,
            audio,
            _dir: dir,
            _ledger: handle,
        }
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_without_network() {
        let server = MockServer::start().await;
        // Zero expected requests: the credential check runs before any call.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("x")))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture(format!("{}/chat/completions", server.uri()), None);
        let token = CancellationToken::new();
        let err = fx
            .engine
            .transcribe(&fx.audio, "hash-a", Some("en"), 2.0, &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_API_KEY");
    }

    #[tokio::test]
    async fn test_missing_file_rejected_before_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("x")))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture(
            format!("{}/chat/completions", server.uri()),
            Some("key".to_string()),
        );
        let token = CancellationToken::new();
        let err = fx
            .engine
            .transcribe(Path::new("/nope/audio.wav"), "hash-b", Some("en"), 2.0, &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FILE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_exactly_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let fx = fixture(
            format!("{}/chat/completions", server.uri()),
            Some("key".to_string()),
        );
        let token = CancellationToken::new();
        let err = fx
            .engine
            .transcribe(&fx.audio, "hash-c", Some("en"), 2.0, &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "API_RATE_LIMIT");
    }

    #[tokio::test]
    async fn test_transient_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(success_body("First, dice two ripe tomatoes.")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(
            format!("{}/chat/completions", server.uri()),
            Some("key".to_string()),
        );
        let token = CancellationToken::new();
        let result = fx
            .engine
            .transcribe(&fx.audio, "hash-d", Some("en"), 2.0, &token)
            .await
            .unwrap();
        assert_eq!(result.text, "First, dice two ripe tomatoes.");
        assert_eq!(result.language, "en");
        assert!(!result.cached);
        assert!((result.cost - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_second_transcription_is_served_from_cache() {
        let server = MockServer::start().await;
        // Exactly one upstream request for two transcriptions of the same audio.
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(success_body("Preheat the oven to 180 degrees.")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(
            format!("{}/chat/completions", server.uri()),
            Some("key".to_string()),
        );
        let token = CancellationToken::new();
        let first = fx
            .engine
            .transcribe(&fx.audio, "hash-e", Some("en"), 2.0, &token)
            .await
            .unwrap();
        assert!(!first.cached);

        let second = fx
            .engine
            .transcribe(&fx.audio, "hash-e", Some("en"), 2.0, &token)
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.text, first.text);
    }

    #[tokio::test]
    async fn test_unauthorized_is_terminal_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(
            format!("{}/chat/completions", server.uri()),
            Some("bad-key".to_string()),
        );
        let token = CancellationToken::new();
        let err = fx
            .engine
            .transcribe(&fx.audio, "hash-f", Some("en"), 2.0, &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_API_KEY");
    }

    #[tokio::test]
    async fn test_detect_language_trims_to_two_letter_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("ES (Spanish)")))
            .mount(&server)
            .await;

        let fx = fixture(
            format!("{}/chat/completions", server.uri()),
            Some("key".to_string()),
        );
        let language = fx.engine.detect_language(&fx.audio).await.unwrap();
        assert_eq!(language, "es");
    }

    #[test]
    fn test_confidence_heuristics() {
        assert!((confidence_score(&"a".repeat(100)) - 0.85).abs() < 1e-9);
        assert!((confidence_score("short") - 0.75).abs() < 1e-9);
        assert!((confidence_score(&"a".repeat(60_000)) - 0.80).abs() < 1e-9);
    }
}
