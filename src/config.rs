//! # Configuration Management
//!
//! Loads application configuration from three layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` file
//! - Environment variables with an `APP_` prefix, plus a handful of
//!   un-prefixed names kept for deployment compatibility (`HOST`, `PORT`,
//!   `UPLOAD_DIR`, `VIDEO_TIMEOUT_MINUTES`, `MAX_VIDEO_DURATION_HOURS`,
//!   `COST_DAILY_LIMIT`, `COST_MONTHLY_LIMIT`, `TRANSCRIPTION_API_KEY`)
//!
//! Later sources override earlier ones. `validate()` runs once at startup so
//! nonsense values fail fast instead of surfacing mid-pipeline.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration, grouped by concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub transcription: TranscriptionConfig,
    pub cache: CacheConfig,
    pub costs: CostConfig,
    pub registry: RegistryConfig,
}

/// HTTP server bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Media acquisition settings: where transient files live and how long the
/// external downloader/encoder processes may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding transient video/audio files, named by job id
    pub upload_dir: String,

    /// Wall-clock limit for a single video download
    pub video_timeout_minutes: u64,

    /// Wall-clock limit for audio extraction (distinct from the download timeout)
    pub extraction_timeout_minutes: u64,

    /// Timeout for the non-destructive metadata probe
    pub metadata_timeout_seconds: u64,

    /// Videos longer than this are rejected before any bandwidth is spent
    pub max_video_duration_hours: u64,
}

/// Remote inference API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Base URL of the chat-completions style inference endpoint
    pub api_url: String,

    /// Model identifier sent with every request
    pub model: String,

    /// Bearer credential; absence makes every transcription fail terminally
    pub api_key: Option<String>,

    /// Billable rate per audio minute (may be zero under some billing plans)
    pub cost_per_minute: f64,

    /// Total attempts per transcription, including the first
    pub max_attempts: u32,

    /// Base delay for exponential backoff (doubles per attempt)
    pub initial_retry_delay_ms: u64,

    /// Per-request timeout for the main transcription call
    pub request_timeout_seconds: u64,

    /// Per-request timeout for the best-effort language detection call
    pub language_timeout_seconds: u64,
}

/// Transcription result cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries older than this (from insertion) are treated as absent
    pub ttl_days: i64,

    /// Hard population cap; least-recently-accessed entries are evicted first
    pub max_entries: usize,
}

/// Cost ledger location and budget ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Directory holding the ledger file (`cost-tracking.json`)
    pub log_dir: String,

    pub daily_limit: f64,
    pub monthly_limit: f64,

    /// Ledger entries kept on disk; oldest are dropped past this
    pub max_log_entries: usize,
}

/// Job registry retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Jobs older than this are swept regardless of state
    pub job_ttl_minutes: i64,

    /// Population cap per registry; oldest-by-start-time trimmed first
    pub max_jobs: usize,

    /// Sweep cadence
    pub sweep_interval_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            pipeline: PipelineConfig {
                upload_dir: "./temp/uploads".to_string(),
                video_timeout_minutes: 60,
                extraction_timeout_minutes: 10,
                metadata_timeout_seconds: 30,
                max_video_duration_hours: 1,
            },
            transcription: TranscriptionConfig {
                api_url: "https://models.inference.ai.azure.com/chat/completions".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: None,
                cost_per_minute: 0.0,
                max_attempts: 3,
                initial_retry_delay_ms: 1000,
                request_timeout_seconds: 300,
                language_timeout_seconds: 60,
            },
            cache: CacheConfig {
                ttl_days: 30,
                max_entries: 10_000,
            },
            costs: CostConfig {
                log_dir: "./logs".to_string(),
                daily_limit: 50.0,
                monthly_limit: 500.0,
                max_log_entries: 10_000,
            },
            registry: RegistryConfig {
                job_ttl_minutes: 120,
                max_jobs: 1_000,
                sweep_interval_seconds: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then `config.toml`, then environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Un-prefixed names used by deployment platforms and the reference
        // environment; they win over everything else.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(dir) = env::var("UPLOAD_DIR") {
            settings = settings.set_override("pipeline.upload_dir", dir)?;
        }
        if let Ok(minutes) = env::var("VIDEO_TIMEOUT_MINUTES") {
            settings = settings.set_override("pipeline.video_timeout_minutes", minutes)?;
        }
        if let Ok(hours) = env::var("MAX_VIDEO_DURATION_HOURS") {
            settings = settings.set_override("pipeline.max_video_duration_hours", hours)?;
        }
        if let Ok(limit) = env::var("COST_DAILY_LIMIT") {
            settings = settings.set_override("costs.daily_limit", limit)?;
        }
        if let Ok(limit) = env::var("COST_MONTHLY_LIMIT") {
            settings = settings.set_override("costs.monthly_limit", limit)?;
        }
        if let Ok(key) = env::var("TRANSCRIPTION_API_KEY") {
            settings = settings.set_override("transcription.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.pipeline.video_timeout_minutes == 0 {
            return Err(anyhow::anyhow!("Video timeout must be at least 1 minute"));
        }
        if self.pipeline.max_video_duration_hours == 0 {
            return Err(anyhow::anyhow!("Max video duration must be at least 1 hour"));
        }
        if self.transcription.max_attempts == 0 {
            return Err(anyhow::anyhow!("Transcription attempts must be at least 1"));
        }
        if self.transcription.cost_per_minute < 0.0 {
            return Err(anyhow::anyhow!("Cost per minute cannot be negative"));
        }
        if self.cache.max_entries == 0 {
            return Err(anyhow::anyhow!("Cache capacity must be greater than 0"));
        }
        if self.cache.ttl_days <= 0 {
            return Err(anyhow::anyhow!("Cache TTL must be positive"));
        }
        if self.registry.max_jobs == 0 {
            return Err(anyhow::anyhow!("Registry capacity must be greater than 0"));
        }
        if self.costs.daily_limit < 0.0 || self.costs.monthly_limit < 0.0 {
            return Err(anyhow::anyhow!("Cost limits cannot be negative"));
        }
        Ok(())
    }
}
