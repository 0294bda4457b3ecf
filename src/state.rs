//! # Application State
//!
//! Shared state handed to every HTTP handler through `web::Data`. Everything
//! mutable sits behind `Arc` so handlers clone the handle, not the data.
//!
//! Config and metrics use `std::sync::RwLock` (held only for short copies,
//! never across an await); the job registries, cache, and cost tracker carry
//! their own synchronization internally.

use crate::config::AppConfig;
use crate::jobs::registry::JobRegistry;
use crate::jobs::{DownloadJob, TranscriptionJob};
use crate::transcription::{CostTracker, TranscriptionCache, TranscriptionEngine};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub downloads: JobRegistry<DownloadJob>,
    pub transcriptions: JobRegistry<TranscriptionJob>,
    pub cache: TranscriptionCache,
    pub costs: CostTracker,
    pub engine: TranscriptionEngine,
    pub start_time: Instant,
}

/// Counters updated by the metrics middleware on every request.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, cache: TranscriptionCache, costs: CostTracker) -> Self {
        let engine = TranscriptionEngine::new(
            config.transcription.clone(),
            cache.clone(),
            costs.clone(),
        );
        Self {
            downloads: JobRegistry::new(config.registry.clone()),
            transcriptions: JobRegistry::new(config.registry.clone()),
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            cache,
            costs,
            engine,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration. Cloning releases the lock
    /// immediately; AppConfig is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent snapshot for the metrics endpoint; cloned so no lock is
    /// held while the response serializes.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, CostConfig};

    fn state() -> AppState {
        let config = AppConfig::default();
        let cache = TranscriptionCache::new(&CacheConfig {
            ttl_days: 30,
            max_entries: 10,
        });
        let dir = tempfile::tempdir().unwrap();
        let (costs, _handle) = CostTracker::spawn(CostConfig {
            log_dir: dir.path().to_string_lossy().into_owned(),
            daily_limit: 50.0,
            monthly_limit: 500.0,
            max_log_entries: 100,
        });
        AppState::new(config, cache, costs)
    }

    #[tokio::test]
    async fn test_endpoint_metrics_accumulate() {
        let state = state();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, false);
        state.record_endpoint_request("POST /api/download", 5, true);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 3);
        assert_eq!(snapshot.error_count, 1);

        let health = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert!((health.average_duration_ms() - 20.0).abs() < 1e-9);
        assert_eq!(health.error_rate(), 0.0);

        let download = &snapshot.endpoint_metrics["POST /api/download"];
        assert!((download.error_rate() - 1.0).abs() < 1e-9);
    }
}
