//! # Job Registry
//!
//! In-memory per-category map from job id to job record, plus the periodic
//! sweep that keeps it bounded. One registry instance exists per job category
//! (downloads, transcriptions).
//!
//! ## Concurrency model:
//! - Each record is mutated only by the background task that owns the id;
//!   the registry hands that task an update closure, never the raw map
//! - Cancellation flips only the lifecycle status and fires the job's
//!   cancellation token; step state stays with the owner
//! - The sweeper reads only start timestamps, so it overlaps safely with
//!   in-flight jobs

use crate::config::RegistryConfig;
use crate::jobs::{JobStatus, TrackedJob};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

struct JobEntry<J> {
    job: J,
    cancel: CancellationToken,
}

/// Outcome of a client cancellation request.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Job marked cancelled and its token fired
    Cancelled,
    /// Job already reached a terminal state
    AlreadyTerminal,
    /// No such job
    NotFound,
}

/// Registry of jobs of one category.
///
/// Cloning is cheap; all clones share the same map.
pub struct JobRegistry<J> {
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry<J>>>>,
    config: RegistryConfig,
}

impl<J> Clone for JobRegistry<J> {
    fn clone(&self) -> Self {
        Self {
            jobs: Arc::clone(&self.jobs),
            config: self.config.clone(),
        }
    }
}

impl<J: TrackedJob> JobRegistry<J> {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Register a new job and hand back the cancellation token its owning
    /// task should watch.
    pub async fn insert(&self, job: J) -> CancellationToken {
        let token = CancellationToken::new();
        let mut jobs = self.jobs.write().await;
        jobs.insert(
            job.job_id(),
            JobEntry {
                job,
                cancel: token.clone(),
            },
        );
        token
    }

    /// Snapshot a job by id.
    pub async fn get(&self, id: Uuid) -> Option<J> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).map(|entry| entry.job.clone())
    }

    /// Apply a mutation from the owning task. Returns false if the job is
    /// gone or already terminal (in which case the mutation is discarded,
    /// preserving the frozen-once-terminal invariant).
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut J),
    {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(entry) if !entry.job.job_status().is_terminal() => {
                mutate(&mut entry.job);
                true
            }
            _ => false,
        }
    }

    /// Cancel a job on behalf of a client. Fires the token so the owning
    /// task's subprocess or remote call is torn down promptly.
    pub async fn cancel(&self, id: Uuid) -> CancelOutcome {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            None => CancelOutcome::NotFound,
            Some(entry) if entry.job.job_status().is_terminal() => CancelOutcome::AlreadyTerminal,
            Some(entry) => {
                entry.job.set_status(JobStatus::Cancelled);
                entry.cancel.cancel();
                info!(job_id = %id, "Job cancelled by client");
                CancelOutcome::Cancelled
            }
        }
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        let mut jobs = self.jobs.write().await;
        jobs.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// One sweep pass: drop jobs older than the TTL, then trim the oldest
    /// until the population is back under the cap. Returns how many were
    /// removed.
    pub async fn sweep(&self) -> usize {
        let ttl = Duration::minutes(self.config.job_ttl_minutes);
        let cutoff = Utc::now() - ttl;
        let mut removed = 0;

        let mut jobs = self.jobs.write().await;
        jobs.retain(|_, entry| {
            let keep = entry.job.job_started_at() >= cutoff;
            if !keep {
                entry.cancel.cancel();
                removed += 1;
            }
            keep
        });

        if jobs.len() > self.config.max_jobs {
            let excess = jobs.len() - self.config.max_jobs;
            let mut by_age: Vec<(Uuid, chrono::DateTime<Utc>)> = jobs
                .iter()
                .map(|(id, entry)| (*id, entry.job.job_started_at()))
                .collect();
            by_age.sort_by_key(|(_, started)| *started);
            for (id, _) in by_age.into_iter().take(excess) {
                if let Some(entry) = jobs.remove(&id) {
                    entry.cancel.cancel();
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(removed, remaining = jobs.len(), "Registry sweep removed jobs");
        } else {
            debug!(population = jobs.len(), "Registry sweep found nothing to remove");
        }
        removed
    }

    /// Run the sweep on a fixed interval until `shutdown` fires.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let period = std::time::Duration::from_secs(self.config.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        registry.sweep().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::DownloadJob;
    use crate::pipeline::audio::AudioQuality;

    fn test_config(ttl_minutes: i64, max_jobs: usize) -> RegistryConfig {
        RegistryConfig {
            job_ttl_minutes: ttl_minutes,
            max_jobs,
            sweep_interval_seconds: 3600,
        }
    }

    fn job_started_minutes_ago(minutes: i64) -> DownloadJob {
        let mut job = DownloadJob::new("https://youtu.be/x".into(), AudioQuality::Medium);
        job.started_at = Utc::now() - Duration::minutes(minutes);
        job
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = JobRegistry::new(test_config(60, 100));
        let job = DownloadJob::new("https://youtu.be/x".into(), AudioQuality::Low);
        let id = job.id;
        registry.insert(job).await;

        assert!(registry.get(id).await.is_some());
        assert!(registry.remove(id).await);
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_update_refused_once_terminal() {
        let registry = JobRegistry::new(test_config(60, 100));
        let job = DownloadJob::new("https://youtu.be/x".into(), AudioQuality::Low);
        let id = job.id;
        registry.insert(job).await;

        assert!(registry.update(id, |j| j.status = JobStatus::Completed).await);
        // Terminal now; further mutation must be discarded.
        assert!(!registry.update(id, |j| j.progress = 99).await);
        assert_eq!(registry.get(id).await.unwrap().progress, 0);
    }

    #[tokio::test]
    async fn test_cancel_transitions_and_fires_token() {
        let registry = JobRegistry::new(test_config(60, 100));
        let job = DownloadJob::new("https://youtu.be/x".into(), AudioQuality::Low);
        let id = job.id;
        let token = registry.insert(job).await;

        assert_eq!(registry.cancel(id).await, CancelOutcome::Cancelled);
        assert!(token.is_cancelled());
        assert_eq!(registry.get(id).await.unwrap().status, JobStatus::Cancelled);
        // A second cancel sees a terminal job.
        assert_eq!(registry.cancel(id).await, CancelOutcome::AlreadyTerminal);
        assert_eq!(
            registry.cancel(Uuid::new_v4()).await,
            CancelOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_jobs() {
        let registry = JobRegistry::new(test_config(30, 100));
        let fresh = job_started_minutes_ago(5);
        let stale = job_started_minutes_ago(45);
        let fresh_id = fresh.id;
        let stale_id = stale.id;
        registry.insert(fresh).await;
        registry.insert(stale).await;

        assert_eq!(registry.sweep().await, 1);
        assert!(registry.get(fresh_id).await.is_some());
        assert!(registry.get(stale_id).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_trims_oldest_beyond_capacity() {
        let registry = JobRegistry::new(test_config(600, 3));
        let mut ids = Vec::new();
        // Staggered ages, oldest first in `ids`.
        for age in [50, 40, 30, 20, 10] {
            let job = job_started_minutes_ago(age);
            ids.push(job.id);
            registry.insert(job).await;
        }

        assert_eq!(registry.sweep().await, 2);
        assert_eq!(registry.len().await, 3);
        // The two oldest are gone, the three newest survive.
        assert!(registry.get(ids[0]).await.is_none());
        assert!(registry.get(ids[1]).await.is_none());
        for id in &ids[2..] {
            assert!(registry.get(*id).await.is_some());
        }
    }
}
