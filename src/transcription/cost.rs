//! # Cost Tracker
//!
//! Append-only ledger of billable operations, persisted as a JSON array file
//! and owned by a single writer task. Every append, read, and budget check
//! flows through that task's channel, which removes the read-modify-write
//! race a shared file would have, and persistence goes through a temp-file
//! rename so a crash can never leave a torn ledger on disk.
//!
//! The ledger itself is the source of truth: daily/monthly/total figures are
//! recomputed from entries on demand, never kept as counters that can drift.

use crate::config::CostConfig;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

const LEDGER_FILE: &str = "cost-tracking.json";

/// Outcome of the tracked operation. Cost may be incurred either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostOutcome {
    Success,
    Failed,
}

/// One immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostLogEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub duration_minutes: f64,
    pub cost: f64,
    pub audio_hash: String,
    pub outcome: CostOutcome,
}

/// Aggregated spend figures derived from the ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostStats {
    pub daily: f64,
    pub monthly: f64,
    pub total: f64,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

enum Command {
    Track(CostLogEntry),
    Stats(oneshot::Sender<CostStats>),
    Recent {
        limit: usize,
        reply: oneshot::Sender<Vec<CostLogEntry>>,
    },
    CheckBudget {
        projected: f64,
        reply: oneshot::Sender<AppResult<()>>,
    },
    Clear(oneshot::Sender<()>),
}

/// Handle to the ledger's writer task. Cloning shares the channel.
#[derive(Clone)]
pub struct CostTracker {
    tx: mpsc::Sender<Command>,
}

impl CostTracker {
    /// Load the ledger from disk (a missing or malformed file starts empty)
    /// and spawn the writer task that owns it.
    pub fn spawn(config: CostConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let worker = LedgerWorker::load(config);
        let handle = tokio::spawn(worker.run(rx));
        (Self { tx }, handle)
    }

    /// Append an entry. Tracking failures are logged, never propagated —
    /// losing a ledger write must not fail the operation being tracked.
    pub async fn track(&self, entry: CostLogEntry) {
        if self.tx.send(Command::Track(entry)).await.is_err() {
            error!("Cost tracker is gone; ledger entry dropped");
        }
    }

    pub async fn stats(&self) -> CostStats {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Stats(reply)).await.is_ok() {
            if let Ok(stats) = rx.await {
                return stats;
            }
        }
        CostStats {
            daily: 0.0,
            monthly: 0.0,
            total: 0.0,
            date_range: DateRange {
                start: None,
                end: None,
            },
        }
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<CostLogEntry> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Recent { limit, reply })
            .await
            .is_ok()
        {
            if let Ok(entries) = rx.await {
                return entries;
            }
        }
        Vec::new()
    }

    /// Pre-flight budget check: reject when the projected cost would push the
    /// daily sum over the limit. Advisory — the check and the later append
    /// are serialized through the same task but not transactional with each
    /// other, so overlapping in-flight work can still jointly exceed the
    /// limit by one operation's cost.
    pub async fn check_budget(&self, projected: f64) -> AppResult<()> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::CheckBudget { projected, reply })
            .await
            .is_ok()
        {
            if let Ok(result) = rx.await {
                return result;
            }
        }
        // If the tracker is unreachable we cannot prove the budget holds,
        // but rejecting all work on a bookkeeping failure is worse.
        warn!("Cost tracker unreachable; skipping budget pre-flight");
        Ok(())
    }

    /// Administrative reset: truncate the ledger.
    pub async fn clear(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Clear(reply)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct LedgerWorker {
    entries: Vec<CostLogEntry>,
    path: PathBuf,
    config: CostConfig,
}

impl LedgerWorker {
    fn load(config: CostConfig) -> Self {
        let path = PathBuf::from(&config.log_dir).join(LEDGER_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Vec<CostLogEntry>>(&data) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(error = %err, "Cost ledger unparseable, starting fresh");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        info!(entries = entries.len(), path = %path.display(), "Cost ledger loaded");
        Self {
            entries,
            path,
            config,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Track(entry) => self.track(entry),
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Recent { limit, reply } => {
                    let limit = limit.min(self.entries.len());
                    let entries = self
                        .entries
                        .iter()
                        .rev()
                        .take(limit)
                        .cloned()
                        .collect();
                    let _ = reply.send(entries);
                }
                Command::CheckBudget { projected, reply } => {
                    let _ = reply.send(self.check_budget(projected));
                }
                Command::Clear(reply) => {
                    self.entries.clear();
                    if let Err(err) = std::fs::remove_file(&self.path) {
                        if err.kind() != std::io::ErrorKind::NotFound {
                            warn!(error = %err, "Failed to remove cost ledger file");
                        }
                    }
                    info!("Cost ledger cleared");
                    let _ = reply.send(());
                }
            }
        }
    }

    fn track(&mut self, entry: CostLogEntry) {
        info!(
            operation = %entry.operation,
            cost = entry.cost,
            outcome = ?entry.outcome,
            audio_hash = %entry.audio_hash,
            "Tracking cost"
        );
        self.entries.push(entry);

        // Keep the ledger bounded on disk.
        if self.entries.len() > self.config.max_log_entries {
            let excess = self.entries.len() - self.config.max_log_entries;
            self.entries.drain(..excess);
        }

        if let Err(err) = self.persist() {
            error!(error = %err, "Failed to persist cost ledger");
        }

        let stats = self.stats();
        if stats.daily > self.config.daily_limit {
            warn!(
                daily = format!("{:.2}", stats.daily),
                limit = format!("{:.2}", self.config.daily_limit),
                "Daily cost limit exceeded"
            );
        }
        if stats.monthly > self.config.monthly_limit {
            warn!(
                monthly = format!("{:.2}", stats.monthly),
                limit = format!("{:.2}", self.config.monthly_limit),
                "Monthly cost limit exceeded"
            );
        }
    }

    /// Write the whole ledger to a temp file, then rename it into place.
    /// Rename is atomic on the same filesystem, so readers and crashes only
    /// ever see a complete JSON array.
    fn persist(&self) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn stats(&self) -> CostStats {
        let now = Utc::now();
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc();
        let month_start = now
            .date_naive()
            .with_day(1)
            .expect("day 1 exists")
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc();

        let mut daily = 0.0;
        let mut monthly = 0.0;
        let mut total = 0.0;
        for entry in &self.entries {
            total += entry.cost;
            if entry.timestamp >= month_start {
                monthly += entry.cost;
                if entry.timestamp >= today_start {
                    daily += entry.cost;
                }
            }
        }

        CostStats {
            daily,
            monthly,
            total,
            date_range: DateRange {
                start: self.entries.first().map(|e| e.timestamp),
                end: self.entries.last().map(|e| e.timestamp),
            },
        }
    }

    fn check_budget(&self, projected: f64) -> AppResult<()> {
        let daily = self.stats().daily;
        if daily + projected > self.config.daily_limit {
            return Err(AppError::CostLimitExceeded(format!(
                "Projected cost {projected:.4} would exceed the daily limit \
                 ({daily:.4} of {:.2} already spent)",
                self.config.daily_limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(cost: f64, age: Duration, outcome: CostOutcome) -> CostLogEntry {
        CostLogEntry {
            timestamp: Utc::now() - age,
            operation: "transcription".to_string(),
            duration_minutes: 2.0,
            cost,
            audio_hash: "hash".to_string(),
            outcome,
        }
    }

    fn config(dir: &std::path::Path, daily: f64) -> CostConfig {
        CostConfig {
            log_dir: dir.to_string_lossy().into_owned(),
            daily_limit: daily,
            monthly_limit: 500.0,
            max_log_entries: 10_000,
        }
    }

    #[tokio::test]
    async fn test_track_and_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, _handle) = CostTracker::spawn(config(dir.path(), 50.0));

        tracker.track(entry(1.0, Duration::zero(), CostOutcome::Success)).await;
        tracker.track(entry(2.0, Duration::zero(), CostOutcome::Failed)).await;
        // Forty days old: counts toward total only.
        tracker.track(entry(4.0, Duration::days(40), CostOutcome::Success)).await;

        let stats = tracker.stats().await;
        assert!((stats.daily - 3.0).abs() < 1e-9);
        assert!((stats.total - 7.0).abs() < 1e-9);
        assert!(stats.monthly >= 3.0 && stats.monthly < 7.0);
        assert!(stats.date_range.start.is_some());
    }

    #[tokio::test]
    async fn test_recent_is_reverse_chronological() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, _handle) = CostTracker::spawn(config(dir.path(), 50.0));

        tracker.track(entry(1.0, Duration::minutes(2), CostOutcome::Success)).await;
        tracker.track(entry(2.0, Duration::minutes(1), CostOutcome::Success)).await;
        tracker.track(entry(3.0, Duration::zero(), CostOutcome::Success)).await;

        let recent = tracker.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert!((recent[0].cost - 3.0).abs() < 1e-9);
        assert!((recent[1].cost - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_budget_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, _handle) = CostTracker::spawn(config(dir.path(), 5.0));

        assert!(tracker.check_budget(4.0).await.is_ok());
        tracker.track(entry(4.0, Duration::zero(), CostOutcome::Success)).await;

        // 4.0 spent today; another 2.0 would exceed the 5.0 limit.
        let rejected = tracker.check_budget(2.0).await;
        assert!(matches!(rejected, Err(AppError::CostLimitExceeded(_))));
        // Fitting work is still admitted.
        assert!(tracker.check_budget(0.5).await.is_ok());
    }

    #[tokio::test]
    async fn test_ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (tracker, _handle) = CostTracker::spawn(config(dir.path(), 50.0));
            tracker.track(entry(2.5, Duration::zero(), CostOutcome::Success)).await;
            // Round-trip through the task to be sure the write landed.
            let _ = tracker.stats().await;
        }

        let (tracker, _handle) = CostTracker::spawn(config(dir.path(), 50.0));
        let stats = tracker.stats().await;
        assert!((stats.total - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_clear_truncates_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, _handle) = CostTracker::spawn(config(dir.path(), 50.0));
        tracker.track(entry(1.0, Duration::zero(), CostOutcome::Success)).await;
        tracker.clear().await;

        let stats = tracker.stats().await;
        assert_eq!(stats.total, 0.0);
        assert!(tracker.recent(10).await.is_empty());
        assert!(!dir.path().join(LEDGER_FILE).exists());
    }

    #[tokio::test]
    async fn test_malformed_ledger_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LEDGER_FILE), b"{not json[").unwrap();
        let (tracker, _handle) = CostTracker::spawn(config(dir.path(), 50.0));
        assert_eq!(tracker.stats().await.total, 0.0);
    }
}
