//! Periodic sync scheduling
//!
//! Runs one pass immediately and then one per interval. Passes run inline in
//! the scheduler task, so a slow pass delays the next tick instead of
//! overlapping it; a failed pass never stops the loop.

use crate::config::{chrono_secs, MAX_DURATION_SECS};
use crate::indexer::SyncOrchestrator;
use crate::models::SyncSummary;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{info, warn};

/// Scheduler state and statistics
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub interval_secs: u64,
    pub total_passes: u64,
    pub failed_passes: u64,
    pub last_pass: Option<String>,
    pub next_pass: Option<String>,
    pub last_summary: Option<SyncSummary>,
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between pass starts (default: 1800s = 30 min)
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_secs: 30 * 60 }
    }
}

#[derive(Default)]
struct SchedulerInternalStats {
    total_passes: u64,
    failed_passes: u64,
    last_pass: Option<chrono::DateTime<chrono::Utc>>,
    last_summary: Option<SyncSummary>,
}

/// Background scheduler that triggers sync passes on a fixed interval
pub struct Scheduler {
    config: SchedulerConfig,
    orchestrator: Arc<SyncOrchestrator>,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<SchedulerInternalStats>>,
    task_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, config: SchedulerConfig) -> Self {
        Self {
            config,
            orchestrator,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(SchedulerInternalStats::default())),
            task_handle: Mutex::new(None),
        }
    }

    /// Start the background loop; the first pass runs right away
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Scheduler already running");
            return;
        }

        let interval_secs = self.config.interval_secs.clamp(1, MAX_DURATION_SECS);
        info!(interval_secs, "Starting sync scheduler");

        let running = self.running.clone();
        let orchestrator = self.orchestrator.clone();
        let stats = self.stats.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let started = chrono::Utc::now();
                let result = orchestrator.run_pass().await;

                let mut s = stats.write().await;
                s.total_passes += 1;
                s.last_pass = Some(started);
                match result {
                    Ok(summary) => s.last_summary = Some(summary),
                    Err(e) => {
                        s.failed_passes += 1;
                        warn!(error = %e, "Scheduled sync failed, retrying at next tick");
                    }
                }
            }

            info!("Scheduler stopped");
        });

        *self.task_handle.lock() = Some(handle);
    }

    /// Stop the scheduler
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task_handle.lock().take() {
            handle.abort();
        }
    }

    /// Check if scheduler is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get scheduler statistics
    pub async fn stats(&self) -> SchedulerStats {
        let s = self.stats.read().await;
        let running = self.is_running();
        let next_pass = s
            .last_pass
            .filter(|_| running)
            .and_then(|last| next_pass_at(last, self.config.interval_secs))
            .map(|next| next.to_rfc3339());

        SchedulerStats {
            running,
            interval_secs: self.config.interval_secs,
            total_passes: s.total_passes,
            failed_passes: s.failed_passes,
            last_pass: s.last_pass.map(|d| d.to_rfc3339()),
            next_pass,
            last_summary: s.last_summary,
        }
    }
}

fn next_pass_at(
    last: chrono::DateTime<chrono::Utc>,
    interval_secs: u64,
) -> Option<chrono::DateTime<chrono::Utc>> {
    let interval = interval_secs.clamp(1, MAX_DURATION_SECS);
    last.checked_add_signed(chrono_secs(interval)?)
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
