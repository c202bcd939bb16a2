//! Periodic job scheduler
//!
//! Each tick starts the due pending jobs concurrently and then resets jobs a
//! crashed process left behind. Ticks are driven either by the in-process
//! interval loop or by the external cron endpoint; both call `run_tick`.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::jobs::{JobService, StartOutcome};
use crate::config::SchedulerConfig;
use crate::core::{IndexerError, IndexerResult, JobStore};
use crate::metrics::Metrics;

/// Counts from one scheduler tick
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Claimed by someone else between the scan and the start
    pub skipped: usize,
    pub recovered: usize,
}

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    jobs: Arc<JobService>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        jobs: Arc<JobService>,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            jobs,
            metrics,
            config,
        }
    }

    /// Run one tick within the configured wall-clock budget
    pub async fn run_tick(&self) -> IndexerResult<TickReport> {
        let budget = self.config.tick_budget();
        let report = tokio::time::timeout(budget, self.tick())
            .await
            .map_err(|_| IndexerError::Internal(format!("scheduler tick exceeded {:?}", budget)))??;
        self.metrics.scheduler_tick();
        Ok(report)
    }

    async fn tick(&self) -> IndexerResult<TickReport> {
        let due = self
            .store
            .due_pending_jobs(Utc::now(), self.config.batch_size)
            .await?;

        let mut report = TickReport {
            processed: due.len(),
            ..TickReport::default()
        };

        let starts = due.iter().map(|job| self.jobs.start_job(job.id));
        for (job, outcome) in due.iter().zip(join_all(starts).await) {
            match outcome {
                Ok(StartOutcome::Started(_)) => report.succeeded += 1,
                Ok(StartOutcome::Failed(_)) => report.failed += 1,
                Ok(StartOutcome::Skipped(_)) => report.skipped += 1,
                Err(e) => {
                    error!(job_id = %job.id, "Failed to start job: {}", e);
                    report.failed += 1;
                }
            }
        }

        match self.jobs.recover_interrupted_jobs().await {
            Ok(recovered) => report.recovered = recovered.len(),
            Err(e) => warn!("Recovery of interrupted jobs failed: {}", e),
        }

        if report.processed > 0 || report.recovered > 0 {
            info!(
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                recovered = report.recovered,
                "Scheduler tick complete"
            );
        }
        Ok(report)
    }

    /// Drive `run_tick` on the configured interval until the task is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config.interval_secs);
        tokio::spawn(async move {
            info!("Scheduler started, ticking every {:?}", period);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.run_tick().await {
                    error!("Scheduler tick failed: {}", e);
                }
            }
        })
    }
}
