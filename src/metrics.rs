//! Prometheus counters for deliveries, target writes and job transitions

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::core::{DeliveryStatus, EventCategory, IndexerError, IndexerResult, JobStatus};

const NAMESPACE: &str = "webhook_indexer";

pub struct Metrics {
    registry: Registry,
    deliveries: IntCounterVec,
    events_written: IntCounterVec,
    job_transitions: IntCounterVec,
    scheduler_ticks: IntCounter,
}

impl Metrics {
    pub fn new() -> IndexerResult<Self> {
        let registry = Registry::new();

        let deliveries = IntCounterVec::new(
            Opts::new("deliveries_total", "Webhook deliveries by outcome").namespace(NAMESPACE),
            &["outcome"],
        )
        .map_err(metrics_err)?;
        let events_written = IntCounterVec::new(
            Opts::new("events_written_total", "Rows inserted into target databases")
                .namespace(NAMESPACE),
            &["category"],
        )
        .map_err(metrics_err)?;
        let job_transitions = IntCounterVec::new(
            Opts::new("job_transitions_total", "Job status transitions by new status")
                .namespace(NAMESPACE),
            &["to"],
        )
        .map_err(metrics_err)?;
        let scheduler_ticks = IntCounter::with_opts(
            Opts::new("scheduler_ticks_total", "Completed scheduler ticks").namespace(NAMESPACE),
        )
        .map_err(metrics_err)?;

        registry
            .register(Box::new(deliveries.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(events_written.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(job_transitions.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(scheduler_ticks.clone()))
            .map_err(metrics_err)?;

        Ok(Self {
            registry,
            deliveries,
            events_written,
            job_transitions,
            scheduler_ticks,
        })
    }

    pub fn delivery(&self, outcome: DeliveryStatus) {
        self.deliveries.with_label_values(&[outcome.as_str()]).inc();
    }

    /// Deliveries dropped because the job was not running
    pub fn delivery_skipped(&self) {
        self.deliveries.with_label_values(&["skipped"]).inc();
    }

    pub fn events_written(&self, category: EventCategory, rows: u64) {
        self.events_written
            .with_label_values(&[category.as_str()])
            .inc_by(rows);
    }

    pub fn job_transition(&self, to: JobStatus) {
        self.job_transitions.with_label_values(&[to.as_str()]).inc();
    }

    pub fn scheduler_tick(&self) {
        self.scheduler_ticks.inc();
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> IndexerResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_err)?;
        String::from_utf8(buffer).map_err(|e| IndexerError::Internal(e.to_string()))
    }
}

fn metrics_err(e: prometheus::Error) -> IndexerError {
    IndexerError::Internal(format!("metrics: {}", e))
}
