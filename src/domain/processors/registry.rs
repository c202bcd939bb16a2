//! Processor registry for routing event batches by category

use super::{EventProcessor, NftEventProcessor, TokenTransferProcessor, TransactionProcessor};
use crate::core::{Categories, EventCategory, IndexerResult, TargetDatabase};
use crate::domain::models::{ChainEvent, WriteSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Per-delivery processing outcome
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DispatchSummary {
    pub per_category: BTreeMap<EventCategory, WriteSummary>,
    /// Events whose category the job did not select
    pub ignored: usize,
    pub processed: usize,
}

impl DispatchSummary {
    pub fn total(&self) -> WriteSummary {
        let mut total = WriteSummary::default();
        for summary in self.per_category.values() {
            total.merge(*summary);
        }
        total
    }
}

/// Registry for all event processors
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn EventProcessor>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    /// Create a registry with the built-in category processors
    pub fn new() -> Self {
        Self {
            processors: vec![
                Box::new(TransactionProcessor::new()),
                Box::new(NftEventProcessor::new()),
                Box::new(TokenTransferProcessor::new()),
            ],
        }
    }

    pub fn get(&self, category: EventCategory) -> Option<&dyn EventProcessor> {
        self.processors
            .iter()
            .find(|p| p.category() == category)
            .map(|p| p.as_ref())
    }

    /// Route events to the processors of the categories a job selected
    ///
    /// Each processor commits its own batch; the first failure is returned.
    pub async fn dispatch(
        &self,
        categories: &Categories,
        events: &[ChainEvent],
        target: &dyn TargetDatabase,
    ) -> IndexerResult<DispatchSummary> {
        let mut grouped: BTreeMap<EventCategory, Vec<ChainEvent>> = BTreeMap::new();
        let mut summary = DispatchSummary::default();

        for event in events {
            let category = event.category();
            if categories.contains(category) {
                grouped.entry(category).or_default().push(event.clone());
            } else {
                summary.ignored += 1;
            }
        }

        for (category, batch) in grouped {
            let Some(processor) = self.get(category) else {
                debug!(%category, "No processor registered, skipping {} events", batch.len());
                summary.ignored += batch.len();
                continue;
            };
            let written = processor.process(&batch, target).await?;
            summary.processed += batch.len();
            summary.per_category.insert(category, written);
        }

        Ok(summary)
    }
}
