//! Category processors turning validated events into target rows

mod nft_events;
mod registry;
mod token_transfers;
mod transactions;

pub use nft_events::NftEventProcessor;
pub use registry::{DispatchSummary, ProcessorRegistry};
pub use token_transfers::TokenTransferProcessor;
pub use transactions::TransactionProcessor;

use crate::core::{EventCategory, IndexerResult, TargetDatabase};
use crate::domain::models::{ChainEvent, TargetRow, WriteBatch, WriteSummary};
use async_trait::async_trait;
use tracing::debug;

/// Transactional writer for one event category
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// The category this processor owns
    fn category(&self) -> EventCategory;

    /// Map events to primary and fan-out rows
    ///
    /// Events of other categories are ignored.
    fn rows(&self, events: &[ChainEvent]) -> Vec<TargetRow>;

    /// Write one batch in a single target transaction (template method)
    async fn process(
        &self,
        events: &[ChainEvent],
        target: &dyn TargetDatabase,
    ) -> IndexerResult<WriteSummary> {
        let batch = WriteBatch {
            category: self.category(),
            rows: self.rows(events),
        };
        if batch.rows.is_empty() {
            return Ok(WriteSummary::default());
        }

        let summary = target.write_batch(&batch).await?;
        debug!(
            category = %self.category(),
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Batch written"
        );
        Ok(summary)
    }
}
