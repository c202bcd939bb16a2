//! NFT event processor

use super::EventProcessor;
use crate::core::EventCategory;
use crate::domain::models::{block_time, AccountActivityRow, ChainEvent, NftEventRow, TargetRow};

/// Writes NFT sales/listings/bids plus buyer and seller activity rows
#[derive(Debug, Default)]
pub struct NftEventProcessor;

impl NftEventProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl EventProcessor for NftEventProcessor {
    fn category(&self) -> EventCategory {
        EventCategory::NftEvents
    }

    fn rows(&self, events: &[ChainEvent]) -> Vec<TargetRow> {
        let mut rows = Vec::new();
        for event in events {
            let ChainEvent::NftEvent(nft) = event else {
                continue;
            };
            let block_time = block_time(nft.timestamp);

            rows.push(TargetRow::NftEvent(NftEventRow {
                signature: nft.signature.clone(),
                mint: nft.mint.clone(),
                event_type: nft.event_type.clone(),
                buyer: nft.buyer.clone(),
                seller: nft.seller.clone(),
                amount_lamports: nft.amount,
                marketplace: nft.marketplace.clone(),
                slot: nft.slot,
                block_time,
            }));

            for (role, account) in [("buyer", &nft.buyer), ("seller", &nft.seller)] {
                if let Some(account) = account {
                    rows.push(TargetRow::AccountActivity(AccountActivityRow {
                        signature: nft.signature.clone(),
                        account: account.clone(),
                        role: role.to_string(),
                        category: EventCategory::NftEvents.as_str().to_string(),
                        slot: nft.slot,
                        block_time,
                    }));
                }
            }
        }
        rows
    }
}
