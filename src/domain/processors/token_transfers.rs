//! Token transfer processor

use super::EventProcessor;
use crate::core::EventCategory;
use crate::domain::models::{
    block_time, AccountActivityRow, ChainEvent, TargetRow, TokenTransferEvent, TokenTransferRow,
};

/// Writes one row per transfer and a sender/receiver activity row for each
#[derive(Debug, Default)]
pub struct TokenTransferProcessor;

impl TokenTransferProcessor {
    pub fn new() -> Self {
        Self
    }

    fn transfer_rows(event: &TokenTransferEvent, out: &mut Vec<TargetRow>) {
        let block_time = block_time(event.timestamp);

        for (index, transfer) in event.transfers.iter().enumerate() {
            out.push(TargetRow::TokenTransfer(TokenTransferRow {
                signature: event.signature.clone(),
                transfer_index: index as i32,
                mint: transfer.mint.clone(),
                from_account: transfer.from_user_account.clone(),
                to_account: transfer.to_user_account.clone(),
                amount: transfer.token_amount,
                slot: event.slot,
                block_time,
            }));

            let parties = [
                ("sender", &transfer.from_user_account),
                ("receiver", &transfer.to_user_account),
            ];
            for (role, account) in parties {
                if let Some(account) = account {
                    out.push(TargetRow::AccountActivity(AccountActivityRow {
                        signature: event.signature.clone(),
                        account: account.clone(),
                        role: role.to_string(),
                        category: EventCategory::TokenTransfers.as_str().to_string(),
                        slot: event.slot,
                        block_time,
                    }));
                }
            }
        }
    }
}

impl EventProcessor for TokenTransferProcessor {
    fn category(&self) -> EventCategory {
        EventCategory::TokenTransfers
    }

    fn rows(&self, events: &[ChainEvent]) -> Vec<TargetRow> {
        let mut rows = Vec::new();
        for event in events {
            if let ChainEvent::TokenTransfer(transfer) = event {
                Self::transfer_rows(transfer, &mut rows);
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TokenTransfer;
    use rust_decimal::Decimal;

    #[test]
    fn a_wallet_sending_to_itself_yields_two_roles() {
        let event = TokenTransferEvent {
            signature: "sig".into(),
            slot: 1,
            timestamp: 1,
            transfers: vec![TokenTransfer {
                mint: "mint".into(),
                from_user_account: Some("wallet".into()),
                to_user_account: Some("wallet".into()),
                token_amount: Decimal::new(15, 1),
            }],
        };

        let rows = TokenTransferProcessor::new().rows(&[ChainEvent::TokenTransfer(event)]);
        let keys: Vec<String> = rows.iter().map(|r| r.natural_key()).collect();
        assert_eq!(
            keys,
            vec![
                "sig:0".to_string(),
                "sig:wallet:sender:token_transfers".to_string(),
                "sig:wallet:receiver:token_transfers".to_string(),
            ]
        );
    }
}
