//! Transaction processor

use super::EventProcessor;
use crate::core::EventCategory;
use crate::domain::models::{
    block_time, ChainEvent, ProgramInteractionRow, TargetRow, TransactionEvent, TransactionRow,
};

/// Writes one row per transaction and one per instruction it executed
#[derive(Debug, Default)]
pub struct TransactionProcessor;

impl TransactionProcessor {
    pub fn new() -> Self {
        Self
    }

    fn transaction_rows(tx: &TransactionEvent, out: &mut Vec<TargetRow>) {
        let block_time = block_time(tx.timestamp);

        out.push(TargetRow::Transaction(TransactionRow {
            signature: tx.signature.clone(),
            slot: tx.slot,
            block_time,
            fee: tx.fee,
            fee_payer: tx.fee_payer.clone(),
            tx_type: if tx.tx_type.is_empty() {
                "UNKNOWN".to_string()
            } else {
                tx.tx_type.clone()
            },
            source: tx.source.clone(),
            description: tx.description.clone(),
            raw: serde_json::to_value(tx).unwrap_or_default(),
        }));

        for (index, ix) in tx.instructions.iter().enumerate() {
            out.push(TargetRow::ProgramInteraction(ProgramInteractionRow {
                signature: tx.signature.clone(),
                instruction_index: index as i32,
                program_id: ix.program_id.clone(),
                account_count: ix.accounts.len() as i32,
                slot: tx.slot,
                block_time,
            }));
        }
    }
}

impl EventProcessor for TransactionProcessor {
    fn category(&self) -> EventCategory {
        EventCategory::Transactions
    }

    fn rows(&self, events: &[ChainEvent]) -> Vec<TargetRow> {
        let mut rows = Vec::new();
        for event in events {
            if let ChainEvent::Transaction(tx) = event {
                Self::transaction_rows(tx, &mut rows);
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Instruction;

    #[test]
    fn fans_out_one_row_per_instruction() {
        let tx = TransactionEvent {
            signature: "sig".into(),
            slot: 7,
            timestamp: 1_700_000_000,
            tx_type: String::new(),
            fee: 5000,
            fee_payer: "payer".into(),
            source: None,
            description: None,
            instructions: vec![
                Instruction { program_id: "p1".into(), accounts: vec!["a".into(), "b".into()], data: String::new() },
                Instruction { program_id: "p2".into(), accounts: vec![], data: String::new() },
            ],
        };

        let rows = TransactionProcessor::new().rows(&[ChainEvent::Transaction(tx)]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].table(), "transactions");
        assert_eq!(rows[1].natural_key(), "sig:0");
        assert_eq!(rows[2].natural_key(), "sig:1");
        match &rows[0] {
            TargetRow::Transaction(row) => assert_eq!(row.tx_type, "UNKNOWN"),
            other => panic!("unexpected row {:?}", other),
        }
    }
}
