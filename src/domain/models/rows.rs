//! Rows written into user target databases

use crate::core::EventCategory;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRow {
    pub signature: String,
    pub slot: i64,
    pub block_time: DateTime<Utc>,
    pub fee: i64,
    pub fee_payer: String,
    pub tx_type: String,
    pub source: Option<String>,
    pub description: Option<String>,
    pub raw: Value,
}

/// One row per instruction of a transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgramInteractionRow {
    pub signature: String,
    pub instruction_index: i32,
    pub program_id: String,
    pub account_count: i32,
    pub slot: i64,
    pub block_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NftEventRow {
    pub signature: String,
    pub mint: String,
    pub event_type: String,
    pub buyer: Option<String>,
    pub seller: Option<String>,
    pub amount_lamports: i64,
    pub marketplace: Option<String>,
    pub slot: i64,
    pub block_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenTransferRow {
    pub signature: String,
    pub transfer_index: i32,
    pub mint: String,
    pub from_account: Option<String>,
    pub to_account: Option<String>,
    pub amount: Decimal,
    pub slot: i64,
    pub block_time: DateTime<Utc>,
}

/// Per-account fan-out of transfers and NFT events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountActivityRow {
    pub signature: String,
    pub account: String,
    pub role: String,
    pub category: String,
    pub slot: i64,
    pub block_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum TargetRow {
    Transaction(TransactionRow),
    ProgramInteraction(ProgramInteractionRow),
    NftEvent(NftEventRow),
    TokenTransfer(TokenTransferRow),
    AccountActivity(AccountActivityRow),
}

impl TargetRow {
    pub fn table(&self) -> &'static str {
        match self {
            TargetRow::Transaction(_) => "transactions",
            TargetRow::ProgramInteraction(_) => "program_interactions",
            TargetRow::NftEvent(_) => "nft_events",
            TargetRow::TokenTransfer(_) => "token_transfers",
            TargetRow::AccountActivity(_) => "account_activity",
        }
    }

    /// Natural identifier used for conflict-ignore inserts
    pub fn natural_key(&self) -> String {
        match self {
            TargetRow::Transaction(r) => r.signature.clone(),
            TargetRow::ProgramInteraction(r) => format!("{}:{}", r.signature, r.instruction_index),
            TargetRow::NftEvent(r) => format!("{}:{}:{}", r.signature, r.mint, r.event_type),
            TargetRow::TokenTransfer(r) => format!("{}:{}", r.signature, r.transfer_index),
            TargetRow::AccountActivity(r) => {
                format!("{}:{}:{}:{}", r.signature, r.account, r.role, r.category)
            }
        }
    }
}

/// Rows one processor writes in a single transaction
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    pub category: EventCategory,
    pub rows: Vec<TargetRow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub inserted: u64,
    /// Rows that already existed
    pub skipped: u64,
}

impl WriteSummary {
    pub fn merge(&mut self, other: WriteSummary) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}

/// Unix seconds to a UTC timestamp, clamping out-of-range values to the epoch
pub fn block_time(timestamp: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_default()
}
