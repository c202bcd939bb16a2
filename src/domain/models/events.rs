//! Inbound event payloads
//!
//! Deliveries carry a list of events, each tagged with a `category`. Shapes
//! that do not match one of the known categories are rejected at the
//! receiver boundary instead of being passed on to storage code.

use crate::core::{EventCategory, IndexerError, IndexerResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SIGNATURE_LEN: usize = 64;
const PUBKEY_LEN: usize = 32;

/// One delivery envelope: `{ "webhookId": ..., "events": [...] }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEnvelope {
    pub webhook_id: String,
    pub events: Vec<Value>,
}

/// A decoded chain event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ChainEvent {
    Transaction(TransactionEvent),
    NftEvent(NftEvent),
    TokenTransfer(TokenTransferEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub signature: String,
    pub slot: i64,
    pub timestamp: i64,
    #[serde(rename = "type", default)]
    pub tx_type: String,
    #[serde(default)]
    pub fee: i64,
    pub fee_payer: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub program_id: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NftEvent {
    pub signature: String,
    pub slot: i64,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub mint: String,
    #[serde(default)]
    pub buyer: Option<String>,
    #[serde(default)]
    pub seller: Option<String>,
    /// Sale or bid amount in lamports
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub marketplace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransferEvent {
    pub signature: String,
    pub slot: i64,
    pub timestamp: i64,
    pub transfers: Vec<TokenTransfer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub mint: String,
    #[serde(default)]
    pub from_user_account: Option<String>,
    #[serde(default)]
    pub to_user_account: Option<String>,
    pub token_amount: Decimal,
}

impl ChainEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            ChainEvent::Transaction(_) => EventCategory::Transactions,
            ChainEvent::NftEvent(_) => EventCategory::NftEvents,
            ChainEvent::TokenTransfer(_) => EventCategory::TokenTransfers,
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            ChainEvent::Transaction(e) => &e.signature,
            ChainEvent::NftEvent(e) => &e.signature,
            ChainEvent::TokenTransfer(e) => &e.signature,
        }
    }

    pub fn slot(&self) -> i64 {
        match self {
            ChainEvent::Transaction(e) => e.slot,
            ChainEvent::NftEvent(e) => e.slot,
            ChainEvent::TokenTransfer(e) => e.slot,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            ChainEvent::Transaction(e) => e.timestamp,
            ChainEvent::NftEvent(e) => e.timestamp,
            ChainEvent::TokenTransfer(e) => e.timestamp,
        }
    }

    /// Semantic checks serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        check_signature(self.signature())?;
        if self.slot() < 0 {
            return Err(format!("negative slot {}", self.slot()));
        }
        if self.timestamp() < 0 {
            return Err(format!("negative timestamp {}", self.timestamp()));
        }

        match self {
            ChainEvent::Transaction(tx) => {
                check_pubkey("feePayer", &tx.fee_payer)?;
                if tx.fee < 0 {
                    return Err("negative fee".to_string());
                }
                for (i, ix) in tx.instructions.iter().enumerate() {
                    check_pubkey(&format!("instructions[{}].programId", i), &ix.program_id)?;
                }
            }
            ChainEvent::NftEvent(nft) => {
                check_pubkey("mint", &nft.mint)?;
                if nft.event_type.trim().is_empty() {
                    return Err("empty NFT event type".to_string());
                }
                for (name, account) in [("buyer", &nft.buyer), ("seller", &nft.seller)] {
                    if let Some(account) = account {
                        check_pubkey(name, account)?;
                    }
                }
            }
            ChainEvent::TokenTransfer(transfer) => {
                if transfer.transfers.is_empty() {
                    return Err("token transfer event without transfers".to_string());
                }
                for (i, t) in transfer.transfers.iter().enumerate() {
                    check_pubkey(&format!("transfers[{}].mint", i), &t.mint)?;
                    if t.token_amount.is_sign_negative() {
                        return Err(format!("transfers[{}] has a negative amount", i));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_signature(signature: &str) -> Result<(), String> {
    match bs58::decode(signature).into_vec() {
        Ok(bytes) if bytes.len() == SIGNATURE_LEN => Ok(()),
        Ok(bytes) => Err(format!("signature decodes to {} bytes", bytes.len())),
        Err(_) => Err(format!("signature is not base58: {}", signature)),
    }
}

fn check_pubkey(field: &str, value: &str) -> Result<(), String> {
    match bs58::decode(value).into_vec() {
        Ok(bytes) if bytes.len() == PUBKEY_LEN => Ok(()),
        _ => Err(format!("{} is not a valid account address", field)),
    }
}

/// Structural validation of a raw delivery body
///
/// Accepts a single envelope object or a non-empty array of envelopes.
pub fn parse_delivery(body: &[u8]) -> IndexerResult<Vec<DeliveryEnvelope>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| IndexerError::validation(format!("body is not valid JSON: {}", e)))?;

    let items = match value {
        Value::Object(_) => vec![value],
        Value::Array(items) if !items.is_empty() => items,
        Value::Array(_) => return Err(IndexerError::validation("empty delivery array")),
        _ => return Err(IndexerError::validation("delivery must be an object or array")),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item
                .as_object()
                .ok_or_else(|| IndexerError::validation(format!("delivery[{}] is not an object", i)))?;
            if !obj.get("webhookId").map_or(false, Value::is_string) {
                return Err(IndexerError::validation(format!(
                    "delivery[{}] is missing a string webhookId",
                    i
                )));
            }
            if !obj.get("events").map_or(false, Value::is_array) {
                return Err(IndexerError::validation(format!(
                    "delivery[{}] is missing an events array",
                    i
                )));
            }
            serde_json::from_value(item).map_err(IndexerError::from)
        })
        .collect()
}

/// Decode and validate raw events into the tagged union
pub fn decode_events(raw: &[Value]) -> IndexerResult<Vec<ChainEvent>> {
    raw.iter()
        .enumerate()
        .map(|(i, value)| {
            let event: ChainEvent = serde_json::from_value(value.clone())
                .map_err(|e| IndexerError::validation(format!("event {}: {}", i, e)))?;
            event
                .validate()
                .map_err(|e| IndexerError::validation(format!("event {}: {}", i, e)))?;
            Ok(event)
        })
        .collect()
}
