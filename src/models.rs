// src/models.rs
use alloy::primitives::{U256, U512};
use serde::Serialize;

use crate::error::EventError;

/// A token transfer as persisted and served. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    sender: String,
    recipient: String,
    amount: String, // decimal string, never a float
    tx_hash: String,
    block_number: u64,
    timestamp: u64, // unix seconds of the containing block
}

impl TransferEvent {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: &str,
        tx_hash: impl Into<String>,
        block_number: u64,
        timestamp: u64,
    ) -> Result<Self, EventError> {
        let sender = sender.into();
        let recipient = recipient.into();
        let tx_hash = tx_hash.into();

        if sender.trim().is_empty() {
            return Err(EventError::EmptyAddress("sender"));
        }
        if recipient.trim().is_empty() {
            return Err(EventError::EmptyAddress("recipient"));
        }
        if tx_hash.trim().is_empty() {
            return Err(EventError::EmptyTxHash);
        }

        Ok(Self {
            sender,
            recipient,
            amount: parse_amount(amount)?.to_string(),
            tx_hash,
            block_number,
            timestamp,
        })
    }

    /// Joins a decoded log with the timestamp of its block.
    pub fn from_raw(log: RawLog, timestamp: u64) -> Result<Self, EventError> {
        Self::new(
            log.sender,
            log.recipient,
            &log.amount.to_string(),
            log.tx_hash,
            log.block_number,
            timestamp,
        )
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn amount(&self) -> &str {
        &self.amount
    }

    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Parses a decimal amount string into a 256-bit integer.
pub fn parse_amount(s: &str) -> Result<U256, EventError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EventError::InvalidAmount(s.to_string()));
    }
    s.parse::<U256>()
        .map_err(|_| EventError::InvalidAmount(s.to_string()))
}

/// A `Transfer` log as delivered by the chain, before timestamp resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub sender: String,
    pub recipient: String,
    pub amount: U256,
    pub tx_hash: String,
    pub block_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Conjunction of optional predicates; `None` means no constraint on that field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
}

/// 1-indexed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub const DEFAULT_SIZE: u32 = 10;

    pub fn offset(&self) -> u64 {
        u64::from(self.number.saturating_sub(1)) * u64::from(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { number: 1, size: Self::DEFAULT_SIZE }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub total_events: u64,
    pub total_value: U512,
}
