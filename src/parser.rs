// src/parser.rs
use alloy::primitives::{Address, U256};

use crate::error::ChainError;
use crate::models::RawLog;
use crate::rpc::Log;

fn decode_word(hex_str: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x")).ok()?;
    bytes.try_into().ok()
}

fn topic_to_address(topic: &str) -> Option<Address> {
    // topics[1] and topics[2] are 32-byte (padded) hex strings; address is the last 20 bytes
    let word = decode_word(topic)?;
    if word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_slice(&word[12..]))
}

pub fn parse_quantity(hex_str: &str) -> Option<u64> {
    let digits = hex_str.strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Decode a single `Transfer` log. Anything that doesn't fit the ERC20 layout is rejected.
pub fn decode_transfer(log: &Log) -> Result<RawLog, ChainError> {
    let malformed = |what: &str| {
        ChainError::MalformedLog(format!("{what} (tx {})", log.tx_hash.as_deref().unwrap_or("?")))
    };

    if log.topics.len() != 3 {
        return Err(malformed("expected 3 topics"));
    }

    let from = topic_to_address(&log.topics[1]).ok_or_else(|| malformed("bad from topic"))?;
    let to = topic_to_address(&log.topics[2]).ok_or_else(|| malformed("bad to topic"))?;

    let value = decode_word(&log.data).ok_or_else(|| malformed("bad value data"))?;
    let amount = U256::from_be_bytes(value);

    let block_number = log
        .block_number_hex
        .as_deref()
        .and_then(parse_quantity)
        .ok_or_else(|| malformed("missing block number"))?;

    let tx_hash = log
        .tx_hash
        .clone()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| malformed("missing transaction hash"))?;

    Ok(RawLog {
        sender: from.to_string(),
        recipient: to.to_string(),
        amount,
        tx_hash,
        block_number,
    })
}
