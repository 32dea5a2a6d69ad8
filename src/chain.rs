use alloy::primitives::{keccak256, B256};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ChainError;
use crate::models::RawLog;

/// ERC20 `Transfer` event signature.
pub const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";

/// Live log stream; an item-level error does not necessarily end it.
pub type LogStream = BoxStream<'static, Result<RawLog, ChainError>>;

/// topic0 of an event, keccak256 of its canonical signature.
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// What the indexer needs from a ledger node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest known block height.
    async fn current_height(&self) -> Result<u64, ChainError>;

    /// Logs matching `event` in the inclusive range `[from_block, to_block]`.
    async fn historical_logs(
        &self,
        event: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError>;

    /// Unix timestamp of a block, `None` if the node can't see it (yet).
    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>, ChainError>;

    /// New logs matching `event` from now on.
    async fn subscribe(&self, event: &str) -> Result<LogStream, ChainError>;
}
