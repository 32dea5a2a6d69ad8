// src/error.rs
use thiserror::Error;

/// Rejected while building a `TransferEvent`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("{0} address is empty")]
    EmptyAddress(&'static str),

    #[error("transaction hash is empty")]
    EmptyTxHash,

    #[error("amount {0:?} is not a non-negative decimal integer")]
    InvalidAmount(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum ChainError {
    /// Timeouts, dropped connections, non-200 responses.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed log: {0}")]
    MalformedLog(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Decode(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid event in tx {tx_hash}: {source}")]
    InvalidEvent {
        tx_hash: String,
        #[source]
        source: EventError,
    },

    #[error("live subscription closed by the node")]
    SubscriptionClosed,
}

impl IndexerError {
    /// Worth re-running the indexer from its start block.
    pub fn is_restartable(&self) -> bool {
        matches!(
            self,
            IndexerError::BlockNotFound(_) | IndexerError::Chain(_) | IndexerError::SubscriptionClosed
        )
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}
