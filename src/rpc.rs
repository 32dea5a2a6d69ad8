// src/rpc.rs
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use futures_util::stream;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::{event_topic, ChainClient, LogStream};
use crate::config::Config;
use crate::error::ChainError;
use crate::models::RawLog;
use crate::parser::{decode_transfer, parse_quantity};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    pub topics: Vec<String>,
    pub data: String,

    // null while the log is pending
    #[serde(rename = "blockNumber")]
    pub block_number_hex: Option<String>,

    #[serde(rename = "transactionHash")]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: String,
}

// Error must come first: a missing `result` would otherwise match `Option<T>` as None.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcResponse<T> {
    Error { error: RpcErrorBody },
    Success { result: T },
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC over HTTP, scoped to one token contract.
#[derive(Clone)]
pub struct RpcChainClient {
    http: Client,
    url: String,
    contract: Address,
    log_range: u64,
    poll_interval: Duration,
    retry_pause: Duration,
}

impl RpcChainClient {
    pub fn new(
        url: impl Into<String>,
        contract: Address,
        log_range: u64,
        poll_interval: Duration,
    ) -> Result<Self, ChainError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: url.into(),
            contract,
            log_range: log_range.max(1),
            poll_interval,
            retry_pause: RETRY_PAUSE,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ChainError> {
        Self::new(
            cfg.rpc_url.clone(),
            cfg.contract_address,
            cfg.log_range,
            cfg.poll_interval,
        )
    }

    #[cfg(test)]
    fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// One JSON-RPC call; transport failures are retried, node errors are not.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut attempt = 1;
        loop {
            debug!("📡 Sending {} → {}", method, self.url);
            match self.send(&payload).await {
                Ok(text) => {
                    return match serde_json::from_str::<RpcResponse<T>>(&text)? {
                        RpcResponse::Success { result } => Ok(result),
                        RpcResponse::Error { error } => Err(ChainError::Rpc {
                            code: error.code,
                            message: error.message,
                        }),
                    };
                }
                Err(e) if e.is_transient() && attempt < ATTEMPTS => {
                    warn!("{} failed (attempt {}): {}. Retrying...", method, attempt, e);
                    attempt += 1;
                    tokio::time::sleep(self.retry_pause).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, payload: &Value) -> Result<String, ChainError> {
        let resp = self.http.post(&self.url).json(payload).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(ChainError::Transport(format!("HTTP {}", resp.status())));
        }
        Ok(resp.text().await?)
    }

    async fn get_logs(&self, topic: B256, from_block: u64, to_block: u64) -> Result<Vec<Log>, ChainError> {
        let params = json!([{
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "address": self.contract.to_string(),
            "topics": [format!("{topic:#x}")],
        }]);
        self.call("eth_getLogs", params).await
    }

    /// Fetch `[from_block, to_block]` in `log_range`-sized requests, decoding each log separately.
    async fn fetch_range(
        &self,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Result<RawLog, ChainError>>, ChainError> {
        let mut decoded = Vec::new();
        let mut start = from_block;
        while start <= to_block {
            let end = start.saturating_add(self.log_range - 1).min(to_block);
            let logs = self.get_logs(topic, start, end).await?;
            debug!("eth_getLogs {} → {}: {} logs", start, end, logs.len());
            decoded.extend(logs.iter().map(decode_transfer));

            match end.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }
        Ok(decoded)
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn current_height(&self) -> Result<u64, ChainError> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&hex).ok_or_else(|| ChainError::Decode(format!("block number {hex:?}")))
    }

    async fn historical_logs(
        &self,
        event: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        if from_block > to_block {
            return Ok(Vec::new());
        }
        self.fetch_range(event_topic(event), from_block, to_block)
            .await?
            .into_iter()
            .collect()
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>, ChainError> {
        let block: Option<BlockHeader> = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", block_number), false]),
            )
            .await?;

        block
            .map(|b| {
                parse_quantity(&b.timestamp)
                    .ok_or_else(|| ChainError::Decode(format!("timestamp {:?}", b.timestamp)))
            })
            .transpose()
    }

    /// Polls for new blocks. A failed poll is yielded once and ends the stream.
    async fn subscribe(&self, event: &str) -> Result<LogStream, ChainError> {
        let head = self.current_height().await?;
        info!("Subscribed to {} logs after block {}", event, head);

        let state = PollState {
            client: self.clone(),
            topic: event_topic(event),
            next_block: head.saturating_add(1),
            pending: VecDeque::new(),
            done: false,
        };

        Ok(Box::pin(stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.done {
                    return None;
                }
                tokio::time::sleep(st.client.poll_interval).await;
                if let Err(e) = st.poll_once().await {
                    st.done = true;
                    return Some((Err(e), st));
                }
            }
        })))
    }
}

struct PollState {
    client: RpcChainClient,
    topic: B256,
    next_block: u64,
    pending: VecDeque<Result<RawLog, ChainError>>,
    done: bool,
}

impl PollState {
    async fn poll_once(&mut self) -> Result<(), ChainError> {
        let head = self.client.current_height().await?;
        if head < self.next_block {
            return Ok(());
        }
        let logs = self.client.fetch_range(self.topic, self.next_block, head).await?;
        self.pending.extend(logs);
        self.next_block = head.saturating_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TRANSFER_EVENT;
    use crate::indexer::Indexer;
    use crate::models::{EventFilter, Page, TransferEvent};
    use crate::store::EventStore;
    use axum::{routing::post, Json, Router};
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::watch;

    type Handler = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

    /// Local JSON-RPC node; records every request body.
    async fn fake_node(handler: Handler) -> (String, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().route(
            "/",
            post({
                let seen = Arc::clone(&seen);
                move |Json(req): Json<Value>| {
                    let seen = Arc::clone(&seen);
                    let handler = Arc::clone(&handler);
                    async move {
                        seen.lock().unwrap().push(req.clone());
                        let result = handler(&req);
                        let body = match result.get("error") {
                            Some(error) => json!({ "jsonrpc": "2.0", "id": 1, "error": error }),
                            None => json!({ "jsonrpc": "2.0", "id": 1, "result": result }),
                        };
                        Json(body)
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), seen)
    }

    fn client(url: String, log_range: u64) -> RpcChainClient {
        RpcChainClient::new(url, Address::ZERO, log_range, Duration::from_millis(10))
            .unwrap()
            .with_retry_pause(Duration::from_millis(1))
    }

    fn transfer_log(block: u64, tx: &str) -> Value {
        json!({
            "address": "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "0x00000000000000000000000000000000000000000000000000000000000000a1",
                "0x00000000000000000000000000000000000000000000000000000000000000b2"
            ],
            "data": format!("0x{:064x}", 1000 + block),
            "blockNumber": format!("0x{:x}", block),
            "transactionHash": tx,
            "logIndex": "0x0"
        })
    }

    fn hex_param(req: &Value, key: &str) -> u64 {
        parse_quantity(req["params"][0][key].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn reads_head_height() {
        let (url, _) = fake_node(Arc::new(|_: &Value| json!("0x1f"))).await;
        assert_eq!(client(url, 10).current_height().await.unwrap(), 31);
    }

    #[tokio::test]
    async fn missing_block_is_none_not_error() {
        let (url, _) = fake_node(Arc::new(|req: &Value| {
            if req["params"][0] == "0x5" {
                json!({ "timestamp": "0x6553f100", "number": "0x5" })
            } else {
                Value::Null
            }
        }))
        .await;
        let c = client(url, 10);

        assert_eq!(c.block_timestamp(5).await.unwrap(), Some(0x6553f100));
        assert_eq!(c.block_timestamp(6).await.unwrap(), None);
    }

    #[tokio::test]
    async fn node_errors_are_not_retried() {
        let (url, seen) = fake_node(Arc::new(|_: &Value| {
            json!({ "error": { "code": -32005, "message": "query returned more than 10000 results" } })
        }))
        .await;

        let err = client(url, 10).current_height().await.unwrap_err();
        assert!(matches!(err, ChainError::Rpc { code: -32005, .. }));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_failures_exhaust_retries() {
        // nothing listens on this port once the listener is dropped
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{addr}"), 10).current_height().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn historical_range_is_split_into_chunks() {
        let (url, seen) = fake_node(Arc::new(|req: &Value| {
            let from = hex_param(req, "fromBlock");
            let to = hex_param(req, "toBlock");
            Value::Array((from..=to).map(|b| transfer_log(b, &format!("0x{b:02x}"))).collect())
        }))
        .await;

        let logs = client(url, 4).historical_logs(TRANSFER_EVENT, 0, 9).await.unwrap();

        let blocks: Vec<u64> = logs.iter().map(|l| l.block_number).collect();
        assert_eq!(blocks, (0..=9).collect::<Vec<_>>());
        let ranges: Vec<(u64, u64)> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| (hex_param(r, "fromBlock"), hex_param(r, "toBlock")))
            .collect();
        assert_eq!(ranges, vec![(0, 3), (4, 7), (8, 9)]);
        assert_eq!(
            seen.lock().unwrap()[0]["params"][0]["topics"][0],
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[tokio::test]
    async fn malformed_history_fails_the_batch() {
        let (url, _) = fake_node(Arc::new(|_: &Value| {
            let mut bad = transfer_log(2, "0xbad");
            bad["topics"] = json!([]);
            json!([transfer_log(1, "0xgood"), bad])
        }))
        .await;

        let err = client(url, 100).historical_logs(TRANSFER_EVENT, 0, 5).await.unwrap_err();
        assert!(matches!(err, ChainError::MalformedLog(_)));
    }

    #[tokio::test]
    async fn subscription_delivers_only_new_blocks() {
        let heights = Arc::new(Mutex::new(VecDeque::from(vec![10u64, 10, 12])));
        let (url, seen) = fake_node(Arc::new(move |req: &Value| match req["method"].as_str() {
            Some("eth_blockNumber") => {
                let mut h = heights.lock().unwrap();
                let next = if h.len() > 1 { h.pop_front().unwrap() } else { h[0] };
                json!(format!("0x{next:x}"))
            }
            Some("eth_getLogs") => {
                let from = hex_param(req, "fromBlock");
                let to = hex_param(req, "toBlock");
                Value::Array((from..=to).map(|b| transfer_log(b, &format!("0x{b:02x}"))).collect())
            }
            _ => Value::Null,
        }))
        .await;

        let mut live = client(url, 100).subscribe(TRANSFER_EVENT).await.unwrap();
        let first = live.next().await.unwrap().unwrap();
        let second = live.next().await.unwrap().unwrap();

        assert_eq!((first.block_number, second.block_number), (11, 12));
        let log_requests: Vec<(u64, u64)> = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r["method"] == "eth_getLogs")
            .map(|r| (hex_param(r, "fromBlock"), hex_param(r, "toBlock")))
            .collect();
        assert_eq!(log_requests, vec![(11, 12)]);
    }

    #[tokio::test]
    async fn indexer_keeps_transfers_mined_during_backfill() {
        // Head is 10 for the backfill snapshot and 15 from then on.
        let head_reads = Arc::new(AtomicU32::new(0));
        let (url, _) = fake_node(Arc::new(move |req: &Value| match req["method"].as_str() {
            Some("eth_blockNumber") => {
                let head: u64 = if head_reads.fetch_add(1, Ordering::SeqCst) == 0 { 10 } else { 15 };
                json!(format!("0x{head:x}"))
            }
            Some("eth_getLogs") => {
                let range = hex_param(req, "fromBlock")..=hex_param(req, "toBlock");
                Value::Array(
                    [3u64, 12]
                        .into_iter()
                        .filter(|b| range.contains(b))
                        .map(|b| transfer_log(b, &format!("0x{b:02x}")))
                        .collect(),
                )
            }
            Some("eth_getBlockByNumber") => json!({ "timestamp": "0x6553f100" }),
            _ => Value::Null,
        }))
        .await;
        let store = EventStore::open_in_memory().unwrap();
        let indexer = Indexer::new(Arc::new(client(url, 100)), store.clone(), 0);
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(async move { indexer.run(rx).await });
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.count().await.unwrap() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("transfer from block 12 never indexed");
        tx.send(true).unwrap();

        assert!(task.await.unwrap().is_ok());
        let blocks: Vec<u64> = store
            .query(EventFilter::default(), Page::default())
            .await
            .unwrap()
            .iter()
            .map(TransferEvent::block_number)
            .collect();
        assert_eq!(blocks, vec![12, 3]);
    }
}
