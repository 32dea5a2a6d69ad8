use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, TRANSFER_EVENT};
use crate::error::{ChainError, IndexerError};
use crate::models::{InsertOutcome, RawLog, TransferEvent};
use crate::store::EventStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Backfilling,
    Live,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub from: u64,
    pub to: u64,
    pub inserted: u64,
    pub duplicates: u64,
}

/// Catch-up scan from `start_block` to the head, then a live subscription.
///
/// Overlap between the two is expected; the store's tx-hash uniqueness
/// is what keeps each transfer stored once.
pub struct Indexer<C> {
    chain: Arc<C>,
    store: EventStore,
    start_block: u64,
    max_resubscribe: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    phase: watch::Sender<Phase>,
}

impl<C: ChainClient> Indexer<C> {
    pub fn new(chain: Arc<C>, store: EventStore, start_block: u64) -> Self {
        let (phase, _) = watch::channel(Phase::Backfilling);
        Self {
            chain,
            store,
            start_block,
            max_resubscribe: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(120),
            phase,
        }
    }

    pub fn with_max_resubscribe(mut self, attempts: u32) -> Self {
        self.max_resubscribe = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Backfill, then stay live until `shutdown` flips to `true`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), IndexerError> {
        let report = self.backfill().await?;
        info!(
            "Backfill done: blocks {} → {}, {} new, {} duplicates",
            report.from, report.to, report.inserted, report.duplicates
        );

        self.phase.send_replace(Phase::Live);
        info!("Indexer is live");
        self.live(report.to, shutdown).await
    }

    /// One pass over `[start_block, head]`. Stops at the first block without a timestamp;
    /// running it again is safe.
    pub async fn backfill(&self) -> Result<BackfillReport, IndexerError> {
        let snapshot_height = self.chain.current_height().await?;
        self.backfill_range(self.start_block, snapshot_height).await
    }

    async fn backfill_range(&self, from: u64, to: u64) -> Result<BackfillReport, IndexerError> {
        let mut report = BackfillReport { from, to, ..Default::default() };
        if from > to {
            info!("Backfill: start block {} is ahead of head {}, nothing to scan", from, to);
            return Ok(report);
        }

        info!("Backfill: scanning {} → {}", from, to);
        let logs = self.chain.historical_logs(TRANSFER_EVENT, from, to).await?;
        info!("Backfill: {} logs to process", logs.len());

        for log in logs {
            let block = log.block_number;
            let Some(timestamp) = self.chain.block_timestamp(block).await? else {
                error!(
                    "Block {} not found, aborting backfill after {} new events",
                    block, report.inserted
                );
                return Err(IndexerError::BlockNotFound(block));
            };

            match self.persist(log, timestamp).await? {
                InsertOutcome::Inserted => report.inserted += 1,
                InsertOutcome::AlreadyExists => report.duplicates += 1,
            }
        }

        Ok(report)
    }

    /// Consume the live subscription until shutdown.
    ///
    /// `last_block` is the highest block already covered. Each time a
    /// subscription opens, `[last_block, head]` is scanned first, so blocks
    /// produced before the stream picked up (during backfill or while
    /// disconnected) are not lost.
    pub async fn live(
        &self,
        mut last_block: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), IndexerError> {
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let dropped = 'session: {
                let subscribed = tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    res = self.chain.subscribe(TRANSFER_EVENT) => res,
                };
                let mut stream = match subscribed {
                    Ok(stream) => stream,
                    Err(e) if e.is_transient() => break 'session e,
                    Err(e) => return Err(e.into()),
                };

                match self.catch_up(last_block).await {
                    Ok(head) => {
                        last_block = last_block.max(head);
                        failures = 0;
                    }
                    Err(IndexerError::Chain(e)) if e.is_transient() => break 'session e,
                    Err(e) => return Err(e),
                }

                loop {
                    let item = tokio::select! {
                        _ = shutdown.changed() => {
                            info!("Shutdown requested, closing live subscription");
                            return Ok(());
                        }
                        item = stream.next() => item,
                    };

                    match item {
                        Some(Ok(log)) => {
                            last_block = last_block.max(log.block_number);
                            self.ingest_live(log).await?;
                        }
                        Some(Err(ChainError::MalformedLog(reason))) => {
                            warn!("Skipping malformed live log: {}", reason);
                        }
                        Some(Err(e)) if e.is_transient() => break 'session e,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(IndexerError::SubscriptionClosed),
                    }
                }
            };

            if failures >= self.max_resubscribe {
                return Err(dropped.into());
            }
            failures += 1;
            warn!(
                "Live subscription lost ({}), resubscribing (attempt {}/{})",
                dropped, failures, self.max_resubscribe
            );
            if self.pause(failures, &mut shutdown).await {
                return Ok(());
            }
        }
    }

    /// Scan `[last_block, head]` with live rules: unresolved or invalid events are
    /// skipped. Returns the head that was covered.
    async fn catch_up(&self, last_block: u64) -> Result<u64, IndexerError> {
        let head = self.chain.current_height().await?;
        let from = last_block.max(self.start_block);
        if from > head {
            return Ok(last_block);
        }

        let logs = self.chain.historical_logs(TRANSFER_EVENT, from, head).await?;
        let found = logs.len();
        for log in logs {
            self.ingest_live(log).await?;
        }
        info!("Caught up {} → {} ({} logs)", from, head, found);
        Ok(head)
    }

    /// A live event that can't be resolved or built is skipped; storage failures are not.
    async fn ingest_live(&self, log: RawLog) -> Result<(), IndexerError> {
        let block = log.block_number;
        let timestamp = match self.chain.block_timestamp(block).await {
            Ok(Some(ts)) => ts,
            Ok(None) => {
                warn!("Block {} not found, skipping live event {}", block, log.tx_hash);
                return Ok(());
            }
            Err(e) => {
                warn!("Timestamp for block {} failed ({}), skipping live event {}", block, e, log.tx_hash);
                return Ok(());
            }
        };

        match self.persist(log, timestamp).await {
            Ok(_) => Ok(()),
            Err(IndexerError::InvalidEvent { tx_hash, source }) => {
                warn!("Skipping invalid live event {}: {}", tx_hash, source);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, log: RawLog, timestamp: u64) -> Result<InsertOutcome, IndexerError> {
        let tx_hash = log.tx_hash.clone();
        let event = TransferEvent::from_raw(log, timestamp)
            .map_err(|source| IndexerError::InvalidEvent { tx_hash: tx_hash.clone(), source })?;
        let block = event.block_number();
        let amount = event.amount().to_string();

        let outcome = self.store.insert(event).await?;
        match outcome {
            InsertOutcome::Inserted => info!("Indexed {} (block {}, amount {})", tx_hash, block, amount),
            InsertOutcome::AlreadyExists => debug!("Already indexed {}", tx_hash),
        }
        Ok(outcome)
    }

    /// Exponential backoff; true if shutdown arrived while waiting.
    async fn pause(&self, attempt: u32, shutdown: &mut watch::Receiver<bool>) -> bool {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_backoff.saturating_mul(factor).min(self.max_backoff);
        tokio::select! {
            _ = shutdown.changed() => true,
            _ = sleep(delay) => false,
        }
    }
}
