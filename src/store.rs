use rusqlite::Connection;
use std::{
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::task;

use crate::db;
use crate::error::StoreError;
use crate::models::{EventFilter, InsertOutcome, Page, Stats, TransferEvent};

type SharedConn = Arc<Mutex<Connection>>;

/// Shared handle to the transfer event table.
///
/// File stores keep one connection for inserts and one for reads; in WAL mode
/// a reader never waits on the indexer's writes. In-memory stores use a single
/// connection for both. Every call runs on the blocking pool.
#[derive(Clone)]
pub struct EventStore {
    writer: SharedConn,
    reader: SharedConn,
}

impl EventStore {
    /// Open (or create) a file-backed store and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let writer = db::connect(path)?;
        db::run_migrations(&writer)?;
        let reader = db::connect(path)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        db::run_migrations(&conn)?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self { writer: Arc::clone(&conn), reader: conn })
    }

    /// Duplicate tx hashes come back as `AlreadyExists`, not as an error.
    pub async fn insert(&self, event: TransferEvent) -> Result<InsertOutcome, StoreError> {
        with_conn(&self.writer, move |conn| db::insert_event(conn, &event)).await
    }

    pub async fn query(
        &self,
        filter: EventFilter,
        page: Page,
    ) -> Result<Vec<TransferEvent>, StoreError> {
        with_conn(&self.reader, move |conn| db::query_events(conn, &filter, page)).await
    }

    pub async fn stats(&self) -> Result<Stats, StoreError> {
        with_conn(&self.reader, db::event_stats).await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        with_conn(&self.reader, db::count_events).await
    }
}

async fn with_conn<T, F>(conn: &SharedConn, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
{
    let conn = Arc::clone(conn);
    task::spawn_blocking(move || {
        let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    })
    .await?
}
