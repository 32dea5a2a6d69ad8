use alloy::primitives::U512;
use rusqlite::{params, params_from_iter, types::Value, Connection, Row};
use std::path::Path;

use crate::error::StoreError;
use crate::models::{parse_amount, EventFilter, InsertOutcome, Page, Stats, TransferEvent};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_events (
  id           INTEGER PRIMARY KEY AUTOINCREMENT,
  sender       TEXT NOT NULL COLLATE NOCASE,
  recipient    TEXT NOT NULL COLLATE NOCASE,
  amount       TEXT NOT NULL, -- decimal integer stored as string
  tx_hash      TEXT NOT NULL UNIQUE,
  block_number INTEGER NOT NULL CHECK (block_number >= 0),
  timestamp    INTEGER NOT NULL CHECK (timestamp >= 0)
);

CREATE INDEX IF NOT EXISTS idx_transfer_events_block ON transfer_events (block_number);
CREATE INDEX IF NOT EXISTS idx_transfer_events_sender ON transfer_events (sender);
CREATE INDEX IF NOT EXISTS idx_transfer_events_recipient ON transfer_events (recipient);
"#;

const SELECT_COLUMNS: &str =
    "SELECT sender, recipient, amount, tx_hash, block_number, timestamp FROM transfer_events";

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &Path) -> Result<Connection, StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

/// Insert a transfer unless its tx hash is already stored.
pub fn insert_event(conn: &Connection, event: &TransferEvent) -> Result<InsertOutcome, StoreError> {
    let changed = conn.execute(
        r#"
        INSERT INTO transfer_events (
            sender, recipient, amount, tx_hash, block_number, timestamp
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(tx_hash) DO NOTHING
        "#,
        params![
            event.sender(),
            event.recipient(),
            event.amount(),
            event.tx_hash(),
            to_sql_int(event.block_number())?,
            to_sql_int(event.timestamp())?,
        ],
    )?;

    Ok(if changed == 0 {
        InsertOutcome::AlreadyExists
    } else {
        InsertOutcome::Inserted
    })
}

/// Filtered page of events, newest block first.
pub fn query_events(
    conn: &Connection,
    filter: &EventFilter,
    page: Page,
) -> Result<Vec<TransferEvent>, StoreError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(sender) = &filter.sender {
        clauses.push("sender = ?");
        values.push(Value::Text(sender.clone()));
    }
    if let Some(recipient) = &filter.recipient {
        clauses.push("recipient = ?");
        values.push(Value::Text(recipient.clone()));
    }
    if let Some(start) = filter.start_block {
        clauses.push("block_number >= ?");
        values.push(Value::Integer(to_sql_int(start)?));
    }
    if let Some(end) = filter.end_block {
        clauses.push("block_number <= ?");
        values.push(Value::Integer(to_sql_int(end)?));
    }

    let mut sql = String::from(SELECT_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY block_number DESC, id ASC LIMIT ? OFFSET ?");
    values.push(Value::Integer(i64::from(page.size)));
    values.push(Value::Integer(to_sql_int(page.offset())?));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), read_row)?;

    let events = rows
        .map(|row| into_event(row?))
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(events)
}

pub fn count_events(conn: &Connection) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM transfer_events", [], |r| r.get(0))?;
    from_sql_int(count, "count")
}

/// Row count plus the exact sum of every amount.
///
/// SQLite's SUM works on 64-bit integers, so amounts are summed here instead.
pub fn event_stats(conn: &Connection) -> Result<Stats, StoreError> {
    let mut stmt = conn.prepare("SELECT amount FROM transfer_events")?;
    let mut rows = stmt.query([])?;

    let mut total_events = 0u64;
    let mut total_value = U512::ZERO;
    while let Some(row) = rows.next()? {
        let amount: String = row.get(0)?;
        let value = parse_amount(&amount).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        total_value += U512::from(value);
        total_events += 1;
    }

    Ok(Stats { total_events, total_value })
}

struct StoredRow {
    sender: String,
    recipient: String,
    amount: String,
    tx_hash: String,
    block_number: i64,
    timestamp: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        sender: row.get(0)?,
        recipient: row.get(1)?,
        amount: row.get(2)?,
        tx_hash: row.get(3)?,
        block_number: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

fn into_event(row: StoredRow) -> Result<TransferEvent, StoreError> {
    TransferEvent::new(
        row.sender,
        row.recipient,
        &row.amount,
        row.tx_hash,
        from_sql_int(row.block_number, "block_number")?,
        from_sql_int(row.timestamp, "timestamp")?,
    )
    .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn to_sql_int(v: u64) -> Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::Corrupt(format!("{v} exceeds sqlite integer range")))
}

fn from_sql_int(v: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative {column}: {v}")))
}
