use serde::Deserialize;

use crate::error::QueryError;
use crate::models::{EventFilter, Page, Stats, TransferEvent};
use crate::store::EventStore;

pub const MAX_PAGE_SIZE: u32 = 100;

/// Raw `/events` parameters as they arrive; `None` means the caller left it out.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl EventQuery {
    /// Validate into a store filter and page. Invalid input is rejected, never widened.
    pub fn into_parts(self) -> Result<(EventFilter, Page), QueryError> {
        let page = Page {
            number: self.page.unwrap_or(1),
            size: self.page_size.unwrap_or(Page::DEFAULT_SIZE),
        };
        if page.number == 0 {
            return Err(QueryError::InvalidParams("page starts at 1".into()));
        }
        if page.size == 0 || page.size > MAX_PAGE_SIZE {
            return Err(QueryError::InvalidParams(format!(
                "pageSize must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if let (Some(start), Some(end)) = (self.start_block, self.end_block) {
            if start > end {
                return Err(QueryError::InvalidParams(
                    "startBlock is greater than endBlock".into(),
                ));
            }
        }

        let filter = EventFilter {
            sender: non_empty("from", self.from)?,
            recipient: non_empty("to", self.to)?,
            start_block: self.start_block,
            end_block: self.end_block,
        };
        Ok((filter, page))
    }
}

fn non_empty(name: &str, value: Option<String>) -> Result<Option<String>, QueryError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(QueryError::InvalidParams(format!("{name} is empty"))),
        other => Ok(other),
    }
}

/// Read side over the shared event store.
#[derive(Clone)]
pub struct QueryService {
    store: EventStore,
}

impl QueryService {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    pub async fn events(&self, query: EventQuery) -> Result<Vec<TransferEvent>, QueryError> {
        let (filter, page) = query.into_parts()?;
        Ok(self.store.query(filter, page).await?)
    }

    pub async fn stats(&self) -> Result<Stats, QueryError> {
        Ok(self.store.stats().await?)
    }
}
