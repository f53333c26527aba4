//! Document store adapter.
//!
//! Resources and tag counters are JSON documents grouped into named
//! collections. The trait exposes the primitives the catalog needs: point
//! reads and writes, filtered range queries, and a conditional `commit` that
//! [`run_transaction`] turns into an optimistic read-modify-write loop.

mod memory;

pub use memory::MemoryDocumentStore;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::TX_CONFLICTS;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("write conflict")]
    Conflict,

    #[error("transaction gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("document not found")]
    NotFound,

    #[error("data conversion failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A stored document with its revision.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

impl Document {
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub enum Filter {
    Eq { field: String, value: Value },
    /// Matches when the array at `field` shares at least one element with `values`.
    ArrayContainsAny { field: String, values: Vec<Value> },
}

#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            offset: 0,
            limit: None,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains_any(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(Filter::ArrayContainsAny {
            field: field.into(),
            values,
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Write produced by one transaction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TxWrite {
    Set(Value),
    /// Replace a single top-level field of an existing document.
    Update { field: String, value: Value },
    Delete,
    /// Read-only attempt, nothing to commit.
    None,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert under a generated id and return it.
    async fn add(&self, collection: &str, data: Value) -> Result<String, StoreError>;

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    /// Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn query(&self, query: Query) -> Result<Vec<Document>, StoreError>;

    /// Apply `write` only if the document is still at `expected_version`
    /// (`None` meaning it must still be absent). Fails with
    /// [`StoreError::Conflict`] otherwise.
    async fn commit(
        &self,
        collection: &str,
        id: &str,
        expected_version: Option<u64>,
        write: TxWrite,
    ) -> Result<(), StoreError>;
}

/// Bounded retry policy for [`run_transaction`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
        }
    }
}

/// Bound a store call by a request deadline.
pub async fn with_deadline<T, F>(deadline: Instant, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout_at(deadline, call)
        .await
        .unwrap_or(Err(StoreError::DeadlineExceeded))
}

/// Optimistic read-modify-write of a single document.
///
/// `body` sees the current document and decides the write. It may run several
/// times, so it must be free of side effects. A commit rejected because a
/// concurrent writer got there first reruns `body` against the fresh state,
/// with exponential backoff, up to `policy.max_attempts` attempts.
pub async fn run_transaction<F, T>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    policy: RetryPolicy,
    mut body: F,
) -> Result<T, StoreError>
where
    F: FnMut(Option<&Document>) -> Result<(TxWrite, T), StoreError> + Send,
    T: Send,
{
    let mut attempt = 0u32;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;
        let current = store.get(collection, id).await?;
        let (write, output) = body(current.as_ref())?;

        if write == TxWrite::None {
            return Ok(output);
        }

        let expected = current.as_ref().map(|doc| doc.version);
        match store.commit(collection, id, expected, write).await {
            Ok(()) => return Ok(output),
            Err(StoreError::Conflict) => {
                TX_CONFLICTS.inc();
                if attempt >= policy.max_attempts {
                    return Err(StoreError::RetriesExhausted { attempts: attempt });
                }
                debug!(collection, id, attempt, "transaction conflict, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
}
