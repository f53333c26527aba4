use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{Direction, Document, DocumentStore, Filter, Query, StoreError, TxWrite};

#[derive(Clone)]
struct StoredDoc {
    data: Value,
    version: u64,
    // revision at creation, breaks ties when ordering
    created_rev: u64,
}

/// In-process document store.
///
/// Every committed write bumps a global revision that doubles as the document
/// version, so a transaction's read version is stale as soon as anyone else
/// commits to the same document. Also carries fault switches used to exercise
/// the ledger's error paths.
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, StoredDoc>>>,
    revision: AtomicU64,
    failing_commits: AtomicU32,
    unavailable: AtomicBool,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            failing_commits: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
        }
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject the next `n` conditional commits with a conflict.
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Make every operation fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take_injected_conflict(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|stored| Document {
                id: id.to_string(),
                version: stored.version,
                data: stored.data.clone(),
            }))
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        self.check_available()?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut collections = self.collections.write().await;
        let rev = self.next_revision();
        collections.entry(collection.to_string()).or_default().insert(
            id.clone(),
            StoredDoc {
                data,
                version: rev,
                created_rev: rev,
            },
        );
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let rev = self.next_revision();
        let docs = collections.entry(collection.to_string()).or_default();
        let created_rev = docs.get(id).map_or(rev, |d| d.created_rev);
        docs.insert(
            id.to_string(),
            StoredDoc {
                data,
                version: rev,
                created_rev,
            },
        );
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn query(&self, query: Query) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(&String, &StoredDoc)> = docs
            .iter()
            .filter(|(_, doc)| query.filters.iter().all(|f| matches_filter(&doc.data, f)))
            .collect();

        if let Some((field, direction)) = &query.order_by {
            matched.sort_by(|(_, a), (_, b)| {
                let ord = compare_values(a.data.get(field), b.data.get(field))
                    .then(a.created_rev.cmp(&b.created_rev));
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .map(|(id, doc)| Document {
                id: id.clone(),
                version: doc.version,
                data: doc.data.clone(),
            })
            .collect())
    }

    async fn commit(
        &self,
        collection: &str,
        id: &str,
        expected_version: Option<u64>,
        write: TxWrite,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict);
        }

        let docs = collections.entry(collection.to_string()).or_default();
        let current = docs.get(id).map(|d| d.version);
        if current != expected_version {
            return Err(StoreError::Conflict);
        }

        let rev = self.next_revision();
        match write {
            TxWrite::Set(data) => {
                let created_rev = docs.get(id).map_or(rev, |d| d.created_rev);
                docs.insert(
                    id.to_string(),
                    StoredDoc {
                        data,
                        version: rev,
                        created_rev,
                    },
                );
            }
            TxWrite::Update { field, value } => {
                let doc = docs.get_mut(id).ok_or(StoreError::NotFound)?;
                match doc.data.as_object_mut() {
                    Some(object) => {
                        object.insert(field, value);
                    }
                    None => return Err(StoreError::NotFound),
                }
                doc.version = rev;
            }
            TxWrite::Delete => {
                docs.remove(id);
            }
            TxWrite::None => {}
        }
        Ok(())
    }
}

fn matches_filter(data: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { field, value } => data.get(field) == Some(value),
        Filter::ArrayContainsAny { field, values } => data
            .get(field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|item| values.contains(item))),
    }
}

// Missing fields sort first. Strings that both parse as RFC 3339 compare as
// instants, since serialized fractional seconds vary in width.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = MemoryDocumentStore::new();
        store.set("c", "a", json!({ "n": 1 })).await.unwrap();
        let read = store.get("c", "a").await.unwrap().unwrap();

        store.set("c", "a", json!({ "n": 2 })).await.unwrap();
        let err = store
            .commit("c", "a", Some(read.version), TxWrite::Set(json!({ "n": 3 })))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn create_requires_absence() {
        let store = MemoryDocumentStore::new();
        store.set("c", "a", json!({})).await.unwrap();

        let err = store
            .commit("c", "a", None, TxWrite::Set(json!({ "n": 1 })))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn update_replaces_one_field() {
        let store = MemoryDocumentStore::new();
        store.set("c", "a", json!({ "name": "go", "usageCount": 1 })).await.unwrap();
        let read = store.get("c", "a").await.unwrap().unwrap();

        store
            .commit(
                "c",
                "a",
                Some(read.version),
                TxWrite::Update {
                    field: "usageCount".to_string(),
                    value: json!(4),
                },
            )
            .await
            .unwrap();

        let doc = store.get("c", "a").await.unwrap().unwrap();
        assert_eq!(doc.data, json!({ "name": "go", "usageCount": 4 }));
        assert!(doc.version > read.version);
    }

    #[tokio::test]
    async fn query_filters_orders_and_slices() {
        let store = MemoryDocumentStore::new();
        for (i, kind) in ["video", "pdf", "video", "video"].iter().enumerate() {
            let tags = if i == 1 { json!(["web"]) } else { json!(["go"]) };
            store
                .add("r", json!({ "type": kind, "rank": i, "tags": tags }))
                .await
                .unwrap();
        }

        let videos = store
            .query(
                Query::new("r")
                    .where_eq("type", "video")
                    .order_by("rank", Direction::Desc)
                    .offset(1)
                    .limit(5),
            )
            .await
            .unwrap();
        let ranks: Vec<_> = videos.iter().map(|d| d.data["rank"].clone()).collect();
        assert_eq!(ranks, vec![json!(2), json!(0)]);

        let tagged = store
            .query(Query::new("r").where_array_contains_any("tags", vec![json!("web"), json!("rust")]))
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].data["rank"], json!(1));
    }

    #[tokio::test]
    async fn timestamps_order_chronologically() {
        let store = MemoryDocumentStore::new();
        store.set("r", "first", json!({ "at": "2024-01-01T00:00:00.5Z" })).await.unwrap();
        store.set("r", "second", json!({ "at": "2024-01-01T00:00:00.50001Z" })).await.unwrap();

        let docs = store
            .query(Query::new("r").order_by("at", Direction::Asc))
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn unavailable_store_fails_everything() {
        let store = MemoryDocumentStore::new();
        store.set_unavailable(true);

        assert!(matches!(store.get("c", "a").await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.query(Query::new("c")).await, Err(StoreError::Unavailable(_))));

        store.set_unavailable(false);
        assert!(store.get("c", "a").await.unwrap().is_none());
    }
}
