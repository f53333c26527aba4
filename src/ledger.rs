//! Tag usage ledger.
//!
//! One counter document per tag, per tenant, in `<tenant>_tags`. Counters are
//! derived data: the `tags` field of live resources is the source of truth,
//! and [`TagLedger::rebuild`] recomputes everything from it. That is what
//! makes it acceptable for [`TagLedger::apply`] to log and drop a failed
//! update instead of failing the resource mutation that caused it.
//!
//! Each tag is its own optimistic transaction. There is no atomicity across
//! tags and no in-process locking; contention is resolved by the store.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics::LEDGER_UPDATES;
use crate::models::{ResourceRecord, TagCounter};
use crate::store::{
    Direction, DocumentStore, Query, RetryPolicy, StoreError, TxWrite, run_transaction, with_deadline,
};
use crate::tags::normalize_tags;

pub fn resources_collection(tenant: &str) -> String {
    format!("{tenant}_resources")
}

pub fn tags_collection(tenant: &str) -> String {
    format!("{tenant}_tags")
}

/// What one transaction attempt does to a counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterChange {
    Create(TagCounter),
    Update(u64),
    Delete,
    Unchanged,
}

/// Next state of the counter for `tag` given its current state.
///
/// Counts clamp at zero and zero means the document goes away. A decrement of
/// a counter that does not exist leaves it absent.
pub fn plan_counter_change(tag: &str, existing: Option<&TagCounter>, delta: i64) -> CounterChange {
    match existing {
        None if delta > 0 => CounterChange::Create(TagCounter {
            name: tag.to_string(),
            usage_count: delta as u64,
        }),
        None => CounterChange::Unchanged,
        Some(counter) => {
            let next = (counter.usage_count as i64).saturating_add(delta).max(0) as u64;
            if next == 0 {
                CounterChange::Delete
            } else if next == counter.usage_count {
                CounterChange::Unchanged
            } else {
                CounterChange::Update(next)
            }
        }
    }
}

/// Result of a ledger update. Failures are already logged; callers only look
/// at this to report or test, never to fail the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Applied,
    Dropped { failed: Vec<String> },
}

impl LedgerOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, LedgerOutcome::Applied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RebuildReport {
    pub counted: usize,
    pub removed: usize,
}

#[derive(Clone)]
pub struct TagLedger {
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
}

impl TagLedger {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Add `delta` to the counter of every tag in `tags`, giving up on any tag
    /// whose transaction has not committed by `deadline`.
    ///
    /// `tags` is treated as a set: it is normalized first, so each distinct tag
    /// moves by `delta` exactly once.
    pub async fn apply(&self, tenant: &str, tags: &[String], delta: i64, deadline: Instant) -> LedgerOutcome {
        let collection = tags_collection(tenant);
        let mut failed = Vec::new();

        for tag in normalize_tags(tags) {
            match with_deadline(deadline, self.apply_one(&collection, &tag, delta)).await {
                Ok(change) => {
                    LEDGER_UPDATES.with_label_values(&["ok"]).inc();
                    debug!(tenant, tag = %tag, delta, ?change, "tag usage updated");
                }
                Err(e) => {
                    LEDGER_UPDATES.with_label_values(&["dropped"]).inc();
                    warn!(tenant, tag = %tag, delta, error = %e, "failed to update tag usage");
                    failed.push(tag);
                }
            }
        }

        if failed.is_empty() {
            LedgerOutcome::Applied
        } else {
            LedgerOutcome::Dropped { failed }
        }
    }

    /// Composite update for a resource whose tag set changed.
    pub async fn replace(&self, tenant: &str, old: &[String], new: &[String], deadline: Instant) -> LedgerOutcome {
        let removed = self.apply(tenant, old, -1, deadline).await;
        let added = self.apply(tenant, new, 1, deadline).await;
        match (removed, added) {
            (LedgerOutcome::Applied, LedgerOutcome::Applied) => LedgerOutcome::Applied,
            (a, b) => {
                let mut failed = Vec::new();
                for outcome in [a, b] {
                    if let LedgerOutcome::Dropped { failed: tags } = outcome {
                        failed.extend(tags);
                    }
                }
                LedgerOutcome::Dropped { failed }
            }
        }
    }

    async fn apply_one(&self, collection: &str, tag: &str, delta: i64) -> Result<CounterChange, StoreError> {
        run_transaction(self.store.as_ref(), collection, tag, self.policy, |doc| {
            let existing = doc.map(|d| d.decode::<TagCounter>()).transpose()?;
            let change = plan_counter_change(tag, existing.as_ref(), delta);
            let write = match &change {
                CounterChange::Create(counter) => TxWrite::Set(serde_json::to_value(counter)?),
                CounterChange::Update(count) => TxWrite::Update {
                    field: "usageCount".to_string(),
                    value: json!(count),
                },
                CounterChange::Delete => TxWrite::Delete,
                CounterChange::Unchanged => TxWrite::None,
            };
            Ok((write, change))
        })
        .await
    }

    /// All counters of a tenant, most used first.
    pub async fn list(&self, tenant: &str) -> Result<Vec<TagCounter>, StoreError> {
        let query = Query::new(tags_collection(tenant)).order_by("usageCount", Direction::Desc);
        let docs = self.store.query(query).await?;

        let mut counters = Vec::with_capacity(docs.len());
        for doc in docs {
            match doc.decode::<TagCounter>() {
                Ok(counter) => counters.push(counter),
                Err(e) => warn!(tenant, id = %doc.id, error = %e, "skipping undecodable tag counter"),
            }
        }
        Ok(counters)
    }

    /// Recount every tag from the live resources of `tenant`.
    ///
    /// Not atomic with respect to concurrent resource mutations; run it when
    /// the tenant is quiet.
    pub async fn rebuild(&self, tenant: &str) -> Result<RebuildReport, StoreError> {
        let resources = self.store.query(Query::new(resources_collection(tenant))).await?;

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for doc in &resources {
            match doc.decode::<ResourceRecord>() {
                Ok(record) => {
                    for tag in record.tags.into_iter().filter(|t| !t.is_empty()) {
                        *counts.entry(tag).or_default() += 1;
                    }
                }
                Err(e) => warn!(tenant, id = %doc.id, error = %e, "skipping undecodable resource"),
            }
        }

        let collection = tags_collection(tenant);
        let existing = self.store.query(Query::new(collection.clone())).await?;

        let mut report = RebuildReport::default();
        for doc in existing {
            if !counts.contains_key(&doc.id) && self.store.delete(&collection, &doc.id).await? {
                report.removed += 1;
            }
        }
        for (name, usage_count) in counts {
            let body: Value = serde_json::to_value(TagCounter {
                name: name.clone(),
                usage_count,
            })?;
            self.store.set(&collection, &name, body).await?;
            report.counted += 1;
        }

        info!(tenant, counted = report.counted, removed = report.removed, "tag counters rebuilt");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;
    use std::time::Duration;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn ledger(store: &Arc<MemoryDocumentStore>) -> TagLedger {
        let policy = RetryPolicy {
            max_attempts: 50,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        };
        TagLedger::new(store.clone(), policy)
    }

    async fn count(store: &MemoryDocumentStore, tenant: &str, tag: &str) -> Option<u64> {
        store
            .get(&tags_collection(tenant), tag)
            .await
            .unwrap()
            .map(|doc| doc.decode::<TagCounter>().unwrap().usage_count)
    }

    #[test]
    fn plan_covers_every_transition() {
        let at = |n| TagCounter {
            name: "go".to_string(),
            usage_count: n,
        };

        assert_eq!(plan_counter_change("go", None, 1), CounterChange::Create(at(1)));
        assert_eq!(plan_counter_change("go", None, -1), CounterChange::Unchanged);
        assert_eq!(plan_counter_change("go", Some(&at(2)), 1), CounterChange::Update(3));
        assert_eq!(plan_counter_change("go", Some(&at(2)), -1), CounterChange::Update(1));
        assert_eq!(plan_counter_change("go", Some(&at(1)), -1), CounterChange::Delete);
        assert_eq!(plan_counter_change("go", Some(&at(1)), -5), CounterChange::Delete);
    }

    #[tokio::test]
    async fn zero_crossing_deletes_then_recreates_at_one() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);

        ledger.apply("t1", &tags(&["go"]), 1, far_deadline()).await;
        assert_eq!(count(&store, "t1", "go").await, Some(1));

        ledger.apply("t1", &tags(&["go"]), -1, far_deadline()).await;
        assert_eq!(count(&store, "t1", "go").await, None);

        ledger.apply("t1", &tags(&["go"]), 1, far_deadline()).await;
        assert_eq!(count(&store, "t1", "go").await, Some(1));
    }

    #[tokio::test]
    async fn decrementing_unknown_tag_creates_nothing() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);

        let outcome = ledger.apply("t1", &tags(&["ghost", ""]), -1, far_deadline()).await;

        assert!(outcome.is_applied());
        assert!(ledger.list("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_applies_all_land() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);

        let set = tags(&["go", "web"]);
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let ledger = ledger.clone();
                let set = set.clone();
                tokio::spawn(async move { ledger.apply("t1", &set, 1, far_deadline()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_applied());
        }

        assert_eq!(count(&store, "t1", "go").await, Some(3));
        assert_eq!(count(&store, "t1", "web").await, Some(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_increments_and_decrements_never_go_negative() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);
        ledger.apply("t1", &tags(&["go"]), 1, far_deadline()).await;

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let ledger = ledger.clone();
                let delta = if i % 2 == 0 { -1 } else { 1 };
                tokio::spawn(async move { ledger.apply("t1", &tags(&["go"]), delta, far_deadline()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_applied());
        }

        // a zero count must have been deleted, never stored
        let raw = store.get(&tags_collection("t1"), "go").await.unwrap();
        if let Some(doc) = raw {
            assert!(doc.data["usageCount"].as_u64().unwrap() >= 1);
        }
        // clamping can only push the count up, and never past 1 + 10 increments
        assert!(count(&store, "t1", "go").await.unwrap_or(0) <= 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn paired_increments_and_decrements_cancel_out() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);
        ledger.apply("t1", &tags(&["go"]), 5, far_deadline()).await;

        // each task adds then removes, so the count never drops below 5
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    assert!(ledger.apply("t1", &tags(&["go"]), 1, far_deadline()).await.is_applied());
                    assert!(ledger.apply("t1", &tags(&["go"]), -1, far_deadline()).await.is_applied());
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(count(&store, "t1", "go").await, Some(5));
    }

    #[tokio::test]
    async fn duplicate_and_unnormalized_tags_count_once() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);

        ledger
            .apply("t1", &tags(&["go", "go", " Go ", "web"]), 1, far_deadline())
            .await;

        assert_eq!(count(&store, "t1", "go").await, Some(1));
        assert_eq!(count(&store, "t1", "web").await, Some(1));
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);

        ledger.apply("ecomm", &tags(&["go"]), 1, far_deadline()).await;

        assert_eq!(count(&store, "ecomm", "go").await, Some(1));
        assert_eq!(count(&store, "crm", "go").await, None);
    }

    #[tokio::test]
    async fn exhausted_retries_drop_only_that_tag() {
        let store = MemoryDocumentStore::new();
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let ledger = TagLedger::new(store.clone(), policy);
        // both attempts for "go" conflict, "web" commits on its first try
        store.fail_next_commits(2);

        let outcome = ledger.apply("t1", &tags(&["go", "web"]), 1, far_deadline()).await;

        assert_eq!(
            outcome,
            LedgerOutcome::Dropped {
                failed: tags(&["go"])
            }
        );
        assert_eq!(count(&store, "t1", "go").await, None);
        assert_eq!(count(&store, "t1", "web").await, Some(1));
    }

    #[tokio::test]
    async fn unavailable_store_is_dropped_not_raised() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);
        store.set_unavailable(true);

        let outcome = ledger.apply("t1", &tags(&["go", "web"]), 1, far_deadline()).await;

        assert_eq!(
            outcome,
            LedgerOutcome::Dropped {
                failed: tags(&["go", "web"])
            }
        );
    }

    #[tokio::test]
    async fn past_deadline_drops_updates() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);
        // every attempt conflicts, so only the deadline ends the retries
        store.fail_next_commits(u32::MAX);

        let deadline = Instant::now() + Duration::from_millis(20);
        let outcome = ledger.apply("t1", &tags(&["go"]), 1, deadline).await;

        assert!(!outcome.is_applied());
        store.fail_next_commits(0);
        assert_eq!(count(&store, "t1", "go").await, None);
    }

    #[tokio::test]
    async fn replace_moves_counts_between_tag_sets() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);
        ledger.apply("t1", &tags(&["go", "web"]), 1, far_deadline()).await;

        let outcome = ledger
            .replace("t1", &tags(&["go", "web"]), &tags(&["web", "rust"]), far_deadline())
            .await;

        assert!(outcome.is_applied());
        assert_eq!(count(&store, "t1", "go").await, None);
        assert_eq!(count(&store, "t1", "web").await, Some(1));
        assert_eq!(count(&store, "t1", "rust").await, Some(1));
    }

    #[tokio::test]
    async fn list_orders_by_usage() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);
        ledger.apply("t1", &tags(&["a", "b", "c"]), 1, far_deadline()).await;
        ledger.apply("t1", &tags(&["b", "c"]), 1, far_deadline()).await;
        ledger.apply("t1", &tags(&["c"]), 1, far_deadline()).await;

        let names: Vec<_> = ledger.list("t1").await.unwrap().into_iter().map(|c| c.name).collect();

        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn rebuild_matches_live_resources() {
        let store = MemoryDocumentStore::new();
        let ledger = ledger(&store);
        let now = chrono::Utc::now();
        for set in [vec!["go", "web"], vec!["go"], vec![]] {
            let record = ResourceRecord {
                title: "t".to_string(),
                description: "d".to_string(),
                resource_type: crate::models::ResourceType::Article,
                url: "https://example.com".to_string(),
                thumbnail_url: None,
                tags: tags(&set),
                created_at: now,
                updated_at: now,
            };
            store
                .add(&resources_collection("t1"), serde_json::to_value(record).unwrap())
                .await
                .unwrap();
        }
        // drifted state: stale tag and a wrong count
        ledger.apply("t1", &tags(&["stale", "go"]), 1, far_deadline()).await;

        let report = ledger.rebuild("t1").await.unwrap();

        assert_eq!(report, RebuildReport { counted: 2, removed: 1 });
        assert_eq!(count(&store, "t1", "go").await, Some(2));
        assert_eq!(count(&store, "t1", "web").await, Some(1));
        assert_eq!(count(&store, "t1", "stale").await, None);
    }
}
