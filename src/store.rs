//! Main Datastore struct tying all components together.

use crate::error::{QueryError, Result, SyntaxError};
use crate::mutation;
use crate::query::{self, Evaluator, IndexQuery};
use crate::records::RecordStore;
use crate::subscriptions::{
    ChannelSubscription, MatchDiff, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
use crate::types::{Delta, MatchSet, Operation, Record, RecordId, RecordType};
use lru::LruCache;
use parking_lot::{
    Mutex, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Datastore configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Fields that get a sorted value index for range and equality
    /// comparisons. Other fields are still answered by scanning.
    pub indexed_fields: Vec<String>,

    /// Longest parent chain or subtree depth a traversal follows before
    /// reporting a structural fault.
    pub max_traversal_depth: usize,

    /// Parsed query cache size (number of query strings).
    pub query_cache_size: usize,

    /// Pending batches an [`IngestQueue`](crate::pipeline::IngestQueue)
    /// accepts before submitters block.
    pub ingest_queue_capacity: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            indexed_fields: Vec::new(),
            max_traversal_depth: 256,
            query_cache_size: 256,
            ingest_queue_capacity: 64,
        }
    }
}

/// The in-memory document index.
///
/// Provides a unified interface for:
/// - Applying mutation batches atomically
/// - One-shot queries against a consistent snapshot
/// - Live queries that receive result diffs after every batch
///
/// Writers are serialized; readers run concurrently with each other and
/// observe either the state before a batch or the state after it.
pub struct Datastore {
    config: DatastoreConfig,

    /// Committed records and their indices.
    state: RwLock<RecordStore>,

    /// Subscription manager for live queries.
    subscriptions: Arc<SubscriptionManager>,

    /// Parsed queries keyed by their text.
    query_cache: Mutex<LruCache<String, Arc<IndexQuery>>>,

    /// Serializes batches and subscription registration.
    write_lock: Mutex<()>,
}

impl Datastore {
    /// Create an empty datastore.
    pub fn new(config: DatastoreConfig) -> Self {
        let cache_size =
            NonZeroUsize::new(config.query_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: RwLock::new(RecordStore::new(&config.indexed_fields)),
            subscriptions: Arc::new(SubscriptionManager::new()),
            query_cache: Mutex::new(LruCache::new(cache_size)),
            write_lock: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    // --- Queries ---

    /// Parse `text`, reusing a cached tree for text seen before.
    pub fn prepare(&self, text: &str) -> std::result::Result<Arc<IndexQuery>, SyntaxError> {
        if let Some(cached) = self.query_cache.lock().get(text) {
            return Ok(Arc::clone(cached));
        }
        let parsed = Arc::new(query::parse(text)?);
        self.query_cache
            .lock()
            .put(text.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Evaluate a query once against the current state.
    pub fn query(&self, text: &str) -> std::result::Result<MatchSet, QueryError> {
        let parsed = self.prepare(text)?;
        self.query_ast(&parsed)
    }

    /// Evaluate an already parsed query.
    pub fn query_ast(&self, query: &IndexQuery) -> std::result::Result<MatchSet, QueryError> {
        let state = self.state.read();
        Evaluator::new(&state, self.config.max_traversal_depth).evaluate(query)
    }

    /// Planned evaluation order of a query, one line per step.
    pub fn explain(&self, text: &str) -> std::result::Result<Vec<String>, QueryError> {
        let parsed = self.prepare(text)?;
        let state = self.state.read();
        Ok(query::explain(&parsed, state.index()))
    }

    /// Hold a read view of the current state.
    ///
    /// Writers wait until the snapshot is dropped, so do not ingest on the
    /// same thread while holding one.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            state: self.state.read(),
            max_depth: self.config.max_traversal_depth,
        }
    }

    pub fn get(&self, id: RecordId) -> Option<Arc<Record>> {
        self.state.read().get(id).cloned()
    }

    /// Direct children of `id` in document order.
    pub fn children(&self, id: RecordId) -> Vec<RecordId> {
        self.state.read().children(id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    // --- Subscriptions ---

    /// Register a live query.
    ///
    /// The handle carries the result at registration time; `on_diff` is
    /// called after every later batch that changes it. Callbacks run after
    /// the datastore's locks are released and may query, ingest or
    /// unsubscribe. They may run on whichever thread is delivering, so
    /// `ingest` returning does not mean its callbacks have already run.
    pub fn subscribe<F>(
        &self,
        text: &str,
        on_diff: F,
    ) -> std::result::Result<SubscriptionHandle, QueryError>
    where
        F: Fn(&MatchDiff) + Send + Sync + 'static,
    {
        let parsed = self.prepare(text)?;
        let _writer = self.write_lock.lock();
        let initial = self.evaluate_locked(&parsed)?;
        Ok(self
            .subscriptions
            .subscribe(parsed, initial, Box::new(on_diff)))
    }

    /// Register a live query whose diffs arrive over a bounded channel of
    /// `buffer_size` events. A subscriber that lets it fill up is dropped.
    pub fn subscribe_channel(
        &self,
        text: &str,
        buffer_size: usize,
    ) -> std::result::Result<ChannelSubscription, QueryError> {
        let parsed = self.prepare(text)?;
        let _writer = self.write_lock.lock();
        let initial = self.evaluate_locked(&parsed)?;
        Ok(self
            .subscriptions
            .subscribe_channel(parsed, initial, buffer_size))
    }

    /// Stop a subscription. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    fn evaluate_locked(&self, query: &IndexQuery) -> std::result::Result<MatchSet, QueryError> {
        let state = self.state.read();
        Evaluator::new(&state, self.config.max_traversal_depth).evaluate(query)
    }

    // --- Mutation ---

    /// Apply a batch atomically and notify affected subscriptions.
    ///
    /// A batch that violates an invariant is rejected whole and leaves the
    /// store unchanged. Re-ingesting identical content yields an empty
    /// delta and no notifications.
    pub fn ingest(&self, ops: impl IntoIterator<Item = Operation>) -> Result<Delta> {
        let result = self.commit(ops);
        self.subscriptions.deliver();
        result
    }

    fn commit(&self, ops: impl IntoIterator<Item = Operation>) -> Result<Delta> {
        let _writer = self.write_lock.lock();

        // Readers keep going while the batch is staged.
        let state = self.state.upgradable_read();
        let batch = mutation::stage(&state, ops)?;
        if batch.is_empty() {
            debug!("batch has no net effect");
            return Ok(Delta::default());
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        batch.commit(&mut state);
        let state = RwLockWriteGuard::downgrade(state);

        let delta = batch.delta();
        debug!(
            added = delta.added.len(),
            updated = delta.updated.len(),
            removed = delta.removed.len(),
            records = state.len(),
            "committed batch"
        );

        self.subscriptions
            .recompute(&Evaluator::new(&state, self.config.max_traversal_depth), &batch);
        Ok(delta)
    }
}

impl Default for Datastore {
    fn default() -> Self {
        Self::new(DatastoreConfig::default())
    }
}

/// A consistent read view of the datastore.
pub struct Snapshot<'a> {
    state: RwLockReadGuard<'a, RecordStore>,
    max_depth: usize,
}

impl Snapshot<'_> {
    pub fn get(&self, id: RecordId) -> Option<&Arc<Record>> {
        self.state.get(id)
    }

    pub fn children(&self, id: RecordId) -> Vec<RecordId> {
        self.state.children(id)
    }

    pub fn all_of_type(&self, record_type: RecordType) -> impl Iterator<Item = &Arc<Record>> + '_ {
        self.state.all_of_type(record_type)
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Evaluate a parsed query against this view.
    pub fn evaluate(&self, query: &IndexQuery) -> std::result::Result<MatchSet, QueryError> {
        Evaluator::new(&self.state, self.max_depth).evaluate(query)
    }

    /// Parse and evaluate `text` against this view.
    pub fn query(&self, text: &str) -> std::result::Result<MatchSet, QueryError> {
        self.evaluate(&query::parse(text)?)
    }

    /// The underlying store.
    pub fn store(&self) -> &RecordStore {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatastoreError, InvariantViolation, SyntaxErrorKind};
    use parking_lot::Mutex as PlMutex;

    fn seeded() -> Datastore {
        let store = Datastore::new(DatastoreConfig {
            indexed_fields: vec!["priority".into()],
            ..Default::default()
        });
        store
            .ingest(vec![
                Operation::Add(Record::page(RecordId(1), "a.md").with_tag("project")),
                Operation::Add(
                    Record::task(RecordId(2), RecordId(1), "a.md", "one", ' ')
                        .at_line(3)
                        .with_field("priority", 2),
                ),
                Operation::Add(Record::task(RecordId(3), RecordId(1), "a.md", "two", 'x').at_line(4)),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_create_datastore() {
        let store = Datastore::default();
        assert!(store.is_empty());
        assert_eq!(store.config().max_traversal_depth, 256);
        assert!(store.query("@page").unwrap().is_empty());
    }

    #[test]
    fn test_query_and_accessors() {
        let store = seeded();
        assert_eq!(store.len(), 3);
        assert_eq!(
            store.query("@task and priority >= 2").unwrap(),
            MatchSet::from([RecordId(2)])
        );
        assert_eq!(store.children(RecordId(1)), vec![RecordId(2), RecordId(3)]);
        assert_eq!(store.get(RecordId(3)).unwrap().title().as_deref(), Some("two"));
    }

    #[test]
    fn test_query_cache_shares_trees() {
        let store = seeded();
        let first = store.prepare("#project").unwrap();
        let second = store.prepare("#project").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_errors_are_values() {
        let store = seeded();
        match store.query("@page and") {
            Err(QueryError::Syntax(err)) => {
                assert_eq!(err.offset, 9);
                assert_eq!(err.kind, SyntaxErrorKind::UnexpectedEnd);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }

        let err = store
            .ingest(vec![Operation::Add(Record::task(RecordId(9), RecordId(42), "a.md", "x", ' '))])
            .unwrap_err();
        assert!(matches!(
            err,
            DatastoreError::Invariant(InvariantViolation::DanglingParent { .. })
        ));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_subscription_initial_and_diff() {
        let store = seeded();
        let diffs = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&diffs);
        let handle = store
            .subscribe("@task and !completed = true", move |diff| sink.lock().push(diff.clone()))
            .unwrap();
        assert_eq!(handle.initial(), &MatchSet::from([RecordId(2)]));

        store
            .ingest(vec![Operation::Update(
                Record::task(RecordId(2), RecordId(1), "a.md", "one", 'x')
                    .at_line(3)
                    .with_field("priority", 2),
            )])
            .unwrap();

        let diffs = diffs.lock();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].removed, MatchSet::from([RecordId(2)]));
    }

    #[test]
    fn test_snapshot_view() {
        let store = seeded();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.all_of_type(RecordType::Task).count(), 2);
        assert_eq!(snapshot.query("childof(#project)").unwrap().len(), 2);
        assert_eq!(snapshot.children(RecordId(1)).len(), 2);
    }

    #[test]
    fn test_explain() {
        let store = seeded();
        let plan = store.explain("childof(@page) and #project").unwrap();
        assert_eq!(plan[0], "and");
        assert_eq!(plan[1], "  [index] #project");
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: DatastoreConfig =
            serde_json::from_str(r#"{"indexed_fields": ["due", "priority"]}"#).unwrap();
        assert_eq!(config.indexed_fields, vec!["due", "priority"]);
        assert_eq!(config.max_traversal_depth, 256);
    }
}
