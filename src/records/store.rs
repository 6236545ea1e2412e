//! Primary store: the arena that owns every record.

use super::index::SecondaryIndex;
use crate::types::{IdSet, Record, RecordId, RecordType};
use std::collections::HashMap;
use std::sync::Arc;

/// Mapping from record id to record, kept in step with its secondary
/// indices.
///
/// Records reference each other by id only. The store is mutated solely by
/// the mutation pipeline while it holds the datastore's write lock.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: HashMap<RecordId, Arc<Record>>,
    index: SecondaryIndex,
}

impl RecordStore {
    /// Create an empty store keeping sorted values for `indexed_fields`.
    pub fn new<I, S>(indexed_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            records: HashMap::new(),
            index: SecondaryIndex::new(indexed_fields),
        }
    }

    /// Insert or replace a record, returning the previous version.
    ///
    /// Every index entry of the previous version is removed before the new
    /// version is indexed.
    pub fn upsert(&mut self, record: Record) -> Option<Arc<Record>> {
        self.upsert_shared(Arc::new(record))
    }

    pub(crate) fn upsert_shared(&mut self, record: Arc<Record>) -> Option<Arc<Record>> {
        let previous = self.records.insert(record.id, Arc::clone(&record));
        if let Some(old) = &previous {
            self.index.remove(old);
        }
        self.index.insert(&record);
        previous
    }

    /// Remove a record together with all of its descendants.
    ///
    /// Descendants are removed before their ancestors. Returns every removed
    /// record; empty when `id` is unknown.
    pub fn remove(&mut self, id: RecordId) -> Vec<Arc<Record>> {
        if !self.records.contains_key(&id) {
            return Vec::new();
        }
        let mut doomed = self.descendants(id);
        doomed.reverse();
        doomed.push(id);
        doomed
            .into_iter()
            .filter_map(|doomed_id| self.remove_one(doomed_id))
            .collect()
    }

    /// Remove exactly one record, leaving its children in place.
    pub(crate) fn remove_one(&mut self, id: RecordId) -> Option<Arc<Record>> {
        let removed = self.records.remove(&id)?;
        self.index.remove(&removed);
        Some(removed)
    }

    pub fn get(&self, id: RecordId) -> Option<&Arc<Record>> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records of one type.
    pub fn all_of_type(&self, record_type: RecordType) -> impl Iterator<Item = &Arc<Record>> + '_ {
        self.index
            .ids_of_type(record_type)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.records.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> + '_ {
        self.records.values()
    }

    /// Every id in the store.
    pub fn ids(&self) -> IdSet {
        self.records.keys().copied().collect()
    }

    /// Direct children of `id` in document order.
    pub fn children(&self, id: RecordId) -> Vec<RecordId> {
        self.index.children(id).collect()
    }

    /// All descendants of `id` in pre-order (document order within each
    /// level). A record met twice is skipped.
    pub fn descendants(&self, id: RecordId) -> Vec<RecordId> {
        let mut out = Vec::new();
        let mut seen = IdSet::new();
        let mut stack: Vec<RecordId> = self.index.children(id).collect();
        stack.reverse();
        while let Some(next) = stack.pop() {
            if next == id || !seen.insert(next) {
                continue;
            }
            out.push(next);
            let mut kids: Vec<RecordId> = self.index.children(next).collect();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// The File or Page at the top of `id`'s parent chain.
    pub fn owning_file(&self, id: RecordId) -> Option<RecordId> {
        let mut current = self.records.get(&id)?;
        let mut steps = 0;
        while let Some(parent) = current.parent {
            steps += 1;
            if steps > self.records.len() {
                return None;
            }
            current = self.records.get(&parent)?;
        }
        Some(current.id)
    }

    pub fn index(&self) -> &SecondaryIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RecordStore {
        let mut store = RecordStore::default();
        store.upsert(Record::page(RecordId(1), "a.md").with_tag("project"));
        store.upsert(Record::section(RecordId(2), RecordId(1), "a.md", "Intro", 1).at_line(1));
        store.upsert(Record::task(RecordId(3), RecordId(2), "a.md", "one", ' ').at_line(2));
        store.upsert(Record::task(RecordId(4), RecordId(2), "a.md", "two", 'x').at_line(3));
        store.upsert(Record::page(RecordId(5), "b.md"));
        store
    }

    #[test]
    fn test_upsert_replaces_index_entries() {
        let mut store = sample();
        let previous = store.upsert(Record::page(RecordId(1), "a.md").with_tag("archive"));

        assert!(previous.is_some());
        assert!(store.index().tagged("project").is_none());
        assert!(store.index().tagged("archive").unwrap().contains(&RecordId(1)));
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_all_of_type() {
        let store = sample();
        let tasks: Vec<RecordId> = store.all_of_type(RecordType::Task).map(|r| r.id).collect();
        assert_eq!(tasks, vec![RecordId(3), RecordId(4)]);
        assert_eq!(store.all_of_type(RecordType::Block).count(), 0);
    }

    #[test]
    fn test_remove_cascades() {
        let mut store = sample();
        let removed: Vec<RecordId> = store.remove(RecordId(1)).iter().map(|r| r.id).collect();

        assert_eq!(removed, vec![RecordId(4), RecordId(3), RecordId(2), RecordId(1)]);
        assert_eq!(store.len(), 1);
        for id in 1..=4 {
            assert!(!store.index().references(RecordId(id)));
        }
        assert!(store.remove(RecordId(1)).is_empty());
    }

    #[test]
    fn test_descendants_and_owner() {
        let store = sample();
        assert_eq!(store.descendants(RecordId(1)), vec![RecordId(2), RecordId(3), RecordId(4)]);
        assert_eq!(store.children(RecordId(2)), vec![RecordId(3), RecordId(4)]);
        assert_eq!(store.owning_file(RecordId(4)), Some(RecordId(1)));
        assert_eq!(store.owning_file(RecordId(99)), None);
    }
}
