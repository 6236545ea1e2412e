//! Batch mutation pipeline.
//!
//! A batch is staged in an overlay over the committed store, cascades are
//! expanded, the result is validated, and only then is the net change set
//! written. A rejected batch leaves the store untouched.

use crate::error::InvariantViolation;
use crate::records::RecordStore;
use crate::types::{Delta, Operation, Record, RecordId};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Net change to one record.
#[derive(Clone, Debug)]
pub struct Change {
    pub id: RecordId,
    /// Committed version before the batch.
    pub before: Option<Arc<Record>>,
    /// Version after the batch.
    pub after: Option<Arc<Record>>,
}

/// A validated batch, ready to commit.
#[derive(Debug, Default)]
pub struct StagedBatch {
    /// Sorted by id.
    changes: Vec<Change>,
}

impl StagedBatch {
    /// The batch has no net effect.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Net ids added, updated and removed, each sorted.
    pub fn delta(&self) -> Delta {
        let mut delta = Delta::default();
        for change in &self.changes {
            match (&change.before, &change.after) {
                (None, Some(_)) => delta.added.push(change.id),
                (Some(_), Some(_)) => delta.updated.push(change.id),
                (Some(_), None) => delta.removed.push(change.id),
                (None, None) => {}
            }
        }
        delta
    }

    /// Write the batch. Must be applied to the store it was staged against.
    pub fn commit(&self, store: &mut RecordStore) {
        for change in self.changes.iter().filter(|c| c.after.is_none()) {
            store.remove_one(change.id);
        }
        for change in &self.changes {
            if let Some(after) = &change.after {
                store.upsert_shared(Arc::clone(after));
            }
        }
    }
}

/// Stage and commit `ops` in one step.
pub fn apply_batch(
    store: &mut RecordStore,
    ops: impl IntoIterator<Item = Operation>,
) -> Result<Delta, InvariantViolation> {
    let staged = stage(store, ops)?;
    staged.commit(store);
    Ok(staged.delta())
}

/// Stage `ops` against `store` and validate the outcome.
pub fn stage(
    store: &RecordStore,
    ops: impl IntoIterator<Item = Operation>,
) -> Result<StagedBatch, InvariantViolation> {
    let mut overlay = Overlay::new(store);
    let mut written = HashSet::new();

    for op in ops {
        match op {
            Operation::Add(record) => {
                let record = record.with_lowercase_fields();
                if !written.insert(record.id) {
                    return Err(InvariantViolation::DuplicateId(record.id));
                }
                match overlay.get(record.id) {
                    Some(current) if **current == record => {}
                    Some(_) => return Err(InvariantViolation::DuplicateId(record.id)),
                    None => overlay.put(Arc::new(record)),
                }
            }
            Operation::Update(record) => {
                let record = record.with_lowercase_fields();
                if !written.insert(record.id) {
                    return Err(InvariantViolation::DuplicateId(record.id));
                }
                overlay.put(Arc::new(record));
            }
            Operation::Remove(id) => overlay.remove_tree(id),
        }
    }

    overlay.validate()?;
    Ok(overlay.into_batch())
}

/// Staged view: committed records shadowed by the batch so far.
struct Overlay<'s> {
    store: &'s RecordStore,
    staged: BTreeMap<RecordId, Option<Arc<Record>>>,
}

impl<'s> Overlay<'s> {
    fn new(store: &'s RecordStore) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
        }
    }

    fn get(&self, id: RecordId) -> Option<&Arc<Record>> {
        match self.staged.get(&id) {
            Some(staged) => staged.as_ref(),
            None => self.store.get(id),
        }
    }

    fn put(&mut self, record: Arc<Record>) {
        self.staged.insert(record.id, Some(record));
    }

    /// Current children of `id` in the staged view.
    fn children(&self, id: RecordId) -> Vec<RecordId> {
        let mut out: Vec<RecordId> = self
            .store
            .index()
            .children(id)
            .filter(|child| self.get(*child).is_some_and(|r| r.parent == Some(id)))
            .collect();
        for (child, staged) in &self.staged {
            let newly_parented = staged.as_ref().is_some_and(|r| r.parent == Some(id))
                && self.store.get(*child).map_or(true, |r| r.parent != Some(id));
            if newly_parented {
                out.push(*child);
            }
        }
        out
    }

    /// Mark `id` and everything below it as removed.
    fn remove_tree(&mut self, id: RecordId) {
        if self.get(id).is_none() {
            return;
        }
        let mut seen = HashSet::from([id]);
        let mut pending = vec![id];
        let mut doomed = Vec::new();
        while let Some(next) = pending.pop() {
            doomed.push(next);
            for child in self.children(next) {
                if seen.insert(child) {
                    pending.push(child);
                }
            }
        }
        for id in doomed {
            self.staged.insert(id, None);
        }
    }

    /// Check every staged record against the hierarchy invariants.
    fn validate(&self) -> Result<(), InvariantViolation> {
        let limit = self.store.len() + self.staged.len() + 1;
        for record in self.staged.values().flatten() {
            let Some(parent) = record.parent else {
                if record.record_type().is_file() {
                    continue;
                }
                return Err(InvariantViolation::Orphan(record.id));
            };
            if self.get(parent).is_none() {
                return Err(InvariantViolation::DanglingParent {
                    id: record.id,
                    parent,
                });
            }

            let mut seen = HashSet::from([record.id]);
            let mut current = Some(parent);
            while let Some(id) = current {
                if !seen.insert(id) || seen.len() > limit {
                    return Err(InvariantViolation::ParentCycle(record.id));
                }
                current = self.get(id).and_then(|r| r.parent);
            }
        }
        Ok(())
    }

    /// Reduce the overlay to its net effect against the committed store.
    fn into_batch(self) -> StagedBatch {
        let store = self.store;
        let changes = self
            .staged
            .into_iter()
            .filter_map(|(id, after)| {
                let before = store.get(id).cloned();
                let unchanged = match (&before, &after) {
                    (Some(old), Some(new)) => old == new,
                    (None, None) => true,
                    _ => false,
                };
                (!unchanged).then_some(Change { id, before, after })
            })
            .collect();
        StagedBatch { changes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::Literal;
    use crate::types::RecordType;

    fn page(id: u64) -> Record {
        Record::page(RecordId(id), format!("p{}.md", id))
    }

    fn task(id: u64, parent: u64) -> Record {
        Record::task(RecordId(id), RecordId(parent), "p.md", format!("t{}", id), ' ')
            .at_line(id as u32)
    }

    fn seeded() -> RecordStore {
        let mut store = RecordStore::default();
        apply_batch(
            &mut store,
            vec![
                Operation::Add(page(1)),
                Operation::Add(task(2, 1)),
                Operation::Add(task(3, 2)),
                Operation::Add(page(4)),
            ],
        )
        .unwrap();
        store
    }

    #[test]
    fn test_delta_is_net_and_sorted() {
        let mut store = RecordStore::default();
        let delta = apply_batch(
            &mut store,
            vec![Operation::Add(page(5)), Operation::Add(page(2)), Operation::Add(task(9, 2))],
        )
        .unwrap();
        assert_eq!(delta.added, vec![RecordId(2), RecordId(5), RecordId(9)]);
        assert!(delta.updated.is_empty() && delta.removed.is_empty());

        // Remove then re-add the same content nets out.
        let delta = apply_batch(
            &mut store,
            vec![Operation::Remove(RecordId(5)), Operation::Add(page(5))],
        )
        .unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_identical_content_is_a_no_op() {
        let mut store = seeded();
        let delta = apply_batch(
            &mut store,
            vec![Operation::Add(page(1)), Operation::Update(task(2, 1))],
        )
        .unwrap();
        assert!(delta.is_empty());

        let delta = apply_batch(&mut store, vec![Operation::Update(page(1).with_tag("x"))]).unwrap();
        assert_eq!(delta.updated, vec![RecordId(1)]);
    }

    #[test]
    fn test_field_names_are_lowercased_on_stage() {
        let mut store = seeded();
        let mut record = page(1);
        record.fields.insert("Status".into(), Literal::from("open"));
        apply_batch(&mut store, vec![Operation::Update(record.clone())]).unwrap();
        let stored = store.get(RecordId(1)).unwrap();
        assert_eq!(stored.fields.keys().collect::<Vec<_>>(), vec!["status"]);

        // Mixed-case resubmission of the same content is still a no-op.
        let delta = apply_batch(&mut store, vec![Operation::Add(record)]).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_nan_field_is_not_a_change() {
        let mut store = seeded();
        let record = page(1).with_field("score", f64::NAN);
        apply_batch(&mut store, vec![Operation::Update(record.clone())]).unwrap();
        let delta = apply_batch(&mut store, vec![Operation::Update(record.clone())]).unwrap();
        assert!(delta.is_empty());
        let delta = apply_batch(&mut store, vec![Operation::Add(record)]).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_cascade_collects_descendants() {
        let mut store = seeded();
        let delta = apply_batch(&mut store, vec![Operation::Remove(RecordId(1))]).unwrap();
        assert_eq!(delta.removed, vec![RecordId(1), RecordId(2), RecordId(3)]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.all_of_type(RecordType::Task).count(), 0);

        let delta = apply_batch(&mut store, vec![Operation::Remove(RecordId(1))]).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_cascade_follows_staged_parents() {
        let mut store = seeded();
        // Task 3 moves under page 4 before page 1 goes away.
        let delta = apply_batch(
            &mut store,
            vec![
                Operation::Update(task(3, 4)),
                Operation::Add(task(7, 2)),
                Operation::Remove(RecordId(1)),
            ],
        )
        .unwrap();
        assert_eq!(delta.removed, vec![RecordId(1), RecordId(2)]);
        assert_eq!(delta.updated, vec![RecordId(3)]);
        assert!(delta.added.is_empty());
        assert_eq!(store.children(RecordId(4)), vec![RecordId(3)]);
    }

    #[test]
    fn test_rejections_leave_store_untouched() {
        let mut store = seeded();
        let cases = vec![
            (
                vec![Operation::Add(page(1).with_tag("other"))],
                InvariantViolation::DuplicateId(RecordId(1)),
            ),
            (
                vec![Operation::Update(page(8)), Operation::Update(page(8))],
                InvariantViolation::DuplicateId(RecordId(8)),
            ),
            (
                vec![Operation::Add(page(8)), Operation::Add(task(9, 99))],
                InvariantViolation::DanglingParent {
                    id: RecordId(9),
                    parent: RecordId(99),
                },
            ),
            (
                vec![Operation::Remove(RecordId(2)), Operation::Add(task(9, 3))],
                InvariantViolation::DanglingParent {
                    id: RecordId(9),
                    parent: RecordId(3),
                },
            ),
            (
                vec![Operation::Add(Record::new(
                    RecordId(9),
                    crate::types::RecordKind::Block { block_id: None },
                    "p.md",
                ))],
                InvariantViolation::Orphan(RecordId(9)),
            ),
            (
                vec![Operation::Update(page(1).with_parent(RecordId(3)))],
                InvariantViolation::ParentCycle(RecordId(1)),
            ),
        ];

        for (ops, expected) in cases {
            assert_eq!(apply_batch(&mut store, ops).unwrap_err(), expected);
            assert_eq!(store.len(), 4);
            assert!(store.get(RecordId(8)).is_none());
            assert_eq!(store.get(RecordId(1)).unwrap().tags.len(), 0);
        }
    }
}
