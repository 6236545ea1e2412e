//! Set-at-a-time query evaluation against a store snapshot.

use super::ast::IndexQuery;
use super::planner::{access, is_id_lookup, plan, Access};
use super::predicate::{compare_field, is_intrinsic};
use crate::error::{QueryError, StructuralFault};
use crate::literal::IndexKey;
use crate::records::RecordStore;
use crate::types::{IdSet, Link, Record, RecordId};
use tracing::trace;

/// Candidate universe an operand is evaluated in.
#[derive(Clone, Copy, Debug)]
enum Scope<'a> {
    All,
    Within(&'a IdSet),
}

/// Evaluates queries against one consistent view of the store.
///
/// The caller holds the store's read guard for the evaluator's lifetime.
pub struct Evaluator<'s> {
    store: &'s RecordStore,
    max_depth: usize,
}

impl<'s> Evaluator<'s> {
    /// `max_depth` bounds every parent or child walk.
    pub fn new(store: &'s RecordStore, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    /// Every id matching `query`.
    pub fn evaluate(&self, query: &IndexQuery) -> Result<IdSet, QueryError> {
        Ok(self.eval(query, Scope::All)?)
    }

    fn eval(&self, query: &IndexQuery, scope: Scope<'_>) -> Result<IdSet, StructuralFault> {
        let index = self.store.index();
        let out = match query {
            IndexQuery::TypeFilter { record_type } => restrict(index.ids_of_type(*record_type), scope),
            IndexQuery::Tag { name } => restrict(index.tagged(name), scope),
            IndexQuery::Path { prefix } => restrict_owned(index.under_path(prefix), scope),
            IndexQuery::LinkedTo { target } => restrict(index.linking_to(&target.key()), scope),
            IndexQuery::Connected { target } => restrict_owned(self.connected(target), scope),
            IndexQuery::FieldCompare { .. } => self.field_compare(query, scope),
            IndexQuery::Exists { field } => {
                if is_intrinsic(field) {
                    self.scan(scope, |record| record.field(field).is_some_and(|v| !v.is_null()))
                } else {
                    restrict(index.with_field(field), scope)
                }
            }
            IndexQuery::And { .. } => {
                let steps = plan(query, index);
                trace!(
                    plan = %steps.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" -> "),
                    "evaluating conjunction"
                );
                let mut current: Option<IdSet> = None;
                for step in steps {
                    let step_scope = match &current {
                        Some(ids) => Scope::Within(ids),
                        None => scope,
                    };
                    let result = self.eval(step, step_scope)?;
                    if result.is_empty() {
                        return Ok(result);
                    }
                    current = Some(result);
                }
                current.unwrap_or_default()
            }
            IndexQuery::Or { left, right } => {
                let mut out = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                out.extend(right);
                out
            }
            IndexQuery::Not { inner } => {
                let excluded = self.eval(inner, scope)?;
                match scope {
                    Scope::All => self
                        .store
                        .iter()
                        .map(|r| r.id)
                        .filter(|id| !excluded.contains(id))
                        .collect(),
                    Scope::Within(ids) => ids.difference(&excluded).copied().collect(),
                }
            }
            IndexQuery::ParentOf { inner } => {
                let roots = self.eval(inner, Scope::All)?;
                restrict_owned(self.ancestors(&roots)?, scope)
            }
            IndexQuery::ChildOf { inner } => {
                let roots = self.eval(inner, Scope::All)?;
                restrict_owned(self.descendants(&roots)?, scope)
            }
        };
        Ok(out)
    }

    fn field_compare(&self, query: &IndexQuery, scope: Scope<'_>) -> IdSet {
        let IndexQuery::FieldCompare { field, op, value } = query else {
            return IdSet::new();
        };
        let index = self.store.index();

        if is_id_lookup(query, index) {
            let id = RecordId(value.as_number().unwrap_or_default() as u64);
            let hit = self.store.contains(id)
                && match scope {
                    Scope::All => true,
                    Scope::Within(ids) => ids.contains(&id),
                };
            return if hit { IdSet::from([id]) } else { IdSet::new() };
        }

        if access(query, index) == Access::Index {
            if let Some(ids) = IndexKey::from_literal(value)
                .and_then(|key| index.field_range(field, *op, &key))
            {
                return restrict_owned(ids, scope);
            }
        }

        let matches = |record: &Record| compare_field(record, field, *op, value);
        if !value.is_null() && !is_intrinsic(field) {
            // A non-null comparison can only hold where the field is present.
            let Some(candidates) = index.with_field(field) else {
                return IdSet::new();
            };
            let candidates = restrict(Some(candidates), scope);
            return self.scan(Scope::Within(&candidates), matches);
        }
        self.scan(scope, matches)
    }

    fn scan(&self, scope: Scope<'_>, matches: impl Fn(&Record) -> bool) -> IdSet {
        match scope {
            Scope::All => self
                .store
                .iter()
                .filter(|record| matches(record))
                .map(|record| record.id)
                .collect(),
            Scope::Within(ids) => ids
                .iter()
                .filter_map(|id| self.store.get(*id))
                .filter(|record| matches(record))
                .map(|record| record.id)
                .collect(),
        }
    }

    /// Records linking to `target` plus records that whatever sits at
    /// `target` links to.
    fn connected(&self, target: &Link) -> IdSet {
        let index = self.store.index();
        let key = target.key();
        let mut out = index.linking_to(&key).cloned().unwrap_or_default();

        let Some(anchored) = index.anchored_at(&key) else {
            return out;
        };
        for &anchor_id in anchored {
            let mut sources = vec![anchor_id];
            if target.subpath.is_none() {
                sources.extend(self.store.descendants(anchor_id));
            }
            for source in sources {
                let Some(record) = self.store.get(source) else {
                    continue;
                };
                for link in &record.links {
                    let hits = index
                        .anchored_at(&link.key())
                        .or_else(|| index.anchored_at(&link.file_key()));
                    if let Some(hits) = hits {
                        out.extend(hits.iter().copied());
                    }
                }
            }
        }
        out
    }

    /// Union of the ancestor chains of `roots`.
    fn ancestors(&self, roots: &IdSet) -> Result<IdSet, StructuralFault> {
        let mut out = IdSet::new();
        for &root in roots {
            let mut seen = IdSet::from([root]);
            let mut current = self.store.get(root).and_then(|r| r.parent);
            let mut depth = 0;
            while let Some(parent) = current {
                if out.contains(&parent) {
                    // The rest of this chain was collected by an earlier root.
                    break;
                }
                if !seen.insert(parent) {
                    return Err(StructuralFault::Revisit(parent));
                }
                depth += 1;
                if depth > self.max_depth {
                    return Err(StructuralFault::DepthExceeded {
                        id: root,
                        limit: self.max_depth,
                    });
                }
                let Some(record) = self.store.get(parent) else {
                    break;
                };
                out.insert(parent);
                current = record.parent;
            }
        }
        Ok(out)
    }

    /// Union of the subtrees below `roots`, roots excluded unless they sit
    /// below another root.
    fn descendants(&self, roots: &IdSet) -> Result<IdSet, StructuralFault> {
        let index = self.store.index();
        let mut out = IdSet::new();
        for &root in roots {
            if out.contains(&root) {
                continue;
            }
            let mut seen = IdSet::from([root]);
            let mut stack = vec![(root, 0usize)];
            while let Some((id, depth)) = stack.pop() {
                for child in index.children(id) {
                    if !seen.insert(child) {
                        return Err(StructuralFault::Revisit(child));
                    }
                    if depth + 1 > self.max_depth {
                        return Err(StructuralFault::DepthExceeded {
                            id: root,
                            limit: self.max_depth,
                        });
                    }
                    if out.insert(child) {
                        stack.push((child, depth + 1));
                    }
                }
            }
        }
        Ok(out)
    }
}

fn restrict(ids: Option<&IdSet>, scope: Scope<'_>) -> IdSet {
    let Some(ids) = ids else {
        return IdSet::new();
    };
    match scope {
        Scope::All => ids.clone(),
        Scope::Within(within) => intersect(ids, within),
    }
}

fn restrict_owned(ids: IdSet, scope: Scope<'_>) -> IdSet {
    match scope {
        Scope::All => ids,
        Scope::Within(within) => intersect(&ids, within),
    }
}

fn intersect(a: &IdSet, b: &IdSet) -> IdSet {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().filter(|id| large.contains(id)).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use crate::types::RecordKind;

    fn ids(raw: &[u64]) -> IdSet {
        raw.iter().map(|&n| RecordId(n)).collect()
    }

    fn vault() -> RecordStore {
        let mut store = RecordStore::new(["priority"]);
        store.upsert(
            Record::page(RecordId(1), "Projects/alpha.md")
                .with_tag("project")
                .with_link(Link::parse("[[Home]]")),
        );
        store.upsert(Record::section(RecordId(2), RecordId(1), "Projects/alpha.md", "Tasks", 2).at_line(3));
        store.upsert(
            Record::task(RecordId(3), RecordId(2), "Projects/alpha.md", "draft", ' ')
                .at_line(4)
                .with_field("priority", 1),
        );
        store.upsert(
            Record::task(RecordId(4), RecordId(2), "Projects/alpha.md", "ship", 'x')
                .at_line(5)
                .with_field("priority", 3)
                .with_link(Link::parse("[[Notes/beta#Plan]]")),
        );
        store.upsert(Record::page(RecordId(5), "Notes/beta.md").with_tag("project/side"));
        store.upsert(Record::section(RecordId(6), RecordId(5), "Notes/beta.md", "Plan", 1).at_line(1));
        store.upsert(Record::page(RecordId(7), "Home.md").with_link(Link::parse("Notes/beta")));
        store
    }

    fn run(store: &RecordStore, text: &str) -> Result<IdSet, QueryError> {
        Evaluator::new(store, 64).evaluate(&parse(text).unwrap())
    }

    #[test]
    fn test_index_backed_atoms() {
        let store = vault();
        assert_eq!(run(&store, "@task").unwrap(), ids(&[3, 4]));
        assert_eq!(run(&store, "#project").unwrap(), ids(&[1, 5]));
        assert_eq!(run(&store, "path(\"Notes\")").unwrap(), ids(&[5, 6]));
        assert_eq!(run(&store, "linkedto(\"Notes/beta\")").unwrap(), ids(&[4, 7]));
        assert_eq!(run(&store, "linkedto([[Notes/beta#Plan]])").unwrap(), ids(&[4]));
        assert_eq!(run(&store, "exists(priority)").unwrap(), ids(&[3, 4]));
    }

    #[test]
    fn test_field_comparisons_agree_with_scan() {
        let store = vault();
        assert_eq!(run(&store, "priority > 1").unwrap(), ids(&[4]));
        assert_eq!(run(&store, "priority != 1").unwrap(), ids(&[4]));
        assert_eq!(run(&store, "priority = \"1\"").unwrap(), ids(&[]));
        assert_eq!(run(&store, "completed = true").unwrap(), ids(&[4]));
        assert_eq!(run(&store, "$id = 6").unwrap(), ids(&[6]));
        assert_eq!(run(&store, "$id = 60").unwrap(), ids(&[]));
        assert_eq!(run(&store, "level >= 2").unwrap(), ids(&[2]));
    }

    #[test]
    fn test_boolean_combinators() {
        let store = vault();
        assert_eq!(run(&store, "@task and !completed = true").unwrap(), ids(&[3]));
        assert_eq!(run(&store, "@section or #project/side").unwrap(), ids(&[2, 5, 6]));
        assert_eq!(run(&store, "!path(\"Projects\")").unwrap(), ids(&[5, 6, 7]));
        assert_eq!(run(&store, "@task and #nothing and childof(@page)").unwrap(), ids(&[]));
    }

    #[test]
    fn test_structural_operators() {
        let store = vault();
        assert_eq!(run(&store, "parentof(@task)").unwrap(), ids(&[1, 2]));
        assert_eq!(run(&store, "childof(#project)").unwrap(), ids(&[2, 3, 4, 6]));
        assert_eq!(run(&store, "@task and childof($id = 2)").unwrap(), ids(&[3, 4]));
        assert_eq!(run(&store, "@page and parentof(priority > 2)").unwrap(), ids(&[1]));
    }

    #[test]
    fn test_connected_is_symmetric() {
        let store = vault();
        // Home links to beta; alpha links to Home.
        assert_eq!(run(&store, "connected(\"Home\")").unwrap(), ids(&[1, 5]));
        // alpha's task links into beta; Home links to beta; beta links nowhere.
        assert_eq!(run(&store, "connected(\"Notes/beta\")").unwrap(), ids(&[4, 7]));
    }

    #[test]
    fn test_revisit_is_a_fault() {
        let mut store = RecordStore::default();
        store.upsert(Record::new(RecordId(1), RecordKind::Page, "a.md").with_parent(RecordId(2)));
        store.upsert(Record::new(RecordId(2), RecordKind::Page, "a.md").with_parent(RecordId(1)));

        let err = run(&store, "parentof($id = 1)").unwrap_err();
        assert_eq!(err, QueryError::Structural(StructuralFault::Revisit(RecordId(1))));
        assert!(matches!(
            run(&store, "childof($id = 1)").unwrap_err(),
            QueryError::Structural(StructuralFault::Revisit(_))
        ));
    }

    #[test]
    fn test_depth_limit() {
        let mut store = RecordStore::default();
        store.upsert(Record::page(RecordId(1), "a.md"));
        for id in 2..=10 {
            store.upsert(Record::block(RecordId(id), RecordId(id - 1), "a.md"));
        }
        let query = parse("childof($id = 1)").unwrap();
        assert_eq!(Evaluator::new(&store, 64).evaluate(&query).unwrap().len(), 9);
        assert_eq!(
            Evaluator::new(&store, 4).evaluate(&query).unwrap_err(),
            QueryError::Structural(StructuralFault::DepthExceeded {
                id: RecordId(1),
                limit: 4
            })
        );
    }
}
