//! Secondary indices over the primary record store.

use crate::literal::IndexKey;
use crate::query::CompareOp;
use crate::types::{tag_prefixes, normalize_tag, IdSet, Position, Record, RecordId, RecordType};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::ops::Bound;

/// Inverted indices that accelerate the common predicates.
///
/// Every entry is derived from one record version: [`SecondaryIndex::insert`]
/// and [`SecondaryIndex::remove`] must be called with the same content for
/// the entries to cancel out.
#[derive(Debug, Default)]
pub struct SecondaryIndex {
    /// Record type to record ids.
    by_type: HashMap<RecordType, IdSet>,

    /// Normalized tag (and every hierarchical prefix of it) to record ids.
    tags: HashMap<String, IdSet>,

    /// Owning file path to record ids, sorted for prefix scans.
    paths: BTreeMap<String, IdSet>,

    /// Forward links: record id to the link keys it points at.
    links_out: HashMap<RecordId, BTreeSet<String>>,

    /// Backward links: link key to the records pointing at it.
    links_in: HashMap<String, IdSet>,

    /// Link key a record can be reached by to the record ids.
    anchors: HashMap<String, IdSet>,

    /// Field name to records carrying a non-null value for it.
    field_presence: HashMap<String, IdSet>,

    /// Sorted values for the configured fields.
    field_values: HashMap<String, BTreeMap<IndexKey, IdSet>>,

    /// Parent id to children ordered by document position.
    children: HashMap<RecordId, BTreeSet<(Position, RecordId)>>,

    /// Fields that get a sorted value index.
    indexed_fields: HashSet<String>,
}

impl SecondaryIndex {
    /// Create an empty index keeping sorted values for `indexed_fields`.
    pub fn new<I, S>(indexed_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            indexed_fields: indexed_fields
                .into_iter()
                .map(|f| f.as_ref().to_lowercase())
                .collect(),
            ..Default::default()
        }
    }

    /// Add every entry derived from `record`.
    pub fn insert(&mut self, record: &Record) {
        let id = record.id;

        add_to(&mut self.by_type, record.record_type(), id);

        for tag in record.normalized_tags() {
            for prefix in tag_prefixes(&tag) {
                add_to(&mut self.tags, prefix.to_string(), id);
            }
        }

        self.paths.entry(record.path.clone()).or_default().insert(id);

        let keys = link_keys(record);
        if !keys.is_empty() {
            for key in &keys {
                add_to(&mut self.links_in, key.clone(), id);
            }
            self.links_out.insert(id, keys);
        }

        if let Some(anchor) = record.anchor() {
            add_to(&mut self.anchors, anchor.key(), id);
        }

        for (name, value) in &record.fields {
            if value.is_null() {
                continue;
            }
            add_to(&mut self.field_presence, name.clone(), id);
            if self.indexed_fields.contains(name) {
                let values = self.field_values.entry(name.clone()).or_default();
                for key in value.index_keys() {
                    values.entry(key).or_default().insert(id);
                }
            }
        }

        if let Some(parent) = record.parent {
            self.children
                .entry(parent)
                .or_default()
                .insert((record.position, id));
        }
    }

    /// Drop every entry derived from `record`.
    pub fn remove(&mut self, record: &Record) {
        let id = record.id;

        remove_from(&mut self.by_type, &record.record_type(), id);

        for tag in record.normalized_tags() {
            for prefix in tag_prefixes(&tag) {
                remove_from(&mut self.tags, prefix, id);
            }
        }

        if let Some(ids) = self.paths.get_mut(&record.path) {
            ids.remove(&id);
            if ids.is_empty() {
                self.paths.remove(&record.path);
            }
        }

        if let Some(keys) = self.links_out.remove(&id) {
            for key in &keys {
                remove_from(&mut self.links_in, key.as_str(), id);
            }
        }

        if let Some(anchor) = record.anchor() {
            remove_from(&mut self.anchors, anchor.key().as_str(), id);
        }

        for (name, value) in &record.fields {
            remove_from(&mut self.field_presence, name.as_str(), id);
            if let Some(values) = self.field_values.get_mut(name) {
                for key in value.index_keys() {
                    if let Some(ids) = values.get_mut(&key) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            values.remove(&key);
                        }
                    }
                }
                if values.is_empty() {
                    self.field_values.remove(name);
                }
            }
        }

        if let Some(parent) = record.parent {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.remove(&(record.position, id));
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }

    // --- Lookups ---

    pub fn ids_of_type(&self, record_type: RecordType) -> Option<&IdSet> {
        self.by_type.get(&record_type)
    }

    /// Records carrying `tag` or any tag nested below it.
    pub fn tagged(&self, tag: &str) -> Option<&IdSet> {
        self.tags.get(&normalize_tag(tag))
    }

    /// Records whose owning file lies under `prefix`.
    ///
    /// A prefix matches a path exactly, as a folder (`Projects` matches
    /// `Projects/a.md`), or without the `.md` extension.
    pub fn under_path(&self, prefix: &str) -> IdSet {
        let prefix = prefix.trim_end_matches('/');
        let mut out = IdSet::new();
        let range = self
            .paths
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(prefix));
        for (path, ids) in range {
            if path_matches(path, prefix) {
                out.extend(ids.iter().copied());
            }
        }
        out
    }

    /// Records with an outgoing link to `key`.
    pub fn linking_to(&self, key: &str) -> Option<&IdSet> {
        self.links_in.get(key)
    }

    /// Link keys a record points at.
    pub fn outgoing(&self, id: RecordId) -> Option<&BTreeSet<String>> {
        self.links_out.get(&id)
    }

    /// Records reachable through link `key`.
    pub fn anchored_at(&self, key: &str) -> Option<&IdSet> {
        self.anchors.get(key)
    }

    /// Records carrying a non-null user field `name`.
    pub fn with_field(&self, name: &str) -> Option<&IdSet> {
        self.field_presence.get(&name.to_lowercase())
    }

    pub fn is_field_indexed(&self, name: &str) -> bool {
        self.indexed_fields.contains(&name.to_lowercase())
    }

    /// Records with a value of field `name` satisfying `op` against `value`.
    ///
    /// Returns `None` when the field has no sorted index or the operator
    /// cannot be answered from one (`!=`).
    pub(crate) fn field_range(&self, name: &str, op: CompareOp, value: &IndexKey) -> Option<IdSet> {
        let name = name.to_lowercase();
        if !self.indexed_fields.contains(&name) || op == CompareOp::Ne {
            return None;
        }
        let mut out = IdSet::new();
        let Some(values) = self.field_values.get(&name) else {
            return Some(out);
        };
        let mut collect = |ids: &IdSet| out.extend(ids.iter().copied());
        match op {
            CompareOp::Eq => {
                if let Some(ids) = values.get(value) {
                    collect(ids);
                }
            }
            CompareOp::Gt | CompareOp::Ge => {
                let lower = if op == CompareOp::Gt {
                    Bound::Excluded(value)
                } else {
                    Bound::Included(value)
                };
                for (key, ids) in values.range((lower, Bound::Unbounded)) {
                    if !key.same_tag(value) {
                        break;
                    }
                    collect(ids);
                }
            }
            CompareOp::Lt | CompareOp::Le => {
                let upper = if op == CompareOp::Lt {
                    Bound::Excluded(value)
                } else {
                    Bound::Included(value)
                };
                for (key, ids) in values.range((Bound::Unbounded, upper)).rev() {
                    if !key.same_tag(value) {
                        break;
                    }
                    collect(ids);
                }
            }
            CompareOp::Ne => return None,
        }
        Some(out)
    }

    /// Children of `parent` in document order.
    pub fn children(&self, parent: RecordId) -> impl Iterator<Item = RecordId> + '_ {
        self.children
            .get(&parent)
            .into_iter()
            .flat_map(|set| set.iter().map(|(_, id)| *id))
    }

    /// Whether any entry still mentions `id`.
    pub fn references(&self, id: RecordId) -> bool {
        any_contains(self.by_type.values(), id)
            || any_contains(self.tags.values(), id)
            || any_contains(self.paths.values(), id)
            || any_contains(self.links_in.values(), id)
            || any_contains(self.anchors.values(), id)
            || any_contains(self.field_presence.values(), id)
            || any_contains(self.field_values.values().flat_map(|v| v.values()), id)
            || self.links_out.contains_key(&id)
            || self.children.contains_key(&id)
            || self
                .children
                .values()
                .any(|set| set.iter().any(|(_, child)| *child == id))
    }

    /// Distinct tags in the index, including hierarchical prefixes.
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}

/// Segment-aware path prefix test.
pub fn path_matches(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    if path == prefix || path.strip_suffix(".md") == Some(prefix) {
        return true;
    }
    path.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

/// Keys a record's links are indexed under: the full key and, for links
/// into a heading or block, the file key as well.
fn link_keys(record: &Record) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for link in &record.links {
        keys.insert(link.key());
        keys.insert(link.file_key());
    }
    keys
}

fn any_contains<'a>(mut sets: impl Iterator<Item = &'a IdSet>, id: RecordId) -> bool {
    sets.any(|set| set.contains(&id))
}

fn add_to<K: Hash + Eq>(map: &mut HashMap<K, IdSet>, key: K, id: RecordId) {
    map.entry(key).or_default().insert(id);
}

fn remove_from<K, Q>(map: &mut HashMap<K, IdSet>, key: &Q, id: RecordId)
where
    K: Hash + Eq + std::borrow::Borrow<Q>,
    Q: Hash + Eq + ?Sized,
{
    if let Some(ids) = map.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}
