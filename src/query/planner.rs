//! Conjunct ordering.
//!
//! An `and` chain is flattened and its operands are evaluated cheapest
//! first, each inside the candidate set left by the previous ones. Type and
//! tag filters are plain index hits and usually shrink the candidate set the
//! most, so they go first; per-record scans and graph walks go last.

use super::ast::IndexQuery;
use super::predicate::is_intrinsic;
use crate::literal::IndexKey;
use crate::records::SecondaryIndex;

/// How an operand will be answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    /// Direct lookup in the primary store.
    Lookup,
    /// One secondary index hit.
    Index,
    /// Several index hits or a small link walk.
    Compound,
    /// Predicate applied to every candidate.
    Scan,
    /// Complement of another operand.
    Negation,
    /// Parent/child traversal.
    Traversal,
}

impl Access {
    pub fn label(&self) -> &'static str {
        match self {
            Access::Lookup => "lookup",
            Access::Index => "index",
            Access::Compound => "compound",
            Access::Scan => "scan",
            Access::Negation => "negate",
            Access::Traversal => "traverse",
        }
    }
}

/// Split a left- or right-nested `and` chain into its operands.
pub fn flatten_and<'q>(query: &'q IndexQuery, out: &mut Vec<&'q IndexQuery>) {
    match query {
        IndexQuery::And { left, right } => {
            flatten_and(left, out);
            flatten_and(right, out);
        }
        other => out.push(other),
    }
}

/// Order the operands of an `and` chain for evaluation.
pub fn plan<'q>(query: &'q IndexQuery, index: &SecondaryIndex) -> Vec<&'q IndexQuery> {
    let mut steps = Vec::new();
    flatten_and(query, &mut steps);
    steps.sort_by_key(|step| (access(step, index), estimate(step, index)));
    steps
}

/// Whether a field comparison is answered by the primary store directly.
pub fn is_id_lookup(query: &IndexQuery, index: &SecondaryIndex) -> bool {
    match query {
        IndexQuery::FieldCompare { field, op, value } => {
            let field = field.to_lowercase();
            let reads_intrinsic_id =
                field == "$id" || (field == "id" && index.with_field("id").is_none());
            reads_intrinsic_id
                && *op == super::ast::CompareOp::Eq
                && value.as_number().is_some_and(|n| n >= 0.0 && n.fract() == 0.0)
        }
        _ => false,
    }
}

/// Classify how an operand will be answered.
pub fn access(query: &IndexQuery, index: &SecondaryIndex) -> Access {
    match query {
        IndexQuery::TypeFilter { .. } | IndexQuery::Tag { .. } => Access::Index,
        IndexQuery::Path { .. } | IndexQuery::LinkedTo { .. } => Access::Index,
        IndexQuery::FieldCompare { field, op, value } => {
            if is_id_lookup(query, index) {
                Access::Lookup
            } else if !is_intrinsic(field)
                && index.is_field_indexed(field)
                && *op != super::ast::CompareOp::Ne
                && IndexKey::from_literal(value).is_some()
            {
                Access::Index
            } else {
                Access::Scan
            }
        }
        IndexQuery::Exists { field } => {
            if is_intrinsic(field) {
                Access::Scan
            } else {
                Access::Index
            }
        }
        IndexQuery::Connected { .. } => Access::Compound,
        IndexQuery::And { left, right } | IndexQuery::Or { left, right } => {
            access(left, index).max(access(right, index)).max(Access::Compound)
        }
        IndexQuery::Not { .. } => Access::Negation,
        IndexQuery::ParentOf { .. } | IndexQuery::ChildOf { .. } => Access::Traversal,
    }
}

/// Rough result size of an index-backed operand, used to order operands of
/// the same access class. Unknown sizes sort last.
fn estimate(query: &IndexQuery, index: &SecondaryIndex) -> usize {
    match query {
        IndexQuery::TypeFilter { record_type } => {
            index.ids_of_type(*record_type).map_or(0, |s| s.len())
        }
        IndexQuery::Tag { name } => index.tagged(name).map_or(0, |s| s.len()),
        IndexQuery::LinkedTo { target } => index.linking_to(&target.key()).map_or(0, |s| s.len()),
        IndexQuery::Exists { field } if !is_intrinsic(field) => {
            index.with_field(field).map_or(0, |s| s.len())
        }
        _ => usize::MAX,
    }
}

/// Human-readable evaluation plan, one line per step.
pub fn explain(query: &IndexQuery, index: &SecondaryIndex) -> Vec<String> {
    let mut lines = Vec::new();
    explain_into(query, index, 0, &mut lines);
    lines
}

fn explain_into(query: &IndexQuery, index: &SecondaryIndex, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    match query {
        IndexQuery::And { .. } => {
            lines.push(format!("{}and", indent));
            for step in plan(query, index) {
                explain_into(step, index, depth + 1, lines);
            }
        }
        IndexQuery::Or { left, right } => {
            lines.push(format!("{}or", indent));
            explain_into(left, index, depth + 1, lines);
            explain_into(right, index, depth + 1, lines);
        }
        IndexQuery::Not { inner } => {
            lines.push(format!("{}[negate]", indent));
            explain_into(inner, index, depth + 1, lines);
        }
        IndexQuery::ParentOf { inner } | IndexQuery::ChildOf { inner } => {
            let name = if matches!(query, IndexQuery::ParentOf { .. }) {
                "ancestors"
            } else {
                "descendants"
            };
            lines.push(format!("{}[traverse] {} of", indent, name));
            explain_into(inner, index, depth + 1, lines);
        }
        leaf => {
            lines.push(format!("{}[{}] {}", indent, access(leaf, index).label(), leaf));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use crate::types::{Record, RecordId};

    fn index() -> SecondaryIndex {
        let mut index = SecondaryIndex::new(["priority"]);
        for id in 1..=10 {
            index.insert(&Record::page(RecordId(id), "p.md").with_tag("common"));
        }
        index.insert(&Record::page(RecordId(11), "p.md").with_tag("rare"));
        index
    }

    #[test]
    fn test_cheap_operands_first() {
        let index = index();
        let query = parse("childof(@page) and title = \"x\" and !#a and #common and #rare").unwrap();
        let steps: Vec<String> = plan(&query, &index).iter().map(|s| s.to_string()).collect();
        assert_eq!(
            steps,
            vec!["#rare", "#common", "title = \"x\"", "!#a", "childof(@page)"]
        );
    }

    #[test]
    fn test_field_access() {
        let index = index();
        let access_of = |text: &str| access(&parse(text).unwrap(), &index);
        assert_eq!(access_of("priority > 2"), Access::Index);
        assert_eq!(access_of("priority != 2"), Access::Scan);
        assert_eq!(access_of("estimate > 2"), Access::Scan);
        assert_eq!(access_of("$id = 3"), Access::Lookup);
        assert_eq!(access_of("id = 3"), Access::Lookup);
        assert_eq!(access_of("$id = 3.5"), Access::Scan);
    }

    #[test]
    fn test_explain() {
        let index = index();
        let lines = explain(&parse("#common and (@task or childof(#rare))").unwrap(), &index);
        assert_eq!(
            lines,
            vec![
                "and",
                "  [index] #common",
                "  or",
                "    [index] @task",
                "    [traverse] descendants of",
                "      [index] #rare",
            ]
        );
    }
}
