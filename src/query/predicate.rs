//! Per-record predicate evaluation.
//!
//! Used for full-scan fallback and for deciding whether a changed record can
//! affect a subscription. Must agree with the index lookups in `eval`.

use super::ast::{CompareOp, IndexQuery};
use crate::literal::Literal;
use crate::records::path_matches;
use crate::types::{tag_prefixes, Link, Record};

/// Intrinsic field names. These are never served from the field index.
pub const INTRINSIC_FIELDS: &[&str] = &[
    "id", "path", "type", "title", "line", "tags", "links", "level", "blockid", "text", "status",
    "completed",
];

/// Whether `field` reads an intrinsic value for at least some records.
pub fn is_intrinsic(field: &str) -> bool {
    field.starts_with('$') || INTRINSIC_FIELDS.contains(&field.to_lowercase().as_str())
}

/// Test a record against a query.
///
/// Returns `None` if the query contains an operator whose answer depends on
/// other records.
pub fn matches_record(query: &IndexQuery, record: &Record) -> Option<bool> {
    Some(match query {
        IndexQuery::TypeFilter { record_type } => record.record_type() == *record_type,
        IndexQuery::Tag { name } => has_tag(record, name),
        IndexQuery::Path { prefix } => path_matches(&record.path, prefix),
        IndexQuery::FieldCompare { field, op, value } => compare_field(record, field, *op, value),
        IndexQuery::Exists { field } => record.field(field).is_some_and(|v| !v.is_null()),
        IndexQuery::LinkedTo { target } => links_to(record, target),
        IndexQuery::And { left, right } => {
            let left = matches_record(left, record)?;
            let right = matches_record(right, record)?;
            left && right
        }
        IndexQuery::Or { left, right } => {
            let left = matches_record(left, record)?;
            let right = matches_record(right, record)?;
            left || right
        }
        IndexQuery::Not { inner } => !matches_record(inner, record)?,
        IndexQuery::Connected { .. } | IndexQuery::ParentOf { .. } | IndexQuery::ChildOf { .. } => {
            return None
        }
    })
}

/// Tag test with hierarchy: `project` matches `project/alpha`.
pub fn has_tag(record: &Record, tag: &str) -> bool {
    let wanted = crate::types::normalize_tag(tag);
    record
        .normalized_tags()
        .any(|own| tag_prefixes(&own).any(|prefix| prefix == wanted))
}

/// Whether any outgoing link of `record` points at `target` (or, for a
/// file-level target, anywhere inside that file).
pub fn links_to(record: &Record, target: &Link) -> bool {
    let key = target.key();
    record
        .links
        .iter()
        .any(|link| link.key() == key || link.file_key() == key)
}

/// Field comparison. A missing field or a tag mismatch is "no match".
///
/// List fields match when any element satisfies the comparison; `!=`
/// against a list means no comparable element is equal.
pub fn compare_field(record: &Record, field: &str, op: CompareOp, expected: &Literal) -> bool {
    let Some(actual) = record.field(field) else {
        return false;
    };
    match (&actual, expected) {
        (Literal::List(items), expected) if !matches!(expected, Literal::List(_)) => {
            if op == CompareOp::Ne {
                let mut comparable = false;
                for item in items {
                    match item.compare(expected) {
                        Some(std::cmp::Ordering::Equal) => return false,
                        Some(_) => comparable = true,
                        None => {}
                    }
                }
                comparable
            } else {
                items.iter().any(|item| holds(item, op, expected))
            }
        }
        _ => holds(&actual, op, expected),
    }
}

fn holds(actual: &Literal, op: CompareOp, expected: &Literal) -> bool {
    actual
        .compare(expected)
        .map(|ordering| op.holds(ordering))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use crate::types::RecordId;

    fn check(text: &str, record: &Record) -> Option<bool> {
        matches_record(&parse(text).unwrap(), record)
    }

    #[test]
    fn test_local_predicates() {
        let task = Record::task(RecordId(3), RecordId(1), "Projects/alpha.md", "Write", ' ')
            .with_tag("work/urgent")
            .with_field("priority", 2)
            .with_field("labels", Literal::List(vec!["a".into(), "b".into()]))
            .with_link(Link::parse("[[Home#Intro]]"));

        assert_eq!(check("@task and #work", &task), Some(true));
        assert_eq!(check("#urgent", &task), Some(false));
        assert_eq!(check("path(\"Projects\") and priority > 1", &task), Some(true));
        assert_eq!(check("priority > \"1\"", &task), Some(false));
        assert_eq!(check("priority != \"1\"", &task), Some(false));
        assert_eq!(check("labels = \"b\"", &task), Some(true));
        assert_eq!(check("labels != \"b\"", &task), Some(false));
        assert_eq!(check("labels != \"c\"", &task), Some(true));
        assert_eq!(check("linkedto(\"Home\") and linkedto(\"Home#Intro\")", &task), Some(true));
        assert_eq!(check("linkedto(\"Home#Other\")", &task), Some(false));
        assert_eq!(check("exists(priority) and !exists(due)", &task), Some(true));
        assert_eq!(check("completed = false", &task), Some(true));
    }

    #[test]
    fn test_structural_is_not_local() {
        let page = Record::page(RecordId(1), "a.md");
        assert_eq!(check("#x or childof(@page)", &page), None);
        assert_eq!(check("connected(\"a\")", &page), None);
    }

    #[test]
    fn test_intrinsic_names() {
        assert!(is_intrinsic("$anything"));
        assert!(is_intrinsic("Title"));
        assert!(!is_intrinsic("priority"));
    }
}
