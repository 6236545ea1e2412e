//! Query syntax tree.

use crate::literal::Literal;
use crate::types::{Link, RecordType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a field predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }

    /// Whether an ordering between actual and expected satisfies the operator.
    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed query. Immutable once built and cheap to share behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum IndexQuery {
    TypeFilter { record_type: RecordType },
    Tag { name: String },
    Path { prefix: String },
    FieldCompare { field: String, op: CompareOp, value: Literal },
    Exists { field: String },
    LinkedTo { target: Link },
    Connected { target: Link },
    And { left: Box<IndexQuery>, right: Box<IndexQuery> },
    Or { left: Box<IndexQuery>, right: Box<IndexQuery> },
    Not { inner: Box<IndexQuery> },
    ParentOf { inner: Box<IndexQuery> },
    ChildOf { inner: Box<IndexQuery> },
}

impl IndexQuery {
    pub fn record_type(record_type: RecordType) -> Self {
        IndexQuery::TypeFilter { record_type }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        IndexQuery::Tag { name: name.into() }
    }

    pub fn path(prefix: impl Into<String>) -> Self {
        IndexQuery::Path {
            prefix: prefix.into(),
        }
    }

    pub fn field(field: impl Into<String>, op: CompareOp, value: impl Into<Literal>) -> Self {
        IndexQuery::FieldCompare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        IndexQuery::Exists {
            field: field.into(),
        }
    }

    pub fn linked_to(target: Link) -> Self {
        IndexQuery::LinkedTo { target }
    }

    pub fn connected(target: Link) -> Self {
        IndexQuery::Connected { target }
    }

    pub fn and(left: IndexQuery, right: IndexQuery) -> Self {
        IndexQuery::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: IndexQuery, right: IndexQuery) -> Self {
        IndexQuery::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn negate(inner: IndexQuery) -> Self {
        IndexQuery::Not {
            inner: Box::new(inner),
        }
    }

    pub fn parent_of(inner: IndexQuery) -> Self {
        IndexQuery::ParentOf {
            inner: Box::new(inner),
        }
    }

    pub fn child_of(inner: IndexQuery) -> Self {
        IndexQuery::ChildOf {
            inner: Box::new(inner),
        }
    }

    /// Whether membership of a record depends only on that record's own
    /// content. `connected`, `parentof` and `childof` look at other records.
    pub fn is_local(&self) -> bool {
        match self {
            IndexQuery::Connected { .. } | IndexQuery::ParentOf { .. } | IndexQuery::ChildOf { .. } => {
                false
            }
            IndexQuery::And { left, right } | IndexQuery::Or { left, right } => {
                left.is_local() && right.is_local()
            }
            IndexQuery::Not { inner } => inner.is_local(),
            _ => true,
        }
    }

    fn is_atom(&self) -> bool {
        !matches!(
            self,
            IndexQuery::And { .. } | IndexQuery::Or { .. } | IndexQuery::Not { .. }
        )
    }
}

/// Renders canonical query text that parses back to an equal tree.
impl fmt::Display for IndexQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexQuery::TypeFilter { record_type } => write!(f, "@{}", record_type),
            IndexQuery::Tag { name } => write!(f, "#{}", name),
            IndexQuery::Path { prefix } => write!(f, "path({})", Literal::from(prefix.as_str())),
            IndexQuery::FieldCompare { field, op, value } => write!(f, "{} {} {}", field, op, value),
            IndexQuery::Exists { field } => write!(f, "exists({})", field),
            IndexQuery::LinkedTo { target } => write!(f, "linkedto({})", target),
            IndexQuery::Connected { target } => write!(f, "connected({})", target),
            IndexQuery::And { left, right } => {
                write_operand(f, left, matches!(**left, IndexQuery::Or { .. }))?;
                write!(f, " and ")?;
                write_operand(f, right, !matches!(**right, IndexQuery::Not { .. }) && !right.is_atom())
            }
            IndexQuery::Or { left, right } => {
                write!(f, "{} or ", left)?;
                write_operand(f, right, matches!(**right, IndexQuery::Or { .. }))
            }
            IndexQuery::Not { inner } => {
                write!(f, "!")?;
                write_operand(f, inner, !inner.is_atom())
            }
            IndexQuery::ParentOf { inner } => write!(f, "parentof({})", inner),
            IndexQuery::ChildOf { inner } => write!(f, "childof({})", inner),
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, query: &IndexQuery, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", query)
    } else {
        write!(f, "{}", query)
    }
}
