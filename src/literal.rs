//! Typed field values and their comparison rules.
//!
//! Values are only comparable within the same tag. Comparing a number to a
//! string, or a date to a link, yields `None` and predicates built on the
//! comparison evaluate to false.

use crate::types::Link;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A typed value stored in a record field.
///
/// Equality is structural, except that NaN equals NaN so a record holding
/// NaN compares equal to its own copy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Date(NaiveDateTime),
    Duration(#[serde(with = "duration_millis")] Duration),
    Link(Link),
    List(Vec<Literal>),
    Object(BTreeMap<String, Literal>),
}

impl Literal {
    /// Name of the tag, used in messages and in `Display` of the AST.
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Boolean(_) => "boolean",
            Literal::Number(_) => "number",
            Literal::String(_) => "string",
            Literal::Date(_) => "date",
            Literal::Duration(_) => "duration",
            Literal::Link(_) => "link",
            Literal::List(_) => "list",
            Literal::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Literal]> {
        match self {
            Literal::List(items) => Some(items),
            _ => None,
        }
    }

    /// Compare two values of the same tag.
    ///
    /// Returns `None` when the tags differ or the values have no order
    /// (NaN, unequal objects).
    pub fn compare(&self, other: &Literal) -> Option<Ordering> {
        match (self, other) {
            (Literal::Null, Literal::Null) => Some(Ordering::Equal),
            (Literal::Boolean(a), Literal::Boolean(b)) => Some(a.cmp(b)),
            (Literal::Number(a), Literal::Number(b)) => a.partial_cmp(b),
            (Literal::String(a), Literal::String(b)) => Some(a.cmp(b)),
            (Literal::Date(a), Literal::Date(b)) => Some(a.cmp(b)),
            (Literal::Duration(a), Literal::Duration(b)) => Some(a.cmp(b)),
            (Literal::Link(a), Literal::Link(b)) => Some(a.key().cmp(&b.key())),
            (Literal::List(a), Literal::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        unequal => return Some(unequal),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (Literal::Object(a), Literal::Object(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Keys under which this value is placed in a sorted field index.
    ///
    /// Lists contribute one key per scalar element.
    pub(crate) fn index_keys(&self) -> Vec<IndexKey> {
        match self {
            Literal::List(items) => items.iter().filter_map(IndexKey::from_literal).collect(),
            other => IndexKey::from_literal(other).into_iter().collect(),
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Null, Literal::Null) => true,
            (Literal::Boolean(a), Literal::Boolean(b)) => a == b,
            (Literal::Number(a), Literal::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Literal::String(a), Literal::String(b)) => a == b,
            (Literal::Date(a), Literal::Date(b)) => a == b,
            (Literal::Duration(a), Literal::Duration(b)) => a == b,
            (Literal::Link(a), Literal::Link(b)) => a == b,
            (Literal::List(a), Literal::List(b)) => a == b,
            (Literal::Object(a), Literal::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Literal::Date(d) => {
                if d.time() == chrono::NaiveTime::MIN {
                    write!(f, "date(\"{}\")", d.date())
                } else {
                    write!(f, "date(\"{}\")", d.format("%Y-%m-%dT%H:%M:%S"))
                }
            }
            Literal::Duration(d) => write!(f, "{}ms", d.num_milliseconds()),
            Literal::Link(link) => write!(f, "{}", link),
            Literal::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Literal::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Number(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Number(value as f64)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::Number(value as f64)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::String(value)
    }
}

impl From<NaiveDate> for Literal {
    fn from(value: NaiveDate) -> Self {
        Literal::Date(value.and_time(chrono::NaiveTime::MIN))
    }
}

impl From<NaiveDateTime> for Literal {
    fn from(value: NaiveDateTime) -> Self {
        Literal::Date(value)
    }
}

impl From<Duration> for Literal {
    fn from(value: Duration) -> Self {
        Literal::Duration(value)
    }
}

impl From<Link> for Literal {
    fn from(value: Link) -> Self {
        Literal::Link(value)
    }
}

impl From<Vec<Literal>> for Literal {
    fn from(value: Vec<Literal>) -> Self {
        Literal::List(value)
    }
}

/// Frontmatter arrives as JSON from the parsing collaborator. Strings that
/// look like ISO dates become dates and `[[wiki links]]` become links.
impl From<serde_json::Value> for Literal {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Literal::Null,
            serde_json::Value::Bool(b) => Literal::Boolean(b),
            serde_json::Value::Number(n) => n.as_f64().map(Literal::Number).unwrap_or(Literal::Null),
            serde_json::Value::String(s) => {
                if let Some(date) = parse_date(&s) {
                    Literal::Date(date)
                } else if s.starts_with("[[") && s.ends_with("]]") && s.len() > 4 {
                    Literal::Link(Link::parse(&s))
                } else {
                    Literal::String(s)
                }
            }
            serde_json::Value::Array(items) => {
                Literal::List(items.into_iter().map(Literal::from).collect())
            }
            serde_json::Value::Object(map) => Literal::Object(
                map.into_iter()
                    .map(|(k, v)| (k.to_lowercase(), Literal::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Parse `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM[:SS]`.
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_time(chrono::NaiveTime::MIN));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
        .ok()
}

/// Totally ordered number wrapper for index keys. NaN is never indexed.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OrderedNumber(f64);

impl PartialEq for OrderedNumber {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrderedNumber {}

impl PartialOrd for OrderedNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sort key for the per-field value index.
///
/// Keys order by tag first, so every value of one tag forms a contiguous
/// range in a `BTreeMap`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum IndexKey {
    Boolean(bool),
    Number(OrderedNumber),
    String(String),
    Date(NaiveDateTime),
    Duration(Duration),
    Link(String),
}

impl IndexKey {
    pub(crate) fn from_literal(literal: &Literal) -> Option<IndexKey> {
        match literal {
            Literal::Boolean(b) => Some(IndexKey::Boolean(*b)),
            Literal::Number(n) if n.is_nan() => None,
            // -0.0 and 0.0 compare equal as literals
            Literal::Number(n) => Some(IndexKey::Number(OrderedNumber(if *n == 0.0 { 0.0 } else { *n }))),
            Literal::String(s) => Some(IndexKey::String(s.clone())),
            Literal::Date(d) => Some(IndexKey::Date(*d)),
            Literal::Duration(d) => Some(IndexKey::Duration(*d)),
            Literal::Link(link) => Some(IndexKey::Link(link.key())),
            Literal::Null | Literal::List(_) | Literal::Object(_) => None,
        }
    }

    pub(crate) fn same_tag(&self, other: &IndexKey) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(millis))
    }
}
