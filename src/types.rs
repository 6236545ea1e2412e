//! Core types for the document index.

use crate::literal::Literal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Unique identifier for a record.
///
/// Ids are assigned by the ingestion collaborator and stay stable for the
/// lifetime of the logical unit they name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of record ids. Results are unordered; the `BTreeSet` only makes
/// iteration deterministic.
pub type IdSet = BTreeSet<RecordId>;

/// Result of a one-shot query.
pub type MatchSet = IdSet;

/// Discriminant of [`RecordKind`], used by `@type` filters and the type index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    File,
    Page,
    Section,
    Block,
    Task,
}

impl RecordType {
    pub const ALL: [RecordType; 5] = [
        RecordType::File,
        RecordType::Page,
        RecordType::Section,
        RecordType::Block,
        RecordType::Task,
    ];

    /// Parse a type name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "file" => Some(RecordType::File),
            "page" => Some(RecordType::Page),
            "section" => Some(RecordType::Section),
            "block" => Some(RecordType::Block),
            "task" => Some(RecordType::Task),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::File => "file",
            RecordType::Page => "page",
            RecordType::Section => "section",
            RecordType::Block => "block",
            RecordType::Task => "task",
        }
    }

    /// Files and pages own every other record.
    pub fn is_file(&self) -> bool {
        matches!(self, RecordType::File | RecordType::Page)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific payload of a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecordKind {
    /// Any file in the corpus that is not a markdown page.
    File,
    /// A markdown document.
    Page,
    /// A heading and the content under it.
    Section { title: String, level: u8 },
    /// A paragraph, list or other block, optionally carrying a `^block-id`.
    Block { block_id: Option<String> },
    /// A checklist item. `status` is the character inside `[ ]`.
    Task { text: String, status: char },
}

impl RecordKind {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordKind::File => RecordType::File,
            RecordKind::Page => RecordType::Page,
            RecordKind::Section { .. } => RecordType::Section,
            RecordKind::Block { .. } => RecordType::Block,
            RecordKind::Task { .. } => RecordType::Task,
        }
    }
}

/// Line span of a record inside its file. Orders siblings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub start_line: u32,
    pub end_line: u32,
}

impl Position {
    pub fn lines(start_line: u32, end_line: u32) -> Self {
        Self { start_line, end_line }
    }
}

/// A link to a file, optionally narrowed to a heading (`File#Heading`) or a
/// block (`File#^id`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Link {
    pub path: String,
    pub subpath: Option<String>,
}

impl Link {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            subpath: None,
        }
    }

    pub fn with_subpath(mut self, subpath: impl Into<String>) -> Self {
        self.subpath = Some(subpath.into());
        self
    }

    /// Parse link text such as `Home`, `[[Home#Intro|alias]]` or `Notes/a.md`.
    pub fn parse(text: &str) -> Self {
        let mut inner = text.trim();
        if let Some(stripped) = inner.strip_prefix("[[").and_then(|s| s.strip_suffix("]]")) {
            inner = stripped;
        }
        let target = inner.split('|').next().unwrap_or_default().trim();
        match target.split_once('#') {
            Some((path, subpath)) if !subpath.is_empty() => {
                Link::file(path.trim()).with_subpath(subpath.trim())
            }
            Some((path, _)) => Link::file(path.trim()),
            None => Link::file(target),
        }
    }

    /// The same link without its subpath.
    pub fn to_file(&self) -> Link {
        Link::file(self.path.clone())
    }

    /// Normalized lookup key: the path without a trailing `.md`, plus
    /// `#subpath` when present.
    pub fn key(&self) -> String {
        let path = self.path.strip_suffix(".md").unwrap_or(&self.path);
        match &self.subpath {
            Some(subpath) => format!("{}#{}", path, subpath),
            None => path.to_string(),
        }
    }

    /// Key of the file this link points into.
    pub fn file_key(&self) -> String {
        self.path.strip_suffix(".md").unwrap_or(&self.path).to_string()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subpath {
            Some(subpath) => write!(f, "[[{}#{}]]", self.path, subpath),
            None => write!(f, "[[{}]]", self.path),
        }
    }
}

/// Normalize a tag: drop a leading `#` and lowercase it.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

/// Every hierarchical prefix of a normalized tag: `a/b/c` yields
/// `a`, `a/b`, `a/b/c`.
pub fn tag_prefixes(tag: &str) -> impl Iterator<Item = &str> {
    tag.char_indices()
        .filter(|(_, c)| *c == '/')
        .map(move |(i, _)| &tag[..i])
        .chain(std::iter::once(tag))
        .filter(|prefix| !prefix.is_empty())
}

/// A single indexed unit.
///
/// `children` is not part of the record: the store derives it from the
/// `parent` of every other record, ordered by position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub kind: RecordKind,
    /// Path of the owning file.
    pub path: String,
    pub position: Position,
    pub parent: Option<RecordId>,
    pub tags: BTreeSet<String>,
    pub links: BTreeSet<Link>,
    /// User fields (frontmatter, inline fields). Names are lowercase.
    pub fields: BTreeMap<String, Literal>,
}

impl Record {
    /// Lowercase every field name. Records built with `with_field` are
    /// already in this form; deserialized ones may not be.
    pub(crate) fn with_lowercase_fields(mut self) -> Self {
        if self.fields.keys().any(|name| name.chars().any(char::is_uppercase)) {
            self.fields = std::mem::take(&mut self.fields)
                .into_iter()
                .map(|(name, value)| (name.to_lowercase(), value))
                .collect();
        }
        self
    }

    pub fn new(id: RecordId, kind: RecordKind, path: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            path: path.into(),
            position: Position::default(),
            parent: None,
            tags: BTreeSet::new(),
            links: BTreeSet::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn file(id: RecordId, path: impl Into<String>) -> Self {
        Self::new(id, RecordKind::File, path)
    }

    pub fn page(id: RecordId, path: impl Into<String>) -> Self {
        Self::new(id, RecordKind::Page, path)
    }

    pub fn section(
        id: RecordId,
        parent: RecordId,
        path: impl Into<String>,
        title: impl Into<String>,
        level: u8,
    ) -> Self {
        Self::new(
            id,
            RecordKind::Section {
                title: title.into(),
                level,
            },
            path,
        )
        .with_parent(parent)
    }

    pub fn block(id: RecordId, parent: RecordId, path: impl Into<String>) -> Self {
        Self::new(id, RecordKind::Block { block_id: None }, path).with_parent(parent)
    }

    pub fn task(
        id: RecordId,
        parent: RecordId,
        path: impl Into<String>,
        text: impl Into<String>,
        status: char,
    ) -> Self {
        Self::new(
            id,
            RecordKind::Task {
                text: text.into(),
                status,
            },
            path,
        )
        .with_parent(parent)
    }

    pub fn with_parent(mut self, parent: RecordId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn at_line(self, line: u32) -> Self {
        self.with_position(Position::lines(line, line))
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(normalize_tag(tag));
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.insert(link);
        self
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Literal>) -> Self {
        self.fields.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn record_type(&self) -> RecordType {
        self.kind.record_type()
    }

    /// Tags in normalized form, whatever the caller stored.
    pub fn normalized_tags(&self) -> impl Iterator<Item = String> + '_ {
        self.tags.iter().map(|t| normalize_tag(t)).filter(|t| !t.is_empty())
    }

    /// The link other records use to point at this one, if any.
    pub fn anchor(&self) -> Option<Link> {
        match &self.kind {
            RecordKind::File | RecordKind::Page => Some(Link::file(self.path.clone())),
            RecordKind::Section { title, .. } => {
                Some(Link::file(self.path.clone()).with_subpath(title.clone()))
            }
            RecordKind::Block {
                block_id: Some(block_id),
            } => Some(Link::file(self.path.clone()).with_subpath(format!("^{}", block_id))),
            RecordKind::Block { block_id: None } | RecordKind::Task { .. } => None,
        }
    }

    /// Display title: the file stem for files and pages, the heading for
    /// sections, the text for tasks.
    pub fn title(&self) -> Option<String> {
        match &self.kind {
            RecordKind::File | RecordKind::Page => {
                let name = self.path.rsplit('/').next().unwrap_or(&self.path);
                let stem = match name.rfind('.') {
                    Some(dot) if dot > 0 => &name[..dot],
                    _ => name,
                };
                Some(stem.to_string())
            }
            RecordKind::Section { title, .. } => Some(title.clone()),
            RecordKind::Task { text, .. } => Some(text.clone()),
            RecordKind::Block { .. } => None,
        }
    }

    /// Resolve a field by name.
    ///
    /// `$name` always reads the intrinsic field; a bare name reads the user
    /// field first and falls back to the intrinsic one.
    pub fn field(&self, name: &str) -> Option<Literal> {
        if let Some(intrinsic) = name.strip_prefix('$') {
            return self.intrinsic(&intrinsic.to_lowercase());
        }
        let name = name.to_lowercase();
        match self.fields.get(&name) {
            Some(value) => Some(value.clone()),
            None => self.intrinsic(&name),
        }
    }

    fn intrinsic(&self, name: &str) -> Option<Literal> {
        match name {
            "id" => Some(Literal::Number(self.id.0 as f64)),
            "path" => Some(Literal::String(self.path.clone())),
            "type" => Some(Literal::String(self.record_type().as_str().to_string())),
            "title" => self.title().map(Literal::String),
            "line" => Some(Literal::Number(self.position.start_line as f64)),
            "tags" => Some(Literal::List(
                self.normalized_tags().map(Literal::String).collect(),
            )),
            "links" => Some(Literal::List(
                self.links.iter().cloned().map(Literal::Link).collect(),
            )),
            "level" => match &self.kind {
                RecordKind::Section { level, .. } => Some(Literal::Number(*level as f64)),
                _ => None,
            },
            "blockid" => match &self.kind {
                RecordKind::Block {
                    block_id: Some(block_id),
                } => Some(Literal::String(block_id.clone())),
                _ => None,
            },
            "text" => match &self.kind {
                RecordKind::Task { text, .. } => Some(Literal::String(text.clone())),
                _ => None,
            },
            "status" => match &self.kind {
                RecordKind::Task { status, .. } => Some(Literal::String(status.to_string())),
                _ => None,
            },
            "completed" => match &self.kind {
                RecordKind::Task { status, .. } => {
                    Some(Literal::Boolean(matches!(status, 'x' | 'X')))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

/// One mutation submitted by the ingestion collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "record", rename_all = "snake_case")]
pub enum Operation {
    /// Introduce a record. Re-adding identical content is a no-op; adding a
    /// different record under a live id is rejected.
    Add(Record),
    /// Replace a record, inserting it if it does not exist yet.
    Update(Record),
    /// Remove a record and all of its descendants.
    Remove(RecordId),
}

impl Operation {
    pub fn id(&self) -> RecordId {
        match self {
            Operation::Add(record) | Operation::Update(record) => record.id,
            Operation::Remove(id) => *id,
        }
    }
}

/// Net effect of one committed batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub added: Vec<RecordId>,
    pub updated: Vec<RecordId>,
    pub removed: Vec<RecordId>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}
