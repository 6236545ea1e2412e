//! Error types for the document index.

use crate::types::RecordId;
use thiserror::Error;

/// What the parser tripped over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    UnexpectedToken,
    UnexpectedEnd,
    UnterminatedString,
    UnterminatedLink,
    UnknownOperator,
    UnknownType,
    InvalidLiteral,
}

/// A query string could not be parsed.
///
/// `offset` is the byte offset of the offending token, or the input length
/// when the input ended too early.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("syntax error at offset {offset}: {message}")]
pub struct SyntaxError {
    pub offset: usize,
    pub kind: SyntaxErrorKind,
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new(kind: SyntaxErrorKind, offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            kind,
            message: message.into(),
        }
    }
}

/// A graph walk met a shape that the mutation pipeline should have
/// prevented.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StructuralFault {
    #[error("record {0} was visited twice while walking the hierarchy")]
    Revisit(RecordId),

    #[error("hierarchy below or above record {id} is deeper than {limit}")]
    DepthExceeded { id: RecordId, limit: usize },
}

/// Failure of a one-shot query or a subscription registration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("structural fault: {0}")]
    Structural(#[from] StructuralFault),
}

/// A mutation batch would leave the store inconsistent. The batch is
/// rejected as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("record {0} is added twice or conflicts with an existing record")]
    DuplicateId(RecordId),

    #[error("record {id} references missing parent {parent}")]
    DanglingParent { id: RecordId, parent: RecordId },

    #[error("record {0} is not a file or page and has no parent")]
    Orphan(RecordId),

    #[error("parent chain of record {0} loops back on itself")]
    ParentCycle(RecordId),
}

/// Main error type for datastore operations.
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("ingest queue is closed")]
    QueueClosed,

    #[error("failed to start ingest worker: {0}")]
    Worker(#[from] std::io::Error),
}

impl From<SyntaxError> for DatastoreError {
    fn from(e: SyntaxError) -> Self {
        DatastoreError::Query(QueryError::Syntax(e))
    }
}

/// Result type for datastore operations.
pub type Result<T> = std::result::Result<T, DatastoreError>;
