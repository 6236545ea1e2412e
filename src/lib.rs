//! # Note Index
//!
//! A live, queryable in-memory index over interlinked documents: files,
//! pages, sections, blocks and tasks.
//!
//! ## Core Concepts
//!
//! - **Records**: Typed units with tags, links, fields and a parent
//! - **Indices**: Type, tag, path, link and field lookups kept in step with
//!   every write
//! - **Queries**: A small language (`@task and #project and priority > 1`)
//!   evaluated set-at-a-time
//! - **Subscriptions**: Live queries that receive `{added, removed,
//!   changed}` diffs after every batch
//!
//! ## Example
//!
//! ```ignore
//! use noteindex::{Datastore, DatastoreConfig, Operation, Record, RecordId};
//!
//! let store = Datastore::new(DatastoreConfig::default());
//!
//! // Apply a batch
//! store.ingest(vec![
//!     Operation::Add(Record::page(RecordId(1), "Projects/alpha.md").with_tag("project")),
//!     Operation::Add(Record::task(RecordId(2), RecordId(1), "Projects/alpha.md", "Ship", ' ')),
//! ])?;
//!
//! // Query once
//! let open = store.query("@task and !completed = true and childof(#project)")?;
//!
//! // Or keep the result live
//! let handle = store.subscribe("@task and #urgent", |diff| {
//!     println!("+{:?} -{:?} ~{:?}", diff.added, diff.removed, diff.changed);
//! })?;
//! ```

pub mod error;
pub mod literal;
pub mod mutation;
pub mod pipeline;
pub mod query;
pub mod records;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{
    DatastoreError, InvariantViolation, QueryError, Result, StructuralFault, SyntaxError,
    SyntaxErrorKind,
};
pub use literal::Literal;
pub use mutation::{apply_batch, Change, StagedBatch};
pub use pipeline::{IngestQueue, IngestSender};
pub use query::{explain, parse, CompareOp, Evaluator, IndexQuery};
pub use records::{RecordStore, SecondaryIndex};
pub use store::{Datastore, DatastoreConfig, Snapshot};
pub use subscriptions::{
    ChannelSubscription, DropReason, MatchDiff, SubscriptionEvent, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
