//! Record storage.
//!
//! The primary store owns records by id; the secondary index keeps the
//! inverted lookups the query evaluator relies on.

mod index;
mod store;

pub use index::{path_matches, SecondaryIndex};
pub use store::RecordStore;
