//! Live queries.
//!
//! A subscription holds a parsed query and the result set it last reported.
//! After every committed batch the manager:
//! - skips subscriptions the batch cannot affect
//! - re-evaluates the rest against the new state
//! - queues `{added, removed, changed}` diffs, dropping empty ones
//!
//! Queued diffs are delivered in batch order once the writer has released
//! its locks, either to a callback or to a bounded channel whose slow
//! consumers are dropped.
//!
//! # Example
//!
//! ```ignore
//! let subscription = datastore.subscribe_channel("@task and !completed = true", 64)?;
//! println!("open tasks: {}", subscription.initial().len());
//!
//! loop {
//!     match subscription.recv() {
//!         Ok(SubscriptionEvent::Diff { diff }) => println!("{:?}", diff),
//!         Ok(SubscriptionEvent::Dropped { reason }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::{DiffCallback, SubscriptionManager};
pub use types::{
    ChannelSubscription, DropReason, MatchDiff, SubscriptionEvent, SubscriptionHandle,
    SubscriptionId,
};
