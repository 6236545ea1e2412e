//! Subscription types for live query results.

use super::manager::SubscriptionManager;
use crate::types::{IdSet, MatchSet, RecordId};
use serde::{Deserialize, Serialize};
use std::sync::Weak;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Change of a subscription's result set caused by one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDiff {
    /// Ids that entered the result.
    pub added: MatchSet,
    /// Ids that left the result.
    pub removed: MatchSet,
    /// Ids that stayed in the result while their record was updated.
    pub changed: MatchSet,
}

impl MatchDiff {
    /// Diff two result sets; `updated` lists the ids the batch rewrote.
    pub fn between(old: &MatchSet, new: &MatchSet, updated: &IdSet) -> Self {
        Self {
            added: new.difference(old).copied().collect(),
            removed: old.difference(new).copied().collect(),
            changed: updated
                .iter()
                .filter(|id| old.contains(id) && new.contains(id))
                .copied()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Apply this diff to a previous result set.
    pub fn apply_to(&self, result: &mut MatchSet) {
        for id in &self.removed {
            result.remove(id);
        }
        result.extend(self.added.iter().copied());
    }

    pub fn touches(&self, id: RecordId) -> bool {
        self.added.contains(&id) || self.removed.contains(&id) || self.changed.contains(&id)
    }
}

/// Events delivered to channel subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    /// The result set changed.
    Diff { diff: MatchDiff },

    /// Subscription was dropped; no further events follow.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Handle to a live query.
///
/// Dropping the handle does not end the subscription; call
/// [`SubscriptionHandle::unsubscribe`].
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    pub(crate) id: SubscriptionId,
    pub(crate) initial: MatchSet,
    pub(crate) manager: Weak<SubscriptionManager>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Result set at registration time.
    pub fn initial(&self) -> &MatchSet {
        &self.initial
    }

    /// Stop delivery. Once this returns no callback for this subscription
    /// is running or will start, unless called from inside that callback,
    /// which then finishes normally. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(self.id);
        }
    }

    /// Whether the subscription still receives updates.
    pub fn is_active(&self) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|manager| manager.is_active(self.id))
    }
}

/// Handle to a live query whose diffs arrive over a bounded channel.
///
/// A subscriber that lets the buffer fill up is dropped.
#[derive(Debug)]
pub struct ChannelSubscription {
    pub handle: SubscriptionHandle,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<SubscriptionEvent>,
}

impl ChannelSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.handle.id
    }

    pub fn initial(&self) -> &MatchSet {
        &self.handle.initial
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<SubscriptionEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<SubscriptionEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<SubscriptionEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(raw: &[u64]) -> MatchSet {
        raw.iter().map(|&n| RecordId(n)).collect()
    }

    #[test]
    fn test_diff_between() {
        let diff = MatchDiff::between(&set(&[1, 2, 3]), &set(&[2, 3, 4]), &set(&[1, 3, 4, 9]));
        assert_eq!(diff.added, set(&[4]));
        assert_eq!(diff.removed, set(&[1]));
        assert_eq!(diff.changed, set(&[3]));
        assert!(diff.touches(RecordId(3)));
        assert!(!diff.touches(RecordId(2)));

        let mut result = set(&[1, 2, 3]);
        diff.apply_to(&mut result);
        assert_eq!(result, set(&[2, 3, 4]));
    }

    #[test]
    fn test_empty_diff() {
        let diff = MatchDiff::between(&set(&[1, 2]), &set(&[1, 2]), &set(&[7]));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = SubscriptionEvent::Dropped {
            reason: DropReason::BufferOverflow,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "dropped");
        assert_eq!(json["reason"], "buffer_overflow");
    }
}
