//! Subscription manager: relevance filtering, diffing and ordered delivery.

use crate::mutation::StagedBatch;
use crate::query::{matches_record, Evaluator, IndexQuery};
use crate::types::{IdSet, MatchSet};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{
    ChannelSubscription, DropReason, MatchDiff, SubscriptionEvent, SubscriptionHandle,
    SubscriptionId,
};

/// Callback invoked with every non-empty diff.
pub type DiffCallback = Box<dyn Fn(&MatchDiff) + Send + Sync>;

enum Sink {
    Callback(DiffCallback),
    /// The channel holds one slot beyond `buffer_size` so the final
    /// `Dropped` event always fits.
    Channel {
        sender: Sender<SubscriptionEvent>,
        buffer_size: usize,
    },
}

/// Internal subscription state.
struct Subscription {
    id: SubscriptionId,
    query: Arc<IndexQuery>,
    /// Result set as of the last delivered diff. Written only by the writer.
    last_match: Mutex<MatchSet>,
    active: AtomicBool,
    /// Held while a callback runs; `unsubscribe` waits on it.
    gate: ReentrantMutex<()>,
    sink: Sink,
}

impl Subscription {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether `batch` can change this subscription's result.
    ///
    /// Membership under a query built from per-record predicates only
    /// depends on the record itself, so such a query is affected exactly
    /// when some touched record matches before or after the batch.
    fn is_relevant(&self, batch: &StagedBatch) -> bool {
        if batch.is_empty() {
            return false;
        }
        if !self.query.is_local() {
            return true;
        }
        batch.changes().iter().any(|change| {
            [&change.before, &change.after]
                .into_iter()
                .flatten()
                .any(|record| matches_record(&self.query, record).unwrap_or(true))
        })
    }
}

struct Notification {
    subscription: Arc<Subscription>,
    diff: MatchDiff,
}

/// Manages live queries and pushes result diffs to them.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<Subscription>>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Diffs waiting for delivery, in batch order.
    outbox: Mutex<VecDeque<Notification>>,
    /// Set while some thread drains the outbox.
    delivering: AtomicBool,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            outbox: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
        }
    }

    /// Register a callback subscription with its already evaluated initial
    /// result. The caller must hold the datastore's writer lock.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        query: Arc<IndexQuery>,
        initial: MatchSet,
        callback: DiffCallback,
    ) -> SubscriptionHandle {
        let id = self.register(query, initial.clone(), Sink::Callback(callback));
        SubscriptionHandle {
            id,
            initial,
            manager: Arc::downgrade(self),
        }
    }

    /// Register a channel subscription with a buffer of `buffer_size`
    /// events.
    pub(crate) fn subscribe_channel(
        self: &Arc<Self>,
        query: Arc<IndexQuery>,
        initial: MatchSet,
        buffer_size: usize,
    ) -> ChannelSubscription {
        let buffer_size = buffer_size.max(1);
        let (sender, receiver) = bounded(buffer_size + 1);
        let id = self.register(
            query,
            initial.clone(),
            Sink::Channel {
                sender,
                buffer_size,
            },
        );
        ChannelSubscription {
            handle: SubscriptionHandle {
                id,
                initial,
                manager: Arc::downgrade(self),
            },
            receiver,
        }
    }

    fn register(&self, query: Arc<IndexQuery>, initial: MatchSet, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(subscription = id.0, query = %query, matches = initial.len(), "subscribed");

        let subscription = Subscription {
            id,
            query,
            last_match: Mutex::new(initial),
            active: AtomicBool::new(true),
            gate: ReentrantMutex::new(()),
            sink,
        };
        self.subscriptions.write().insert(id, Arc::new(subscription));
        id
    }

    /// Unsubscribe and clean up.
    ///
    /// Waits for a callback of this subscription running on another thread.
    /// From inside the callback itself it returns immediately.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let Some(subscription) = self.subscriptions.read().get(&id).cloned() else {
            return;
        };
        subscription.active.store(false, Ordering::Release);
        drop(subscription.gate.lock());

        if self.subscriptions.write().remove(&id).is_some() {
            debug!(subscription = id.0, "unsubscribed");
            if let Sink::Channel { sender, .. } = &subscription.sink {
                // Best effort: the receiver may be gone.
                let _ = sender.try_send(SubscriptionEvent::Dropped {
                    reason: DropReason::Unsubscribed,
                });
            }
        }
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.subscriptions
            .read()
            .get(&id)
            .is_some_and(|subscription| subscription.is_active())
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Recomputation ---

    /// Re-evaluate every subscription `batch` may affect and queue the
    /// non-empty diffs.
    ///
    /// Runs while the writer lock is held and `evaluator` reads the state
    /// the batch produced. A failing evaluation keeps the previous result.
    pub(crate) fn recompute(&self, evaluator: &Evaluator<'_>, batch: &StagedBatch) {
        if batch.is_empty() {
            return;
        }
        let updated: IdSet = batch.delta().updated.into_iter().collect();

        let mut subscriptions: Vec<Arc<Subscription>> =
            self.subscriptions.read().values().cloned().collect();
        subscriptions.sort_by_key(|subscription| subscription.id);

        let mut queued = Vec::new();
        for subscription in subscriptions {
            if !subscription.is_active() || !subscription.is_relevant(batch) {
                continue;
            }
            let next = match evaluator.evaluate(&subscription.query) {
                Ok(next) => next,
                Err(e) => {
                    warn!(
                        subscription = subscription.id.0,
                        query = %subscription.query,
                        error = %e,
                        "recompute failed, keeping previous result"
                    );
                    continue;
                }
            };

            let diff = {
                let mut last = subscription.last_match.lock();
                let diff = MatchDiff::between(&last, &next, &updated);
                *last = next;
                diff
            };
            if !diff.is_empty() {
                queued.push(Notification { subscription, diff });
            }
        }

        if !queued.is_empty() {
            self.outbox.lock().extend(queued);
        }
    }

    // --- Delivery ---

    /// Deliver queued diffs unless another thread already is.
    ///
    /// Must be called with no datastore lock held, so callbacks can query,
    /// ingest or unsubscribe. Diffs queued by a nested ingest are delivered
    /// by the outermost drain, after the current callback returns.
    pub(crate) fn deliver(&self) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            {
                let _draining = DrainGuard(&self.delivering);
                loop {
                    let next = self.outbox.lock().pop_front();
                    let Some(notification) = next else {
                        break;
                    };
                    self.dispatch(notification);
                }
            }
            // A diff queued between the last pop and the flag reset would
            // otherwise wait for the next batch.
            if self.outbox.lock().is_empty() {
                return;
            }
        }
    }

    fn dispatch(&self, notification: Notification) {
        let Notification { subscription, diff } = notification;
        let _gate = subscription.gate.lock();
        if !subscription.is_active() {
            return;
        }
        match &subscription.sink {
            Sink::Callback(callback) => callback(&diff),
            Sink::Channel {
                sender,
                buffer_size,
            } if sender.len() >= *buffer_size => {
                self.drop_subscriber(&subscription, DropReason::BufferOverflow)
            }
            Sink::Channel { sender, .. } => match sender.try_send(SubscriptionEvent::Diff { diff }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.drop_subscriber(&subscription, DropReason::BufferOverflow)
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.drop_subscriber(&subscription, DropReason::Disconnected)
                }
            },
        }
    }

    /// Remove a channel subscriber that failed to receive.
    fn drop_subscriber(&self, subscription: &Subscription, reason: DropReason) {
        subscription.active.store(false, Ordering::Release);
        self.subscriptions.write().remove(&subscription.id);
        warn!(subscription = subscription.id.0, ?reason, "dropping subscriber");
        if let Sink::Channel { sender, .. } = &subscription.sink {
            // Fails only when the receiver is gone.
            let _ = sender.try_send(SubscriptionEvent::Dropped { reason });
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the delivery flag even if a callback panics.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
