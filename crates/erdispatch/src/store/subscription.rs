//! Realtime views over emergency calls.
//!
//! A [`Subscription`] follows the result set of a [`CallQuery`]. It starts by
//! yielding every current match as [`ChangeKind::Added`], then re-runs the
//! query whenever the store commits a write in this process, and on a fixed
//! poll interval so that writes from other processes sharing the database
//! file are seen too. Each re-query is diffed against the previous snapshot
//! using the call's revision.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::model::EmergencyCall;

use super::Store;

/// The predicate a subscription follows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallQuery {
    /// One call, as its requester sees it.
    Call(String),
    /// Pending calls broadcast to a hospital that it has not declined.
    PendingFor(String),
    /// Calls a hospital has accepted and not yet completed.
    AcceptedBy(String),
}

impl fmt::Display for CallQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call(id) => write!(f, "call {id}"),
            Self::PendingFor(hospital) => write!(f, "pending for {hospital}"),
            Self::AcceptedBy(hospital) => write!(f, "accepted by {hospital}"),
        }
    }
}

/// How a call's membership in the result set changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The call entered the result set.
    Added,
    /// The call is still in the result set but was written to.
    Modified,
    /// The call left the result set, or was deleted.
    Removed,
}

/// One change to a subscription's result set.
#[derive(Debug, Clone, PartialEq)]
pub struct CallChange {
    /// What happened.
    pub kind: ChangeKind,
    /// The call after the change; for removals, its last observed state.
    pub call: EmergencyCall,
}

/// Shared close signal for a subscription.
///
/// Cloning the handle yields another reference to the same signal, so a
/// handle kept in a [`SubscriptionSet`] can close a subscription that is
/// being polled elsewhere.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    query: CallQuery,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl SubscriptionHandle {
    fn new(query: CallQuery) -> Self {
        Self {
            query,
            closed: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// The query of the subscription this handle controls.
    #[must_use]
    pub fn query(&self) -> &CallQuery {
        &self.query
    }

    /// Close the subscription. Its next `next()` returns `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Check if the subscription has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn closed(&self) {
        while !self.is_closed() {
            self.notify.notified().await;
        }
    }
}

/// Collects subscription handles so that a screen or task can tear all of
/// its listeners down at once.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    handles: Vec<SubscriptionHandle>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a subscription's handle.
    pub fn add(&mut self, handle: SubscriptionHandle) {
        self.handles.push(handle);
    }

    /// Close every tracked subscription and forget them.
    pub fn close_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.close();
        }
    }

    /// Number of tracked handles.
    #[must_use]
    pub fn count(&self) -> usize {
        self.handles.len()
    }

    /// Number of tracked subscriptions that are still open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_closed()).count()
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// A live view over the calls matching a [`CallQuery`].
///
/// Dropping the subscription releases it.
#[derive(Debug)]
pub struct Subscription {
    store: Store,
    handle: SubscriptionHandle,
    commits: broadcast::Receiver<u64>,
    poll_period: Duration,
    poll: Option<Interval>,
    snapshot: HashMap<String, EmergencyCall>,
    queued: VecDeque<CallChange>,
}

impl Subscription {
    pub(super) fn new(
        store: Store,
        query: CallQuery,
        commits: broadcast::Receiver<u64>,
        poll_period: Duration,
        initial: Vec<EmergencyCall>,
    ) -> Self {
        let mut subscription = Self {
            store,
            handle: SubscriptionHandle::new(query),
            commits,
            poll_period,
            poll: None,
            snapshot: HashMap::new(),
            queued: VecDeque::new(),
        };
        subscription.apply(initial);
        subscription
    }

    /// The followed query.
    #[must_use]
    pub fn query(&self) -> &CallQuery {
        &self.handle.query
    }

    /// A handle that can close this subscription from elsewhere.
    #[must_use]
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Calls currently in the result set, as last observed.
    #[must_use]
    pub fn current(&self) -> Vec<&EmergencyCall> {
        self.snapshot.values().collect()
    }

    /// Close the subscription.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Wait for the next change.
    ///
    /// Returns `None` once the subscription has been closed. Must be polled
    /// from within a tokio runtime.
    pub async fn next(&mut self) -> Option<CallChange> {
        loop {
            if self.handle.is_closed() {
                return None;
            }
            if let Some(change) = self.queued.pop_front() {
                return Some(change);
            }

            let period = self.poll_period;
            let poll = self.poll.get_or_insert_with(|| {
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });

            tokio::select! {
                () = self.handle.closed() => return None,
                received = self.commits.recv() => {
                    if let Err(broadcast::error::RecvError::Lagged(skipped)) = received {
                        debug!(query = %self.handle.query, skipped, "subscription lagged behind commits");
                    }
                }
                _ = poll.tick() => {}
            }

            self.refresh();
        }
    }

    fn refresh(&mut self) {
        match self.store.query_calls(&self.handle.query) {
            Ok(calls) => self.apply(calls),
            Err(err) => {
                warn!(query = %self.handle.query, error = %err, "subscription re-query failed");
            }
        }
    }

    fn apply(&mut self, calls: Vec<EmergencyCall>) {
        let mut next = HashMap::with_capacity(calls.len());
        for call in calls {
            match self.snapshot.remove(&call.id) {
                None => self.queued.push_back(CallChange {
                    kind: ChangeKind::Added,
                    call: call.clone(),
                }),
                Some(previous) if previous.revision != call.revision => {
                    self.queued.push_back(CallChange {
                        kind: ChangeKind::Modified,
                        call: call.clone(),
                    });
                }
                Some(_) => {}
            }
            next.insert(call.id.clone(), call);
        }

        let mut removed: Vec<EmergencyCall> = self.snapshot.drain().map(|(_, c)| c).collect();
        removed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for call in removed {
            self.queued.push_back(CallChange {
                kind: ChangeKind::Removed,
                call,
            });
        }

        self.snapshot = next;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.close();
    }
}
