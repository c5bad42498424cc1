/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use pull_stream::StreamError;

/// A consumer attached to a [`Subscribable`].
pub trait Subscriber<T>: Send {
    /// Deliver one value. The returned number is the subscriber's demand
    /// hint (its `desired_size`); an `Err` marks the subscriber as failed:
    /// the subscribable reports the error back to it alone and detaches it.
    fn next(&mut self, value: T) -> Result<i64, StreamError>;

    /// Producer-side completion. Delivered at most once.
    fn complete(&mut self);

    /// Producer-side error. Delivered at most once.
    fn error(&mut self, error: StreamError);
}

#[derive(Clone)]
enum Terminal {
    Complete,
    Error(StreamError),
}

struct Entry<T> {
    id: u64,
    closed: Arc<AtomicBool>,
    subscriber: Arc<Mutex<dyn Subscriber<T>>>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            closed: Arc::clone(&self.closed),
            subscriber: Arc::clone(&self.subscriber),
        }
    }
}

struct Fanout<T> {
    subscribers: Vec<Entry<T>>,
    terminal: Option<Terminal>,
    next_id: u64,
}

/// The plain multicast primitive: an ordered list of subscribers fed
/// imperatively, without any stream facade.
///
/// Delivery iterates over a snapshot of the list, so a subscriber that
/// unsubscribes (itself or a sibling) during `next` cannot corrupt the
/// iteration. Terminal events are delivered to every live subscriber
/// exactly once and make the subscribable sticky-closed.
pub struct Subscribable<T> {
    fanout: Arc<Mutex<Fanout<T>>>,
}

impl<T> Clone for Subscribable<T> {
    fn clone(&self) -> Self {
        Self {
            fanout: Arc::clone(&self.fanout),
        }
    }
}

impl<T> Default for Subscribable<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscribable<T>
where
    T: Clone + Send + 'static,
{
    /// New, open subscribable with no subscribers.
    pub fn new() -> Self {
        Self {
            fanout: Arc::new(Mutex::new(Fanout {
                subscribers: Vec::new(),
                terminal: None,
                next_id: 0,
            })),
        }
    }

    /// Attach a subscriber.
    ///
    /// On an already-terminated subscribable the subscriber immediately
    /// observes the sticky terminal event and the returned handle is
    /// closed.
    pub fn subscribe(&self, subscriber: impl Subscriber<T> + 'static) -> SubscriptionHandle {
        let entry = {
            let mut fanout = self.lock();
            if let Some(terminal) = fanout.terminal.clone() {
                drop(fanout);
                let mut subscriber = subscriber;
                match terminal {
                    Terminal::Complete => subscriber.complete(),
                    Terminal::Error(error) => subscriber.error(error),
                }
                return SubscriptionHandle::already_closed();
            }
            let id = fanout.next_id;
            fanout.next_id += 1;
            let entry = Entry {
                id,
                closed: Arc::new(AtomicBool::new(false)),
                subscriber: Arc::new(Mutex::new(subscriber)),
            };
            fanout.subscribers.push(entry.clone());
            entry
        };
        let this = self.clone();
        let id = entry.id;
        SubscriptionHandle {
            closed: entry.closed,
            unsubscribe: Arc::new(Mutex::new(Some(Box::new(move || this.detach(id))))),
        }
    }

    /// Deliver `value` to every live subscriber in registration order.
    ///
    /// Returns the minimum demand hint across live subscribers, `0` when
    /// none remain (the value is discarded) or the subscribable is closed.
    pub fn next(&self, value: T) -> i64 {
        let snapshot = {
            let fanout = self.lock();
            if fanout.terminal.is_some() {
                return 0;
            }
            fanout.subscribers.clone()
        };
        if snapshot.is_empty() {
            return 0;
        }
        let mut min_hint = i64::MAX;
        let mut live = 0i64;
        for entry in snapshot {
            if entry.closed.load(Ordering::SeqCst) {
                continue;
            }
            let delivered = {
                let mut subscriber = entry.subscriber.lock().expect("subscriber poisoned");
                subscriber.next(value.clone())
            };
            match delivered {
                Ok(hint) => {
                    live += 1;
                    min_hint = min_hint.min(hint);
                }
                Err(error) => {
                    // The failure belongs to this subscriber alone.
                    {
                        let mut subscriber = entry.subscriber.lock().expect("subscriber poisoned");
                        subscriber.error(error);
                    }
                    entry.closed.store(true, Ordering::SeqCst);
                    self.detach(entry.id);
                }
            }
        }
        if live == 0 { 0 } else { min_hint }
    }

    /// Complete every live subscriber and close the subscribable.
    /// Idempotent.
    pub fn complete(&self) {
        let drained = {
            let mut fanout = self.lock();
            if fanout.terminal.is_some() {
                return;
            }
            fanout.terminal = Some(Terminal::Complete);
            std::mem::take(&mut fanout.subscribers)
        };
        for entry in drained {
            if !entry.closed.swap(true, Ordering::SeqCst) {
                let mut subscriber = entry.subscriber.lock().expect("subscriber poisoned");
                subscriber.complete();
            }
        }
    }

    /// Error every live subscriber and close the subscribable. Idempotent.
    pub fn error(&self, error: StreamError) {
        let drained = {
            let mut fanout = self.lock();
            if fanout.terminal.is_some() {
                return;
            }
            fanout.terminal = Some(Terminal::Error(error.clone()));
            std::mem::take(&mut fanout.subscribers)
        };
        for entry in drained {
            if !entry.closed.swap(true, Ordering::SeqCst) {
                let mut subscriber = entry.subscriber.lock().expect("subscriber poisoned");
                subscriber.error(error.clone());
            }
        }
    }

    /// Whether a terminal event was delivered.
    pub fn is_closed(&self) -> bool {
        self.lock().terminal.is_some()
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn detach(&self, id: u64) {
        let mut fanout = self.lock();
        if let Some(index) = fanout.subscribers.iter().position(|e| e.id == id) {
            let entry = fanout.subscribers.remove(index);
            entry.closed.store(true, Ordering::SeqCst);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Fanout<T>> {
        self.fanout.lock().expect("subscriber list poisoned")
    }
}

/// Handle returned by [`Subscribable::subscribe`].
pub struct SubscriptionHandle {
    closed: Arc<AtomicBool>,
    unsubscribe: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl SubscriptionHandle {
    fn already_closed() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(true)),
            unsubscribe: Arc::new(Mutex::new(None)),
        }
    }

    /// Detach the subscriber. Idempotent; siblings are unaffected.
    pub fn unsubscribe(&self) {
        let action = self
            .unsubscribe
            .lock()
            .expect("subscription handle poisoned")
            .take();
        if let Some(action) = action {
            action();
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the subscription has ended, by unsubscribing or by a
    /// terminal event.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collecting {
        seen: Arc<Mutex<Vec<i64>>>,
        outcome: Arc<Mutex<Option<String>>>,
        fail_on: Option<i64>,
    }

    impl Subscriber<i64> for Collecting {
        fn next(&mut self, value: i64) -> Result<i64, StreamError> {
            if self.fail_on == Some(value) {
                return Err(StreamError::other("subscriber choked"));
            }
            self.seen.lock().unwrap().push(value);
            Ok(1)
        }

        fn complete(&mut self) {
            *self.outcome.lock().unwrap() = Some("complete".to_string());
        }

        fn error(&mut self, error: StreamError) {
            *self.outcome.lock().unwrap() = Some(format!("error: {error}"));
        }
    }

    #[allow(clippy::type_complexity)]
    fn collecting(
        fail_on: Option<i64>,
    ) -> (Collecting, Arc<Mutex<Vec<i64>>>, Arc<Mutex<Option<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let outcome = Arc::new(Mutex::new(None));
        (
            Collecting {
                seen: Arc::clone(&seen),
                outcome: Arc::clone(&outcome),
                fail_on,
            },
            seen,
            outcome,
        )
    }

    #[test]
    fn fan_out_in_registration_order_with_min_hint() {
        let subscribable = Subscribable::new();
        let (a, seen_a, _) = collecting(None);
        let (b, seen_b, _) = collecting(None);
        subscribable.subscribe(a);
        subscribable.subscribe(b);

        assert_eq!(subscribable.next(1), 1);
        assert_eq!(subscribable.next(2), 1);
        assert_eq!(*seen_a.lock().unwrap(), vec![1, 2]);
        assert_eq!(*seen_b.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn no_subscribers_discards_and_reports_zero() {
        let subscribable = Subscribable::<i64>::new();
        assert_eq!(subscribable.next(1), 0);
        assert!(!subscribable.is_closed());
    }

    #[test]
    fn failing_subscriber_is_detached_alone() {
        let subscribable = Subscribable::new();
        let (bad, seen_bad, outcome_bad) = collecting(Some(2));
        let (good, seen_good, outcome_good) = collecting(None);
        subscribable.subscribe(bad);
        subscribable.subscribe(good);

        subscribable.next(1);
        subscribable.next(2);
        subscribable.next(3);

        assert_eq!(*seen_bad.lock().unwrap(), vec![1]);
        assert_eq!(
            outcome_bad.lock().unwrap().as_deref(),
            Some("error: subscriber choked")
        );
        assert_eq!(*seen_good.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(outcome_good.lock().unwrap().as_deref(), None);
        assert_eq!(subscribable.subscriber_count(), 1);
    }

    #[test]
    fn terminal_events_delivered_exactly_once() {
        let subscribable = Subscribable::<i64>::new();
        let (a, _, outcome) = collecting(None);
        subscribable.subscribe(a);

        subscribable.complete();
        subscribable.complete();
        subscribable.error(StreamError::other("late"));
        assert_eq!(outcome.lock().unwrap().as_deref(), Some("complete"));
        assert!(subscribable.is_closed());
    }

    #[test]
    fn late_subscriber_sees_sticky_terminal() {
        let subscribable = Subscribable::<i64>::new();
        subscribable.error(StreamError::other("gone"));
        let (late, _, outcome) = collecting(None);
        let handle = subscribable.subscribe(late);
        assert!(handle.is_closed());
        assert_eq!(outcome.lock().unwrap().as_deref(), Some("error: gone"));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let subscribable = Subscribable::new();
        let (a, seen, _) = collecting(None);
        let handle = subscribable.subscribe(a);
        subscribable.next(1);
        handle.unsubscribe();
        handle.unsubscribe();
        subscribable.next(2);
        assert!(handle.is_closed());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(subscribable.subscriber_count(), 0);
    }
}
