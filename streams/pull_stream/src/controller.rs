/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::task::Waker;

use crate::error::StreamError;
use crate::strategy::QueuingStrategy;

/// Lifecycle of a stream. Terminal states are sticky.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Unstarted,
    Active,
    Closed,
    Errored,
    Cancelled,
}

impl Lifecycle {
    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            Lifecycle::Closed | Lifecycle::Errored | Lifecycle::Cancelled
        )
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Lifecycle::Unstarted => "unstarted",
            Lifecycle::Active => "active",
            Lifecycle::Closed => "closed",
            Lifecycle::Errored => "errored",
            Lifecycle::Cancelled => "cancelled",
        }
    }
}

/// State shared between a stream's controller handles, its reader and any
/// push-side writers. Guarded by a mutex that is never held across awaits.
pub(crate) struct Shared<T> {
    pub(crate) queue: VecDeque<T>,
    pub(crate) high_water_mark: usize,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) error: Option<StreamError>,
    pub(crate) error_delivered: bool,
    /// Bumped on every observable state change; readers park against it.
    pub(crate) generation: u64,
    /// Set when the last pull finished without changing state, so reads
    /// park instead of spinning on a push-mode source.
    pub(crate) pull_parked: bool,
    pub(crate) read_waker: Option<Waker>,
    pub(crate) write_wakers: Vec<Waker>,
}

impl<T> Shared<T> {
    pub(crate) fn new(strategy: QueuingStrategy) -> Self {
        Self {
            queue: VecDeque::new(),
            high_water_mark: strategy.high_water_mark,
            lifecycle: Lifecycle::Unstarted,
            error: None,
            error_delivered: false,
            generation: 0,
            pull_parked: false,
            read_waker: None,
            write_wakers: Vec::new(),
        }
    }

    /// Record a state change and wake both sides.
    pub(crate) fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pull_parked = false;
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
        for waker in self.write_wakers.drain(..) {
            waker.wake();
        }
    }

    pub(crate) fn desired_size(&self) -> i64 {
        if self.lifecycle.is_terminal() {
            0
        } else {
            self.high_water_mark as i64 - self.queue.len() as i64
        }
    }
}

pub(crate) fn lock_shared<T>(shared: &Arc<Mutex<Shared<T>>>) -> MutexGuard<'_, Shared<T>> {
    shared.lock().expect("stream state poisoned")
}

/// Write side of a stream's internal queue, handed to [`Source`] hooks.
///
/// Cloneable; all clones act on the same stream. After `close`, `error` or
/// consumer cancellation every mutating call fails with
/// [`StreamError::State`].
///
/// [`Source`]: crate::Source
pub struct Controller<T> {
    pub(crate) shared: Arc<Mutex<Shared<T>>>,
}

impl<T> Clone for Controller<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Controller<T> {
    pub(crate) fn new(shared: Arc<Mutex<Shared<T>>>) -> Self {
        Self { shared }
    }

    /// Append a value to the stream's queue and wake a parked reader.
    ///
    /// Enqueueing past the high water mark is permitted (the default
    /// overflow policy is to buffer); `desired_size` going non-positive is
    /// the producer's signal to pause.
    pub fn enqueue(&self, value: T) -> Result<(), StreamError> {
        let mut shared = lock_shared(&self.shared);
        if shared.lifecycle.is_terminal() {
            return Err(StreamError::State {
                state: shared.lifecycle.name(),
                operation: "enqueue",
            });
        }
        shared.lifecycle = Lifecycle::Active;
        shared.queue.push_back(value);
        shared.bump();
        Ok(())
    }

    /// Mark the stream complete. Buffered values are still delivered before
    /// the terminal signal.
    pub fn close(&self) -> Result<(), StreamError> {
        let mut shared = lock_shared(&self.shared);
        if shared.lifecycle.is_terminal() {
            return Err(StreamError::State {
                state: shared.lifecycle.name(),
                operation: "close",
            });
        }
        shared.lifecycle = Lifecycle::Closed;
        shared.bump();
        Ok(())
    }

    /// Put the stream into the errored state.
    ///
    /// The error preempts buffered values: the queue is discarded and the
    /// next read observes the error. It is delivered to exactly one read;
    /// reads after that observe the done signal.
    pub fn error(&self, error: StreamError) -> Result<(), StreamError> {
        let mut shared = lock_shared(&self.shared);
        if shared.lifecycle.is_terminal() {
            return Err(StreamError::State {
                state: shared.lifecycle.name(),
                operation: "error",
            });
        }
        shared.lifecycle = Lifecycle::Errored;
        shared.queue.clear();
        shared.error = Some(error);
        shared.bump();
        Ok(())
    }

    /// Gap between the high water mark and the queue length. Negative when
    /// a producer has buffered past the mark; zero once the stream is
    /// terminal.
    pub fn desired_size(&self) -> i64 {
        lock_shared(&self.shared).desired_size()
    }

    /// Whether the stream reached a terminal state.
    pub fn is_terminated(&self) -> bool {
        lock_shared(&self.shared).lifecycle.is_terminal()
    }
}

trait ProbeTarget: Send + Sync {
    fn has_parked_reader(&self) -> bool;
    fn is_terminal(&self) -> bool;
}

impl<T: Send> ProbeTarget for Mutex<Shared<T>> {
    fn has_parked_reader(&self) -> bool {
        let shared = self.lock().expect("stream state poisoned");
        shared.read_waker.is_some() && shared.queue.is_empty() && !shared.lifecycle.is_terminal()
    }

    fn is_terminal(&self) -> bool {
        self.lock()
            .expect("stream state poisoned")
            .lifecycle
            .is_terminal()
    }
}

/// Type-erased observation handle onto a stream's read-side state.
///
/// Used by the virtual scheduler to decide whether time must advance for a
/// parked reader to make progress. Holding a probe does not keep the stream
/// producing; it only observes.
#[derive(Clone)]
pub struct ReadProbe {
    target: Arc<dyn ProbeTarget>,
}

impl ReadProbe {
    pub(crate) fn new<T: Send + 'static>(shared: Arc<Mutex<Shared<T>>>) -> Self {
        Self { target: shared }
    }

    /// True while a reader is awaiting a value the buffer cannot satisfy.
    pub fn has_parked_reader(&self) -> bool {
        self.target.has_parked_reader()
    }

    /// True once the observed stream reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.target.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn controller() -> Controller<u32> {
        Controller::new(Arc::new(Mutex::new(Shared::new(QueuingStrategy::new(2)))))
    }

    #[test]
    fn desired_size_tracks_queue() {
        let ctl = controller();
        assert_eq!(ctl.desired_size(), 2);
        ctl.enqueue(1).unwrap();
        assert_eq!(ctl.desired_size(), 1);
        ctl.enqueue(2).unwrap();
        assert_eq!(ctl.desired_size(), 0);
        // Buffering past the mark is allowed; the gap goes negative.
        ctl.enqueue(3).unwrap();
        assert_eq!(ctl.desired_size(), -1);
    }

    #[test]
    fn terminal_states_reject_further_calls() {
        let ctl = controller();
        ctl.close().unwrap();
        assert_matches!(
            ctl.enqueue(1),
            Err(StreamError::State {
                state: "closed",
                operation: "enqueue"
            })
        );
        assert_matches!(ctl.close(), Err(StreamError::State { .. }));
        assert_matches!(
            ctl.error(StreamError::other("late")),
            Err(StreamError::State { .. })
        );
        assert_eq!(ctl.desired_size(), 0);
    }

    #[test]
    fn error_discards_buffered_values() {
        let ctl = controller();
        ctl.enqueue(1).unwrap();
        ctl.error(StreamError::other("boom")).unwrap();
        let shared = ctl.shared.lock().unwrap();
        assert!(shared.queue.is_empty());
        assert_eq!(shared.lifecycle, Lifecycle::Errored);
    }
}
