/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::sync::Arc;
use std::sync::Mutex;
use std::task::Poll;

use futures::future::poll_fn;
use futures::future::select;
use futures::future::Either;
use futures::pin_mut;

use crate::controller::lock_shared;
use crate::controller::Controller;
use crate::controller::Lifecycle;
use crate::controller::Shared;
use crate::error::StreamError;
use crate::stream::Machine;

/// The exclusive consumer handle on a [`ValueStream`].
///
/// Holding the reader is holding the stream's lock; while it is live no
/// other reader can be acquired. Dropping the reader releases the lock
/// without terminating the stream.
///
/// [`ValueStream`]: crate::ValueStream
pub struct Reader<T: Send + 'static> {
    shared: Arc<Mutex<Shared<T>>>,
    ctl: Controller<T>,
    slot: Arc<Mutex<Option<Machine<T>>>>,
    machine: Option<Machine<T>>,
}

impl<T: Send + 'static> std::fmt::Debug for Reader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader").finish_non_exhaustive()
    }
}

enum Step<T> {
    Item(T),
    Done,
    Fail(StreamError),
    Start,
    Pull(u64),
    Wait(u64),
}

impl<T: Send + 'static> Reader<T> {
    pub(crate) fn new(
        shared: Arc<Mutex<Shared<T>>>,
        slot: Arc<Mutex<Option<Machine<T>>>>,
        machine: Machine<T>,
    ) -> Self {
        let ctl = Controller::new(Arc::clone(&shared));
        Self {
            shared,
            ctl,
            slot,
            machine: Some(machine),
        }
    }

    /// Advance the stream by one item.
    ///
    /// `Ok(Some(v))` is the next value, `Ok(None)` the terminal done signal.
    /// A producer error surfaces as `Err` exactly once; reads after any
    /// terminal signal keep returning `Ok(None)`.
    ///
    /// The future is cancel safe: dropping it mid-flight never loses a
    /// value, since values leave the queue only at the moment the future
    /// resolves.
    pub async fn read(&mut self) -> Result<Option<T>, StreamError> {
        loop {
            match self.next_step()? {
                Step::Item(value) => return Ok(Some(value)),
                Step::Done => return Ok(None),
                Step::Fail(error) => return Err(error),
                Step::Start => {
                    let machine = match self.machine.as_mut() {
                        Some(machine) => machine,
                        None => continue,
                    };
                    if let Err(error) = machine.source.start(&self.ctl) {
                        let _ = self.ctl.error(error);
                    }
                    let mut shared = lock_shared(&self.shared);
                    if shared.lifecycle == Lifecycle::Unstarted {
                        shared.lifecycle = Lifecycle::Active;
                    }
                }
                Step::Pull(seen) => {
                    let machine = match self.machine.as_mut() {
                        Some(machine) => machine,
                        None => continue,
                    };
                    // Race the pull against any state change, so a value
                    // the pull (or a concurrent producer) enqueues is
                    // delivered at once instead of waiting for the whole
                    // pull to finish filling demand. Sources keep their
                    // in-flight state in themselves and tolerate the
                    // abandoned pull.
                    let pull = machine.source.pull(&self.ctl);
                    let changed = wait_for_change(&self.shared, seen);
                    pin_mut!(pull);
                    pin_mut!(changed);
                    match select(pull, changed).await {
                        Either::Left((result, _)) => {
                            if let Err(error) = result {
                                let _ = self.ctl.error(error);
                            }
                            let mut shared = lock_shared(&self.shared);
                            if shared.generation == seen {
                                // The pull changed nothing; park until a
                                // producer shows up rather than spinning.
                                shared.pull_parked = true;
                            }
                        }
                        Either::Right(((), _)) => {}
                    }
                }
                Step::Wait(seen) => wait_for_change(&self.shared, seen).await,
            }
        }
    }

    fn next_step(&mut self) -> Result<Step<T>, StreamError> {
        let mut shared = lock_shared(&self.shared);
        if let Some(value) = shared.queue.pop_front() {
            // Demand opened up; let suspended writers resume.
            for waker in shared.write_wakers.drain(..) {
                waker.wake();
            }
            return Ok(Step::Item(value));
        }
        match shared.lifecycle {
            Lifecycle::Errored => {
                if shared.error_delivered {
                    Ok(Step::Done)
                } else {
                    shared.error_delivered = true;
                    let error = shared
                        .error
                        .clone()
                        .unwrap_or_else(|| StreamError::other("stream errored"));
                    Ok(Step::Fail(error))
                }
            }
            Lifecycle::Closed | Lifecycle::Cancelled => Ok(Step::Done),
            Lifecycle::Unstarted | Lifecycle::Active => {
                let machine = match self.machine.as_ref() {
                    Some(machine) => machine,
                    None => {
                        return Err(StreamError::State {
                            state: "released",
                            operation: "read",
                        });
                    }
                };
                if !machine.started {
                    drop(shared);
                    if let Some(machine) = self.machine.as_mut() {
                        machine.started = true;
                    }
                    Ok(Step::Start)
                } else if shared.pull_parked {
                    Ok(Step::Wait(shared.generation))
                } else {
                    Ok(Step::Pull(shared.generation))
                }
            }
        }
    }

    /// Cancel the stream with a reason.
    ///
    /// Idempotent: only the first cancellation transitions the stream and
    /// runs the source's cancel hook; the queue is discarded either way.
    /// The reader lock is released afterwards.
    pub async fn cancel(&mut self, reason: StreamError) {
        let first = {
            let mut shared = lock_shared(&self.shared);
            if shared.lifecycle.is_terminal() {
                false
            } else {
                shared.lifecycle = Lifecycle::Cancelled;
                shared.queue.clear();
                shared.bump();
                true
            }
        };
        if first {
            if let Some(machine) = self.machine.as_mut() {
                machine.source.cancel(&reason).await;
            }
        }
        self.release_inner();
    }

    /// Give the lock back without terminating the stream. Safe to call on
    /// an already-released reader.
    pub fn release(mut self) {
        self.release_inner();
    }

    /// Gap between the high water mark and the buffered item count.
    pub fn desired_size(&self) -> i64 {
        self.ctl.desired_size()
    }

    fn release_inner(&mut self) {
        if let Some(machine) = self.machine.take() {
            *self.slot.lock().expect("stream machine poisoned") = Some(machine);
        }
    }
}

impl<T: Send + 'static> Drop for Reader<T> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Park until the shared generation moves past `seen`.
async fn wait_for_change<T>(shared: &Arc<Mutex<Shared<T>>>, seen: u64) {
    poll_fn(|cx| {
        let mut guard = lock_shared(shared);
        if guard.generation != seen {
            Poll::Ready(())
        } else {
            guard.read_waker = Some(cx.waker().clone());
            Poll::Pending
        }
    })
    .await;
    lock_shared(shared).read_waker = None;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    use futures::future::BoxFuture;

    use super::*;
    use crate::stream::Source;
    use crate::stream::ValueStream;

    struct CancelSpy {
        flag: Arc<AtomicBool>,
        reason: Arc<Mutex<Option<StreamError>>>,
    }

    impl Source for CancelSpy {
        type Item = u32;

        fn pull<'a>(
            &'a mut self,
            ctl: &'a Controller<u32>,
        ) -> BoxFuture<'a, Result<(), StreamError>> {
            Box::pin(async move {
                ctl.enqueue(1)?;
                Ok(())
            })
        }

        fn cancel<'a>(&'a mut self, reason: &'a StreamError) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.flag.store(true, Ordering::SeqCst);
                *self.reason.lock().unwrap() = Some(reason.clone());
            })
        }
    }

    #[tokio::test]
    async fn cancel_runs_hook_once_with_reason() {
        let flag = Arc::new(AtomicBool::new(false));
        let reason = Arc::new(Mutex::new(None));
        let stream = ValueStream::new(CancelSpy {
            flag: Arc::clone(&flag),
            reason: Arc::clone(&reason),
        });
        let mut reader = stream.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));

        reader.cancel(StreamError::cancelled("enough")).await;
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(
            *reason.lock().unwrap(),
            Some(StreamError::cancelled("enough"))
        );

        // Cancel released the lock; the stream stays terminal.
        let mut reader = stream.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), None);
        flag.store(false, Ordering::SeqCst);
        reader.cancel(StreamError::cancelled("again")).await;
        assert!(!flag.load(Ordering::SeqCst), "hook must not rerun");
    }

    #[tokio::test]
    async fn cancel_discards_buffered_values() {
        let stream = ValueStream::from_iter(vec![1, 2, 3]);
        let mut reader = stream.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        reader.cancel(StreamError::cancelled("done early")).await;
        let mut reader = stream.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), None);
    }
}
