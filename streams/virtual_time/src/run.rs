/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! The `run` driver: registers marble streams and assertion runners, then
//! drives virtual time until every runner settles.

use std::sync::Arc;
use std::sync::Mutex;
use std::task::Context;
use std::task::Poll;

use futures::future::BoxFuture;
use futures::task::noop_waker;
use pull_stream::StreamError;
use pull_stream::ValueStream;
use tick_clock::ClockHandle;
use tick_clock::SchedulerHandle;

use crate::factory::cold_stream;
use crate::factory::hot_stream;
use crate::marble::parse_marbles;
use crate::marble::parse_time;
use crate::marble::MarbleEvent;
use crate::marble::MarbleKind;
use crate::marble::MarbleValue;
use crate::scheduler::VirtualScheduler;
use crate::scheduler::MAX_RUN_ITERATIONS;
use crate::scheduler::MAX_RUN_TICKS;
use crate::task::ScheduledTaskEvent;

/// Everything a runner observed about one stream, in subscriber-relative
/// ticks.
pub struct StreamRecording<T> {
    /// Observed events, including the terminal one.
    pub events: Vec<MarbleEvent<T>>,
    /// Slice of the executed-task log covering the stream's lifetime,
    /// ticks re-based to the read start.
    pub tasks: Vec<ScheduledTaskEvent>,
}

struct ExpectConfig {
    strict: bool,
    invert: bool,
    validator: Option<Box<dyn Fn(&StreamError) -> bool + Send>>,
}

/// Handle over a registered stream expectation; tweaks apply until the
/// enclosing `run` starts driving.
pub struct Expect {
    config: Arc<Mutex<ExpectConfig>>,
}

impl Expect {
    /// Allow the final terminal event to land one tick early or late.
    pub fn loose(self) -> Self {
        self.config.lock().expect("expectation poisoned").strict = false;
        self
    }

    /// Invert the assertion: it must fail for the runner to pass.
    pub fn should_fail(self) -> Self {
        self.config.lock().expect("expectation poisoned").invert = true;
        self
    }

    /// Invert the assertion and additionally inspect the failure.
    pub fn should_fail_with(
        self,
        validator: impl Fn(&StreamError) -> bool + Send + 'static,
    ) -> Self {
        {
            let mut config = self.config.lock().expect("expectation poisoned");
            config.invert = true;
            config.validator = Some(Box::new(validator));
        }
        self
    }
}

struct PendingRunner {
    description: String,
    fut: BoxFuture<'static, Result<(), StreamError>>,
}

/// Helper API handed to the `run` test function.
pub struct TestHelpers {
    sched: VirtualScheduler,
    runners: Vec<PendingRunner>,
}

impl TestHelpers {
    /// The scheduler itself, for task-level access.
    pub fn scheduler(&self) -> &VirtualScheduler {
        &self.sched
    }

    /// Virtual clock for time-aware operators.
    pub fn clock(&self) -> ClockHandle {
        self.sched.clock()
    }

    /// Virtual yield capability for the `schedule` operator.
    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.sched.scheduler_handle()
    }

    /// Tick duration of a marble diagram.
    pub fn time(&self, marbles: &str) -> u64 {
        parse_time(marbles)
    }

    /// Drain every task scheduled so far, jumping time forward to each
    /// occupied tick, without the bounded runner semantics of the
    /// enclosing drive loop.
    pub fn flush(&self) -> Result<(), StreamError> {
        self.sched.flush_all()
    }

    /// Cold stream from a marble diagram: timing is relative to the first
    /// pull.
    pub fn cold<T: MarbleValue>(
        &self,
        marbles: &str,
        values: &[(char, T)],
    ) -> Result<ValueStream<T>, StreamError> {
        self.cold_err(marbles, values, None)
    }

    /// [`TestHelpers::cold`] with an explicit error for `#`.
    pub fn cold_err<T: MarbleValue>(
        &self,
        marbles: &str,
        values: &[(char, T)],
        error: Option<StreamError>,
    ) -> Result<ValueStream<T>, StreamError> {
        let events = parse_marbles(marbles, values, error)?;
        Ok(cold_stream(&self.sched, events))
    }

    /// Hot stream from a marble diagram: events fire on the absolute
    /// timeline whether or not anyone reads; `^` marks the subscription
    /// point.
    pub fn hot<T: MarbleValue>(
        &self,
        marbles: &str,
        values: &[(char, T)],
    ) -> Result<ValueStream<T>, StreamError> {
        self.hot_err(marbles, values, None)
    }

    /// [`TestHelpers::hot`] with an explicit error for `#`.
    pub fn hot_err<T: MarbleValue>(
        &self,
        marbles: &str,
        values: &[(char, T)],
        error: Option<StreamError>,
    ) -> Result<ValueStream<T>, StreamError> {
        let events = parse_marbles(marbles, values, error)?;
        Ok(hot_stream(&self.sched, events))
    }

    /// Assert that `stream` plays out as `expected` (same events at the
    /// same subscriber-relative ticks). The comparison runs as a runner
    /// when the enclosing `run` drives time.
    pub fn expect_stream<T: MarbleValue>(
        &mut self,
        stream: ValueStream<T>,
        expected: &str,
        values: &[(char, T)],
    ) -> Result<Expect, StreamError> {
        self.expect_stream_err(stream, expected, values, None)
    }

    /// [`TestHelpers::expect_stream`] with an explicit error for `#` in
    /// the expectation.
    pub fn expect_stream_err<T: MarbleValue>(
        &mut self,
        stream: ValueStream<T>,
        expected: &str,
        values: &[(char, T)],
        error: Option<StreamError>,
    ) -> Result<Expect, StreamError> {
        let expected_events = parse_marbles(expected, values, error)?;
        self.sched.register_probe(stream.probe());
        let config = Arc::new(Mutex::new(ExpectConfig {
            strict: true,
            invert: false,
            validator: None,
        }));
        let shared_config = Arc::clone(&config);
        let sched = self.sched.clone();
        let description = format!("expect_stream {expected:?}");
        self.runners.push(PendingRunner {
            description,
            fut: Box::pin(async move {
                let observed = record_stream(&sched, stream).await;
                let verdict = compare_events(
                    &expected_events,
                    &observed,
                    shared_config
                        .lock()
                        .expect("expectation poisoned")
                        .strict,
                );
                let config = shared_config.lock().expect("expectation poisoned");
                if config.invert {
                    match verdict {
                        Ok(()) => Err(StreamError::other(
                            "expected the stream assertion to fail, but it passed",
                        )),
                        Err(failure) => {
                            if let Some(validator) = &config.validator {
                                if !validator(&failure) {
                                    return Err(StreamError::Other(format!(
                                        "assertion failed as expected, but the failure did not \
                                         satisfy the validator: {failure}"
                                    )));
                                }
                            }
                            Ok(())
                        }
                    }
                } else {
                    verdict
                }
            }),
        });
        Ok(Expect { config })
    }

    /// Record `stream` (events plus the executed-task slice over its
    /// lifetime, both re-based to the read start) and hand the recording
    /// to `check` for free-form assertions. Panics in `check` propagate
    /// out of `run`.
    pub fn expect_result<T, F>(&mut self, stream: ValueStream<T>, check: F)
    where
        T: MarbleValue,
        F: FnOnce(&StreamRecording<T>) + Send + 'static,
    {
        self.sched.register_probe(stream.probe());
        let sched = self.sched.clone();
        self.runners.push(PendingRunner {
            description: "expect_result".to_string(),
            fut: Box::pin(async move {
                let tasks_before = sched.executed_tasks().len();
                let start = sched.current_tick();
                let events = record_stream(&sched, stream).await;
                let tasks = sched
                    .executed_tasks()
                    .split_off(tasks_before)
                    .into_iter()
                    .map(|mut event| {
                        event.tick = event.tick.saturating_sub(start);
                        event.scheduled_tick = event.scheduled_tick.saturating_sub(start);
                        event
                    })
                    .collect();
                check(&StreamRecording { events, tasks });
                Ok(())
            }),
        });
    }
}

/// Read a stream to its terminal event, stamping each observation with the
/// subscriber-relative tick.
async fn record_stream<T: Send + 'static>(
    sched: &VirtualScheduler,
    stream: ValueStream<T>,
) -> Vec<MarbleEvent<T>> {
    let mut events = Vec::new();
    let start = sched.current_tick();
    let mut reader = match stream.reader() {
        Ok(reader) => reader,
        Err(error) => {
            events.push(MarbleEvent {
                time: 0,
                kind: MarbleKind::Error(error),
            });
            return events;
        }
    };
    loop {
        let outcome = reader.read().await;
        let time = sched.current_tick() - start;
        match outcome {
            Ok(Some(value)) => events.push(MarbleEvent {
                time,
                kind: MarbleKind::Next(value),
            }),
            Ok(None) => {
                events.push(MarbleEvent {
                    time,
                    kind: MarbleKind::Complete,
                });
                return events;
            }
            Err(error) => {
                events.push(MarbleEvent {
                    time,
                    kind: MarbleKind::Error(error),
                });
                return events;
            }
        }
    }
}

fn kinds_match<T: MarbleValue>(expected: &MarbleKind<T>, observed: &MarbleKind<T>) -> bool {
    match (expected, observed) {
        (MarbleKind::Next(a), MarbleKind::Next(b)) => a == b,
        (MarbleKind::Complete, MarbleKind::Complete) => true,
        // Errors compare by message so equivalent failures from different
        // code paths still match.
        (MarbleKind::Error(a), MarbleKind::Error(b)) => a.same_message(b),
        _ => false,
    }
}

fn is_terminal<T>(kind: &MarbleKind<T>) -> bool {
    matches!(kind, MarbleKind::Complete | MarbleKind::Error(_))
}

fn compare_events<T: MarbleValue>(
    expected: &[MarbleEvent<T>],
    observed: &[MarbleEvent<T>],
    strict: bool,
) -> Result<(), StreamError> {
    let mut problems = Vec::new();
    if expected.len() != observed.len() {
        problems.push(format!(
            "event count mismatch: expected {}, observed {}",
            expected.len(),
            observed.len()
        ));
    }
    for (index, (want, got)) in expected.iter().zip(observed.iter()).enumerate() {
        let last_of_both = index + 1 == expected.len() && index + 1 == observed.len();
        let tick_ok = if want.time == got.time {
            true
        } else {
            !strict
                && last_of_both
                && is_terminal(&want.kind)
                && is_terminal(&got.kind)
                && want.time.abs_diff(got.time) <= 1
        };
        if !tick_ok {
            problems.push(format!(
                "event {index}: tick mismatch: expected {}, observed {}",
                want.time, got.time
            ));
        }
        if !kinds_match(&want.kind, &got.kind) {
            problems.push(format!(
                "event {index}: expected {:?}, observed {:?}",
                want.kind, got.kind
            ));
        }
    }
    if problems.is_empty() {
        return Ok(());
    }
    Err(StreamError::Other(format!(
        "marble assertion failed:\n  {}\nexpected events: {:?}\nobserved events: {:?}",
        problems.join("\n  "),
        expected,
        observed
    )))
}

/// Resets the `run_active` window even when the test function panics.
struct RunActiveGuard {
    sched: VirtualScheduler,
}

impl Drop for RunActiveGuard {
    fn drop(&mut self) {
        self.sched.lock().run_active = false;
    }
}

impl VirtualScheduler {
    /// Execute a test program under virtual time.
    ///
    /// `test_fn` builds streams through the [`TestHelpers`] and registers
    /// expectations; `run` then drives time forward — flushing each tick,
    /// polling the runners between tasks, advancing while scheduled work
    /// or parked readers remain — until every runner settles or no
    /// progress is possible. Scheduler state is reset on entry and the
    /// active window is restored on every exit path. Nested runs are
    /// rejected.
    ///
    /// The outcome is deterministic: it depends only on the marble
    /// programs and scheduled tasks, never on wall-clock.
    pub fn run<F>(&self, test_fn: F) -> Result<(), StreamError>
    where
        F: FnOnce(&mut TestHelpers) -> Result<(), StreamError>,
    {
        self.begin_run()?;
        let guard = RunActiveGuard {
            sched: self.clone(),
        };
        let mut helpers = TestHelpers {
            sched: self.clone(),
            runners: Vec::new(),
        };
        test_fn(&mut helpers)?;
        let result = self.drive(helpers.runners);
        drop(guard);
        result
    }

    fn drive(&self, runners: Vec<PendingRunner>) -> Result<(), StreamError> {
        struct Entry {
            description: String,
            fut: BoxFuture<'static, Result<(), StreamError>>,
            outcome: Option<Result<(), StreamError>>,
        }

        let mut entries: Vec<Entry> = runners
            .into_iter()
            .map(|runner| Entry {
                description: runner.description,
                fut: runner.fut,
                outcome: None,
            })
            .collect();
        let waker = noop_waker();

        fn poll_entries(entries: &mut [Entry], waker: &std::task::Waker) {
            let mut cx = Context::from_waker(waker);
            for entry in entries.iter_mut() {
                if entry.outcome.is_none() {
                    if let Poll::Ready(result) = entry.fut.as_mut().poll(&mut cx) {
                        entry.outcome = Some(result);
                    }
                }
            }
        }

        let start_tick = self.current_tick();
        let deadline = start_tick + MAX_RUN_TICKS;
        let mut iterations: u32 = 0;

        // Let every runner attach its reader before any task fires.
        poll_entries(&mut entries, &waker);

        loop {
            // Runners settle after every executed task, so same-tick stage
            // ordering (timer before emit before consume) is observable.
            {
                let entries = &mut entries;
                let waker = &waker;
                self.flush_current_tick_with(&mut || poll_entries(entries, waker))?;
            }
            poll_entries(&mut entries, &waker);
            if entries.iter().all(|entry| entry.outcome.is_some()) {
                break;
            }

            iterations += 1;
            if iterations > MAX_RUN_ITERATIONS {
                return Err(StreamError::TimeOverrun(self.current_tick() - start_tick));
            }
            if self.has_eligible_tasks() {
                // Runner polls scheduled same-tick work; flush it first.
                continue;
            }

            let done = entries.iter().filter(|e| e.outcome.is_some()).count();
            let fingerprint = self.fingerprint(done);
            if self.earliest_future_tick().is_some() {
                let next_tick = self.current_tick() + 1;
                if next_tick > deadline {
                    return Err(StreamError::TimeOverrun(next_tick - start_tick));
                }
                self.lock().current_tick = next_tick;
                continue;
            }

            // No scheduled work anywhere. Give the runners one settle
            // pass (the tick-0 synchronous-consumption case); if nothing
            // moves, no progress is possible.
            poll_entries(&mut entries, &waker);
            let done = entries.iter().filter(|e| e.outcome.is_some()).count();
            if self.fingerprint(done) == fingerprint {
                break;
            }
        }

        for entry in entries {
            match entry.outcome {
                Some(Ok(())) => {}
                Some(Err(error)) => return Err(error),
                None => {
                    let detail = if self.has_pending_readers() {
                        "a reader is still parked with no scheduled producer to feed it"
                    } else {
                        "the scheduler ran out of work"
                    };
                    return Err(StreamError::Other(format!(
                        "runner `{}` did not complete: {detail}",
                        entry.description
                    )));
                }
            }
        }
        Ok(())
    }

    fn fingerprint(&self, runners_done: usize) -> (u64, usize, u64, usize) {
        let inner = self.lock();
        (
            inner.current_tick,
            inner.executed.len(),
            inner.next_seq,
            runners_done,
        )
    }
}
