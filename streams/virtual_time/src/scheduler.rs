/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::task::Poll;
use std::task::Waker;

use futures::future::poll_fn;
use futures::future::BoxFuture;
use pull_stream::ReadProbe;
use pull_stream::StreamError;
use slog::trace;
use slog::Discard;
use slog::Logger;
use tick_clock::Clock;
use tick_clock::ClockHandle;
use tick_clock::Scheduler;
use tick_clock::SchedulerHandle;

use crate::task::ScheduledTaskEvent;
use crate::task::TaskStage;

/// Identifier of a virtual timeout/interval/idle callback.
pub type TimerId = u64;

/// Executed-task passes allowed for a single tick before the scheduler
/// declares a loop.
pub(crate) const MAX_FLUSH_PASSES: u32 = 100;

/// Ticks a `run` may advance past its starting point.
pub(crate) const MAX_RUN_TICKS: u64 = 1_000;

/// Drive-loop iterations a `run` may spend before declaring an overrun.
pub(crate) const MAX_RUN_ITERATIONS: u32 = 2_000;

/// Tick advances `flush_all` may make before declaring an overrun.
const MAX_FLUSH_ALL_TICKS: u64 = 10_000;

type TaskCallback = Box<dyn FnOnce(&VirtualScheduler) + Send>;

struct VirtualTask {
    tick: u64,
    stage: TaskStage,
    seq: u64,
    timer_id: Option<TimerId>,
    description: String,
    callback: TaskCallback,
}

pub(crate) struct Inner {
    pub(crate) current_tick: u64,
    pub(crate) run_active: bool,
    tasks: Vec<VirtualTask>,
    cancelled_timers: HashSet<TimerId>,
    pub(crate) executed: Vec<ScheduledTaskEvent>,
    execution_order: u64,
    pub(crate) next_seq: u64,
    next_timer_id: TimerId,
    pub(crate) probes: Vec<ReadProbe>,
}

/// Deterministic tick-based executor.
///
/// Tasks are keyed by `(tick, stage, insertion order)` with
/// `timer < emit < consume` at equal ticks. Within [`VirtualScheduler::run`]
/// the scheduler also polls the registered assertion runners, making all
/// time-dependent stream behavior a pure function of the scheduled program
/// — wall-clock never participates.
///
/// The scheduler hands out its own [`Clock`] and [`Scheduler`] capability
/// impls (see [`VirtualScheduler::clock`]); both refuse service outside an
/// active `run` window with [`StreamError::InvalidScheduler`].
pub struct VirtualScheduler {
    pub(crate) inner: Arc<Mutex<Inner>>,
    pub(crate) logger: Logger,
}

impl Clone for VirtualScheduler {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            logger: self.logger.clone(),
        }
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualScheduler {
    /// Scheduler with discarded logging.
    pub fn new() -> Self {
        Self::with_logger(Logger::root(Discard, slog::o!()))
    }

    /// Scheduler logging each executed task at trace level.
    pub fn with_logger(logger: Logger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                current_tick: 0,
                run_active: false,
                tasks: Vec::new(),
                cancelled_timers: HashSet::new(),
                executed: Vec::new(),
                execution_order: 0,
                next_seq: 0,
                next_timer_id: 0,
                probes: Vec::new(),
            })),
            logger,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("virtual scheduler poisoned")
    }

    /// Current virtual time.
    pub fn current_tick(&self) -> u64 {
        self.lock().current_tick
    }

    /// Reset all scheduler state and open the run window. Fails when a run
    /// is already in progress (nested runs are not supported).
    pub(crate) fn begin_run(&self) -> Result<(), StreamError> {
        let mut inner = self.lock();
        if inner.run_active {
            return Err(StreamError::State {
                state: "running",
                operation: "run",
            });
        }
        inner.run_active = true;
        inner.current_tick = 0;
        inner.tasks.clear();
        inner.cancelled_timers.clear();
        inner.executed.clear();
        inner.execution_order = 0;
        inner.next_seq = 0;
        inner.next_timer_id = 0;
        inner.probes.clear();
        Ok(())
    }

    /// Whether a `run` is in progress.
    pub fn is_active(&self) -> bool {
        self.lock().run_active
    }

    /// Schedule a task at an absolute tick.
    pub fn schedule_task(
        &self,
        tick: u64,
        stage: TaskStage,
        description: impl Into<String>,
        callback: impl FnOnce(&VirtualScheduler) + Send + 'static,
    ) {
        self.schedule_with_timer(tick, stage, None, description.into(), Box::new(callback));
    }

    fn schedule_with_timer(
        &self,
        tick: u64,
        stage: TaskStage,
        timer_id: Option<TimerId>,
        description: String,
        callback: TaskCallback,
    ) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.push(VirtualTask {
            tick,
            stage,
            seq,
            timer_id,
            description,
            callback,
        });
    }

    /// One-shot timer firing `delay` ticks from now.
    pub fn set_timeout(&self, delay: u64, callback: impl FnOnce() + Send + 'static) -> TimerId {
        let id = self.alloc_timer_id();
        let tick = self.current_tick() + delay;
        self.schedule_with_timer(
            tick,
            TaskStage::Timer,
            Some(id),
            format!("timeout #{id} (+{delay})"),
            Box::new(move |_| callback()),
        );
        id
    }

    /// Remove a pending timeout. Unknown or fired ids are ignored.
    pub fn clear_timeout(&self, id: TimerId) {
        let mut inner = self.lock();
        inner.cancelled_timers.insert(id);
        inner.tasks.retain(|task| task.timer_id != Some(id));
    }

    /// Repeating timer: first fires `period` ticks from now, then re-arms
    /// `period` ticks after each firing.
    pub fn set_interval(&self, period: u64, callback: impl FnMut() + Send + 'static) -> TimerId {
        let id = self.alloc_timer_id();
        arm_interval(self, id, period, Box::new(callback));
        id
    }

    /// Stop an interval: pending and future firings are dropped.
    pub fn clear_interval(&self, id: TimerId) {
        self.clear_timeout(id);
    }

    /// Consume-stage callback one tick from now, after timers and
    /// emissions.
    pub fn request_idle_callback(&self, callback: impl FnOnce() + Send + 'static) -> TimerId {
        let id = self.alloc_timer_id();
        let tick = self.current_tick() + 1;
        self.schedule_with_timer(
            tick,
            TaskStage::Consume,
            Some(id),
            format!("idle callback #{id}"),
            Box::new(move |_| callback()),
        );
        id
    }

    /// Remove a pending idle callback.
    pub fn cancel_idle_callback(&self, id: TimerId) {
        self.clear_timeout(id);
    }

    fn alloc_timer_id(&self) -> TimerId {
        let mut inner = self.lock();
        let id = inner.next_timer_id;
        inner.next_timer_id += 1;
        id
    }

    /// Log of every executed task, in realized order.
    pub fn executed_tasks(&self) -> Vec<ScheduledTaskEvent> {
        self.lock().executed.clone()
    }

    /// Register a stream probe for pending-reader detection.
    pub fn register_probe(&self, probe: ReadProbe) {
        self.lock().probes.push(probe);
    }

    /// The scheduler as a [`Clock`] capability for time-aware operators.
    pub fn clock(&self) -> ClockHandle {
        Arc::new(VirtualClock {
            sched: self.clone(),
        })
    }

    /// The scheduler as a yield capability for the `schedule` operator.
    pub fn scheduler_handle(&self) -> SchedulerHandle {
        Arc::new(VirtualClock {
            sched: self.clone(),
        })
    }

    /// Run every task scheduled at or before the current tick, one at a
    /// time in `(tick, stage, insertion)` order, restarting the pass while
    /// tasks keep appearing. Fails with [`StreamError::SchedulerLoop`] if
    /// the tick refuses to settle.
    pub fn flush_current_tick(&self) -> Result<(), StreamError> {
        self.flush_current_tick_with(&mut || {})
    }

    pub(crate) fn flush_current_tick_with(
        &self,
        after_each: &mut dyn FnMut(),
    ) -> Result<(), StreamError> {
        let mut passes: u32 = 0;
        loop {
            let task = match self.pop_eligible() {
                Some(task) => task,
                None => return Ok(()),
            };
            passes += 1;
            if passes > MAX_FLUSH_PASSES {
                return Err(StreamError::SchedulerLoop {
                    passes: MAX_FLUSH_PASSES,
                    tick: self.current_tick(),
                });
            }
            let event = {
                let mut inner = self.lock();
                let order = inner.execution_order;
                inner.execution_order += 1;
                let event = ScheduledTaskEvent {
                    tick: inner.current_tick,
                    scheduled_tick: task.tick,
                    stage: task.stage,
                    order,
                    description: task.description.clone(),
                };
                inner.executed.push(event.clone());
                event
            };
            trace!(
                self.logger,
                "executed virtual task";
                "tick" => event.tick,
                "scheduled_tick" => event.scheduled_tick,
                "stage" => %event.stage,
                "order" => event.order,
                "description" => %event.description
            );
            (task.callback)(self);
            after_each();
        }
    }

    /// Advance exactly one tick, then flush it.
    pub fn next_tick(&self) -> Result<(), StreamError> {
        {
            let mut inner = self.lock();
            inner.current_tick += 1;
        }
        self.flush_current_tick()
    }

    /// Drain every scheduled task, jumping time forward to each next
    /// occupied tick. Does not poll runners; see [`VirtualScheduler::run`]
    /// for bounded runner semantics.
    pub fn flush_all(&self) -> Result<(), StreamError> {
        let start = self.current_tick();
        loop {
            self.flush_current_tick()?;
            let next = match self.earliest_future_tick() {
                Some(tick) => tick,
                None => return Ok(()),
            };
            if next - start > MAX_FLUSH_ALL_TICKS {
                return Err(StreamError::TimeOverrun(next - start));
            }
            self.lock().current_tick = next;
        }
    }

    fn pop_eligible(&self) -> Option<VirtualTask> {
        let mut inner = self.lock();
        let current = inner.current_tick;
        loop {
            let mut best: Option<usize> = None;
            for (index, task) in inner.tasks.iter().enumerate() {
                if task.tick > current {
                    continue;
                }
                best = match best {
                    None => Some(index),
                    Some(prev) => {
                        let p = &inner.tasks[prev];
                        if (task.tick, task.stage, task.seq) < (p.tick, p.stage, p.seq) {
                            Some(index)
                        } else {
                            Some(prev)
                        }
                    }
                };
            }
            let index = best?;
            let task = inner.tasks.remove(index);
            if let Some(timer_id) = task.timer_id {
                if inner.cancelled_timers.contains(&timer_id) {
                    continue;
                }
            }
            return Some(task);
        }
    }

    pub(crate) fn has_eligible_tasks(&self) -> bool {
        let inner = self.lock();
        let current = inner.current_tick;
        inner
            .tasks
            .iter()
            .any(|task| task.tick <= current && !is_cancelled(&inner, task))
    }

    pub(crate) fn earliest_future_tick(&self) -> Option<u64> {
        let inner = self.lock();
        let current = inner.current_tick;
        inner
            .tasks
            .iter()
            .filter(|task| task.tick > current && !is_cancelled(&inner, task))
            .map(|task| task.tick)
            .min()
    }

    pub(crate) fn has_pending_readers(&self) -> bool {
        let inner = self.lock();
        inner
            .probes
            .iter()
            .any(|probe| probe.has_parked_reader() && !probe.is_terminal())
    }
}

fn is_cancelled(inner: &Inner, task: &VirtualTask) -> bool {
    match task.timer_id {
        Some(id) => inner.cancelled_timers.contains(&id),
        None => false,
    }
}

fn arm_interval(
    sched: &VirtualScheduler,
    id: TimerId,
    period: u64,
    mut callback: Box<dyn FnMut() + Send>,
) {
    let tick = sched.current_tick() + period;
    sched.schedule_with_timer(
        tick,
        TaskStage::Timer,
        Some(id),
        format!("interval #{id} (every {period})"),
        Box::new(move |sched: &VirtualScheduler| {
            callback();
            arm_interval(sched, id, period, callback);
        }),
    );
}

struct SleepGate {
    fired: bool,
    waker: Option<Waker>,
}

/// The scheduler's own [`Clock`]/[`Scheduler`] impl.
struct VirtualClock {
    sched: VirtualScheduler,
}

impl VirtualClock {
    fn gate_task(
        &self,
        tick: u64,
        stage: TaskStage,
        description: String,
    ) -> BoxFuture<'static, Result<(), StreamError>> {
        if !self.sched.is_active() {
            return Box::pin(futures::future::ready(Err(StreamError::InvalidScheduler(
                "virtual clock used outside an active run".to_string(),
            ))));
        }
        let gate = Arc::new(Mutex::new(SleepGate {
            fired: false,
            waker: None,
        }));
        let fire = Arc::clone(&gate);
        self.sched.schedule_task(tick, stage, description, move |_| {
            let mut gate = fire.lock().expect("sleep gate poisoned");
            gate.fired = true;
            if let Some(waker) = gate.waker.take() {
                waker.wake();
            }
        });
        Box::pin(poll_fn(move |cx| {
            let mut gate = gate.lock().expect("sleep gate poisoned");
            if gate.fired {
                Poll::Ready(Ok(()))
            } else {
                gate.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }))
    }
}

impl Clock for VirtualClock {
    fn sleep(&self, ticks: u64) -> BoxFuture<'static, Result<(), StreamError>> {
        let due = self.sched.current_tick() + ticks;
        self.gate_task(due, TaskStage::Timer, format!("virtual sleep (+{ticks})"))
    }

    fn now_tick(&self) -> u64 {
        self.sched.current_tick()
    }
}

impl Scheduler for VirtualClock {
    fn schedule(&self) -> BoxFuture<'static, Result<(), StreamError>> {
        let tick = self.sched.current_tick();
        self.gate_task(tick, TaskStage::Consume, "scheduler yield".to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn tasks_run_in_stage_order_within_a_tick() {
        let sched = VirtualScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (stage, name) in [
            (TaskStage::Consume, "consume"),
            (TaskStage::Emit, "emit"),
            (TaskStage::Timer, "timer"),
        ] {
            let log = Arc::clone(&log);
            sched.schedule_task(0, stage, name, move |_| log.lock().unwrap().push(name));
        }
        sched.flush_current_tick().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["timer", "emit", "consume"]);
    }

    #[test]
    fn insertion_order_breaks_ties() {
        let sched = VirtualScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            sched.schedule_task(0, TaskStage::Emit, name, move |_| {
                log.lock().unwrap().push(name)
            });
        }
        sched.flush_current_tick().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn cleared_timeout_never_fires() {
        let sched = VirtualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = sched.set_timeout(3, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sched.clear_timeout(id);
        sched.flush_all().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn interval_rearms_until_cleared() {
        let sched = VirtualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = sched.set_interval(2, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..6 {
            sched.next_tick().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        sched.clear_interval(id);
        for _ in 0..4 {
            sched.next_tick().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn idle_callback_runs_after_emissions_next_tick() {
        let sched = VirtualScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let idle_log = Arc::clone(&log);
        sched.request_idle_callback(move || idle_log.lock().unwrap().push("idle"));
        let emit_log = Arc::clone(&log);
        sched.schedule_task(1, TaskStage::Emit, "emit", move |_| {
            emit_log.lock().unwrap().push("emit")
        });
        sched.next_tick().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["emit", "idle"]);
    }

    #[test]
    fn self_rescheduling_task_trips_the_loop_guard() {
        let sched = VirtualScheduler::new();
        fn reschedule(sched: &VirtualScheduler) {
            sched.schedule_task(sched.current_tick(), TaskStage::Emit, "again", reschedule);
        }
        sched.schedule_task(0, TaskStage::Emit, "first", reschedule);
        assert_matches!(
            sched.flush_current_tick(),
            Err(StreamError::SchedulerLoop { .. })
        );
    }

    #[test]
    fn virtual_clock_refuses_service_outside_run() {
        let sched = VirtualScheduler::new();
        let clock = sched.clock();
        let sleep = clock.sleep(5);
        let result = futures::executor::block_on(sleep);
        assert_matches!(result, Err(StreamError::InvalidScheduler(_)));
    }

    #[test]
    fn executed_log_records_order_and_stage() {
        let sched = VirtualScheduler::new();
        sched.schedule_task(0, TaskStage::Emit, "a", |_| {});
        sched.schedule_task(0, TaskStage::Timer, "b", |_| {});
        sched.flush_current_tick().unwrap();
        let log = sched.executed_tasks();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].description, "b");
        assert_eq!(log[0].stage, TaskStage::Timer);
        assert_eq!(log[0].order, 0);
        assert_eq!(log[1].description, "a");
        assert_eq!(log[1].order, 1);
    }
}
