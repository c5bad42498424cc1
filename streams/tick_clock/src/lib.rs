/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

#![deny(warnings, missing_docs, clippy::all, rustdoc::broken_intra_doc_links)]

//! Injectable time for streams.
//!
//! Time-aware operators never reach for the host timer directly; they are
//! handed an `Arc<dyn Clock>` at construction. [`TokioClock`] is the real
//! implementation (one tick = one millisecond); the virtual scheduler in
//! the `virtual_time` crate provides the deterministic one. This keeps
//! tests free of global timer substitution: whoever builds the pipeline
//! decides what time means.

mod timer;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use pull_stream::StreamError;

pub use crate::timer::interval;
pub use crate::timer::timer;

/// Milliseconds per tick on the real clock.
pub const TICK_MS: u64 = 1;

/// A tick-granular sleep capability.
pub trait Clock: Send + Sync {
    /// Resolve after `ticks` ticks of this clock's time.
    ///
    /// Implementations that cannot currently serve requests (for example a
    /// virtual clock outside an active scheduler run) resolve to
    /// [`StreamError::InvalidScheduler`].
    fn sleep(&self, ticks: u64) -> BoxFuture<'static, Result<(), StreamError>>;

    /// Current time in ticks, measured from an implementation-defined
    /// origin.
    fn now_tick(&self) -> u64;
}

/// Shared clock handle handed to operators.
pub type ClockHandle = Arc<dyn Clock>;

/// Ability to yield control back to the driving executor between items.
pub trait Scheduler: Send + Sync {
    /// Resolve after yielding to the executor at least once.
    ///
    /// Fails with [`StreamError::InvalidScheduler`] when the scheduler
    /// cannot currently run callbacks.
    fn schedule(&self) -> BoxFuture<'static, Result<(), StreamError>>;
}

/// Shared scheduler handle handed to operators.
pub type SchedulerHandle = Arc<dyn Scheduler>;

/// Real-time clock backed by `tokio::time`.
///
/// Deterministic in tests under `tokio::time::pause()`.
#[derive(Clone, Debug, Default)]
pub struct TokioClock {
    origin: Option<tokio::time::Instant>,
}

impl TokioClock {
    /// Clock whose `now_tick` counts from the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: Some(tokio::time::Instant::now()),
        }
    }

    /// Shared handle.
    pub fn handle() -> ClockHandle {
        Arc::new(Self::new())
    }
}

impl Clock for TokioClock {
    fn sleep(&self, ticks: u64) -> BoxFuture<'static, Result<(), StreamError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(ticks * TICK_MS)).await;
            Ok(())
        })
    }

    fn now_tick(&self) -> u64 {
        match self.origin {
            Some(origin) => origin.elapsed().as_millis() as u64 / TICK_MS,
            None => 0,
        }
    }
}

/// Scheduler that yields through `tokio::task::yield_now`.
#[derive(Clone, Debug, Default)]
pub struct YieldScheduler;

impl YieldScheduler {
    /// Shared handle.
    pub fn handle() -> SchedulerHandle {
        Arc::new(Self)
    }
}

impl Scheduler for YieldScheduler {
    fn schedule(&self) -> BoxFuture<'static, Result<(), StreamError>> {
        Box::pin(async {
            tokio::task::yield_now().await;
            Ok(())
        })
    }
}
