/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Time-aware operators. All of them measure time through the injected
//! [`Clock`] capability, so they are deterministic under the virtual
//! scheduler and under `tokio::time::pause`.
//!
//! [`Clock`]: tick_clock::Clock

use futures::future::select;
use futures::future::BoxFuture;
use futures::future::Either;
use futures::pin_mut;
use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::Reader;
use pull_stream::Source;
use pull_stream::StreamError;
use pull_stream::ValueStream;
use tick_clock::ClockHandle;

use crate::kernel::Operator;

/// Emit each value `ticks` after its arrival, preserving order.
pub fn delay(ticks: u64, clock: ClockHandle) -> Delay {
    Delay { ticks, clock }
}

/// See [`delay`].
pub struct Delay {
    ticks: u64,
    clock: ClockHandle,
}

impl<In: Send + 'static> Operator<In> for Delay {
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        match src.reader() {
            Ok(upstream) => ValueStream::with_strategy(
                DelaySource {
                    upstream: Some(upstream),
                    ticks: self.ticks,
                    clock: self.clock,
                    pending: None,
                    done: false,
                },
                strategy,
            ),
            Err(error) => ValueStream::fail(error),
        }
    }
}

struct DelaySource<In: Send + 'static> {
    upstream: Option<Reader<In>>,
    ticks: u64,
    clock: ClockHandle,
    /// Value waiting out its delay, with the in-flight sleep so a dropped
    /// read does not restart the countdown.
    pending: Option<(In, BoxFuture<'static, Result<(), StreamError>>)>,
    done: bool,
}

impl<In: Send + 'static> Source for DelaySource<In> {
    type Item = In;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<In>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                if let Some((_, sleep)) = self.pending.as_mut() {
                    sleep.as_mut().await?;
                    if let Some((value, _)) = self.pending.take() {
                        ctl.enqueue(value)?;
                    }
                    continue;
                }
                let reader = match self.upstream.as_mut() {
                    Some(reader) => reader,
                    None => break,
                };
                match reader.read().await {
                    Ok(Some(value)) => {
                        self.pending = Some((value, self.clock.sleep(self.ticks)));
                    }
                    Ok(None) => {
                        self.done = true;
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                        let _ = ctl.close();
                    }
                    Err(error) => {
                        self.done = true;
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                        return Err(error);
                    }
                }
            }
            Ok(())
        })
    }

    fn cancel<'a>(&'a mut self, reason: &'a StreamError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.done = true;
            if let Some(mut reader) = self.upstream.take() {
                reader.cancel(reason.clone()).await;
            }
        })
    }
}

/// Leading/trailing behavior of [`throttle_time`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Emit the value that opens a window.
    pub leading: bool,
    /// Emit the latest stored value when a window ends.
    pub trailing: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            leading: true,
            trailing: false,
        }
    }
}

impl ThrottleConfig {
    /// Override the leading flag.
    pub fn leading(mut self, leading: bool) -> Self {
        self.leading = leading;
        self
    }

    /// Override the trailing flag.
    pub fn trailing(mut self, trailing: bool) -> Self {
        self.trailing = trailing;
        self
    }
}

/// Rate-limit values to one per `ticks`-long window.
///
/// A value arriving while idle opens a window: with `leading` it is emitted
/// immediately, otherwise stored. Values arriving inside a window replace
/// the stored value. When the window ends, `trailing` emits the stored
/// value (re-opening the window); upstream completion with a stored value
/// and `trailing` set emits it before closing.
pub fn throttle_time(ticks: u64, config: ThrottleConfig, clock: ClockHandle) -> ThrottleTime {
    ThrottleTime {
        ticks,
        config,
        clock,
    }
}

/// See [`throttle_time`].
pub struct ThrottleTime {
    ticks: u64,
    config: ThrottleConfig,
    clock: ClockHandle,
}

impl<In: Send + 'static> Operator<In> for ThrottleTime {
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        match src.reader() {
            Ok(upstream) => ValueStream::with_strategy(
                ThrottleSource {
                    upstream: Some(upstream),
                    ticks: self.ticks,
                    config: self.config,
                    clock: self.clock,
                    window: None,
                    stored: None,
                    done: false,
                },
                strategy,
            ),
            Err(error) => ValueStream::fail(error),
        }
    }
}

struct ThrottleSource<In: Send + 'static> {
    upstream: Option<Reader<In>>,
    ticks: u64,
    config: ThrottleConfig,
    clock: ClockHandle,
    window: Option<BoxFuture<'static, Result<(), StreamError>>>,
    stored: Option<In>,
    done: bool,
}

enum TimedTurn<In> {
    Upstream(Result<Option<In>, StreamError>),
    WindowEnd(Result<(), StreamError>),
}

impl<In: Send + 'static> Source for ThrottleSource<In> {
    type Item = In;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<In>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                let reader = match self.upstream.as_mut() {
                    Some(reader) => reader,
                    None => break,
                };
                let turn = match self.window.as_mut() {
                    Some(window) => {
                        let read = reader.read();
                        pin_mut!(read);
                        match select(read, window.as_mut()).await {
                            Either::Left((event, _)) => TimedTurn::Upstream(event),
                            Either::Right((ended, _)) => TimedTurn::WindowEnd(ended),
                        }
                    }
                    None => TimedTurn::Upstream(reader.read().await),
                };
                match turn {
                    TimedTurn::Upstream(Ok(Some(value))) => {
                        if self.window.is_some() {
                            // Inside a window: keep the latest arrival.
                            self.stored = Some(value);
                        } else {
                            if self.config.leading {
                                ctl.enqueue(value)?;
                            } else {
                                self.stored = Some(value);
                            }
                            self.window = Some(self.clock.sleep(self.ticks));
                        }
                    }
                    TimedTurn::Upstream(Ok(None)) => {
                        self.done = true;
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                        if self.config.trailing {
                            if let Some(value) = self.stored.take() {
                                ctl.enqueue(value)?;
                            }
                        }
                        let _ = ctl.close();
                    }
                    TimedTurn::Upstream(Err(error)) => {
                        self.done = true;
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                        return Err(error);
                    }
                    TimedTurn::WindowEnd(ended) => {
                        ended?;
                        self.window = None;
                        if self.config.trailing {
                            if let Some(value) = self.stored.take() {
                                ctl.enqueue(value)?;
                                self.window = Some(self.clock.sleep(self.ticks));
                            }
                        } else {
                            self.stored = None;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn cancel<'a>(&'a mut self, reason: &'a StreamError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.done = true;
            if let Some(mut reader) = self.upstream.take() {
                reader.cancel(reason.clone()).await;
            }
        })
    }
}

/// Emit the latest value only once `ticks` pass without a newer arrival;
/// a value still pending when upstream completes is emitted before the
/// close.
pub fn debounce_time(ticks: u64, clock: ClockHandle) -> DebounceTime {
    DebounceTime { ticks, clock }
}

/// See [`debounce_time`].
pub struct DebounceTime {
    ticks: u64,
    clock: ClockHandle,
}

impl<In: Send + 'static> Operator<In> for DebounceTime {
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        match src.reader() {
            Ok(upstream) => ValueStream::with_strategy(
                DebounceSource {
                    upstream: Some(upstream),
                    ticks: self.ticks,
                    clock: self.clock,
                    pending: None,
                    quiet: None,
                    done: false,
                },
                strategy,
            ),
            Err(error) => ValueStream::fail(error),
        }
    }
}

struct DebounceSource<In: Send + 'static> {
    upstream: Option<Reader<In>>,
    ticks: u64,
    clock: ClockHandle,
    pending: Option<In>,
    quiet: Option<BoxFuture<'static, Result<(), StreamError>>>,
    done: bool,
}

impl<In: Send + 'static> Source for DebounceSource<In> {
    type Item = In;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<In>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                let reader = match self.upstream.as_mut() {
                    Some(reader) => reader,
                    None => break,
                };
                let turn = match self.quiet.as_mut() {
                    Some(quiet) => {
                        let read = reader.read();
                        pin_mut!(read);
                        match select(read, quiet.as_mut()).await {
                            Either::Left((event, _)) => TimedTurn::Upstream(event),
                            Either::Right((elapsed, _)) => TimedTurn::WindowEnd(elapsed),
                        }
                    }
                    None => TimedTurn::Upstream(reader.read().await),
                };
                match turn {
                    TimedTurn::Upstream(Ok(Some(value))) => {
                        self.pending = Some(value);
                        self.quiet = Some(self.clock.sleep(self.ticks));
                    }
                    TimedTurn::Upstream(Ok(None)) => {
                        self.done = true;
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                        if let Some(value) = self.pending.take() {
                            ctl.enqueue(value)?;
                        }
                        let _ = ctl.close();
                    }
                    TimedTurn::Upstream(Err(error)) => {
                        self.done = true;
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                        return Err(error);
                    }
                    TimedTurn::WindowEnd(elapsed) => {
                        elapsed?;
                        self.quiet = None;
                        if let Some(value) = self.pending.take() {
                            ctl.enqueue(value)?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn cancel<'a>(&'a mut self, reason: &'a StreamError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.done = true;
            if let Some(mut reader) = self.upstream.take() {
                reader.cancel(reason.clone()).await;
            }
        })
    }
}

/// Error with [`StreamError::Timeout`] when the gap between successive
/// values exceeds `ticks`. The timer is armed on each read entry and
/// disarmed by every arrival; on firing, upstream is cancelled with the
/// timeout as the reason.
pub fn timeout(ticks: u64, clock: ClockHandle) -> Result<Timeout, StreamError> {
    if ticks == 0 {
        return Err(StreamError::invalid_argument(
            "timeout window must be positive",
        ));
    }
    Ok(Timeout { ticks, clock })
}

/// See [`timeout`].
pub struct Timeout {
    ticks: u64,
    clock: ClockHandle,
}

impl std::fmt::Debug for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeout")
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl<In: Send + 'static> Operator<In> for Timeout {
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        match src.reader() {
            Ok(upstream) => ValueStream::with_strategy(
                TimeoutSource {
                    upstream: Some(upstream),
                    ticks: self.ticks,
                    clock: self.clock,
                    done: false,
                },
                strategy,
            ),
            Err(error) => ValueStream::fail(error),
        }
    }
}

struct TimeoutSource<In: Send + 'static> {
    upstream: Option<Reader<In>>,
    ticks: u64,
    clock: ClockHandle,
    done: bool,
}

impl<In: Send + 'static> Source for TimeoutSource<In> {
    type Item = In;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<In>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                let turn = {
                    let reader = match self.upstream.as_mut() {
                        Some(reader) => reader,
                        None => break,
                    };
                    let deadline = self.clock.sleep(self.ticks);
                    let read = reader.read();
                    pin_mut!(deadline);
                    pin_mut!(read);
                    match select(read, deadline).await {
                        Either::Left((event, _)) => TimedTurn::Upstream(event),
                        Either::Right((fired, _)) => TimedTurn::WindowEnd(fired),
                    }
                };
                match turn {
                    TimedTurn::Upstream(Ok(Some(value))) => ctl.enqueue(value)?,
                    TimedTurn::Upstream(Ok(None)) => {
                        self.done = true;
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                        let _ = ctl.close();
                    }
                    TimedTurn::Upstream(Err(error)) => {
                        self.done = true;
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                        return Err(error);
                    }
                    TimedTurn::WindowEnd(fired) => {
                        fired?;
                        self.done = true;
                        let error = StreamError::Timeout(self.ticks);
                        if let Some(mut reader) = self.upstream.take() {
                            reader.cancel(error.clone()).await;
                        }
                        return Err(error);
                    }
                }
            }
            Ok(())
        })
    }

    fn cancel<'a>(&'a mut self, reason: &'a StreamError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.done = true;
            if let Some(mut reader) = self.upstream.take() {
                reader.cancel(reason.clone()).await;
            }
        })
    }
}
