/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! The uniform wrapping every operator is built on.
//!
//! An operator holds the exclusive reader on its upstream for the life of
//! its output stream. Each pull reads upstream while demand lasts, feeding
//! values through the operator's [`Stage`] hooks; upstream completion runs
//! `flush` and closes, upstream errors propagate unchanged, and a stage
//! that terminates its output early gets the upstream cancelled. Failures
//! on cancellation paths are swallowed so teardown never masks the signal
//! that caused it.

use futures::future::BoxFuture;
use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::Reader;
use pull_stream::Source;
use pull_stream::StreamError;
use pull_stream::ValueStream;

/// Synchronous transform hooks an operator plugs into the kernel.
pub trait Stage<In: Send + 'static>: Send + 'static {
    /// Item type of the output stream.
    type Out: Send + 'static;

    /// One-time setup before any upstream value is read. May already close
    /// the output (`take(0)` does).
    fn start(&mut self, ctl: &Controller<Self::Out>) -> Result<(), StreamError> {
        let _ = ctl;
        Ok(())
    }

    /// Handle one upstream value: enqueue zero, one or many outputs, close
    /// the output, or defer by buffering internally.
    fn on_value(&mut self, value: In, ctl: &Controller<Self::Out>) -> Result<(), StreamError>;

    /// Upstream completed: emit any buffered residue. The kernel closes the
    /// output afterwards.
    fn flush(&mut self, ctl: &Controller<Self::Out>) -> Result<(), StreamError> {
        let _ = ctl;
        Ok(())
    }
}

/// A stream-to-stream transform factory.
///
/// Operators are stateless values until applied; all state lives in the
/// stream they construct.
pub trait Operator<In: Send + 'static>: Send + Sized + 'static {
    /// Item type of the output stream.
    type Out: Send + 'static;

    /// Wrap `src`, producing the transformed stream with the given output
    /// queuing strategy.
    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<Self::Out>;
}

/// Run a [`Stage`] over `src` through the kernel loop.
///
/// If `src` is already locked the returned stream errors with
/// [`StreamError::Locked`] on first read.
pub fn apply_stage<In, S>(
    src: ValueStream<In>,
    stage: S,
    strategy: QueuingStrategy,
) -> ValueStream<S::Out>
where
    In: Send + 'static,
    S: Stage<In>,
{
    match src.reader() {
        Ok(upstream) => ValueStream::with_strategy(
            StageSource {
                upstream: Some(upstream),
                stage,
                done: false,
            },
            strategy,
        ),
        Err(error) => ValueStream::fail(error),
    }
}

struct StageSource<In: Send + 'static, S: Stage<In>> {
    upstream: Option<Reader<In>>,
    stage: S,
    done: bool,
}

impl<In, S> Source for StageSource<In, S>
where
    In: Send + 'static,
    S: Stage<In>,
{
    type Item = S::Out;

    fn start(&mut self, ctl: &Controller<S::Out>) -> Result<(), StreamError> {
        self.stage.start(ctl)?;
        if ctl.is_terminated() {
            self.done = true;
            if let Some(reader) = self.upstream.take() {
                reader.release();
            }
        }
        Ok(())
    }

    fn pull<'a>(&'a mut self, ctl: &'a Controller<S::Out>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                let reader = match self.upstream.as_mut() {
                    Some(reader) => reader,
                    None => break,
                };
                match reader.read().await {
                    Ok(Some(value)) => {
                        if let Err(error) = self.stage.on_value(value, ctl) {
                            self.done = true;
                            if let Some(mut reader) = self.upstream.take() {
                                reader.cancel(error.clone()).await;
                            }
                            return Err(error);
                        }
                        if ctl.is_terminated() {
                            self.done = true;
                            if let Some(mut reader) = self.upstream.take() {
                                reader
                                    .cancel(StreamError::cancelled("downstream closed"))
                                    .await;
                            }
                        }
                    }
                    Ok(None) => {
                        self.done = true;
                        let flushed = self.stage.flush(ctl);
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                        flushed?;
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
