/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use futures::future::BoxFuture;
use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::Reader;
use pull_stream::Source;
use pull_stream::StreamError;
use pull_stream::ValueStream;
use tick_clock::SchedulerHandle;

use crate::kernel::Operator;

/// Yield to `scheduler` before forwarding each value, preserving order.
///
/// A scheduler that cannot currently run callbacks fails the stream with
/// [`StreamError::InvalidScheduler`] at the first forwarded value.
pub fn schedule(scheduler: SchedulerHandle) -> Schedule {
    Schedule { scheduler }
}

/// See [`schedule`].
pub struct Schedule {
    scheduler: SchedulerHandle,
}

impl<In: Send + 'static> Operator<In> for Schedule {
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        match src.reader() {
            Ok(upstream) => ValueStream::with_strategy(
                ScheduleSource {
                    upstream: Some(upstream),
                    scheduler: self.scheduler,
                    done: false,
                },
                strategy,
            ),
            Err(error) => ValueStream::fail(error),
        }
    }
}

struct ScheduleSource<In: Send + 'static> {
    upstream: Option<Reader<In>>,
    scheduler: SchedulerHandle,
    done: bool,
}

impl<In: Send + 'static> Source for ScheduleSource<In> {
    type Item = In;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<In>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                let reader = match self.upstream.as_mut() {
                    Some(reader) => reader,
                    None => break,
                };
                match reader.read().await {
                    Ok(Some(value)) => {
                        if let Err(error) = self.scheduler.schedule().await {
                            self.done = true;
                            if let Some(mut reader) = self.upstream.take() {
                                reader.cancel(error.clone()).await;
                            }
                            return Err(error);
                        }
                        ctl.enqueue(value)?;
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
