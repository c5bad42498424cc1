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
use pull_stream::Reader;
use pull_stream::Source;
use pull_stream::StreamError;
use pull_stream::ValueStream;
use tick_clock::ClockHandle;

/// Configuration for [`retry_pipe`].
pub struct RetryOptions {
    /// How many times a failed attempt is replaced by a fresh one.
    pub retries: usize,
    /// Ticks to wait between attempts.
    pub delay: u64,
    /// Clock measuring the inter-attempt delay.
    pub clock: ClockHandle,
}

impl RetryOptions {
    /// Options with the given retry count and delay.
    pub fn new(retries: usize, delay: u64, clock: ClockHandle) -> Self {
        Self {
            retries,
            delay,
            clock,
        }
    }
}

/// Stream that rebuilds itself from `factory` when an attempt errors,
/// up to `options.retries` times with `options.delay` ticks in between.
///
/// Re-delivery semantics: values already emitted by a failed attempt are
/// not rolled back, so a consumer may see a prefix more than once
/// (at-least-once delivery). Only the final attempt's error surfaces.
pub fn retry_pipe<T, F>(factory: F, options: RetryOptions) -> ValueStream<T>
where
    T: Send + 'static,
    F: FnMut() -> ValueStream<T> + Send + 'static,
{
    ValueStream::new(RetrySource {
        factory,
        options,
        attempt: 0,
        current: None,
        done: false,
    })
}

/// [`retry_pipe`] that additionally dry-constructs the pipeline
/// `retries + 1` times up front, surfacing eager construction panics
/// before the stream is ever read.
pub fn retry_pipe_validated<T, F>(mut factory: F, options: RetryOptions) -> ValueStream<T>
where
    T: Send + 'static,
    F: FnMut() -> ValueStream<T> + Send + 'static,
{
    for _ in 0..=options.retries {
        drop(factory());
    }
    retry_pipe(factory, options)
}

struct RetrySource<T: Send + 'static, F> {
    factory: F,
    options: RetryOptions,
    attempt: usize,
    current: Option<Reader<T>>,
    done: bool,
}

impl<T, F> Source for RetrySource<T, F>
where
    T: Send + 'static,
    F: FnMut() -> ValueStream<T> + Send + 'static,
{
    type Item = T;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<T>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                if self.current.is_none() {
                    let attempt = (self.factory)();
                    match attempt.reader() {
                        Ok(reader) => self.current = Some(reader),
                        Err(error) => {
                            self.done = true;
                            return Err(error);
                        }
                    }
                }
                let reader = match self.current.as_mut() {
                    Some(reader) => reader,
                    None => break,
                };
                match reader.read().await {
                    Ok(Some(value)) => ctl.enqueue(value)?,
                    Ok(None) => {
                        self.done = true;
                        if let Some(reader) = self.current.take() {
                            reader.release();
                        }
                        let _ = ctl.close();
                    }
                    Err(error) => {
                        self.current = None;
                        if self.attempt < self.options.retries {
                            self.attempt += 1;
                            self.options.clock.sleep(self.options.delay).await?;
                        } else {
                            self.done = true;
                            return Err(error);
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
            if let Some(mut reader) = self.current.take() {
                reader.cancel(reason.clone()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use tick_clock::TokioClock;

    use super::*;
    use crate::to_vec;

    fn flaky_factory(
        fail_first: usize,
    ) -> (Arc<AtomicUsize>, impl FnMut() -> ValueStream<i64> + Send) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let factory = move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            if attempt < fail_first {
                // Emits one value, then errors on the next read.
                stream_ops::concat(
                    ValueStream::from_iter(vec![100 + attempt as i64]),
                    ValueStream::fail(StreamError::other(format!("attempt {attempt} died"))),
                )
            } else {
                ValueStream::from_iter(vec![1, 2, 3])
            }
        };
        (calls, factory)
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_failures_with_redelivery() {
        let (calls, factory) = flaky_factory(2);
        let out = retry_pipe(factory, RetryOptions::new(3, 10, TokioClock::handle()));
        // Values from failed attempts stay delivered: at-least-once.
        assert_eq!(
            to_vec(out).await.unwrap(),
            vec![100, 101, 1, 2, 3]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let (calls, factory) = flaky_factory(10);
        let out = retry_pipe(factory, RetryOptions::new(2, 5, TokioClock::handle()));
        assert_eq!(
            to_vec(out).await.unwrap_err(),
            StreamError::other("attempt 2 died")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn validated_variant_dry_runs_the_factory() {
        let (calls, factory) = flaky_factory(0);
        let out = retry_pipe_validated(factory, RetryOptions::new(2, 5, TokioClock::handle()));
        // Three dry constructions up front, then the live one.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(to_vec(out).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
