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

use futures::future::BoxFuture;

use crate::controller::lock_shared;
use crate::controller::Controller;
use crate::controller::ReadProbe;
use crate::controller::Shared;
use crate::error::StreamError;
use crate::reader::Reader;
use crate::strategy::QueuingStrategy;
use crate::writer::StreamWriter;

/// Producer hooks backing a [`ValueStream`].
///
/// `pull` is invoked only while demand exists (the queue cannot satisfy a
/// pending read) and is never re-entered. A pull that finishes without
/// enqueueing, closing or erroring parks the reader until the controller
/// state changes, so push-mode sources may simply return.
pub trait Source: Send {
    /// The item type produced by this source.
    type Item: Send + 'static;

    /// One-time setup, run before the first pull. May already enqueue or
    /// terminate the stream.
    fn start(&mut self, ctl: &Controller<Self::Item>) -> Result<(), StreamError> {
        let _ = ctl;
        Ok(())
    }

    /// Produce more items. Returning an error puts the stream into the
    /// errored state.
    fn pull<'a>(
        &'a mut self,
        ctl: &'a Controller<Self::Item>,
    ) -> BoxFuture<'a, Result<(), StreamError>>;

    /// Consumer-initiated termination. Runs exactly once; failures on this
    /// path must be swallowed by the implementation.
    fn cancel<'a>(&'a mut self, reason: &'a StreamError) -> BoxFuture<'a, ()> {
        let _ = reason;
        Box::pin(async {})
    }
}

pub(crate) struct Machine<T: Send + 'static> {
    pub(crate) source: Box<dyn Source<Item = T>>,
    pub(crate) started: bool,
}

/// A lazy, pull-driven, cancellable sequence of values.
///
/// A stream does nothing until a [`Reader`] is acquired and read; at most
/// one reader may be live at a time. See the crate docs for the protocol.
pub struct ValueStream<T: Send + 'static> {
    pub(crate) shared: Arc<Mutex<Shared<T>>>,
    pub(crate) machine: Arc<Mutex<Option<Machine<T>>>>,
}

impl<T: Send + 'static> std::fmt::Debug for ValueStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueStream").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> ValueStream<T> {
    /// Stream driven by `source` with the default queuing strategy.
    pub fn new(source: impl Source<Item = T> + 'static) -> Self {
        Self::with_strategy(source, QueuingStrategy::default())
    }

    /// Stream driven by `source` with an explicit queuing strategy.
    pub fn with_strategy(source: impl Source<Item = T> + 'static, strategy: QueuingStrategy) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::new(strategy))),
            machine: Arc::new(Mutex::new(Some(Machine {
                source: Box::new(source),
                started: false,
            }))),
        }
    }

    /// Acquire the exclusive reader.
    ///
    /// Fails with [`StreamError::Locked`] while another reader is live.
    pub fn reader(&self) -> Result<Reader<T>, StreamError> {
        let machine = self
            .machine
            .lock()
            .expect("stream machine poisoned")
            .take()
            .ok_or(StreamError::Locked)?;
        Ok(Reader::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.machine),
            machine,
        ))
    }

    /// Whether a reader currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.machine
            .lock()
            .expect("stream machine poisoned")
            .is_none()
    }

    /// Observation handle for parked-reader detection.
    pub fn probe(&self) -> ReadProbe {
        ReadProbe::new(Arc::clone(&self.shared))
    }

    /// Stream yielding the items of `iter` in order, then completing.
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::new(IterSource {
            iter: iter.into_iter(),
        })
    }

    /// Single-value stream.
    pub fn of(value: T) -> Self {
        Self::from_iter(std::iter::once(value))
    }

    /// Stream that completes without emitting.
    pub fn empty() -> Self {
        Self::from_iter(std::iter::empty())
    }

    /// Stream that never emits and never terminates on its own.
    pub fn never() -> Self {
        Self::new(NeverSource {
            _marker: std::marker::PhantomData,
        })
    }

    /// Stream that errors on the first read.
    pub fn fail(error: StreamError) -> Self {
        Self::new(FailSource {
            error: Some(error),
            _marker: std::marker::PhantomData,
        })
    }

    /// Push endpoint: a writer feeding a stream through the backpressure
    /// queue. The writer side suspends in `write` while `desired_size` is
    /// not positive.
    pub fn channel(strategy: QueuingStrategy) -> (StreamWriter<T>, Self) {
        Self::channel_with_cancel(strategy, |_reason: &StreamError| {})
    }

    /// Like [`ValueStream::channel`], with a hook observing consumer
    /// cancellation of the readable side.
    pub fn channel_with_cancel(
        strategy: QueuingStrategy,
        on_cancel: impl FnMut(&StreamError) + Send + 'static,
    ) -> (StreamWriter<T>, Self) {
        let stream = Self::with_strategy(
            PushSource {
                on_cancel,
                _marker: std::marker::PhantomData,
            },
            strategy,
        );
        let writer = StreamWriter::new(Arc::clone(&stream.shared));
        (writer, stream)
    }
}

impl ValueStream<i64> {
    /// Integers from `start` (inclusive) to `end` (exclusive).
    pub fn range(start: i64, end: i64) -> Self {
        Self::from_iter(start..end.max(start))
    }
}

struct IterSource<I> {
    iter: I,
}

impl<I> Source for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    type Item = I::Item;

    fn pull<'a>(
        &'a mut self,
        ctl: &'a Controller<Self::Item>,
    ) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 {
                match self.iter.next() {
                    Some(value) => ctl.enqueue(value)?,
                    None => {
                        ctl.close()?;
                        break;
                    }
                }
            }
            Ok(())
        })
    }
}

struct NeverSource<T> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Source for NeverSource<T> {
    type Item = T;

    fn pull<'a>(
        &'a mut self,
        _ctl: &'a Controller<Self::Item>,
    ) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async { Ok(()) })
    }
}

struct FailSource<T> {
    error: Option<StreamError>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Source for FailSource<T> {
    type Item = T;

    fn pull<'a>(
        &'a mut self,
        _ctl: &'a Controller<Self::Item>,
    ) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            if let Some(error) = self.error.take() {
                return Err(error);
            }
            Ok(())
        })
    }
}

struct PushSource<T, F> {
    on_cancel: F,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> Source for PushSource<T, F>
where
    T: Send + 'static,
    F: FnMut(&StreamError) + Send,
{
    type Item = T;

    fn pull<'a>(
        &'a mut self,
        _ctl: &'a Controller<Self::Item>,
    ) -> BoxFuture<'a, Result<(), StreamError>> {
        // Values arrive through the writer; the reader parks until they do.
        Box::pin(async { Ok(()) })
    }

    fn cancel<'a>(&'a mut self, reason: &'a StreamError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            (self.on_cancel)(reason);
        })
    }
}

impl<T: Send + 'static> ValueStream<T> {
    /// High water mark the stream was built with.
    pub fn high_water_mark(&self) -> usize {
        lock_shared(&self.shared).high_water_mark
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    async fn drain<T: Send + 'static>(stream: ValueStream<T>) -> Result<Vec<T>, StreamError> {
        let mut reader = stream.reader()?;
        let mut out = Vec::new();
        while let Some(value) = reader.read().await? {
            out.push(value);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn from_iter_preserves_order() {
        let stream = ValueStream::from_iter(vec![1, 2, 3]);
        assert_eq!(drain(stream).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn reads_after_done_stay_done() {
        let stream = ValueStream::of(7u8);
        let mut reader = stream.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(7));
        assert_eq!(reader.read().await.unwrap(), None);
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn fail_delivers_error_once() {
        let stream = ValueStream::<()>::fail(StreamError::other("boom"));
        let mut reader = stream.reader().unwrap();
        assert_matches!(reader.read().await, Err(StreamError::Other(msg)) if msg == "boom");
        // Terminal afterwards; the error is not re-delivered.
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn second_reader_is_rejected_until_release() {
        let stream = ValueStream::from_iter(vec![1]);
        let reader = stream.reader().unwrap();
        assert_matches!(stream.reader(), Err(StreamError::Locked));
        assert!(stream.is_locked());
        reader.release();
        assert!(!stream.is_locked());
        assert!(stream.reader().is_ok());
    }

    #[tokio::test]
    async fn range_is_half_open() {
        assert_eq!(
            drain(ValueStream::range(2, 5)).await.unwrap(),
            vec![2, 3, 4]
        );
        assert_eq!(drain(ValueStream::range(3, 3)).await.unwrap(), vec![]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_parks_the_reader() {
        let stream = ValueStream::<u8>::never();
        let mut reader = stream.reader().unwrap();
        let read = tokio::time::timeout(std::time::Duration::from_millis(50), reader.read());
        assert!(read.await.is_err(), "read should still be pending");
    }

    quickcheck::quickcheck! {
        fn prop_reads_preserve_iteration_order(xs: Vec<u16>) -> bool {
            let expected = xs.clone();
            futures::executor::block_on(async move {
                drain(ValueStream::from_iter(xs)).await.unwrap() == expected
            })
        }
    }
}
