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
use futures::future::BoxFuture;
use futures::future::Either;
use futures::pin_mut;

use crate::controller::lock_shared;
use crate::controller::Controller;
use crate::controller::Shared;
use crate::error::StreamError;
use crate::reader::Reader;
use crate::stream::Source;
use crate::stream::ValueStream;
use crate::strategy::QueuingStrategy;

/// Push handle feeding a stream created by [`ValueStream::channel`].
///
/// All clones act on the same stream.
pub struct StreamWriter<T: Send + 'static> {
    ctl: Controller<T>,
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T: Send + 'static> Clone for StreamWriter<T> {
    fn clone(&self) -> Self {
        Self {
            ctl: self.ctl.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> StreamWriter<T> {
    pub(crate) fn new(shared: Arc<Mutex<Shared<T>>>) -> Self {
        let ctl = Controller::new(Arc::clone(&shared));
        Self { ctl, shared }
    }

    /// Wait until the stream will accept a value without exceeding its high
    /// water mark, or until a read is parked on an empty queue (rendezvous,
    /// which also unblocks zero-capacity channels). Fails once the stream is
    /// terminal.
    ///
    /// Cancel safe: no value is held by the returned future.
    pub async fn ready(&self) -> Result<(), StreamError> {
        let shared = &self.shared;
        poll_fn(|cx| {
            let mut guard = lock_shared(shared);
            if guard.lifecycle.is_terminal() {
                return Poll::Ready(Err(StreamError::State {
                    state: guard.lifecycle.name(),
                    operation: "write",
                }));
            }
            let rendezvous = guard.queue.is_empty() && guard.read_waker.is_some();
            if guard.desired_size() > 0 || rendezvous {
                Poll::Ready(Ok(()))
            } else {
                guard.write_wakers.push(cx.waker().clone());
                Poll::Pending
            }
        })
        .await
    }

    /// Write one value, suspending first while the queue is at or over its
    /// high water mark.
    pub async fn write(&self, value: T) -> Result<(), StreamError> {
        self.ready().await?;
        self.ctl.enqueue(value)
    }

    /// Write without suspending, buffering past the high water mark if
    /// needed. Returns the stream's `desired_size` after the write.
    pub fn try_write(&self, value: T) -> Result<i64, StreamError> {
        self.ctl.enqueue(value)?;
        Ok(self.ctl.desired_size())
    }

    /// Complete the stream.
    pub fn close(&self) -> Result<(), StreamError> {
        self.ctl.close()
    }

    /// Error the stream.
    pub fn abort(&self, reason: StreamError) -> Result<(), StreamError> {
        self.ctl.error(reason)
    }

    /// Current demand gap of the stream.
    pub fn desired_size(&self) -> i64 {
        self.ctl.desired_size()
    }

    /// Whether the stream reached a terminal state.
    pub fn is_terminated(&self) -> bool {
        self.ctl.is_terminated()
    }
}

/// A duplex stage: values written to `writer` come out of `readable`,
/// possibly transformed by whatever sits between the two.
///
/// Built from a channel (identity) or from any writer/readable pairing;
/// composed with [`ValueStream::pipe_through`].
pub struct TransformPair<In: Send + 'static, Out: Send + 'static> {
    /// Write side of the stage.
    pub writer: StreamWriter<In>,
    /// Read side of the stage.
    pub readable: ValueStream<Out>,
}

impl<In: Send + 'static, Out: Send + 'static> TransformPair<In, Out> {
    /// Pair up an existing writer and readable.
    pub fn new(writer: StreamWriter<In>, readable: ValueStream<Out>) -> Self {
        Self { writer, readable }
    }
}

impl<T: Send + 'static> TransformPair<T, T> {
    /// Identity stage over a plain channel.
    pub fn identity(strategy: QueuingStrategy) -> Self {
        let (writer, readable) = ValueStream::channel(strategy);
        Self { writer, readable }
    }
}

impl<T: Send + 'static> ValueStream<T> {
    /// Feed this stream through a duplex stage, yielding the stage's read
    /// side. Backpressure is respected on both hops; cancelling the result
    /// cancels this stream and the stage.
    pub fn pipe_through<Out: Send + 'static>(self, pair: TransformPair<T, Out>) -> ValueStream<Out> {
        let upstream = match self.reader() {
            Ok(reader) => reader,
            Err(error) => return ValueStream::fail(error),
        };
        let inner = match pair.readable.reader() {
            Ok(reader) => reader,
            Err(error) => return ValueStream::fail(error),
        };
        ValueStream::new(PumpSource {
            upstream: Some(upstream),
            inner: Some(inner),
            writer: pair.writer,
            pending_write: None,
            upstream_done: false,
            done: false,
        })
    }
}

/// Moves values upstream → stage writer while draining the stage's read
/// side, whichever is ready first. A value taken from upstream is parked in
/// `pending_write` until the stage accepts it, so no select branch can drop
/// one.
struct PumpSource<In: Send + 'static, Out: Send + 'static> {
    upstream: Option<Reader<In>>,
    inner: Option<Reader<Out>>,
    writer: StreamWriter<In>,
    pending_write: Option<In>,
    upstream_done: bool,
    done: bool,
}

impl<In: Send + 'static, Out: Send + 'static> PumpSource<In, Out> {
    fn handle_inner(
        &mut self,
        event: Result<Option<Out>, StreamError>,
        ctl: &Controller<Out>,
    ) -> Result<(), StreamError> {
        match event {
            Ok(Some(value)) => {
                ctl.enqueue(value)?;
                Ok(())
            }
            Ok(None) => {
                self.done = true;
                ctl.close()?;
                Ok(())
            }
            Err(error) => {
                self.done = true;
                Err(error)
            }
        }
    }
}

impl<In: Send + 'static, Out: Send + 'static> Source for PumpSource<In, Out> {
    type Item = Out;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<Out>) -> BoxFuture<'a, Result<(), StreamError>> {
        enum Turn<In, Out> {
            Inner(Result<Option<Out>, StreamError>),
            Accepted(Result<(), StreamError>),
            Fed(Result<Option<In>, StreamError>),
        }

        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                if self.inner.is_none() {
                    break;
                }
                let turn = {
                    let inner = match self.inner.as_mut() {
                        Some(inner) => inner,
                        None => break,
                    };
                    if self.upstream_done && self.pending_write.is_none() {
                        Turn::Inner(inner.read().await)
                    } else if self.pending_write.is_some() {
                        let accept = self.writer.ready();
                        let drain = inner.read();
                        pin_mut!(accept);
                        pin_mut!(drain);
                        match select(drain, accept).await {
                            Either::Left((event, _)) => Turn::Inner(event),
                            Either::Right((ready, _)) => Turn::Accepted(ready),
                        }
                    } else {
                        match self.upstream.as_mut() {
                            Some(upstream) => {
                                let feed = upstream.read();
                                let drain = inner.read();
                                pin_mut!(feed);
                                pin_mut!(drain);
                                match select(drain, feed).await {
                                    Either::Left((event, _)) => Turn::Inner(event),
                                    Either::Right((fed, _)) => Turn::Fed(fed),
                                }
                            }
                            None => {
                                self.upstream_done = true;
                                continue;
                            }
                        }
                    }
                };
                match turn {
                    Turn::Inner(event) => self.handle_inner(event, ctl)?,
                    Turn::Accepted(Ok(())) => {
                        if let Some(value) = self.pending_write.take() {
                            let _ = self.writer.try_write(value);
                        }
                    }
                    Turn::Accepted(Err(_)) => {
                        // Stage no longer accepts input; its read side will
                        // report the outcome.
                        self.pending_write = None;
                        self.upstream_done = true;
                    }
                    Turn::Fed(Ok(Some(value))) => self.pending_write = Some(value),
                    Turn::Fed(Ok(None)) => {
                        self.upstream_done = true;
                        let _ = self.writer.close();
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                    }
                    Turn::Fed(Err(error)) => {
                        self.upstream_done = true;
                        let _ = self.writer.abort(error);
                        if let Some(reader) = self.upstream.take() {
                            reader.release();
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn cancel<'a>(&'a mut self, reason: &'a StreamError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(mut reader) = self.upstream.take() {
                reader.cancel(reason.clone()).await;
            }
            if let Some(mut reader) = self.inner.take() {
                reader.cancel(reason.clone()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn channel_round_trip() {
        let (writer, stream) = ValueStream::channel(QueuingStrategy::new(4));
        let mut reader = stream.reader().unwrap();
        writer.write(1).await.unwrap();
        writer.write(2).await.unwrap();
        writer.close().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        assert_eq!(reader.read().await.unwrap(), Some(2));
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_suspends_at_high_water_mark() {
        let (writer, stream) = ValueStream::channel(QueuingStrategy::new(1));
        writer.write(1).await.unwrap();
        assert_eq!(writer.desired_size(), 0);

        let blocked = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.write(2).await })
        };
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished(), "second write must wait for demand");

        let mut reader = stream.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        blocked.await.unwrap().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn abort_surfaces_to_reader() {
        let (writer, stream) = ValueStream::<u8>::channel(QueuingStrategy::default());
        let mut reader = stream.reader().unwrap();
        writer.abort(StreamError::other("upstream blew up")).unwrap();
        assert_matches!(reader.read().await, Err(StreamError::Other(msg)) if msg == "upstream blew up");
        assert_matches!(writer.try_write(1), Err(StreamError::State { .. }));
    }

    #[tokio::test]
    async fn pipe_through_identity_preserves_order() {
        let source = ValueStream::from_iter(vec![1, 2, 3, 4]);
        let out = source.pipe_through(TransformPair::identity(QueuingStrategy::new(2)));
        let mut reader = out.reader().unwrap();
        let mut got = Vec::new();
        while let Some(v) = reader.read().await.unwrap() {
            got.push(v);
        }
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cancelling_piped_stream_reaches_source() {
        struct Spy {
            cancelled: Arc<std::sync::atomic::AtomicBool>,
        }
        impl Source for Spy {
            type Item = u8;
            fn pull<'a>(
                &'a mut self,
                ctl: &'a Controller<u8>,
            ) -> BoxFuture<'a, Result<(), StreamError>> {
                Box::pin(async move {
                    ctl.enqueue(1)?;
                    Ok(())
                })
            }
            fn cancel<'a>(&'a mut self, _reason: &'a StreamError) -> BoxFuture<'a, ()> {
                Box::pin(async move {
                    self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
                })
            }
        }

        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let source = ValueStream::new(Spy {
            cancelled: Arc::clone(&cancelled),
        });
        let out = source.pipe_through(TransformPair::identity(QueuingStrategy::default()));
        let mut reader = out.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        reader.cancel(StreamError::cancelled("stop")).await;
        assert!(cancelled.load(std::sync::atomic::Ordering::SeqCst));
    }
}
