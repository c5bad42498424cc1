/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Flattening operators over streams of inner sequences.

use std::marker::PhantomData;

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

use crate::kernel::Operator;

/// Inner sequences accepted by the flattening operators: streams and plain
/// vectors (delivered as synchronous streams).
pub trait IntoValueStream: Send + 'static {
    /// Item type of the inner sequence.
    type Item: Send + 'static;

    /// View the sequence as a stream.
    fn into_value_stream(self) -> ValueStream<Self::Item>;
}

impl<T: Send + 'static> IntoValueStream for ValueStream<T> {
    type Item = T;

    fn into_value_stream(self) -> ValueStream<T> {
        self
    }
}

impl<T: Send + 'static> IntoValueStream for Vec<T> {
    type Item = T;

    fn into_value_stream(self) -> ValueStream<T> {
        ValueStream::from_iter(self)
    }
}

/// Consume each inner sequence fully, in arrival order, forwarding its
/// values. Completes only once the outer stream and the current inner have
/// both completed; any error propagates.
pub fn concat_all<S: IntoValueStream>() -> ConcatAll<S> {
    ConcatAll {
        _marker: PhantomData,
    }
}

/// See [`concat_all`].
pub struct ConcatAll<S> {
    _marker: PhantomData<fn() -> S>,
}

impl<S: IntoValueStream> Operator<S> for ConcatAll<S> {
    type Out = S::Item;

    fn apply(self, src: ValueStream<S>, strategy: QueuingStrategy) -> ValueStream<S::Item> {
        match src.reader() {
            Ok(outer) => ValueStream::with_strategy(
                ConcatAllSource {
                    outer: Some(outer),
                    inner: None,
                    done: false,
                },
                strategy,
            ),
            Err(error) => ValueStream::fail(error),
        }
    }
}

struct ConcatAllSource<S: IntoValueStream> {
    outer: Option<Reader<S>>,
    inner: Option<Reader<S::Item>>,
    done: bool,
}

impl<S: IntoValueStream> Source for ConcatAllSource<S> {
    type Item = S::Item;

    fn pull<'a>(
        &'a mut self,
        ctl: &'a Controller<S::Item>,
    ) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                if let Some(inner) = self.inner.as_mut() {
                    match inner.read().await {
                        Ok(Some(value)) => ctl.enqueue(value)?,
                        Ok(None) => self.inner = None,
                        Err(error) => {
                            self.done = true;
                            self.inner = None;
                            if let Some(mut outer) = self.outer.take() {
                                outer.cancel(error.clone()).await;
                            }
                            return Err(error);
                        }
                    }
                    continue;
                }
                let outer = match self.outer.as_mut() {
                    Some(outer) => outer,
                    None => {
                        self.done = true;
                        let _ = ctl.close();
                        break;
                    }
                };
                match outer.read().await {
                    Ok(Some(sequence)) => {
                        let stream = sequence.into_value_stream();
                        match stream.reader() {
                            Ok(reader) => self.inner = Some(reader),
                            Err(error) => {
                                self.done = true;
                                if let Some(mut outer) = self.outer.take() {
                                    outer.cancel(error.clone()).await;
                                }
                                return Err(error);
                            }
                        }
                    }
                    Ok(None) => {
                        self.done = true;
                        if let Some(outer) = self.outer.take() {
                            outer.release();
                        }
                        let _ = ctl.close();
                    }
                    Err(error) => {
                        self.done = true;
                        if let Some(outer) = self.outer.take() {
                            outer.release();
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
            if let Some(mut inner) = self.inner.take() {
                inner.cancel(reason.clone()).await;
            }
            if let Some(mut outer) = self.outer.take() {
                outer.cancel(reason.clone()).await;
            }
        })
    }
}

/// Drain one inner sequence at a time, dropping every inner that arrives
/// while one is active — including inners arriving synchronously in the
/// same burst. Acceptance resumes once the active inner completes.
pub fn exhaust_all<S: IntoValueStream>() -> ExhaustAll<S> {
    ExhaustAll {
        _marker: PhantomData,
    }
}

/// See [`exhaust_all`].
pub struct ExhaustAll<S> {
    _marker: PhantomData<fn() -> S>,
}

impl<S: IntoValueStream> Operator<S> for ExhaustAll<S> {
    type Out = S::Item;

    fn apply(self, src: ValueStream<S>, strategy: QueuingStrategy) -> ValueStream<S::Item> {
        match src.reader() {
            Ok(outer) => ValueStream::with_strategy(
                ExhaustAllSource {
                    outer: Some(outer),
                    inner: None,
                    outer_done: false,
                    done: false,
                },
                strategy,
            ),
            Err(error) => ValueStream::fail(error),
        }
    }
}

struct ExhaustAllSource<S: IntoValueStream> {
    outer: Option<Reader<S>>,
    inner: Option<Reader<S::Item>>,
    outer_done: bool,
    done: bool,
}

enum ExhaustTurn<S: IntoValueStream> {
    Inner(Result<Option<S::Item>, StreamError>),
    Outer(Result<Option<S>, StreamError>),
}

impl<S: IntoValueStream> Source for ExhaustAllSource<S> {
    type Item = S::Item;

    fn pull<'a>(
        &'a mut self,
        ctl: &'a Controller<S::Item>,
    ) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                let turn = match (self.inner.as_mut(), self.outer.as_mut()) {
                    (Some(inner), Some(outer)) if !self.outer_done => {
                        // The outer side goes first in the race so that
                        // in-window arrivals are consumed (and dropped)
                        // instead of waiting their turn after the inner.
                        let next = outer.read();
                        let drain = inner.read();
                        pin_mut!(next);
                        pin_mut!(drain);
                        match select(next, drain).await {
                            Either::Left((event, _)) => ExhaustTurn::Outer(event),
                            Either::Right((event, _)) => ExhaustTurn::Inner(event),
                        }
                    }
                    (Some(inner), _) => ExhaustTurn::Inner(inner.read().await),
                    (None, _) if self.outer_done => {
                        self.done = true;
                        let _ = ctl.close();
                        break;
                    }
                    (None, Some(outer)) => ExhaustTurn::Outer(outer.read().await),
                    (None, None) => {
                        self.done = true;
                        let _ = ctl.close();
                        break;
                    }
                };
                match turn {
                    ExhaustTurn::Inner(Ok(Some(value))) => ctl.enqueue(value)?,
                    ExhaustTurn::Inner(Ok(None)) => {
                        self.inner = None;
                        if self.outer_done {
                            self.done = true;
                            let _ = ctl.close();
                        }
                    }
                    ExhaustTurn::Inner(Err(error)) => {
                        self.done = true;
                        self.inner = None;
                        if let Some(mut outer) = self.outer.take() {
                            outer.cancel(error.clone()).await;
                        }
                        return Err(error);
                    }
                    ExhaustTurn::Outer(Ok(Some(sequence))) => {
                        if self.inner.is_none() {
                            let stream = sequence.into_value_stream();
                            match stream.reader() {
                                Ok(reader) => self.inner = Some(reader),
                                Err(error) => {
                                    self.done = true;
                                    if let Some(mut outer) = self.outer.take() {
                                        outer.cancel(error.clone()).await;
                                    }
                                    return Err(error);
                                }
                            }
                        }
                        // An active inner exhausts this arrival: dropped.
                    }
                    ExhaustTurn::Outer(Ok(None)) => {
                        self.outer_done = true;
                        if let Some(outer) = self.outer.take() {
                            outer.release();
                        }
                        if self.inner.is_none() {
                            self.done = true;
                            let _ = ctl.close();
                        }
                    }
                    ExhaustTurn::Outer(Err(error)) => {
                        self.done = true;
                        if let Some(outer) = self.outer.take() {
                            outer.release();
                        }
                        if let Some(mut inner) = self.inner.take() {
                            inner.cancel(error.clone()).await;
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
            if let Some(mut inner) = self.inner.take() {
                inner.cancel(reason.clone()).await;
            }
            if let Some(mut outer) = self.outer.take() {
                outer.cancel(reason.clone()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::collect;

    #[tokio::test]
    async fn concat_all_flattens_in_order() {
        let outer = ValueStream::from_iter(vec![vec![1, 2], vec![], vec![3, 4, 5]]);
        let out = concat_all().apply(outer, QueuingStrategy::default());
        assert_eq!(collect(out).await.unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn concat_all_accepts_inner_streams() {
        let outer = ValueStream::from_iter(vec![
            ValueStream::from_iter(vec![1, 2]),
            ValueStream::from_iter(vec![3]),
        ]);
        let out = concat_all().apply(outer, QueuingStrategy::default());
        assert_eq!(collect(out).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn concat_all_propagates_inner_error() {
        let outer = ValueStream::from_iter(vec![
            ValueStream::from_iter(vec![1]),
            ValueStream::fail(StreamError::other("inner broke")),
        ]);
        let out = concat_all().apply(outer, QueuingStrategy::default());
        let mut reader = out.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        assert_eq!(
            reader.read().await.unwrap_err(),
            StreamError::other("inner broke")
        );
    }

    #[tokio::test]
    async fn exhaust_all_processes_only_first_synchronous_inner() {
        let outer = ValueStream::from_iter(vec![vec![1, 2, 3], vec![4, 5], vec![6]]);
        let out = exhaust_all().apply(outer, QueuingStrategy::default());
        assert_eq!(collect(out).await.unwrap(), vec![1, 2, 3]);
    }
}
