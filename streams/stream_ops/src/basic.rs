/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Element-wise operators with no time dependence.

use std::marker::PhantomData;

use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::StreamError;
use pull_stream::ValueStream;

use crate::kernel::apply_stage;
use crate::kernel::Operator;
use crate::kernel::Stage;

/// Emit `f(v)` for every upstream `v`.
pub fn map<In, Out, F>(f: F) -> Map<F>
where
    F: FnMut(In) -> Out + Send + 'static,
{
    Map { f }
}

/// See [`map`].
pub struct Map<F> {
    f: F,
}

impl<In, Out, F> Stage<In> for Map<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: FnMut(In) -> Out + Send + 'static,
{
    type Out = Out;

    fn on_value(&mut self, value: In, ctl: &Controller<Out>) -> Result<(), StreamError> {
        ctl.enqueue((self.f)(value))
    }
}

impl<In, Out, F> Operator<In> for Map<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: FnMut(In) -> Out + Send + 'static,
{
    type Out = Out;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<Out> {
        apply_stage(src, self, strategy)
    }
}

/// Like [`map`] for fallible transforms: an `Err` from `f` errors the
/// stream and cancels upstream with the same reason.
pub fn try_map<In, Out, F>(f: F) -> TryMap<F>
where
    F: FnMut(In) -> anyhow::Result<Out> + Send + 'static,
{
    TryMap { f }
}

/// See [`try_map`].
pub struct TryMap<F> {
    f: F,
}

impl<In, Out, F> Stage<In> for TryMap<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: FnMut(In) -> anyhow::Result<Out> + Send + 'static,
{
    type Out = Out;

    fn on_value(&mut self, value: In, ctl: &Controller<Out>) -> Result<(), StreamError> {
        match (self.f)(value) {
            Ok(out) => ctl.enqueue(out),
            Err(error) => Err(StreamError::from(error)),
        }
    }
}

impl<In, Out, F> Operator<In> for TryMap<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: FnMut(In) -> anyhow::Result<Out> + Send + 'static,
{
    type Out = Out;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<Out> {
        apply_stage(src, self, strategy)
    }
}

/// Emit `v` iff `p(&v)` holds.
pub fn filter<In, P>(p: P) -> Filter<P>
where
    P: FnMut(&In) -> bool + Send + 'static,
{
    Filter { p }
}

/// See [`filter`].
pub struct Filter<P> {
    p: P,
}

impl<In, P> Stage<In> for Filter<P>
where
    In: Send + 'static,
    P: FnMut(&In) -> bool + Send + 'static,
{
    type Out = In;

    fn on_value(&mut self, value: In, ctl: &Controller<In>) -> Result<(), StreamError> {
        if (self.p)(&value) {
            ctl.enqueue(value)?;
        }
        Ok(())
    }
}

impl<In, P> Operator<In> for Filter<P>
where
    In: Send + 'static,
    P: FnMut(&In) -> bool + Send + 'static,
{
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        apply_stage(src, self, strategy)
    }
}

/// Map with a skip: `None` from `f` drops the item.
pub fn filter_map<In, Out, F>(f: F) -> FilterMap<F>
where
    F: FnMut(In) -> Option<Out> + Send + 'static,
{
    FilterMap { f }
}

/// See [`filter_map`].
pub struct FilterMap<F> {
    f: F,
}

impl<In, Out, F> Stage<In> for FilterMap<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: FnMut(In) -> Option<Out> + Send + 'static,
{
    type Out = Out;

    fn on_value(&mut self, value: In, ctl: &Controller<Out>) -> Result<(), StreamError> {
        if let Some(out) = (self.f)(value) {
            ctl.enqueue(out)?;
        }
        Ok(())
    }
}

impl<In, Out, F> Operator<In> for FilterMap<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: FnMut(In) -> Option<Out> + Send + 'static,
{
    type Out = Out;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<Out> {
        apply_stage(src, self, strategy)
    }
}

/// Run `side` on each value, then pass it through unchanged. Errors from
/// `side` surface as the stream's error.
pub fn tap<In, F>(side: F) -> Tap<F>
where
    F: FnMut(&In) -> anyhow::Result<()> + Send + 'static,
{
    Tap { side }
}

/// See [`tap`].
pub struct Tap<F> {
    side: F,
}

impl<In, F> Stage<In> for Tap<F>
where
    In: Send + 'static,
    F: FnMut(&In) -> anyhow::Result<()> + Send + 'static,
{
    type Out = In;

    fn on_value(&mut self, value: In, ctl: &Controller<In>) -> Result<(), StreamError> {
        (self.side)(&value).map_err(StreamError::from)?;
        ctl.enqueue(value)
    }
}

impl<In, F> Operator<In> for Tap<F>
where
    In: Send + 'static,
    F: FnMut(&In) -> anyhow::Result<()> + Send + 'static,
{
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        apply_stage(src, self, strategy)
    }
}

/// Discard every value, preserving completion and error timing.
pub fn ignore_elements<In>() -> IgnoreElements<In> {
    IgnoreElements {
        _marker: PhantomData,
    }
}

/// See [`ignore_elements`].
pub struct IgnoreElements<In> {
    _marker: PhantomData<fn() -> In>,
}

impl<In: Send + 'static> Stage<In> for IgnoreElements<In> {
    type Out = In;

    fn on_value(&mut self, _value: In, _ctl: &Controller<In>) -> Result<(), StreamError> {
        Ok(())
    }
}

impl<In: Send + 'static> Operator<In> for IgnoreElements<In> {
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        apply_stage(src, self, strategy)
    }
}

/// Emit `default` iff upstream completes without emitting anything.
pub fn default_if_empty<In>(default: In) -> DefaultIfEmpty<In>
where
    In: Send + 'static,
{
    DefaultIfEmpty {
        default: Some(default),
        saw_value: false,
    }
}

/// See [`default_if_empty`].
pub struct DefaultIfEmpty<In> {
    default: Option<In>,
    saw_value: bool,
}

impl<In: Send + 'static> Stage<In> for DefaultIfEmpty<In> {
    type Out = In;

    fn on_value(&mut self, value: In, ctl: &Controller<In>) -> Result<(), StreamError> {
        self.saw_value = true;
        self.default = None;
        ctl.enqueue(value)
    }

    fn flush(&mut self, ctl: &Controller<In>) -> Result<(), StreamError> {
        if self.saw_value {
            return Ok(());
        }
        if let Some(default) = self.default.take() {
            ctl.enqueue(default)?;
        }
        Ok(())
    }
}

impl<In: Send + 'static> Operator<In> for DefaultIfEmpty<In> {
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        apply_stage(src, self, strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::collect;

    #[tokio::test]
    async fn map_transforms_each_value() {
        let out = map(|x: i64| x * 10).apply(
            ValueStream::from_iter(vec![1, 2, 3]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn try_map_error_surfaces() {
        let out = try_map(|x: i64| {
            if x == 2 {
                anyhow::bail!("two is not welcome")
            } else {
                Ok(x)
            }
        })
        .apply(
            ValueStream::from_iter(vec![1, 2, 3]),
            QueuingStrategy::default(),
        );
        let mut reader = out.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        assert_eq!(
            reader.read().await.unwrap_err(),
            StreamError::other("two is not welcome")
        );
    }

    #[tokio::test]
    async fn filter_and_filter_map() {
        let evens = filter(|x: &i64| x % 2 == 0).apply(
            ValueStream::from_iter(vec![1, 2, 3, 4]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(evens).await.unwrap(), vec![2, 4]);

        let halves = filter_map(|x: i64| if x % 2 == 0 { Some(x / 2) } else { None }).apply(
            ValueStream::from_iter(vec![1, 2, 3, 4]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(halves).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn tap_observes_without_changing() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let out = tap(move |v: &i64| {
            sink.lock().unwrap().push(*v);
            Ok(())
        })
        .apply(
            ValueStream::from_iter(vec![1, 2]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![1, 2]);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn ignore_elements_only_terminates() {
        let out = ignore_elements().apply(
            ValueStream::from_iter(vec![1, 2, 3]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), Vec::<i64>::new());
    }

    #[tokio::test]
    async fn default_if_empty_fills_empty_stream() {
        let out = default_if_empty(42).apply(ValueStream::empty(), QueuingStrategy::default());
        assert_eq!(collect(out).await.unwrap(), vec![42]);

        let out = default_if_empty(42).apply(
            ValueStream::from_iter(vec![7]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![7]);
    }
}
