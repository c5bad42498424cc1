/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Accumulating operators.

use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::StreamError;
use pull_stream::ValueStream;

use crate::kernel::apply_stage;
use crate::kernel::Operator;
use crate::kernel::Stage;

/// Running fold without a seed: the first value seeds the accumulator and
/// is emitted verbatim; each later value emits `f(acc, v)`.
pub fn scan<In, F>(f: F) -> Scan<In, F>
where
    In: Clone + Send + 'static,
    F: FnMut(In, In) -> In + Send + 'static,
{
    Scan { f, acc: None }
}

/// See [`scan`].
pub struct Scan<In, F> {
    f: F,
    acc: Option<In>,
}

impl<In, F> Stage<In> for Scan<In, F>
where
    In: Clone + Send + 'static,
    F: FnMut(In, In) -> In + Send + 'static,
{
    type Out = In;

    fn on_value(&mut self, value: In, ctl: &Controller<In>) -> Result<(), StreamError> {
        let next = match self.acc.take() {
            None => value,
            Some(prev) => (self.f)(prev, value),
        };
        ctl.enqueue(next.clone())?;
        self.acc = Some(next);
        Ok(())
    }
}

impl<In, F> Operator<In> for Scan<In, F>
where
    In: Clone + Send + 'static,
    F: FnMut(In, In) -> In + Send + 'static,
{
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        apply_stage(src, self, strategy)
    }
}

/// Running fold from `seed`: emits `f(acc, v)` for every value.
pub fn scan_seeded<In, Acc, F>(seed: Acc, f: F) -> ScanSeeded<Acc, F>
where
    Acc: Clone + Send + 'static,
    F: FnMut(Acc, In) -> Acc + Send + 'static,
{
    ScanSeeded { f, acc: Some(seed) }
}

/// See [`scan_seeded`].
pub struct ScanSeeded<Acc, F> {
    f: F,
    acc: Option<Acc>,
}

impl<In, Acc, F> Stage<In> for ScanSeeded<Acc, F>
where
    In: Send + 'static,
    Acc: Clone + Send + 'static,
    F: FnMut(Acc, In) -> Acc + Send + 'static,
{
    type Out = Acc;

    fn on_value(&mut self, value: In, ctl: &Controller<Acc>) -> Result<(), StreamError> {
        if let Some(prev) = self.acc.take() {
            let next = (self.f)(prev, value);
            ctl.enqueue(next.clone())?;
            self.acc = Some(next);
        }
        Ok(())
    }
}

impl<In, Acc, F> Operator<In> for ScanSeeded<Acc, F>
where
    In: Send + 'static,
    Acc: Clone + Send + 'static,
    F: FnMut(Acc, In) -> Acc + Send + 'static,
{
    type Out = Acc;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<Acc> {
        apply_stage(src, self, strategy)
    }
}

/// Left fold from `seed`, emitting only the final accumulator when
/// upstream completes.
pub fn reduce<In, Acc, F>(seed: Acc, f: F) -> Reduce<Acc, F>
where
    Acc: Send + 'static,
    F: FnMut(Acc, In) -> Acc + Send + 'static,
{
    Reduce { f, acc: Some(seed) }
}

/// See [`reduce`].
pub struct Reduce<Acc, F> {
    f: F,
    acc: Option<Acc>,
}

impl<In, Acc, F> Stage<In> for Reduce<Acc, F>
where
    In: Send + 'static,
    Acc: Send + 'static,
    F: FnMut(Acc, In) -> Acc + Send + 'static,
{
    type Out = Acc;

    fn on_value(&mut self, value: In, _ctl: &Controller<Acc>) -> Result<(), StreamError> {
        if let Some(prev) = self.acc.take() {
            self.acc = Some((self.f)(prev, value));
        }
        Ok(())
    }

    fn flush(&mut self, ctl: &Controller<Acc>) -> Result<(), StreamError> {
        if let Some(acc) = self.acc.take() {
            ctl.enqueue(acc)?;
        }
        Ok(())
    }
}

impl<In, Acc, F> Operator<In> for Reduce<Acc, F>
where
    In: Send + 'static,
    Acc: Send + 'static,
    F: FnMut(Acc, In) -> Acc + Send + 'static,
{
    type Out = Acc;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<Acc> {
        apply_stage(src, self, strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::collect;

    #[tokio::test]
    async fn unseeded_scan_emits_first_value_verbatim() {
        let out = scan(|a: i64, v| a + v).apply(
            ValueStream::from_iter(vec![1, 2, 3, 4]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![1, 3, 6, 10]);
    }

    #[tokio::test]
    async fn seeded_scan_folds_from_seed() {
        let out = scan_seeded(100, |a: i64, v: i64| a + v).apply(
            ValueStream::from_iter(vec![1, 2, 3]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![101, 103, 106]);
    }

    #[tokio::test]
    async fn reduce_emits_only_final_fold() {
        let out = reduce(0, |a: i64, v: i64| a + v).apply(
            ValueStream::from_iter(vec![1, 2, 3, 4]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn reduce_over_empty_emits_seed() {
        let out = reduce(5, |a: i64, v: i64| a + v)
            .apply(ValueStream::empty(), QueuingStrategy::default());
        assert_eq!(collect(out).await.unwrap(), vec![5]);
    }
}
