/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Consecutive-duplicate suppression.

use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::StreamError;
use pull_stream::ValueStream;

use crate::kernel::apply_stage;
use crate::kernel::Operator;
use crate::kernel::Stage;

/// Drop values structurally equal to their predecessor; the first value is
/// always emitted.
pub fn distinct_until_changed<In>() -> DistinctUntilChanged<In, fn(&In, &In) -> bool>
where
    In: PartialEq + Clone + Send + 'static,
{
    DistinctUntilChanged {
        eq: |a: &In, b: &In| a == b,
        prev: None,
    }
}

/// [`distinct_until_changed`] with a custom equivalence.
pub fn distinct_until_changed_by<In, F>(eq: F) -> DistinctUntilChanged<In, F>
where
    In: Clone + Send + 'static,
    F: FnMut(&In, &In) -> bool + Send + 'static,
{
    DistinctUntilChanged { eq, prev: None }
}

/// See [`distinct_until_changed`].
pub struct DistinctUntilChanged<In, F> {
    eq: F,
    prev: Option<In>,
}

impl<In, F> Stage<In> for DistinctUntilChanged<In, F>
where
    In: Clone + Send + 'static,
    F: FnMut(&In, &In) -> bool + Send + 'static,
{
    type Out = In;

    fn on_value(&mut self, value: In, ctl: &Controller<In>) -> Result<(), StreamError> {
        if let Some(prev) = &self.prev {
            if (self.eq)(prev, &value) {
                return Ok(());
            }
        }
        ctl.enqueue(value.clone())?;
        self.prev = Some(value);
        Ok(())
    }
}

impl<In, F> Operator<In> for DistinctUntilChanged<In, F>
where
    In: Clone + Send + 'static,
    F: FnMut(&In, &In) -> bool + Send + 'static,
{
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        apply_stage(src, self, strategy)
    }
}

/// Like [`distinct_until_changed`], comparing `key(v)` instead of the value
/// itself.
pub fn distinct_until_key_changed<In, K, KF>(
    key: KF,
) -> DistinctUntilKeyChanged<K, KF, fn(&K, &K) -> bool>
where
    K: PartialEq + Send + 'static,
    KF: FnMut(&In) -> K + Send + 'static,
{
    DistinctUntilKeyChanged {
        key,
        eq: |a: &K, b: &K| a == b,
        prev: None,
    }
}

/// [`distinct_until_key_changed`] with a custom key equivalence.
pub fn distinct_until_key_changed_by<In, K, KF, F>(
    key: KF,
    eq: F,
) -> DistinctUntilKeyChanged<K, KF, F>
where
    K: Send + 'static,
    KF: FnMut(&In) -> K + Send + 'static,
    F: FnMut(&K, &K) -> bool + Send + 'static,
{
    DistinctUntilKeyChanged {
        key,
        eq,
        prev: None,
    }
}

/// See [`distinct_until_key_changed`].
pub struct DistinctUntilKeyChanged<K, KF, F> {
    key: KF,
    eq: F,
    prev: Option<K>,
}

impl<In, K, KF, F> Stage<In> for DistinctUntilKeyChanged<K, KF, F>
where
    In: Send + 'static,
    K: Send + 'static,
    KF: FnMut(&In) -> K + Send + 'static,
    F: FnMut(&K, &K) -> bool + Send + 'static,
{
    type Out = In;

    fn on_value(&mut self, value: In, ctl: &Controller<In>) -> Result<(), StreamError> {
        let key = (self.key)(&value);
        if let Some(prev) = &self.prev {
            if (self.eq)(prev, &key) {
                return Ok(());
            }
        }
        ctl.enqueue(value)?;
        self.prev = Some(key);
        Ok(())
    }
}

impl<In, K, KF, F> Operator<In> for DistinctUntilKeyChanged<K, KF, F>
where
    In: Send + 'static,
    K: Send + 'static,
    KF: FnMut(&In) -> K + Send + 'static,
    F: FnMut(&K, &K) -> bool + Send + 'static,
{
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
    async fn suppresses_consecutive_duplicates_only() {
        let out = distinct_until_changed().apply(
            ValueStream::from_iter(vec![1, 1, 2, 2, 2, 1, 3, 3]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![1, 2, 1, 3]);
    }

    #[tokio::test]
    async fn is_idempotent() {
        let once = distinct_until_changed().apply(
            ValueStream::from_iter(vec![1, 1, 2, 2, 1]),
            QueuingStrategy::default(),
        );
        let twice = distinct_until_changed().apply(once, QueuingStrategy::default());
        assert_eq!(collect(twice).await.unwrap(), vec![1, 2, 1]);
    }

    #[tokio::test]
    async fn compares_by_key() {
        let out = distinct_until_key_changed(|v: &(i64, &str)| v.0).apply(
            ValueStream::from_iter(vec![(1, "a"), (1, "b"), (2, "c"), (2, "d")]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![(1, "a"), (2, "c")]);
    }
}
