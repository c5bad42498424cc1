/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Prefix/suffix selection operators.

use std::marker::PhantomData;

use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::StreamError;
use pull_stream::ValueStream;

use crate::kernel::apply_stage;
use crate::kernel::Operator;
use crate::kernel::Stage;

/// Emit at most `n` values, then close and cancel upstream. `take(0)`
/// closes without consuming anything.
pub fn take<In>(n: usize) -> Take<In> {
    Take {
        remaining: n,
        _marker: PhantomData,
    }
}

/// See [`take`].
pub struct Take<In> {
    remaining: usize,
    _marker: PhantomData<fn() -> In>,
}

impl<In: Send + 'static> Stage<In> for Take<In> {
    type Out = In;

    fn start(&mut self, ctl: &Controller<In>) -> Result<(), StreamError> {
        if self.remaining == 0 {
            ctl.close()?;
        }
        Ok(())
    }

    fn on_value(&mut self, value: In, ctl: &Controller<In>) -> Result<(), StreamError> {
        ctl.enqueue(value)?;
        self.remaining -= 1;
        if self.remaining == 0 {
            ctl.close()?;
        }
        Ok(())
    }
}

impl<In: Send + 'static> Operator<In> for Take<In> {
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        apply_stage(src, self, strategy)
    }
}

/// Drop the first `n` values, pass through the rest.
pub fn skip<In>(n: usize) -> Skip<In> {
    Skip {
        remaining: n,
        _marker: PhantomData,
    }
}

/// See [`skip`].
pub struct Skip<In> {
    remaining: usize,
    _marker: PhantomData<fn() -> In>,
}

impl<In: Send + 'static> Stage<In> for Skip<In> {
    type Out = In;

    fn on_value(&mut self, value: In, ctl: &Controller<In>) -> Result<(), StreamError> {
        if self.remaining > 0 {
            self.remaining -= 1;
            Ok(())
        } else {
            ctl.enqueue(value)
        }
    }
}

impl<In: Send + 'static> Operator<In> for Skip<In> {
    type Out = In;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<In> {
        apply_stage(src, self, strategy)
    }
}

/// Emit while `p(&v)` holds; close on the first value that fails it (that
/// value is not emitted).
pub fn take_while<In, P>(p: P) -> TakeWhile<P>
where
    P: FnMut(&In) -> bool + Send + 'static,
{
    TakeWhile { p }
}

/// See [`take_while`].
pub struct TakeWhile<P> {
    p: P,
}

impl<In, P> Stage<In> for TakeWhile<P>
where
    In: Send + 'static,
    P: FnMut(&In) -> bool + Send + 'static,
{
    type Out = In;

    fn on_value(&mut self, value: In, ctl: &Controller<In>) -> Result<(), StreamError> {
        if (self.p)(&value) {
            ctl.enqueue(value)
        } else {
            ctl.close()
        }
    }
}

impl<In, P> Operator<In> for TakeWhile<P>
where
    In: Send + 'static,
    P: FnMut(&In) -> bool + Send + 'static,
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
    async fn take_limits_and_zero_closes_immediately() {
        let out = take(2).apply(
            ValueStream::from_iter(vec![1, 2, 3, 4]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![1, 2]);

        let out = take(0).apply(
            ValueStream::from_iter(vec![1, 2, 3]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), Vec::<i64>::new());
    }

    #[tokio::test]
    async fn take_more_than_available_just_completes() {
        let out = take(10).apply(
            ValueStream::from_iter(vec![1, 2]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn skip_drops_prefix() {
        let out = skip(2).apply(
            ValueStream::from_iter(vec![1, 2, 3, 4]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![3, 4]);
    }

    #[tokio::test]
    async fn take_while_stops_at_first_failure() {
        let out = take_while(|v: &i64| *v < 3).apply(
            ValueStream::from_iter(vec![1, 2, 3, 1]),
            QueuingStrategy::default(),
        );
        assert_eq!(collect(out).await.unwrap(), vec![1, 2]);
    }
}
