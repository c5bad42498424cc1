/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

#![deny(warnings, missing_docs, clippy::all, rustdoc::broken_intra_doc_links)]

//! Composition sugar and sinks for pull streams.
//!
//! [`PipeExt::pipe`] chains operators left to right with type
//! preservation; anything readable-like (a stream, a subject, a transform
//! pair) is unwrapped by [`PipeExt::into_readable`] first. Cancelling the
//! tail of a chain propagates stage by stage back to the source with the
//! original reason.
//!
//! ```rust
//! # futures::executor::block_on(async {
//! use pull_stream::ValueStream;
//! use stream_ops::{filter, map, take};
//! use stream_pipe::{to_vec, PipeExt};
//!
//! let out = ValueStream::from_iter(vec![1, 2, 3, 4, 5, 6])
//!     .pipe(map(|x: i64| x * 2))
//!     .pipe(filter(|x: &i64| *x > 4))
//!     .pipe(take(2));
//! assert_eq!(to_vec(out).await?, vec![6, 8]);
//! # Ok::<_, pull_stream::StreamError>(()) }).unwrap();
//! ```

mod retry;
mod sink;

use multicast::BehaviorSubject;
use multicast::Subject;
use pull_stream::QueuingStrategy;
use pull_stream::TransformPair;
use pull_stream::ValueStream;
use stream_ops::Operator;

pub use crate::retry::retry_pipe;
pub use crate::retry::retry_pipe_validated;
pub use crate::retry::RetryOptions;
pub use crate::sink::last;
pub use crate::sink::subscribe;
pub use crate::sink::to_joined_string;
pub use crate::sink::to_vec;
pub use crate::sink::Subscription;

/// Anything that can stand at the head of a pipe.
pub trait PipeExt<T: Send + 'static>: Sized {
    /// Unwrap to the underlying stream.
    fn into_readable(self) -> ValueStream<T>;

    /// Apply one operator with the default queuing strategy. Chains of
    /// `pipe` calls read left to right.
    fn pipe<Op: Operator<T>>(self, op: Op) -> ValueStream<Op::Out> {
        op.apply(self.into_readable(), QueuingStrategy::default())
    }

    /// Apply one operator with an explicit high-water-mark option for its
    /// output.
    fn pipe_with<Op: Operator<T>>(self, op: Op, strategy: QueuingStrategy) -> ValueStream<Op::Out> {
        op.apply(self.into_readable(), strategy)
    }
}

impl<T: Send + 'static> PipeExt<T> for ValueStream<T> {
    fn into_readable(self) -> ValueStream<T> {
        self
    }
}

impl<T: Clone + Send + 'static> PipeExt<T> for &Subject<T> {
    fn into_readable(self) -> ValueStream<T> {
        self.readable()
    }
}

impl<T: Clone + Send + 'static> PipeExt<T> for &BehaviorSubject<T> {
    fn into_readable(self) -> ValueStream<T> {
        self.readable()
    }
}

impl<In: Send + 'static, Out: Send + 'static> PipeExt<Out> for TransformPair<In, Out> {
    fn into_readable(self) -> ValueStream<Out> {
        self.readable
    }
}
