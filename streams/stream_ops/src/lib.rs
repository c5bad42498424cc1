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

//! Operators over [`pull_stream::ValueStream`].
//!
//! Every operator is a pure factory producing a value that implements
//! [`Operator`]: applying it wraps the upstream through the kernel in
//! `kernel.rs`, which owns the upstream reader, forwards demand, and keeps
//! the cancellation and error paths uniform. Stateless element-wise
//! operators plug [`Stage`] hooks into that kernel; time-aware and
//! flattening operators bring their own sources but follow the same
//! ownership rules.
//!
//! Construction-time validation failures (`buffer(0)`, `timeout(0)`)
//! surface as `Err(StreamError::InvalidArgument)` from the factory rather
//! than from the stream.

mod basic;
mod buffer;
mod combine;
mod distinct;
mod flatten;
mod kernel;
mod limit;
mod scan;
mod schedule;
mod time;

pub use crate::basic::default_if_empty;
pub use crate::basic::filter;
pub use crate::basic::filter_map;
pub use crate::basic::ignore_elements;
pub use crate::basic::map;
pub use crate::basic::tap;
pub use crate::basic::try_map;
pub use crate::basic::DefaultIfEmpty;
pub use crate::basic::Filter;
pub use crate::basic::FilterMap;
pub use crate::basic::IgnoreElements;
pub use crate::basic::Map;
pub use crate::basic::Tap;
pub use crate::basic::TryMap;
pub use crate::buffer::buffer;
pub use crate::buffer::Buffer;
pub use crate::combine::concat;
pub use crate::combine::zip;
pub use crate::distinct::distinct_until_changed;
pub use crate::distinct::distinct_until_changed_by;
pub use crate::distinct::distinct_until_key_changed;
pub use crate::distinct::distinct_until_key_changed_by;
pub use crate::distinct::DistinctUntilChanged;
pub use crate::distinct::DistinctUntilKeyChanged;
pub use crate::flatten::concat_all;
pub use crate::flatten::exhaust_all;
pub use crate::flatten::ConcatAll;
pub use crate::flatten::ExhaustAll;
pub use crate::flatten::IntoValueStream;
pub use crate::kernel::apply_stage;
pub use crate::kernel::Operator;
pub use crate::kernel::Stage;
pub use crate::limit::skip;
pub use crate::limit::take;
pub use crate::limit::take_while;
pub use crate::limit::Skip;
pub use crate::limit::Take;
pub use crate::limit::TakeWhile;
pub use crate::scan::reduce;
pub use crate::scan::scan;
pub use crate::scan::scan_seeded;
pub use crate::scan::Reduce;
pub use crate::scan::Scan;
pub use crate::scan::ScanSeeded;
pub use crate::schedule::schedule;
pub use crate::schedule::Schedule;
pub use crate::time::debounce_time;
pub use crate::time::delay;
pub use crate::time::throttle_time;
pub use crate::time::timeout;
pub use crate::time::DebounceTime;
pub use crate::time::Delay;
pub use crate::time::ThrottleConfig;
pub use crate::time::ThrottleTime;
pub use crate::time::Timeout;
