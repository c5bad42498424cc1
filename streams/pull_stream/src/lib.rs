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

//! Lazy, pull-driven value streams with backpressure and cancellation.
//!
//! A [`ValueStream`] produces an ordered sequence of items on demand: it
//! does nothing until its exclusive [`Reader`] is acquired and read. The
//! producer side is a [`Source`] with `start`/`pull`/`cancel` hooks and a
//! [`Controller`] exposing `enqueue`/`close`/`error` plus the
//! `desired_size` demand gap governed by a [`QueuingStrategy`].
//!
//! The protocol in brief:
//!
//! * one live reader per stream (`reader()` fails with
//!   [`StreamError::Locked`] otherwise); dropping or releasing the reader
//!   re-permits locking;
//! * `read()` resolves to `Ok(Some(v))`, the terminal `Ok(None)`, or an
//!   error delivered exactly once — later reads keep returning `Ok(None)`;
//! * cancellation is idempotent and runs the source's cancel hook, whose
//!   failures never surface downstream;
//! * producers past the high water mark either buffer (the default) or
//!   suspend on [`StreamWriter::write`]; they never reorder.
//!
//! ```rust
//! # futures::executor::block_on(async {
//! use pull_stream::ValueStream;
//!
//! let stream = ValueStream::from_iter(vec![1, 2, 3]);
//! let mut reader = stream.reader()?;
//! assert_eq!(reader.read().await?, Some(1));
//! assert_eq!(reader.read().await?, Some(2));
//! assert_eq!(reader.read().await?, Some(3));
//! assert_eq!(reader.read().await?, None);
//! # Ok::<_, pull_stream::StreamError>(()) }).unwrap();
//! ```

mod controller;
mod error;
mod reader;
mod stream;
mod strategy;
mod writer;

pub use crate::controller::Controller;
pub use crate::controller::ReadProbe;
pub use crate::error::StreamError;
pub use crate::reader::Reader;
pub use crate::stream::Source;
pub use crate::stream::ValueStream;
pub use crate::strategy::QueuingStrategy;
pub use crate::writer::StreamWriter;
pub use crate::writer::TransformPair;
