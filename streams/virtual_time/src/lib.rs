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

//! Deterministic virtual time for stream tests.
//!
//! [`VirtualScheduler`] executes tasks on an integer tick timeline with
//! `timer < emit < consume` priority within a tick, virtualizes timers
//! (`set_timeout` / `set_interval` / `request_idle_callback`), and acts as
//! the [`tick_clock::Clock`] behind every time-aware operator under test.
//! Marble diagrams describe and assert stream timelines:
//!
//! ```rust
//! use stream_pipe::PipeExt;
//! use virtual_time::VirtualScheduler;
//!
//! VirtualScheduler::new()
//!     .run(|h| {
//!         let source = h.cold("-a-b-|", &[('a', 1i64), ('b', 2)])?;
//!         let summed = source.pipe(stream_ops::scan(|acc: i64, v| acc + v));
//!         h.expect_stream(summed, "-a-b-|", &[('a', 1), ('b', 3)])?;
//!         Ok(())
//!     })
//!     .unwrap();
//! ```
//!
//! Everything inside `run` is wall-clock independent: the outcome is a
//! pure function of the marble programs and the scheduled tasks.

mod factory;
mod marble;
mod run;
mod scheduler;
mod task;

pub use crate::marble::default_marble_error;
pub use crate::marble::parse_marbles;
pub use crate::marble::parse_time;
pub use crate::marble::MarbleEvent;
pub use crate::marble::MarbleKind;
pub use crate::marble::MarbleValue;
pub use crate::run::Expect;
pub use crate::run::StreamRecording;
pub use crate::run::TestHelpers;
pub use crate::scheduler::TimerId;
pub use crate::scheduler::VirtualScheduler;
pub use crate::task::ScheduledTaskEvent;
pub use crate::task::TaskStage;
