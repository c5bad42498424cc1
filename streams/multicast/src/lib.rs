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

//! Multicast: one imperative producer, many independent stream consumers.
//!
//! [`Subscribable`] is the bare fan-out primitive (ordered subscribers,
//! snapshot delivery, exactly-once terminal events). [`Subject`] puts the
//! stream facade on top: `readable()` hands out independent
//! [`pull_stream::ValueStream`]s, `writer()` a sink facade.
//! [`BehaviorSubject`] adds last-value replay for new subscribers.
//!
//! Per-subscriber ordering matches feed order; ordering across siblings is
//! unspecified. A consumer cancelling its readable detaches that
//! subscriber only. When no subscribers remain the subject stays open and
//! discards values, reporting zero demand.

mod behavior;
mod subject;
mod subscribable;

pub use crate::behavior::BehaviorSubject;
pub use crate::subject::Subject;
pub use crate::subject::SubjectWriter;
pub use crate::subscribable::Subscribable;
pub use crate::subscribable::Subscriber;
pub use crate::subscribable::SubscriptionHandle;
