/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::sync::Arc;
use std::sync::Mutex;

use pull_stream::QueuingStrategy;
use pull_stream::StreamError;
use pull_stream::ValueStream;

use crate::subject::Subject;

/// A [`Subject`] with last-value memory.
///
/// New readables receive the most recent value (or the initial one)
/// synchronously before anything fed later.
pub struct BehaviorSubject<T: Clone + Send + 'static> {
    subject: Subject<T>,
    last: Arc<Mutex<T>>,
}

impl<T: Clone + Send + 'static> Clone for BehaviorSubject<T> {
    fn clone(&self) -> Self {
        Self {
            subject: self.subject.clone(),
            last: Arc::clone(&self.last),
        }
    }
}

impl<T: Clone + Send + 'static> BehaviorSubject<T> {
    /// Subject seeded with `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            subject: Subject::new(),
            last: Arc::new(Mutex::new(initial)),
        }
    }

    /// Feed a value, remembering it for future subscribers.
    pub fn next(&self, value: T) -> i64 {
        *self.last.lock().expect("behavior value poisoned") = value.clone();
        self.subject.next(value)
    }

    /// The value a new subscriber would receive right now.
    pub fn value(&self) -> T {
        self.last.lock().expect("behavior value poisoned").clone()
    }

    /// Complete all subscribers. Idempotent.
    pub fn complete(&self) {
        self.subject.complete();
    }

    /// Error all subscribers. Idempotent.
    pub fn error(&self, error: StreamError) {
        self.subject.error(error);
    }

    /// Sticky closed flag.
    pub fn closed(&self) -> bool {
        self.subject.closed()
    }

    /// A fresh stream starting with the remembered value.
    pub fn readable(&self) -> ValueStream<T> {
        self.readable_with_strategy(QueuingStrategy::default())
    }

    /// Like [`BehaviorSubject::readable`] with an explicit queuing
    /// strategy.
    pub fn readable_with_strategy(&self, strategy: QueuingStrategy) -> ValueStream<T> {
        let replay = if self.subject.closed() {
            None
        } else {
            Some(self.value())
        };
        self.subject.readable_with_initial(strategy, replay)
    }
}
