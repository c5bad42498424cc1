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
use pull_stream::StreamWriter;
use pull_stream::ValueStream;

use crate::subscribable::Subscribable;
use crate::subscribable::Subscriber;
use crate::subscribable::SubscriptionHandle;

/// Multicast node bridging an imperative producer to any number of
/// independent stream consumers.
///
/// Each [`Subject::readable`] call yields a fresh stream that observes
/// every value fed after its creation, plus the terminal event, exactly
/// once. Cancelling one readable detaches only that subscriber; the
/// subject and its siblings are unaffected. After `complete`/`error` the
/// producer API is inert.
pub struct Subject<T: Clone + Send + 'static> {
    fanout: Subscribable<T>,
}

impl<T: Clone + Send + 'static> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            fanout: self.fanout.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// New, open subject.
    pub fn new() -> Self {
        Self {
            fanout: Subscribable::new(),
        }
    }

    /// Feed one value to every live subscriber, in subscription order.
    /// Returns the minimum `desired_size` hint across them (0 when there
    /// are none, or after close).
    pub fn next(&self, value: T) -> i64 {
        self.fanout.next(value)
    }

    /// Complete all subscribers. Idempotent.
    pub fn complete(&self) {
        self.fanout.complete();
    }

    /// Error all subscribers. Idempotent.
    pub fn error(&self, error: StreamError) {
        self.fanout.error(error);
    }

    /// Sticky closed flag.
    pub fn closed(&self) -> bool {
        self.fanout.is_closed()
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.fanout.subscriber_count()
    }

    /// A fresh stream observing everything fed from now on.
    pub fn readable(&self) -> ValueStream<T> {
        self.readable_with_strategy(QueuingStrategy::default())
    }

    /// Like [`Subject::readable`] with an explicit queuing strategy for
    /// the per-subscriber buffer.
    pub fn readable_with_strategy(&self, strategy: QueuingStrategy) -> ValueStream<T> {
        self.readable_with_initial(strategy, None)
    }

    pub(crate) fn readable_with_initial(
        &self,
        strategy: QueuingStrategy,
        initial: Option<T>,
    ) -> ValueStream<T> {
        // The cancel hook needs the handle, which only exists after
        // subscribing; park it in a slot both sides share.
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let hook_slot = Arc::clone(&slot);
        let (writer, stream) =
            ValueStream::channel_with_cancel(strategy, move |_reason: &StreamError| {
                let handle = hook_slot.lock().expect("subscription slot poisoned").take();
                if let Some(handle) = handle {
                    handle.unsubscribe();
                }
            });
        if let Some(value) = initial {
            let _ = writer.try_write(value);
        }
        let handle = self.fanout.subscribe(ChannelSubscriber { writer });
        *slot.lock().expect("subscription slot poisoned") = Some(handle);
        stream
    }

    /// Sink facade delegating `write`/`close`/`abort` to
    /// `next`/`complete`/`error`.
    pub fn writer(&self) -> SubjectWriter<T> {
        SubjectWriter {
            subject: self.clone(),
        }
    }
}

/// Adapter feeding one subscriber's channel from the fanout.
struct ChannelSubscriber<T: Send + 'static> {
    writer: StreamWriter<T>,
}

impl<T: Send + 'static> Subscriber<T> for ChannelSubscriber<T> {
    fn next(&mut self, value: T) -> Result<i64, StreamError> {
        // A terminal channel means the consumer cancelled; the resulting
        // error detaches this subscriber from the subject.
        self.writer.try_write(value)
    }

    fn complete(&mut self) {
        let _ = self.writer.close();
    }

    fn error(&mut self, error: StreamError) {
        let _ = self.writer.abort(error);
    }
}

/// Write-side facade over a [`Subject`].
pub struct SubjectWriter<T: Clone + Send + 'static> {
    subject: Subject<T>,
}

impl<T: Clone + Send + 'static> SubjectWriter<T> {
    /// Feed a value; returns the subject's demand hint.
    pub fn write(&self, value: T) -> i64 {
        self.subject.next(value)
    }

    /// Complete the subject.
    pub fn close(&self) {
        self.subject.complete();
    }

    /// Error the subject.
    pub fn abort(&self, reason: StreamError) {
        self.subject.error(reason);
    }

    /// Sticky closed flag of the subject.
    pub fn closed(&self) -> bool {
        self.subject.closed()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    async fn drain<T: Send + 'static>(stream: ValueStream<T>) -> Result<Vec<T>, StreamError> {
        let mut reader = stream.reader()?;
        let mut out = Vec::new();
        while let Some(value) = reader.read().await? {
            out.push(value);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn each_readable_sees_everything_after_creation() {
        let subject = Subject::new();
        let early = subject.readable();
        subject.next(1);
        let late = subject.readable();
        subject.next(2);
        subject.complete();

        assert_eq!(drain(early).await.unwrap(), vec![1, 2]);
        assert_eq!(drain(late).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn error_reaches_all_subscribers_once() {
        let subject = Subject::new();
        let a = subject.readable();
        let b = subject.readable();
        subject.next(1);
        subject.error(StreamError::other("producer failed"));
        subject.error(StreamError::other("ignored"));

        for stream in [a, b] {
            let mut reader = stream.reader().unwrap();
            assert_eq!(reader.read().await.unwrap(), Some(1));
            assert_matches!(reader.read().await, Err(StreamError::Other(msg)) if msg == "producer failed");
            assert_eq!(reader.read().await.unwrap(), None);
        }
        assert!(subject.closed());
    }

    #[tokio::test]
    async fn cancelling_one_reader_leaves_siblings_attached() {
        let subject = Subject::new();
        let doomed = subject.readable();
        let kept = subject.readable();
        subject.next(1);

        let mut reader = doomed.reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        reader.cancel(StreamError::cancelled("lost interest")).await;
        assert_eq!(subject.subscriber_count(), 1);

        subject.next(2);
        subject.complete();
        assert_eq!(drain(kept).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn writer_facade_delegates() {
        let subject = Subject::new();
        let readable = subject.readable();
        let writer = subject.writer();
        writer.write(5);
        writer.close();
        assert!(writer.closed());
        assert_eq!(drain(readable).await.unwrap(), vec![5]);
    }

    #[test]
    fn next_after_close_is_inert() {
        let subject = Subject::new();
        subject.complete();
        assert_eq!(subject.next(1), 0);
    }

    #[tokio::test]
    async fn fan_out_through_an_operator() {
        use stream_ops::map;
        use stream_ops::Operator;

        let subject = Subject::new();
        let plain = subject.readable();
        let doubled = map(|x: i64| x * 2).apply(subject.readable(), QueuingStrategy::default());
        for value in [1, 2, 3, 4] {
            subject.next(value);
        }
        subject.complete();

        assert_eq!(drain(plain).await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(drain(doubled).await.unwrap(), vec![2, 4, 6, 8]);
    }
}
