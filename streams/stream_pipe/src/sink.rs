/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Terminal consumers.

use std::fmt::Display;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use pull_stream::StreamError;
use tokio::sync::Notify;

use crate::PipeExt;

/// Collect the whole sequence, in order.
///
/// On error the partial prefix is discarded and the error returned.
pub async fn to_vec<T, S>(stream: S) -> Result<Vec<T>, StreamError>
where
    T: Send + 'static,
    S: PipeExt<T>,
{
    let mut reader = stream.into_readable().reader()?;
    let mut out = Vec::new();
    loop {
        match reader.read().await? {
            Some(value) => out.push(value),
            None => return Ok(out),
        }
    }
}

/// Resolve with the final value of the sequence.
///
/// An empty stream resolves to `Ok(None)`; compose with
/// `default_if_empty` when a value is required.
pub async fn last<T, S>(stream: S) -> Result<Option<T>, StreamError>
where
    T: Send + 'static,
    S: PipeExt<T>,
{
    let mut reader = stream.into_readable().reader()?;
    let mut last = None;
    loop {
        match reader.read().await? {
            Some(value) => last = Some(value),
            None => return Ok(last),
        }
    }
}

/// Concatenate every value's display rendering, with no separator.
pub async fn to_joined_string<T, S>(stream: S) -> Result<String, StreamError>
where
    T: Display + Send + 'static,
    S: PipeExt<T>,
{
    let mut reader = stream.into_readable().reader()?;
    let mut out = String::new();
    loop {
        match reader.read().await? {
            Some(value) => out.push_str(&value.to_string()),
            None => return Ok(out),
        }
    }
}

/// Imperative driver: spawns a task reading the stream and dispatching to
/// the callbacks.
///
/// An `Err` from `on_next` cancels the stream with that error and reports
/// it through `on_error`. The returned [`Subscription`] detaches the
/// driver; unsubscribing cancels the stream.
pub fn subscribe<T, S, N, C, E>(stream: S, mut on_next: N, on_complete: C, on_error: E) -> Subscription
where
    T: Send + 'static,
    S: PipeExt<T>,
    N: FnMut(T) -> anyhow::Result<()> + Send + 'static,
    C: FnOnce() + Send + 'static,
    E: FnOnce(StreamError) + Send + 'static,
{
    let stop = Arc::new(Notify::new());
    let closed = Arc::new(AtomicBool::new(false));
    let stream = stream.into_readable();

    let task_stop = Arc::clone(&stop);
    let task_closed = Arc::clone(&closed);
    tokio::spawn(async move {
        let mut reader = match stream.reader() {
            Ok(reader) => reader,
            Err(error) => {
                task_closed.store(true, Ordering::SeqCst);
                on_error(error);
                return;
            }
        };
        loop {
            tokio::select! {
                _ = task_stop.notified() => {
                    reader.cancel(StreamError::cancelled("unsubscribed")).await;
                    break;
                }
                event = reader.read() => match event {
                    Ok(Some(value)) => {
                        if let Err(error) = on_next(value) {
                            let error = StreamError::from(error);
                            reader.cancel(error.clone()).await;
                            on_error(error);
                            break;
                        }
                    }
                    Ok(None) => {
                        on_complete();
                        break;
                    }
                    Err(error) => {
                        on_error(error);
                        break;
                    }
                },
            }
        }
        task_closed.store(true, Ordering::SeqCst);
    });

    Subscription { stop, closed }
}

/// Detach handle returned by [`subscribe`].
pub struct Subscription {
    stop: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl Subscription {
    /// Stop the driver and cancel the stream. Idempotent.
    pub fn unsubscribe(&self) {
        self.stop.notify_one();
    }

    /// Whether the driver has finished (completion, error or unsubscribe).
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
