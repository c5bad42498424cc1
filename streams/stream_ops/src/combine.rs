/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Constructors combining several streams into one.

use futures::future::BoxFuture;
use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::Reader;
use pull_stream::Source;
use pull_stream::StreamError;
use pull_stream::ValueStream;

use crate::flatten::concat_all;
use crate::kernel::Operator;

/// All of `a`, then all of `b`.
pub fn concat<T: Send + 'static>(a: ValueStream<T>, b: ValueStream<T>) -> ValueStream<T> {
    concat_all().apply(
        ValueStream::from_iter(vec![a, b]),
        QueuingStrategy::default(),
    )
}

/// Rows of one value per source, in source order; the output length is the
/// shortest input's length. When one source runs out the remaining readers
/// are cancelled.
pub fn zip<T: Send + 'static>(sources: Vec<ValueStream<T>>) -> ValueStream<Vec<T>> {
    if sources.is_empty() {
        return ValueStream::empty();
    }
    let mut readers = Vec::with_capacity(sources.len());
    for source in &sources {
        match source.reader() {
            Ok(reader) => readers.push(reader),
            Err(error) => return ValueStream::fail(error),
        }
    }
    ValueStream::new(ZipSource {
        readers,
        done: false,
    })
}

struct ZipSource<T: Send + 'static> {
    readers: Vec<Reader<T>>,
    done: bool,
}

impl<T: Send + 'static> ZipSource<T> {
    async fn wind_down(&mut self, reason: StreamError) {
        for mut reader in self.readers.drain(..) {
            reader.cancel(reason.clone()).await;
        }
    }
}

impl<T: Send + 'static> Source for ZipSource<T> {
    type Item = Vec<T>;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<Vec<T>>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 && !self.done {
                let mut row = Vec::with_capacity(self.readers.len());
                let mut stop: Option<Result<(), StreamError>> = None;
                for reader in self.readers.iter_mut() {
                    match reader.read().await {
                        Ok(Some(value)) => row.push(value),
                        Ok(None) => {
                            stop = Some(Ok(()));
                            break;
                        }
                        Err(error) => {
                            stop = Some(Err(error));
                            break;
                        }
                    }
                }
                match stop {
                    None => ctl.enqueue(row)?,
                    Some(Ok(())) => {
                        self.done = true;
                        self.wind_down(StreamError::cancelled("zip input exhausted"))
                            .await;
                        let _ = ctl.close();
                    }
                    Some(Err(error)) => {
                        self.done = true;
                        self.wind_down(error.clone()).await;
                        return Err(error);
                    }
                }
            }
            Ok(())
        })
    }

    fn cancel<'a>(&'a mut self, reason: &'a StreamError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.done = true;
            self.wind_down(reason.clone()).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::collect;

    #[tokio::test]
    async fn concat_preserves_segment_order() {
        let out = concat(
            ValueStream::from_iter(vec![1, 2]),
            ValueStream::from_iter(vec![3, 4]),
        );
        assert_eq!(collect(out).await.unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn zip_stops_at_shortest_input() {
        let out = zip(vec![
            ValueStream::from_iter(vec![1, 2, 3]),
            ValueStream::from_iter(vec![5, 6, 7, 8]),
            ValueStream::from_iter(vec![9, 10, 11, 12]),
        ]);
        assert_eq!(
            collect(out).await.unwrap(),
            vec![vec![1, 5, 9], vec![2, 6, 10], vec![3, 7, 11]]
        );
    }

    #[tokio::test]
    async fn zip_of_nothing_is_empty() {
        let out = zip(Vec::<ValueStream<i64>>::new());
        assert_eq!(collect(out).await.unwrap(), Vec::<Vec<i64>>::new());
    }
}
