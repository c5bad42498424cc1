/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use multicast::Subject;
use pull_stream::StreamError;
use pull_stream::ValueStream;
use quickcheck::quickcheck;
use stream_ops::buffer;
use stream_ops::concat;
use stream_ops::distinct_until_changed;
use stream_ops::filter;
use stream_ops::map;
use stream_ops::reduce;
use stream_ops::skip;
use stream_ops::take;
use stream_ops::zip;
use stream_pipe::to_vec;
use stream_pipe::PipeExt;

#[tokio::test]
async fn map_filter_take_pipeline() {
    let out = ValueStream::from_iter(vec![1, 2, 3, 4, 5, 6])
        .pipe(map(|x: i64| x * 2))
        .pipe(filter(|x: &i64| *x > 4))
        .pipe(take(2));
    assert_eq!(to_vec(out).await.unwrap(), vec![6, 8]);
}

#[tokio::test]
async fn buffer_keeps_remainder() {
    let out = ValueStream::from_iter(1..=8).pipe(buffer(3).unwrap());
    assert_eq!(
        to_vec(out).await.unwrap(),
        vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8]]
    );
}

#[tokio::test]
async fn zip_stops_at_shortest() {
    let out = zip(vec![
        ValueStream::from_iter(vec![1, 2, 3]),
        ValueStream::from_iter(vec![5, 6, 7, 8]),
        ValueStream::from_iter(vec![9, 10, 11, 12]),
    ]);
    assert_eq!(
        to_vec(out).await.unwrap(),
        vec![vec![1, 5, 9], vec![2, 6, 10], vec![3, 7, 11]]
    );
}

#[tokio::test]
async fn subject_fan_out_with_late_completion() {
    let subject = Subject::new();
    let a = subject.readable();
    let b = (&subject).pipe(map(|x: i64| x * 2));
    for value in [1, 2, 3, 4] {
        subject.next(value);
    }
    subject.complete();

    assert_eq!(to_vec(a).await.unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(to_vec(b).await.unwrap(), vec![2, 4, 6, 8]);
}

#[tokio::test]
async fn unsubscribing_one_side_leaves_the_other() {
    let subject = Subject::new();
    let a = subject.readable();
    let b = subject.readable();

    subject.next(1);
    let mut reader = a.reader().unwrap();
    assert_eq!(reader.read().await.unwrap(), Some(1));
    reader.cancel(StreamError::cancelled("done with a")).await;

    subject.next(2);
    subject.complete();
    assert_eq!(to_vec(b).await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn cancellation_propagates_through_a_chain() {
    let (writer, source) = ValueStream::channel(pull_stream::QueuingStrategy::new(8));
    let out = source.pipe(map(|x: i64| x + 1)).pipe(filter(|_: &i64| true));
    writer.try_write(1).unwrap();

    let mut reader = out.reader().unwrap();
    assert_eq!(reader.read().await.unwrap(), Some(2));
    reader.cancel(StreamError::cancelled("enough")).await;

    // The source observed the cancellation: writes are rejected.
    assert!(writer.is_terminated());
    assert!(writer.try_write(5).is_err());
}

quickcheck! {
    fn prop_roundtrip_preserves_order(xs: Vec<i64>) -> bool {
        let expected = xs.clone();
        futures::executor::block_on(async move {
            to_vec(ValueStream::from_iter(xs)).await.unwrap() == expected
        })
    }

    fn prop_map_matches_iterator_map(xs: Vec<i64>) -> bool {
        let expected: Vec<i64> = xs.iter().map(|x| x.wrapping_mul(3)).collect();
        futures::executor::block_on(async move {
            let out = ValueStream::from_iter(xs).pipe(map(|x: i64| x.wrapping_mul(3)));
            to_vec(out).await.unwrap() == expected
        })
    }

    fn prop_filter_matches_iterator_filter(xs: Vec<i64>) -> bool {
        let expected: Vec<i64> = xs.iter().copied().filter(|x| x % 2 == 0).collect();
        futures::executor::block_on(async move {
            let out = ValueStream::from_iter(xs).pipe(filter(|x: &i64| x % 2 == 0));
            to_vec(out).await.unwrap() == expected
        })
    }

    fn prop_take_matches_slice(xs: Vec<i64>, n: usize) -> bool {
        let n = n % 20;
        let expected: Vec<i64> = xs.iter().copied().take(n).collect();
        futures::executor::block_on(async move {
            let out = ValueStream::from_iter(xs).pipe(take(n));
            to_vec(out).await.unwrap() == expected
        })
    }

    fn prop_skip_then_take_matches_slice(xs: Vec<i64>, n: usize, m: usize) -> bool {
        let (n, m) = (n % 20, m % 20);
        let expected: Vec<i64> = xs.iter().copied().skip(n).take(m).collect();
        futures::executor::block_on(async move {
            let out = ValueStream::from_iter(xs).pipe(skip(n)).pipe(take(m));
            to_vec(out).await.unwrap() == expected
        })
    }

    fn prop_reduce_is_left_fold(xs: Vec<i64>) -> bool {
        let expected = xs.iter().fold(0i64, |a, v| a.wrapping_add(*v));
        futures::executor::block_on(async move {
            let out = ValueStream::from_iter(xs).pipe(reduce(0i64, |a, v: i64| a.wrapping_add(v)));
            to_vec(out).await.unwrap() == vec![expected]
        })
    }

    fn prop_distinct_until_changed_idempotent(xs: Vec<u8>) -> bool {
        futures::executor::block_on(async move {
            let once = to_vec(
                ValueStream::from_iter(xs.clone()).pipe(distinct_until_changed()),
            )
            .await
            .unwrap();
            let twice = to_vec(
                ValueStream::from_iter(xs)
                    .pipe(distinct_until_changed())
                    .pipe(distinct_until_changed()),
            )
            .await
            .unwrap();
            once == twice
        })
    }

    fn prop_concat_appends(a: Vec<i64>, b: Vec<i64>) -> bool {
        let mut expected = a.clone();
        expected.extend(b.iter().copied());
        futures::executor::block_on(async move {
            let out = concat(ValueStream::from_iter(a), ValueStream::from_iter(b));
            to_vec(out).await.unwrap() == expected
        })
    }

    fn prop_zip_length_is_minimum(a: Vec<i64>, b: Vec<i64>) -> bool {
        let expected = a.len().min(b.len());
        futures::executor::block_on(async move {
            let out = zip(vec![ValueStream::from_iter(a), ValueStream::from_iter(b)]);
            to_vec(out).await.unwrap().len() == expected
        })
    }

    fn prop_buffer_regroups_losslessly(xs: Vec<i64>, k: usize) -> bool {
        let k = k % 7 + 1;
        let expected = xs.clone();
        futures::executor::block_on(async move {
            let chunks = to_vec(ValueStream::from_iter(xs).pipe(buffer(k).unwrap()))
                .await
                .unwrap();
            let all_full_except_last = chunks
                .iter()
                .rev()
                .skip(1)
                .all(|chunk| chunk.len() == k);
            let flattened: Vec<i64> = chunks.into_iter().flatten().collect();
            flattened == expected && all_full_except_last
        })
    }
}
