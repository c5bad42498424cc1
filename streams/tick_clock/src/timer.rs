/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use futures::future::BoxFuture;
use pull_stream::Controller;
use pull_stream::Source;
use pull_stream::StreamError;
use pull_stream::ValueStream;

use crate::ClockHandle;

/// Stream emitting `0` after `due` ticks and, when `period` is given,
/// `1, 2, …` every `period` ticks thereafter.
///
/// A zero `period` is rejected at construction. The stream is pull paced:
/// each period is measured from the moment demand asks for the next value,
/// so a slow consumer stretches the schedule instead of piling up emissions.
pub fn timer(
    due: u64,
    period: Option<u64>,
    clock: ClockHandle,
) -> Result<ValueStream<u64>, StreamError> {
    if period == Some(0) {
        return Err(StreamError::invalid_argument("timer period must be positive"));
    }
    Ok(ValueStream::new(TimerSource {
        due,
        period,
        clock,
        next_value: 0,
        sleep: None,
    }))
}

/// `timer(period, Some(period), clock)`.
pub fn interval(period: u64, clock: ClockHandle) -> Result<ValueStream<u64>, StreamError> {
    timer(period, Some(period), clock)
}

struct TimerSource {
    due: u64,
    period: Option<u64>,
    clock: ClockHandle,
    next_value: u64,
    /// In-flight sleep, kept across pulls so a dropped read does not reset
    /// the countdown.
    sleep: Option<BoxFuture<'static, Result<(), StreamError>>>,
}

impl Source for TimerSource {
    type Item = u64;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<u64>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            while ctl.desired_size() > 0 {
                if self.next_value > 0 && self.period.is_none() {
                    ctl.close()?;
                    break;
                }
                if self.sleep.is_none() {
                    let ticks = if self.next_value == 0 {
                        self.due
                    } else {
                        // Checked above: period is Some here.
                        self.period.unwrap_or(0)
                    };
                    self.sleep = Some(self.clock.sleep(ticks));
                }
                if let Some(sleep) = self.sleep.as_mut() {
                    sleep.as_mut().await?;
                }
                self.sleep = None;
                ctl.enqueue(self.next_value)?;
                self.next_value += 1;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::TokioClock;

    #[test]
    fn zero_period_is_rejected() {
        assert_matches!(
            timer(5, Some(0), TokioClock::handle()),
            Err(StreamError::InvalidArgument(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_timer_emits_zero_then_completes() {
        let stream = timer(10, None, TokioClock::handle()).unwrap();
        let mut reader = stream.reader().unwrap();
        let before = tokio::time::Instant::now();
        assert_eq!(reader.read().await.unwrap(), Some(0));
        assert_eq!(before.elapsed().as_millis(), 10);
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_counts_up() {
        let stream = interval(5, TokioClock::handle()).unwrap();
        let mut reader = stream.reader().unwrap();
        for expected in 0..4u64 {
            assert_eq!(reader.read().await.unwrap(), Some(expected));
        }
        reader.cancel(StreamError::cancelled("test over")).await;
    }
}
