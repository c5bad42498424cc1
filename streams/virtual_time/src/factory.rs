/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Cold and hot marble stream factories over the virtual scheduler.

use futures::future::BoxFuture;
use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::Source;
use pull_stream::StreamError;
use pull_stream::ValueStream;

use crate::marble::MarbleEvent;
use crate::marble::MarbleKind;
use crate::marble::MarbleValue;
use crate::scheduler::VirtualScheduler;
use crate::task::TaskStage;

fn kind_description<T: MarbleValue>(kind: &MarbleKind<T>) -> String {
    match kind {
        MarbleKind::Next(value) => format!("next {value:?}"),
        MarbleKind::Complete => "complete".to_string(),
        MarbleKind::Error(error) => format!("error {error}"),
    }
}

/// Cold marble stream: nothing is scheduled until the first pull, then
/// every event lands at `subscription tick + event time`.
pub(crate) fn cold_stream<T: MarbleValue>(
    sched: &VirtualScheduler,
    events: Vec<MarbleEvent<T>>,
) -> ValueStream<T> {
    let stream = ValueStream::new(ColdSource {
        sched: sched.clone(),
        events: Some(events),
    });
    sched.register_probe(stream.probe());
    stream
}

struct ColdSource<T: MarbleValue> {
    sched: VirtualScheduler,
    events: Option<Vec<MarbleEvent<T>>>,
}

impl<T: MarbleValue> Source for ColdSource<T> {
    type Item = T;

    fn pull<'a>(&'a mut self, ctl: &'a Controller<T>) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            if let Some(events) = self.events.take() {
                let subscription_tick = self.sched.current_tick();
                for event in events {
                    let ctl = ctl.clone();
                    let description =
                        format!("cold {} @{}", kind_description(&event.kind), event.time);
                    self.sched.schedule_task(
                        subscription_tick + event.time,
                        TaskStage::Emit,
                        description,
                        move |_| apply_event(&ctl, event.kind),
                    );
                }
            }
            Ok(())
        })
    }
}

/// Deliver one marble event into a stream controller. Failures mean the
/// consumer already tore the stream down; they are deliberately dropped.
fn apply_event<T: Send + 'static>(ctl: &Controller<T>, kind: MarbleKind<T>) {
    let _ = match kind {
        MarbleKind::Next(value) => ctl.enqueue(value),
        MarbleKind::Complete => ctl.close(),
        MarbleKind::Error(error) => ctl.error(error),
    };
}

/// Hot marble stream: every event is scheduled immediately, on the
/// absolute timeline of the scheduler at construction. Events the parse
/// dropped as pre-subscription never reach the returned stream.
pub(crate) fn hot_stream<T: MarbleValue>(
    sched: &VirtualScheduler,
    events: Vec<MarbleEvent<T>>,
) -> ValueStream<T> {
    let (writer, stream) = ValueStream::channel(QueuingStrategy::default());
    let base = sched.current_tick();
    for event in events {
        let writer = writer.clone();
        let description = format!("hot {} @{}", kind_description(&event.kind), event.time);
        sched.schedule_task(
            base + event.time,
            TaskStage::Emit,
            description,
            move |_| {
                let _ = match event.kind {
                    MarbleKind::Next(value) => writer.try_write(value).map(|_| ()),
                    MarbleKind::Complete => writer.close(),
                    MarbleKind::Error(error) => writer.abort(error),
                };
            },
        );
    }
    sched.register_probe(stream.probe());
    stream
}
