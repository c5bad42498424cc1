/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::fmt;

/// Execution stage of a virtual task. At equal ticks, timers run before
/// emissions, emissions before consumers; the derived order is the sort
/// key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskStage {
    /// Timer callbacks (`set_timeout`, `set_interval`, virtual sleeps).
    Timer,
    /// Producer-side emissions (marble events).
    Emit,
    /// Consumer-side work (idle callbacks, scheduler yields).
    Consume,
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStage::Timer => "timer",
            TaskStage::Emit => "emit",
            TaskStage::Consume => "consume",
        };
        f.write_str(name)
    }
}

/// A record of one executed virtual task, in realized execution order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledTaskEvent {
    /// Tick at which the task actually ran.
    pub tick: u64,
    /// Tick the task was scheduled for (≤ `tick` for late-running tasks).
    pub scheduled_tick: u64,
    /// The task's stage.
    pub stage: TaskStage,
    /// Monotonic sequence number across the whole run.
    pub order: u64,
    /// Human-readable description, for debugging and assertions.
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_priority_is_timer_emit_consume() {
        assert!(TaskStage::Timer < TaskStage::Emit);
        assert!(TaskStage::Emit < TaskStage::Consume);
    }

    #[test]
    fn stage_renders_lowercase() {
        assert_eq!(TaskStage::Emit.to_string(), "emit");
    }
}
