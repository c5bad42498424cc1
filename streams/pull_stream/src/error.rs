/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use thiserror::Error;

/// Errors produced by streams, operators and schedulers.
///
/// The enum is `Clone + PartialEq` so recorded stream outcomes can be
/// compared structurally in tests. Value-level errors carried through a
/// stream are rendered into the [`StreamError::Other`] variant.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// A constructor precondition was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A reader was requested while another reader is live.
    #[error("stream is already locked to a reader")]
    Locked,

    /// A protocol call arrived in a state that forbids it.
    #[error("stream is {state}; {operation} is not allowed")]
    State {
        /// The lifecycle state the stream was in.
        state: &'static str,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The gap between successive items exceeded the configured window.
    #[error("stream timeout after {0}ms")]
    Timeout(u64),

    /// A scheduler capability was exercised while it cannot serve requests.
    #[error("scheduler cannot schedule: {0}")]
    InvalidScheduler(String),

    /// The virtual scheduler kept producing work for a single tick.
    #[error("virtual scheduler did not settle after {passes} passes over tick {tick}")]
    SchedulerLoop {
        /// Number of execute passes performed before giving up.
        passes: u32,
        /// The tick that failed to settle.
        tick: u64,
    },

    /// Virtual time advanced past its bound with runners still pending.
    #[error("virtual time overran after {0} ticks with runners still pending")]
    TimeOverrun(u64),

    /// The stream was cancelled by its consumer.
    #[error("stream cancelled: {0}")]
    Cancelled(String),

    /// A value-level error raised by a producer or a user callback.
    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Value-level error from anything renderable.
    pub fn other(err: impl std::fmt::Display) -> Self {
        StreamError::Other(err.to_string())
    }

    /// Constructor-precondition failure.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        StreamError::InvalidArgument(msg.into())
    }

    /// Consumer-initiated cancellation with a reason.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        StreamError::Cancelled(reason.into())
    }

    /// Whether two errors render to the same message.
    ///
    /// Marble assertions compare errors this way so that errors produced by
    /// different code paths still match when they say the same thing.
    pub fn same_message(&self, other: &StreamError) -> bool {
        self.to_string() == other.to_string()
    }
}

impl From<anyhow::Error> for StreamError {
    fn from(err: anyhow::Error) -> Self {
        StreamError::Other(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_timeout_with_duration() {
        assert_eq!(
            StreamError::Timeout(250).to_string(),
            "stream timeout after 250ms"
        );
    }

    #[test]
    fn same_message_ignores_variant() {
        let a = StreamError::Other("boom".to_string());
        let b = StreamError::other("boom");
        assert!(a.same_message(&b));
        assert!(!a.same_message(&StreamError::other("bang")));
    }

    #[test]
    fn converts_anyhow_with_context_chain() {
        let err = anyhow::anyhow!("root").context("outer");
        let converted = StreamError::from(err);
        assert_eq!(converted, StreamError::Other("outer: root".to_string()));
    }
}
