/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! The marble diagram DSL.
//!
//! Alphabet: `-` advances one tick; a letter or digit emits the value bound
//! to that key (or the key itself, via [`MarbleValue::from_key`]); `|`
//! completes; `#` errors; `^` marks the subscription point (hot streams);
//! `(…)` groups events onto one tick, the whole group consuming a single
//! tick — `(a|)` emits and completes together. Whitespace is ignored
//! everywhere; it never counts as time.
//!
//! Every event's time is the tick it occurs at, relative to the
//! subscription point when `^` is present; events before `^` are dropped
//! from the parse (a hot stream has already fired them).

use std::collections::HashMap;

use pull_stream::StreamError;

/// Values usable in marble diagrams: cloneable, comparable, printable, and
/// optionally derivable from a bare marble key when the values table has
/// no entry for it.
pub trait MarbleValue: Clone + PartialEq + std::fmt::Debug + Send + 'static {
    /// Interpret a bare marble key as a value, if the type supports it.
    fn from_key(key: char) -> Option<Self>;
}

impl MarbleValue for char {
    fn from_key(key: char) -> Option<Self> {
        Some(key)
    }
}

impl MarbleValue for String {
    fn from_key(key: char) -> Option<Self> {
        Some(key.to_string())
    }
}

impl MarbleValue for i64 {
    fn from_key(key: char) -> Option<Self> {
        key.to_digit(10).map(|d| d as i64)
    }
}

impl MarbleValue for i32 {
    fn from_key(key: char) -> Option<Self> {
        key.to_digit(10).map(|d| d as i32)
    }
}

impl MarbleValue for u64 {
    fn from_key(key: char) -> Option<Self> {
        key.to_digit(10).map(|d| d as u64)
    }
}

/// What a marble event does.
#[derive(Clone, Debug, PartialEq)]
pub enum MarbleKind<T> {
    /// Emit a value.
    Next(T),
    /// Complete the stream.
    Complete,
    /// Error the stream.
    Error(StreamError),
}

/// One parsed marble event.
#[derive(Clone, Debug, PartialEq)]
pub struct MarbleEvent<T> {
    /// Tick the event occurs at.
    pub time: u64,
    /// The event itself.
    pub kind: MarbleKind<T>,
}

/// Error used for `#` when the caller provides none.
pub fn default_marble_error() -> StreamError {
    StreamError::other("marble error")
}

/// Parse a marble diagram into its event list. Pure.
pub fn parse_marbles<T: MarbleValue>(
    marbles: &str,
    values: &[(char, T)],
    error: Option<StreamError>,
) -> Result<Vec<MarbleEvent<T>>, StreamError> {
    let table: HashMap<char, T> = values.iter().cloned().collect();
    let mut events: Vec<MarbleEvent<T>> = Vec::new();
    let mut time: u64 = 0;
    let mut group_start: Option<u64> = None;
    let mut subscription: Option<u64> = None;

    for ch in marbles.chars() {
        let now = group_start.unwrap_or(time);
        match ch {
            c if c.is_whitespace() => {}
            '-' => {
                if group_start.is_some() {
                    return Err(StreamError::invalid_argument(
                        "time cannot advance inside a marble group",
                    ));
                }
                time += 1;
            }
            '(' => {
                if group_start.is_some() {
                    return Err(StreamError::invalid_argument("marble groups cannot nest"));
                }
                group_start = Some(time);
            }
            ')' => match group_start.take() {
                Some(start) => time = start + 1,
                None => {
                    return Err(StreamError::invalid_argument(
                        "unmatched ')' in marble diagram",
                    ));
                }
            },
            '^' => {
                if group_start.is_some() || subscription.is_some() {
                    return Err(StreamError::invalid_argument(
                        "misplaced subscription point in marble diagram",
                    ));
                }
                subscription = Some(time);
                time += 1;
            }
            '|' => {
                events.push(MarbleEvent {
                    time: now,
                    kind: MarbleKind::Complete,
                });
                if group_start.is_none() {
                    time += 1;
                }
            }
            '#' => {
                events.push(MarbleEvent {
                    time: now,
                    kind: MarbleKind::Error(error.clone().unwrap_or_else(default_marble_error)),
                });
                if group_start.is_none() {
                    time += 1;
                }
            }
            key => {
                let value = table
                    .get(&key)
                    .cloned()
                    .or_else(|| T::from_key(key))
                    .ok_or_else(|| {
                        StreamError::invalid_argument(format!(
                            "unrecognized marble key '{key}'"
                        ))
                    })?;
                events.push(MarbleEvent {
                    time: now,
                    kind: MarbleKind::Next(value),
                });
                if group_start.is_none() {
                    time += 1;
                }
            }
        }
    }
    if group_start.is_some() {
        return Err(StreamError::invalid_argument(
            "unterminated group in marble diagram",
        ));
    }
    if let Some(sub) = subscription {
        events.retain(|event| event.time >= sub);
        for event in &mut events {
            event.time -= sub;
        }
    }
    Ok(events)
}

/// Tick duration of a marble diagram: the time of the completion marker if
/// present, the total elapsed time otherwise. Groups count as one tick;
/// whitespace counts as none. Pure.
pub fn parse_time(marbles: &str) -> u64 {
    let mut time: u64 = 0;
    let mut group_start: Option<u64> = None;
    for ch in marbles.chars() {
        match ch {
            c if c.is_whitespace() => {}
            '(' => group_start = Some(time),
            ')' => {
                if let Some(start) = group_start.take() {
                    time = start + 1;
                }
            }
            '|' => return group_start.unwrap_or(time),
            _ => {
                if group_start.is_none() {
                    time += 1;
                }
            }
        }
    }
    time
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_values_times_and_completion() {
        let events = parse_marbles("-a-b-|", &[('a', 1i64), ('b', 2)], None).unwrap();
        assert_eq!(
            events,
            vec![
                MarbleEvent {
                    time: 1,
                    kind: MarbleKind::Next(1)
                },
                MarbleEvent {
                    time: 3,
                    kind: MarbleKind::Next(2)
                },
                MarbleEvent {
                    time: 5,
                    kind: MarbleKind::Complete
                },
            ]
        );
    }

    #[test]
    fn bare_digits_fall_back_to_from_key() {
        let events = parse_marbles::<i64>("12|", &[], None).unwrap();
        assert_eq!(
            events,
            vec![
                MarbleEvent {
                    time: 0,
                    kind: MarbleKind::Next(1)
                },
                MarbleEvent {
                    time: 1,
                    kind: MarbleKind::Next(2)
                },
                MarbleEvent {
                    time: 2,
                    kind: MarbleKind::Complete
                },
            ]
        );
    }

    #[test]
    fn group_shares_one_tick() {
        let events = parse_marbles::<char>("--(ab|)", &[], None).unwrap();
        assert_eq!(
            events,
            vec![
                MarbleEvent {
                    time: 2,
                    kind: MarbleKind::Next('a')
                },
                MarbleEvent {
                    time: 2,
                    kind: MarbleKind::Next('b')
                },
                MarbleEvent {
                    time: 2,
                    kind: MarbleKind::Complete
                },
            ]
        );
    }

    #[test]
    fn whitespace_is_not_time() {
        let spaced = parse_marbles::<char>(" -a  -b-| ", &[], None).unwrap();
        let dense = parse_marbles::<char>("-a-b-|", &[], None).unwrap();
        assert_eq!(spaced, dense);
    }

    #[test]
    fn error_marker_uses_supplied_error() {
        let events =
            parse_marbles::<char>("-#", &[], Some(StreamError::other("boom"))).unwrap();
        assert_eq!(
            events,
            vec![MarbleEvent {
                time: 1,
                kind: MarbleKind::Error(StreamError::other("boom"))
            }]
        );

        let defaulted = parse_marbles::<char>("#", &[], None).unwrap();
        assert_eq!(
            defaulted[0].kind,
            MarbleKind::Error(default_marble_error())
        );
    }

    #[test]
    fn subscription_point_rebases_and_drops_prefix() {
        let events = parse_marbles::<char>("a-^-b-|", &[], None).unwrap();
        assert_eq!(
            events,
            vec![
                MarbleEvent {
                    time: 2,
                    kind: MarbleKind::Next('b')
                },
                MarbleEvent {
                    time: 4,
                    kind: MarbleKind::Complete
                },
            ]
        );
    }

    #[test]
    fn malformed_diagrams_are_rejected() {
        assert_matches!(
            parse_marbles::<char>("(a(b))", &[], None),
            Err(StreamError::InvalidArgument(_))
        );
        assert_matches!(
            parse_marbles::<char>("(a", &[], None),
            Err(StreamError::InvalidArgument(_))
        );
        assert_matches!(
            parse_marbles::<char>("a)", &[], None),
            Err(StreamError::InvalidArgument(_))
        );
        assert_matches!(
            parse_marbles::<i64>("x|", &[], None),
            Err(StreamError::InvalidArgument(_))
        );
    }

    #[test]
    fn parse_time_measures_to_completion() {
        assert_eq!(parse_time("-----|"), 5);
        assert_eq!(parse_time("--a--"), 5);
        assert_eq!(parse_time("--(ab)--|"), 5);
        assert_eq!(parse_time(" - -| "), 2);
        assert_eq!(parse_time(""), 0);
    }
}