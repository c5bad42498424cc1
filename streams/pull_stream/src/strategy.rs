/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

/// Governs how many items a stream may buffer ahead of its consumer.
///
/// `desired_size` is the gap between the high water mark and the current
/// queue length; producers are expected to pause while it is not positive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueuingStrategy {
    /// Maximum number of buffered items before producers should pause.
    pub high_water_mark: usize,
}

impl QueuingStrategy {
    /// Strategy with the given high water mark.
    pub fn new(high_water_mark: usize) -> Self {
        Self { high_water_mark }
    }
}

impl Default for QueuingStrategy {
    fn default() -> Self {
        Self { high_water_mark: 1 }
    }
}
