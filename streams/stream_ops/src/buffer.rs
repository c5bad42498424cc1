/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use pull_stream::Controller;
use pull_stream::QueuingStrategy;
use pull_stream::StreamError;
use pull_stream::ValueStream;

use crate::kernel::apply_stage;
use crate::kernel::Operator;
use crate::kernel::Stage;

/// Group values into ordered chunks of `size`; a partial chunk (if any) is
/// emitted on completion. The output's high water mark counts chunks, not
/// elements.
pub fn buffer<In>(size: usize) -> Result<Buffer<In>, StreamError> {
    if size == 0 {
        return Err(StreamError::invalid_argument(
            "buffer size must be positive",
        ));
    }
    Ok(Buffer {
        size,
        chunk: Vec::with_capacity(size),
    })
}

/// See [`buffer`].
#[derive(Debug)]
pub struct Buffer<In> {
    size: usize,
    chunk: Vec<In>,
}

impl<In: Send + 'static> Stage<In> for Buffer<In> {
    type Out = Vec<In>;

    fn on_value(&mut self, value: In, ctl: &Controller<Vec<In>>) -> Result<(), StreamError> {
        self.chunk.push(value);
        if self.chunk.len() == self.size {
            let full = std::mem::replace(&mut self.chunk, Vec::with_capacity(self.size));
            ctl.enqueue(full)?;
        }
        Ok(())
    }

    fn flush(&mut self, ctl: &Controller<Vec<In>>) -> Result<(), StreamError> {
        if !self.chunk.is_empty() {
            ctl.enqueue(std::mem::take(&mut self.chunk))?;
        }
        Ok(())
    }
}

impl<In: Send + 'static> Operator<In> for Buffer<In> {
    type Out = Vec<In>;

    fn apply(self, src: ValueStream<In>, strategy: QueuingStrategy) -> ValueStream<Vec<In>> {
        apply_stage(src, self, strategy)
    }
}
