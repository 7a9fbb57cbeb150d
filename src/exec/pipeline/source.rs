// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Shared state machine for processors with one output and no inputs.
//!
//! Responsibilities:
//! - Holds the output port and the single chunk generated but not yet pushed.
//! - Implements the generic source `prepare` step and the bookkeeping after one generate call.
//!
//! Key exported interfaces:
//! - Types: `SourceCore`.

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::port::OutputPort;
use crate::exec::pipeline::processor::ProcessorStatus;

/// Output side of a source processor.
///
/// Owners call [`SourceCore::prepare`] from their own `prepare` and feed the
/// result of each generate step to [`SourceCore::accept`].
#[derive(Debug)]
pub struct SourceCore {
    output: OutputPort,
    current_chunk: Option<Chunk>,
    finished: bool,
}

impl SourceCore {
    pub fn new(header: SchemaRef) -> Self {
        Self {
            output: OutputPort::new(header),
            current_chunk: None,
            finished: false,
        }
    }

    pub fn output(&self) -> &OutputPort {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut OutputPort {
        &mut self.output
    }

    pub fn prepare(&mut self) -> Result<ProcessorStatus, String> {
        if self.finished {
            self.output.finish();
            return Ok(ProcessorStatus::Finished);
        }
        // Downstream no longer wants data.
        if self.output.is_finished() {
            self.finished = true;
            return Ok(ProcessorStatus::Finished);
        }
        if !self.output.can_push() {
            return Ok(ProcessorStatus::PortFull);
        }
        match self.current_chunk.take() {
            None => Ok(ProcessorStatus::Ready),
            Some(chunk) => {
                self.output.push(chunk)?;
                Ok(ProcessorStatus::PortFull)
            }
        }
    }

    /// Record the outcome of one generate step.
    ///
    /// `None` ends the stream. A chunk with neither rows nor columns produces
    /// no output and the source stays active.
    pub fn accept(&mut self, generated: Option<Chunk>) {
        match generated {
            None => self.finished = true,
            Some(chunk) if chunk.has_payload() => self.current_chunk = Some(chunk),
            Some(_) => {}
        }
    }

    pub fn has_pending_chunk(&self) -> bool {
        self.current_chunk.is_some()
    }

    /// Finish the source and its output right away, dropping any pending chunk.
    pub fn finish(&mut self) {
        self.finished = true;
        self.current_chunk = None;
        self.output.finish();
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
