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
//! Group of source processors with dangling main, totals and extremes outputs.
//!
//! Key exported interfaces:
//! - Types: `Pipe`, `PipeOutput`.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use crate::exec::pipeline::port::{InputPort, connect};
use crate::exec::pipeline::processor::Processor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipeOutput {
    Main,
    Totals,
    Extremes,
}

impl fmt::Display for PipeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeOutput::Main => f.write_str("main"),
            PipeOutput::Totals => f.write_str("totals"),
            PipeOutput::Extremes => f.write_str("extremes"),
        }
    }
}

/// Processors in pipe order: the main source first, then side sources.
pub struct Pipe {
    processors: Vec<Box<dyn Processor>>,
    totals: Option<usize>,
    extremes: Option<usize>,
}

impl Pipe {
    pub fn new(main: Box<dyn Processor>) -> Self {
        Self {
            processors: vec![main],
            totals: None,
            extremes: None,
        }
    }

    pub fn from_parts(
        main: Box<dyn Processor>,
        totals: Option<Box<dyn Processor>>,
        extremes: Option<Box<dyn Processor>>,
    ) -> Self {
        let mut pipe = Self::new(main);
        if let Some(totals) = totals {
            pipe.totals = Some(pipe.push_processor(totals));
        }
        if let Some(extremes) = extremes {
            pipe.extremes = Some(pipe.push_processor(extremes));
        }
        pipe
    }

    fn push_processor(&mut self, processor: Box<dyn Processor>) -> usize {
        self.processors.push(processor);
        self.processors.len() - 1
    }

    pub fn add_totals_source(&mut self, source: Box<dyn Processor>) -> Result<(), String> {
        if self.totals.is_some() {
            return Err("pipe already has a totals source".to_string());
        }
        self.totals = Some(self.push_processor(source));
        Ok(())
    }

    pub fn add_extremes_source(&mut self, source: Box<dyn Processor>) -> Result<(), String> {
        if self.extremes.is_some() {
            return Err("pipe already has an extremes source".to_string());
        }
        self.extremes = Some(self.push_processor(source));
        Ok(())
    }

    pub fn has_totals(&self) -> bool {
        self.totals.is_some()
    }

    pub fn has_extremes(&self) -> bool {
        self.extremes.is_some()
    }

    pub fn num_processors(&self) -> usize {
        self.processors.len()
    }

    fn index_of(&self, kind: PipeOutput) -> Option<usize> {
        match kind {
            PipeOutput::Main => Some(0),
            PipeOutput::Totals => self.totals,
            PipeOutput::Extremes => self.extremes,
        }
    }

    pub fn output_header(&self, kind: PipeOutput) -> Option<SchemaRef> {
        let idx = self.index_of(kind)?;
        self.processors[idx]
            .output()
            .map(|port| Arc::clone(port.header()))
    }

    /// Connect one of the pipe outputs to a downstream input.
    pub fn connect_output(&mut self, kind: PipeOutput, input: &mut InputPort) -> Result<(), String> {
        let idx = self
            .index_of(kind)
            .ok_or_else(|| format!("pipe has no {kind} output"))?;
        let processor = &mut self.processors[idx];
        let name = processor.name().to_string();
        let output = processor
            .output_mut()
            .ok_or_else(|| format!("{name} has no output port"))?;
        connect(output, input).map_err(|e| format!("connect {kind} output of {name}: {e}"))
    }

    pub fn processors(&self) -> &[Box<dyn Processor>] {
        &self.processors
    }

    pub fn into_processors(self) -> Vec<Box<dyn Processor>> {
        self.processors
    }
}
