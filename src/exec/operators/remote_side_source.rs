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
//! Totals and extremes sources of a remote query.
//!
//! Responsibilities:
//! - Emits the single totals or extremes block the remote executor collected for the main stream.
//!
//! Key exported interfaces:
//! - Types: `SideChannel`, `RemoteSideSource`.

use std::fmt;
use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::port::OutputPort;
use crate::exec::pipeline::processor::{Processor, ProcessorStatus};
use crate::exec::pipeline::source::SourceCore;
use crate::novarocks_logging::debug;
use crate::runtime::remote_executor::RemoteQueryExecutorRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SideChannel {
    Totals,
    Extremes,
}

impl SideChannel {
    pub fn processor_name(self) -> &'static str {
        match self {
            SideChannel::Totals => "RemoteTotalsSource",
            SideChannel::Extremes => "RemoteExtremesSource",
        }
    }
}

impl fmt::Display for SideChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideChannel::Totals => f.write_str("totals"),
            SideChannel::Extremes => f.write_str("extremes"),
        }
    }
}

/// Source emitting at most one side block of a remote query.
///
/// It never sends, finishes or cancels the query; the main remote source owns
/// that lifecycle. The first generate step is also the last one.
pub struct RemoteSideSource {
    core: SourceCore,
    executor: RemoteQueryExecutorRef,
    channel: SideChannel,
    served: bool,
}

impl RemoteSideSource {
    pub fn new(executor: RemoteQueryExecutorRef, channel: SideChannel) -> Self {
        let header = executor.header();
        Self {
            core: SourceCore::new(header),
            executor,
            channel,
            served: false,
        }
    }

    pub fn channel(&self) -> SideChannel {
        self.channel
    }

    fn generate(&mut self) -> Result<Option<Chunk>, String> {
        // The executor getters are not required to consume the block, so a
        // second call may return the same block again.
        if self.served {
            return Ok(None);
        }
        self.served = true;
        let block = match self.channel {
            SideChannel::Totals => self.executor.totals(),
            SideChannel::Extremes => self.executor.extremes(),
        };
        let Some(block) = block else {
            debug!("{} has no {} block", self.channel.processor_name(), self.channel);
            return Ok(None);
        };
        let num_rows = block.num_rows();
        let chunk = Chunk::try_from_columns(
            Arc::clone(self.core.output().header()),
            block.batch.columns().to_vec(),
            num_rows,
        )
        .map_err(|e| {
            format!(
                "{} received {} block not matching header: {e}",
                self.channel.processor_name(),
                self.channel
            )
        })?;
        debug!(
            "{} emits {} block: rows={}",
            self.channel.processor_name(),
            self.channel,
            num_rows
        );
        Ok(Some(chunk))
    }
}

impl Processor for RemoteSideSource {
    fn name(&self) -> &str {
        self.channel.processor_name()
    }

    fn prepare(&mut self) -> Result<ProcessorStatus, String> {
        self.core.prepare()
    }

    fn work(&mut self) -> Result<(), String> {
        let generated = self.generate()?;
        self.core.accept(generated);
        Ok(())
    }

    fn output(&self) -> Option<&OutputPort> {
        Some(self.core.output())
    }

    fn output_mut(&mut self) -> Option<&mut OutputPort> {
        Some(self.core.output_mut())
    }
}
