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
//! Cooperative driver for a pipe of source processors.
//!
//! Responsibilities:
//! - Runs processors through `prepare`/`work`, waiting on descriptors when a processor reports `Async`.
//! - Drains processor outputs into collecting sinks and forwards port changes through `on_update_ports`.
//! - Delivers cancellation requested from other threads through `on_cancel`.
//!
//! Key exported interfaces:
//! - Types: `DescriptorWaiter`, `PollWaiter`, `CollectingSink`, `PipeDriver`, `PipeSinks`, `DriverStats`.
//!
//! Current limitations:
//! - Processors run one after another in pipe order, so totals and extremes are read only after
//!   the main stream is drained.

use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::common::config::{remote_async_wait_timeout_ms, remote_poll_interval_ms};
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::pipe::{Pipe, PipeOutput};
use crate::exec::pipeline::port::InputPort;
use crate::exec::pipeline::processor::{Processor, ProcessorStatus};
use crate::novarocks_logging::{debug, warn};
use crate::runtime::profile::{OperatorProfiles, RuntimeProfile};

// Rounds in a row where every processor is blocked on a full port and no sink makes progress.
const MAX_STALLED_ROUNDS: usize = 3;

/// Waits until a descriptor becomes readable.
pub trait DescriptorWaiter: Send {
    /// Returns `Ok(true)` when `fd` is readable, `Ok(false)` when `timeout` elapsed first.
    fn wait_readable(&self, fd: RawFd, timeout: Duration) -> Result<bool, String>;
}

/// `poll(2)` based waiter.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollWaiter;

impl DescriptorWaiter for PollWaiter {
    fn wait_readable(&self, fd: RawFd, timeout: Duration) -> Result<bool, String> {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        // SAFETY: `pfd` is a valid pollfd that outlives the call and nfds is 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(format!("poll fd={fd} failed: {err}"));
        }
        if rc == 0 {
            return Ok(false);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(format!("poll fd={fd} failed: descriptor is not open"));
        }
        Ok(pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
    }
}

/// Downstream end that collects every chunk it receives.
pub struct CollectingSink {
    input: InputPort,
    chunks: Vec<Chunk>,
    rows: usize,
    row_limit: Option<usize>,
}

impl CollectingSink {
    pub fn new(input: InputPort) -> Self {
        Self {
            input,
            chunks: Vec::new(),
            rows: 0,
            row_limit: None,
        }
    }

    /// Close the input once at least `limit` rows were received.
    pub fn with_row_limit(mut self, limit: usize) -> Self {
        self.row_limit = Some(limit);
        self
    }

    pub fn input(&self) -> &InputPort {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputPort {
        &mut self.input
    }

    /// Pull the pending chunk, if any. Returns true when a chunk was taken.
    pub fn drain(&mut self) -> bool {
        let Some(chunk) = self.input.pull() else {
            return false;
        };
        self.rows += chunk.len();
        self.chunks.push(chunk);
        if let Some(limit) = self.row_limit {
            if self.rows >= limit {
                self.input.close();
            }
        }
        true
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Sink indexes created by [`PipeDriver::attach_pipe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipeSinks {
    pub main: usize,
    pub totals: Option<usize>,
    pub extremes: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub prepare_calls: u64,
    pub work_calls: u64,
    pub async_waits: u64,
    pub canceled: bool,
}

/// Drives processors until all of them finished, one error, or the run is canceled.
pub struct PipeDriver {
    processors: Vec<Box<dyn Processor>>,
    sinks: Vec<CollectingSink>,
    waiter: Box<dyn DescriptorWaiter>,
    cancel: Arc<AtomicBool>,
    ports_changed: Arc<AtomicBool>,
    wait_timeout: Duration,
    poll_interval: Duration,
    profile: Option<RuntimeProfile>,
}

impl PipeDriver {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
            sinks: Vec::new(),
            waiter: Box::new(PollWaiter),
            cancel: Arc::new(AtomicBool::new(false)),
            ports_changed: Arc::new(AtomicBool::new(false)),
            wait_timeout: Duration::from_millis(remote_async_wait_timeout_ms()),
            poll_interval: Duration::from_millis(remote_poll_interval_ms().max(1)),
            profile: None,
        }
    }

    pub fn with_waiter(mut self, waiter: Box<dyn DescriptorWaiter>) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Give every processor added from now on a child profile of `profile`.
    pub fn with_profile(mut self, profile: RuntimeProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Flag other threads may set to cancel the run.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn add_processor(&mut self, mut processor: Box<dyn Processor>) {
        if let Some(profile) = &self.profile {
            let name = format!("{} (id={})", processor.name(), self.processors.len());
            processor.set_profiles(OperatorProfiles::new(profile.child(name)));
        }
        self.processors.push(processor);
    }

    pub fn add_sink(&mut self, sink: CollectingSink) -> usize {
        let changed = Arc::clone(&self.ports_changed);
        sink.input().observable().add_observer(Arc::new(move || {
            changed.store(true, Ordering::Release);
        }));
        self.sinks.push(sink);
        self.sinks.len() - 1
    }

    /// Connect every pipe output to a new collecting sink and take over its processors.
    ///
    /// `main_row_limit` closes the main sink early, like a downstream LIMIT.
    pub fn attach_pipe(
        &mut self,
        mut pipe: Pipe,
        main_row_limit: Option<usize>,
    ) -> Result<PipeSinks, String> {
        let mut connect_sink =
            |pipe: &mut Pipe, kind: PipeOutput, limit: Option<usize>| -> Result<usize, String> {
                let header = pipe
                    .output_header(kind)
                    .ok_or_else(|| format!("pipe has no {kind} output"))?;
                let mut input = InputPort::new(header);
                pipe.connect_output(kind, &mut input)?;
                let mut sink = CollectingSink::new(input);
                if let Some(limit) = limit {
                    sink = sink.with_row_limit(limit);
                }
                Ok(self.add_sink(sink))
            };
        let main = connect_sink(&mut pipe, PipeOutput::Main, main_row_limit)?;
        let totals = if pipe.has_totals() {
            Some(connect_sink(&mut pipe, PipeOutput::Totals, None)?)
        } else {
            None
        };
        let extremes = if pipe.has_extremes() {
            Some(connect_sink(&mut pipe, PipeOutput::Extremes, None)?)
        } else {
            None
        };
        for processor in pipe.into_processors() {
            self.add_processor(processor);
        }
        Ok(PipeSinks {
            main,
            totals,
            extremes,
        })
    }

    pub fn sink(&self, idx: usize) -> Option<&CollectingSink> {
        self.sinks.get(idx)
    }

    pub fn take_sinks(&mut self) -> Vec<CollectingSink> {
        std::mem::take(&mut self.sinks)
    }

    fn drain_sinks(&mut self) -> bool {
        let mut progressed = false;
        for sink in &mut self.sinks {
            while sink.drain() {
                progressed = true;
            }
        }
        progressed
    }

    fn deliver_cancel(&mut self, from: usize) {
        for processor in &mut self.processors[from..] {
            processor.on_cancel();
        }
    }

    fn deliver_port_updates(&mut self, from: usize) {
        if !self.ports_changed.swap(false, Ordering::AcqRel) {
            return;
        }
        for processor in &mut self.processors[from..] {
            processor.on_update_ports();
        }
    }

    /// Wait for `fd` in short slices so cancellation is noticed during the wait.
    fn wait_async(&mut self, name: &str, fd: RawFd) -> Result<bool, String> {
        let start = Instant::now();
        loop {
            if self.cancel.load(Ordering::Acquire) {
                return Ok(false);
            }
            let elapsed = start.elapsed();
            if elapsed >= self.wait_timeout {
                return Err(format!(
                    "{name} wait on fd={fd} timed out after {}ms",
                    self.wait_timeout.as_millis()
                ));
            }
            let slice = self.poll_interval.min(self.wait_timeout - elapsed);
            if self.waiter.wait_readable(fd, slice)? {
                return Ok(true);
            }
        }
    }

    pub fn run(&mut self) -> Result<DriverStats, String> {
        let mut stats = DriverStats::default();
        let mut current = 0usize;
        let mut cancel_delivered = false;
        let mut stalled_rounds = 0usize;

        while current < self.processors.len() {
            if !cancel_delivered && self.cancel.load(Ordering::Acquire) {
                debug!("PipeDriver delivering cancel: active_processors={}", self.processors.len() - current);
                self.deliver_cancel(current);
                cancel_delivered = true;
                stats.canceled = true;
            }
            self.deliver_port_updates(current);

            let processor = &mut self.processors[current];
            stats.prepare_calls += 1;
            let status = processor.prepare()?;
            match status {
                ProcessorStatus::Finished => {
                    debug!("PipeDriver processor finished: name={} index={}", processor.name(), current);
                    current += 1;
                    stalled_rounds = 0;
                }
                ProcessorStatus::Ready => {
                    stats.work_calls += 1;
                    processor.work()?;
                    stalled_rounds = 0;
                }
                ProcessorStatus::Async => {
                    let name = processor.name().to_string();
                    let fd = processor
                        .wait_handle()
                        .ok_or_else(|| format!("{name} reported Async without a wait handle"))?;
                    stats.async_waits += 1;
                    if self.wait_async(&name, fd)? {
                        self.processors[current].on_async_job_ready();
                    }
                    stalled_rounds = 0;
                }
                ProcessorStatus::PortFull => {
                    if self.drain_sinks() {
                        stalled_rounds = 0;
                    } else {
                        stalled_rounds += 1;
                        if stalled_rounds >= MAX_STALLED_ROUNDS {
                            let name = self.processors[current].name().to_string();
                            warn!("PipeDriver stalled: name={} index={}", name, current);
                            return Err(format!(
                                "{name} output stays full and nothing drains it; is the output connected?"
                            ));
                        }
                    }
                    continue;
                }
                ProcessorStatus::NeedData => {
                    return Err(format!(
                        "{} needs input but the pipe has no upstream",
                        processor.name()
                    ));
                }
            }
            self.drain_sinks();
        }
        self.drain_sinks();
        debug!(
            "PipeDriver done: prepare_calls={} work_calls={} async_waits={} canceled={}",
            stats.prepare_calls, stats.work_calls, stats.async_waits, stats.canceled
        );
        Ok(stats)
    }
}

impl Default for PipeDriver {
    fn default() -> Self {
        Self::new()
    }
}
