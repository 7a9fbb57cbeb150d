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
//! Core processor contract and scheduling statuses.
//!
//! Responsibilities:
//! - Defines the prepare/work contract a scheduler uses to drive processors cooperatively.
//! - Defines the statuses `prepare` reports and what each one authorises.
//!
//! Key exported interfaces:
//! - Types: `ProcessorStatus`, `Processor`.
//!
//! Current limitations:
//! - Only output-side hooks are exposed; processors with inputs are driven by their own owners.

use std::os::fd::RawFd;

use crate::exec::pipeline::port::OutputPort;
use crate::runtime::profile::OperatorProfiles;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The execution engine uses cooperative scheduling.
///
/// A scheduler calls [`Processor::prepare`] to learn what a processor can do
/// next. `prepare` never blocks and never performs I/O.
pub enum ProcessorStatus {
    /// Waiting for input. Sources never report it.
    NeedData,
    /// Output is occupied; `work` must not run until downstream frees it.
    PortFull,
    /// Nothing more will be produced.
    Finished,
    /// Exactly one `work` call is allowed before the next `prepare`.
    Ready,
    /// Wait on [`Processor::wait_handle`], call [`Processor::on_async_job_ready`]
    /// once it is readable, then `prepare` again.
    Async,
}

/// Base contract implemented by every processor driven by a scheduler.
pub trait Processor: Send {
    fn name(&self) -> &str;

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        let _ = profiles;
    }

    fn prepare(&mut self) -> Result<ProcessorStatus, String>;

    fn work(&mut self) -> Result<(), String>;

    /// Descriptor to wait on after `prepare` returned `Async`.
    fn wait_handle(&self) -> Option<RawFd> {
        None
    }

    /// Called by the scheduler once the wait handle became readable.
    fn on_async_job_ready(&mut self) {}

    /// Cancel the processor. May be called at any point between steps.
    fn on_cancel(&mut self) {}

    /// Called when a peer changed the state of one of this processor's ports.
    fn on_update_ports(&mut self) {}

    /// Main output port, if the processor has one.
    fn output(&self) -> Option<&OutputPort> {
        None
    }

    fn output_mut(&mut self) -> Option<&mut OutputPort> {
        None
    }
}
