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
//! Single-slot data-flow edges between processors.
//!
//! Responsibilities:
//! - Carries at most one chunk from one producer to one consumer.
//! - Tracks finish state from either side: the producer finishes when it has no more data,
//!   the consumer closes when it no longer wants data.
//! - Notifies observers on every state change so a scheduler can re-prepare the peers.
//!
//! Key exported interfaces:
//! - Types: `OutputPort`, `InputPort`.
//! - Functions: `connect`.

use std::fmt;
use std::sync::{Arc, Mutex};

use arrow::datatypes::{Schema, SchemaRef};

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::schedule::observer::Observable;

#[derive(Default)]
struct PortState {
    slot: Option<Chunk>,
    finished: bool,
}

struct PortShared {
    state: Mutex<PortState>,
    observable: Arc<Observable>,
}

impl PortShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PortState::default()),
            observable: Arc::new(Observable::new()),
        })
    }

    // Apply `f` under the lock and notify observers afterwards if it reports a change.
    fn update<R>(&self, f: impl FnOnce(&mut PortState) -> (R, bool)) -> R {
        let notify = self.observable.defer_notify();
        let mut guard = self.state.lock().expect("port state lock");
        let (out, changed) = f(&mut guard);
        drop(guard);
        if changed {
            notify.arm();
        }
        out
    }

    fn read<R>(&self, f: impl FnOnce(&PortState) -> R) -> R {
        let guard = self.state.lock().expect("port state lock");
        f(&guard)
    }
}

/// Producer end of an edge.
pub struct OutputPort {
    header: SchemaRef,
    shared: Arc<PortShared>,
    connected: bool,
}

impl OutputPort {
    pub fn new(header: SchemaRef) -> Self {
        Self {
            header,
            shared: PortShared::new(),
            connected: false,
        }
    }

    /// Port with the empty header; it only ever carries presence markers.
    pub fn new_empty() -> Self {
        Self::new(Arc::new(Schema::empty()))
    }

    pub fn header(&self) -> &SchemaRef {
        &self.header
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn can_push(&self) -> bool {
        self.connected && self.shared.read(|s| s.slot.is_none() && !s.finished)
    }

    pub fn push(&mut self, chunk: Chunk) -> Result<(), String> {
        if !self.connected {
            return Err("cannot push to a port that is not connected".to_string());
        }
        self.shared.update(|s| {
            if s.finished {
                return (Err("cannot push to a finished port".to_string()), false);
            }
            if s.slot.is_some() {
                return (
                    Err("cannot push to a port that already holds a chunk".to_string()),
                    false,
                );
            }
            s.slot = Some(chunk);
            (Ok(()), true)
        })
    }

    /// Marks the edge finished. Idempotent.
    pub fn finish(&mut self) {
        self.shared.update(|s| {
            let changed = !s.finished;
            s.finished = true;
            ((), changed)
        });
    }

    /// True once either side finished the edge.
    pub fn is_finished(&self) -> bool {
        self.shared.read(|s| s.finished)
    }

    pub fn has_pending(&self) -> bool {
        self.shared.read(|s| s.slot.is_some())
    }

    pub fn observable(&self) -> Arc<Observable> {
        Arc::clone(&self.shared.observable)
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("columns", &self.header.fields().len())
            .field("connected", &self.connected)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Consumer end of an edge.
pub struct InputPort {
    header: SchemaRef,
    shared: Arc<PortShared>,
    connected: bool,
}

impl InputPort {
    pub fn new(header: SchemaRef) -> Self {
        Self {
            header,
            shared: PortShared::new(),
            connected: false,
        }
    }

    pub fn new_empty() -> Self {
        Self::new(Arc::new(Schema::empty()))
    }

    pub fn header(&self) -> &SchemaRef {
        &self.header
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn has_data(&self) -> bool {
        self.shared.read(|s| s.slot.is_some())
    }

    pub fn pull(&mut self) -> Option<Chunk> {
        self.shared.update(|s| {
            let chunk = s.slot.take();
            let changed = chunk.is_some();
            (chunk, changed)
        })
    }

    /// True when the producer finished (or the edge was closed) and nothing is left to pull.
    pub fn is_finished(&self) -> bool {
        self.shared.read(|s| s.finished && s.slot.is_none())
    }

    /// Consumer side finish: drop any pending chunk and refuse further data.
    pub fn close(&mut self) {
        self.shared.update(|s| {
            let changed = !s.finished || s.slot.is_some();
            s.finished = true;
            s.slot = None;
            ((), changed)
        });
    }

    pub fn observable(&self) -> Arc<Observable> {
        Arc::clone(&self.shared.observable)
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("columns", &self.header.fields().len())
            .field("connected", &self.connected)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn headers_compatible(output: &Schema, input: &Schema) -> bool {
    output.fields().len() == input.fields().len()
        && output
            .fields()
            .iter()
            .zip(input.fields().iter())
            .all(|(a, b)| a.data_type() == b.data_type())
}

/// Connects two unconnected ports with compatible headers.
pub fn connect(output: &mut OutputPort, input: &mut InputPort) -> Result<(), String> {
    if output.connected {
        return Err("output port is already connected".to_string());
    }
    if input.connected {
        return Err("input port is already connected".to_string());
    }
    if !headers_compatible(&output.header, &input.header) {
        return Err(format!(
            "cannot connect ports with different headers: output={:?} input={:?}",
            output.header, input.header
        ));
    }
    input.shared = Arc::clone(&output.shared);
    output.connected = true;
    input.connected = true;
    Ok(())
}
