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
//! Remote source for streaming rows of a query running on remote engines.
//!
//! Responsibilities:
//! - Sends the query on first use and pulls result blocks through the shared remote executor.
//! - Integrates non-blocking reads with the scheduler through `Async` and a readable descriptor.
//! - Propagates cancellation and downstream early finish to the remote side.
//! - Signals a replica-group scheduler through an optional coordination port.
//!
//! Key exported interfaces:
//! - Types: `RemoteSource`, `RemoteSourceCancelHandle`.
//! - Functions: `create_remote_source_pipe`.
//!
//! Current limitations:
//! - Only the primary source finishes the executor; side sources never touch the query lifecycle.

use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::common::config::{debug_log_remote_chunks, remote_async_read};
use crate::common::types::UniqueId;
use crate::exec::chunk::{AggregatedChunkInfo, Chunk, ChunkInfo, schema_has_agg_state};
use crate::exec::operators::remote_side_source::{RemoteSideSource, SideChannel};
use crate::exec::pipeline::pipe::Pipe;
use crate::exec::pipeline::port::{InputPort, OutputPort, connect};
use crate::exec::pipeline::processor::{Processor, ProcessorStatus};
use crate::exec::pipeline::source::SourceCore;
use crate::novarocks_logging::debug;
use crate::runtime::limits::StorageLimitsList;
use crate::runtime::profile::{CounterRef, OperatorProfiles, ScopedTimer, TUnit};
use crate::runtime::progress::{ProfileInfo, Progress, ProgressCounters, RowsBeforeLimitCounter};
use crate::runtime::remote_executor::{Block, ReadResult, RemoteQueryExecutorRef};

static REMOTE_SOURCE_CHUNK_LOG_COUNT: AtomicU64 = AtomicU64::new(0);

fn should_log_remote_chunk(log_every_chunk: bool) -> bool {
    if log_every_chunk {
        return true;
    }
    let count = REMOTE_SOURCE_CHUNK_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    count % 1024 == 0
}

const CHUNKS_RECEIVED: &str = "ChunksReceived";
const ROWS_RECEIVED: &str = "RowsReceived";
const BYTES_RECEIVED: &str = "BytesReceived";
const ASYNC_WAIT_COUNT: &str = "AsyncWaitCount";
const PARALLEL_REPLICAS_TOKENS: &str = "ParallelReplicasTokens";
const SEND_QUERY_TIME: &str = "SendQueryTime";

#[derive(Debug, Default)]
struct CancelState {
    // Set by cancellation and by downstream early finish; stops all further reads.
    stopped: AtomicBool,
    // Guards the single `cancel` call forwarded to the executor.
    cancel_sent: AtomicBool,
}

/// Cancels a [`RemoteSource`] from a thread other than the one driving it.
#[derive(Clone)]
pub struct RemoteSourceCancelHandle {
    state: Arc<CancelState>,
    executor: RemoteQueryExecutorRef,
}

impl RemoteSourceCancelHandle {
    pub fn cancel(&self) {
        cancel_remote(&self.state, &self.executor);
    }

    pub fn is_canceled(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }
}

fn cancel_remote(state: &CancelState, executor: &RemoteQueryExecutorRef) {
    state.stopped.store(true, Ordering::Release);
    if !state.cancel_sent.swap(true, Ordering::AcqRel) {
        debug!("RemoteSource cancel forwarded to remote executor");
        executor.cancel();
    }
}

struct RemoteSourceMetrics {
    chunks: CounterRef,
    rows: CounterRef,
    bytes: CounterRef,
    async_waits: CounterRef,
    tokens: CounterRef,
    send_query_time: CounterRef,
}

impl RemoteSourceMetrics {
    fn new(profiles: &OperatorProfiles) -> Self {
        let unique = &profiles.unique;
        Self {
            chunks: unique.add_counter(CHUNKS_RECEIVED, TUnit::Unit),
            rows: unique.add_counter(ROWS_RECEIVED, TUnit::Unit),
            bytes: unique.add_counter(BYTES_RECEIVED, TUnit::Bytes),
            async_waits: unique.add_counter(ASYNC_WAIT_COUNT, TUnit::Unit),
            tokens: unique.add_counter(PARALLEL_REPLICAS_TOKENS, TUnit::Unit),
            send_query_time: unique.add_timer(SEND_QUERY_TIME),
        }
    }
}

/// Source processor streaming the result of a remote query.
pub struct RemoteSource {
    name: String,
    core: SourceCore,
    executor: RemoteQueryExecutorRef,
    add_aggregation_info: bool,
    async_read: bool,
    group_id: UniqueId,
    cancel: Arc<CancelState>,
    was_query_sent: bool,
    executor_finished: bool,
    is_async_state: bool,
    fd: Option<RawFd>,
    dependency_port: Option<OutputPort>,
    storage_limits: StorageLimitsList,
    progress: Arc<ProgressCounters>,
    rows_before_limit: Option<Arc<RowsBeforeLimitCounter>>,
    metrics: Option<RemoteSourceMetrics>,
    log_every_chunk: bool,
    // Failure from a finish triggered outside prepare/work, surfaced by the next prepare.
    pending_error: Option<String>,
}

impl RemoteSource {
    /// Aggregation info is attached when requested or when the executor
    /// header carries partial aggregate state columns.
    pub fn new(
        executor: RemoteQueryExecutorRef,
        add_aggregation_info: bool,
        async_read: bool,
        group_id: UniqueId,
    ) -> Self {
        let header = executor.header();
        let add_aggregation_info = add_aggregation_info || schema_has_agg_state(&header);
        Self {
            name: "RemoteSource".to_string(),
            core: SourceCore::new(header),
            executor,
            add_aggregation_info,
            async_read,
            group_id,
            cancel: Arc::new(CancelState::default()),
            was_query_sent: false,
            executor_finished: false,
            is_async_state: false,
            fd: None,
            dependency_port: None,
            storage_limits: StorageLimitsList::new(),
            progress: Arc::new(ProgressCounters::new()),
            rows_before_limit: None,
            metrics: None,
            log_every_chunk: debug_log_remote_chunks(),
            pending_error: None,
        }
    }

    /// Connect the coordination port to a replica-group scheduler input.
    ///
    /// Every time the main output is full an empty chunk is offered on this
    /// port, so the scheduler can move on to another member of the group.
    pub fn connect_to_scheduler(&mut self, input: &mut InputPort) -> Result<(), String> {
        if self.dependency_port.is_some() {
            return Err(format!(
                "{} is already connected to a scheduler (group_id={})",
                self.name, self.group_id
            ));
        }
        let mut port = OutputPort::new_empty();
        connect(&mut port, input)
            .map_err(|e| format!("{} connect to scheduler failed: {e}", self.name))?;
        self.dependency_port = Some(port);
        Ok(())
    }

    pub fn parallel_replicas_group_id(&self) -> UniqueId {
        self.group_id
    }

    /// Keep only the local part of each limit; leaf limits are enforced by the remote side.
    pub fn set_storage_limits(&mut self, storage_limits: Arc<StorageLimitsList>) {
        self.storage_limits = storage_limits
            .iter()
            .map(|limits| limits.without_leaf_limits())
            .collect();
    }

    pub fn storage_limits(&self) -> &StorageLimitsList {
        &self.storage_limits
    }

    pub fn set_rows_before_limit_counter(&mut self, counter: Arc<RowsBeforeLimitCounter>) {
        self.rows_before_limit = Some(counter);
    }

    pub fn progress(&self) -> Arc<ProgressCounters> {
        Arc::clone(&self.progress)
    }

    pub fn cancel_handle(&self) -> RemoteSourceCancelHandle {
        RemoteSourceCancelHandle {
            state: Arc::clone(&self.cancel),
            executor: Arc::clone(&self.executor),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.stopped.load(Ordering::Acquire)
    }

    pub fn adds_aggregation_info(&self) -> bool {
        self.add_aggregation_info
    }

    pub fn is_async_read(&self) -> bool {
        self.async_read
    }

    /// Produce the next chunk.
    ///
    /// `Ok(None)` ends the stream. An empty chunk means "no data yet": either
    /// a wait was registered or a replica token was served.
    pub fn try_generate(&mut self) -> Result<Option<Chunk>, String> {
        if self.is_canceled() {
            return Ok(None);
        }

        if !self.was_query_sent {
            self.install_callbacks();
            let _timer = self
                .metrics
                .as_ref()
                .map(|m| ScopedTimer::new(Arc::clone(&m.send_query_time)));
            self.executor.send_query()?;
            self.was_query_sent = true;
            debug!(
                "RemoteSource query sent: group_id={} async_read={} aggregation_info={}",
                self.group_id, self.async_read, self.add_aggregation_info
            );
        }

        let block = if self.async_read {
            match self.executor.read_async()? {
                ReadResult::Nothing => {
                    return Err(format!(
                        "{}: remote executor returned neither data nor a descriptor to wait on",
                        self.name
                    ));
                }
                ReadResult::FileDescriptor(fd) => {
                    self.fd = Some(fd);
                    self.is_async_state = true;
                    if let Some(metrics) = &self.metrics {
                        metrics.async_waits.add(1);
                    }
                    debug!("RemoteSource waiting for fd={} group_id={}", fd, self.group_id);
                    return Ok(Some(Chunk::empty()));
                }
                ReadResult::ParallelReplicasToken => {
                    self.is_async_state = false;
                    if let Some(metrics) = &self.metrics {
                        metrics.tokens.add(1);
                    }
                    debug!("RemoteSource served parallel replicas token: group_id={}", self.group_id);
                    return Ok(Some(Chunk::empty()));
                }
                ReadResult::Data(block) => {
                    self.is_async_state = false;
                    Some(block)
                }
            }
        } else {
            self.executor.read_block()?
        };

        let block = match block {
            Some(block) if !block.is_empty() => block,
            _ => {
                debug!(
                    "RemoteSource end of stream: group_id={} read_rows={}",
                    self.group_id,
                    self.progress.read_rows()
                );
                self.finish_executor()?;
                return Ok(None);
            }
        };

        let chunk = self.block_to_chunk(block)?;
        if let Some(metrics) = &self.metrics {
            metrics.chunks.add(1);
            metrics.rows.add(chunk.len() as i64);
            metrics.bytes.add(chunk.logical_bytes() as i64);
        }
        if should_log_remote_chunk(self.log_every_chunk) {
            debug!(
                "RemoteSource chunk: group_id={} rows={} columns={} info={:?}",
                self.group_id,
                chunk.len(),
                chunk.num_columns(),
                chunk.chunk_info()
            );
        }
        Ok(Some(chunk))
    }

    fn block_to_chunk(&self, block: Block) -> Result<Chunk, String> {
        let num_rows = block.num_rows();
        let chunk = Chunk::try_from_columns(
            Arc::clone(self.core.output().header()),
            block.batch.columns().to_vec(),
            num_rows,
        )
        .map_err(|e| format!("{} received block not matching header: {e}", self.name))?;
        if !self.add_aggregation_info {
            return Ok(chunk);
        }
        Ok(chunk.with_chunk_info(ChunkInfo::Aggregated(AggregatedChunkInfo {
            bucket_num: block.info.bucket_num,
            is_overflows: block.info.is_overflows,
        })))
    }

    fn install_callbacks(&self) {
        let progress = Arc::clone(&self.progress);
        self.executor
            .set_progress_callback(Box::new(move |value: &Progress| progress.on_progress(value)));

        let rows_before_limit = self.rows_before_limit.clone();
        self.executor.set_profile_info_callback(Box::new(move |info: &ProfileInfo| {
            if let Some(counter) = &rows_before_limit {
                if info.has_applied_limit() {
                    counter.set(info.rows_before_limit);
                }
            }
        }));
    }

    // The executor must be finished explicitly, otherwise its connections are
    // treated as holding an unfinished query.
    fn finish_executor(&mut self) -> Result<(), String> {
        if self.executor_finished {
            return Ok(());
        }
        self.executor_finished = true;
        self.executor.finish()
    }

    fn finish_dependency_port(&mut self) {
        if let Some(port) = self.dependency_port.as_mut() {
            port.finish();
        }
    }

    // Leaves no port half-open once the source stops.
    fn close_outputs(&mut self) {
        self.core.finish();
        self.finish_dependency_port();
        self.is_async_state = false;
    }
}

impl Processor for RemoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        profiles
            .common
            .add_info_string("ParallelReplicasGroupId", self.group_id.to_string());
        self.metrics = Some(RemoteSourceMetrics::new(&profiles));
    }

    fn prepare(&mut self) -> Result<ProcessorStatus, String> {
        if let Some(err) = self.pending_error.take() {
            self.close_outputs();
            return Err(err);
        }

        // Checked before the async state, otherwise a canceled wait would loop forever.
        if self.is_canceled() {
            self.close_outputs();
            return Ok(ProcessorStatus::Finished);
        }

        if self.is_async_state {
            return Ok(ProcessorStatus::Async);
        }

        let status = self.core.prepare()?;
        match status {
            ProcessorStatus::Finished => {
                let finished = self.finish_executor();
                self.finish_dependency_port();
                self.is_async_state = false;
                finished?;
            }
            ProcessorStatus::PortFull => {
                if let Some(port) = self.dependency_port.as_mut() {
                    if port.can_push() {
                        port.push(Chunk::empty())?;
                    }
                }
            }
            _ => {}
        }
        Ok(status)
    }

    fn work(&mut self) -> Result<(), String> {
        let generated = self.try_generate()?;
        self.core.accept(generated);
        Ok(())
    }

    fn wait_handle(&self) -> Option<RawFd> {
        if self.is_async_state { self.fd } else { None }
    }

    fn on_async_job_ready(&mut self) {
        self.is_async_state = false;
        self.fd = None;
    }

    fn on_cancel(&mut self) {
        cancel_remote(&self.cancel, &self.executor);
    }

    fn on_update_ports(&mut self) {
        // Downstream does not need more data; stop reading and release the connection.
        if self.core.output().is_finished() && !self.core.is_finished() {
            debug!(
                "RemoteSource output finished by downstream: group_id={}",
                self.group_id
            );
            self.cancel.stopped.store(true, Ordering::Release);
            if let Err(e) = self.finish_executor() {
                debug!("RemoteSource finish after downstream close failed: {}", e);
                self.pending_error = Some(e);
            }
        }
    }

    fn output(&self) -> Option<&OutputPort> {
        Some(self.core.output())
    }

    fn output_mut(&mut self) -> Option<&mut OutputPort> {
        Some(self.core.output_mut())
    }
}

/// Assemble the processors reading one remote query.
///
/// The main source comes first; totals and extremes sources share the same
/// executor and only read its side blocks.
pub fn create_remote_source_pipe(
    executor: RemoteQueryExecutorRef,
    add_aggregation_info: bool,
    add_totals: bool,
    add_extremes: bool,
    async_read: bool,
    group_id: UniqueId,
) -> Pipe {
    let source = RemoteSource::new(
        Arc::clone(&executor),
        add_aggregation_info,
        async_read,
        group_id,
    );
    let totals: Option<Box<dyn Processor>> = add_totals.then(|| {
        Box::new(RemoteSideSource::new(
            Arc::clone(&executor),
            SideChannel::Totals,
        )) as Box<dyn Processor>
    });
    let extremes: Option<Box<dyn Processor>> = add_extremes.then(|| {
        Box::new(RemoteSideSource::new(
            Arc::clone(&executor),
            SideChannel::Extremes,
        )) as Box<dyn Processor>
    });
    let pipe = Pipe::from_parts(Box::new(source), totals, extremes);
    debug!(
        "Remote source pipe created: group_id={} processors={} totals={} extremes={}",
        group_id,
        pipe.num_processors(),
        add_totals,
        add_extremes
    );
    pipe
}

/// Same as [`create_remote_source_pipe`] with the read mode taken from `[remote] async_read`.
pub fn create_remote_source_pipe_with_default_read_mode(
    executor: RemoteQueryExecutorRef,
    add_aggregation_info: bool,
    add_totals: bool,
    add_extremes: bool,
    group_id: UniqueId,
) -> Pipe {
    create_remote_source_pipe(
        executor,
        add_aggregation_info,
        add_totals,
        add_extremes,
        remote_async_read(),
        group_id,
    )
}
