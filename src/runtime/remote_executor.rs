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
//! Remote query executor contract.
//!
//! Responsibilities:
//! - Defines the interface of the session that owns the connection(s) to remote query engines.
//! - Defines decoded result blocks and the outcomes of a non-blocking read.
//!
//! Key exported interfaces:
//! - Types: `RemoteQueryExecutor`, `RemoteQueryExecutorRef`, `Block`, `BlockInfo`, `ReadResult`.
//!
//! Current limitations:
//! - Wire protocol, connection pooling and packet decoding live behind the trait and are not part of this crate.

use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::{Schema, SchemaRef};

use crate::runtime::progress::{ProfileInfo, Progress};

/// Per-block metadata sent by the remote side alongside the columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Two-level aggregation bucket, -1 when the block is not bucketed.
    pub bucket_num: i32,
    /// Rows that did not fit `max_rows_to_group_by` in overflow mode `any`.
    pub is_overflows: bool,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            bucket_num: -1,
            is_overflows: false,
        }
    }
}

/// One decoded result block received from a remote engine.
#[derive(Debug, Clone)]
pub struct Block {
    pub batch: RecordBatch,
    pub info: BlockInfo,
}

impl Block {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            batch,
            info: BlockInfo::default(),
        }
    }

    pub fn with_info(batch: RecordBatch, info: BlockInfo) -> Self {
        Self { batch, info }
    }

    /// Block that marks the end of the result stream.
    pub fn end_of_stream() -> Self {
        Self::new(RecordBatch::new_empty(Arc::new(Schema::empty())))
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// A block without rows ends the stream.
    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }
}

/// Outcome of one non-blocking read attempt.
pub enum ReadResult {
    /// No packet and nothing to wait for. Executors must never return this.
    Nothing,
    /// The read would block; wait until the descriptor becomes readable.
    FileDescriptor(RawFd),
    /// A parallel-replicas handshake was served; no rows were produced.
    ParallelReplicasToken,
    /// A data block; an empty block ends the stream.
    Data(Block),
}

impl fmt::Debug for ReadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadResult::Nothing => f.write_str("Nothing"),
            ReadResult::FileDescriptor(fd) => write!(f, "FileDescriptor({fd})"),
            ReadResult::ParallelReplicasToken => f.write_str("ParallelReplicasToken"),
            ReadResult::Data(block) => write!(f, "Data(rows={})", block.num_rows()),
        }
    }
}

pub type ProgressCallback = Box<dyn Fn(&Progress) + Send + Sync + 'static>;
pub type ProfileInfoCallback = Box<dyn Fn(&ProfileInfo) + Send + Sync + 'static>;

/// Session with one or more remote engines running the same query.
///
/// One executor is shared by the main remote source and its totals/extremes
/// sources, so every method takes `&self`; implementations keep their own
/// interior state. `finish` and `cancel` must be idempotent and `cancel` must
/// be callable from a thread other than the one reading.
pub trait RemoteQueryExecutor: Send + Sync {
    /// Schema of the result blocks.
    fn header(&self) -> SchemaRef;

    fn set_progress_callback(&self, callback: ProgressCallback);

    fn set_profile_info_callback(&self, callback: ProfileInfoCallback);

    fn send_query(&self) -> Result<(), String>;

    /// Blocking read; `None` (or an empty block) once the stream is exhausted.
    fn read_block(&self) -> Result<Option<Block>, String>;

    /// Non-blocking read.
    fn read_async(&self) -> Result<ReadResult, String>;

    /// Drain the remaining packets so the connection can be reused.
    fn finish(&self) -> Result<(), String>;

    /// Ask the remote side to stop the query.
    fn cancel(&self);

    /// Totals block, available once the main stream has been consumed.
    ///
    /// Implementations may return the same block on every call.
    fn totals(&self) -> Option<Block>;

    /// Extremes block, available once the main stream has been consumed.
    ///
    /// Implementations may return the same block on every call.
    fn extremes(&self) -> Option<Block>;
}

pub type RemoteQueryExecutorRef = Arc<dyn RemoteQueryExecutor>;
