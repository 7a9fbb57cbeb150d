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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use arrow::array::{Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use novarocks_remote::common::types::UniqueId;
use novarocks_remote::exec::chunk::field_with_agg_state;
use novarocks_remote::novarocks_config;
use novarocks_remote::novarocks_logging;
use novarocks_remote::runtime::progress::{ProfileInfo, Progress};
use novarocks_remote::runtime::remote_executor::{
    Block, BlockInfo, ProfileInfoCallback, ProgressCallback, ReadResult, RemoteQueryExecutor,
};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with short waits.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks_remote.toml");

        let config_content = r#"
log_level = "debug"

[remote]
async_read = true
async_wait_timeout_ms = 5000
poll_interval_ms = 10

[debug]
log_remote_chunks = true
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(
        &self,
    ) -> anyhow::Result<&'static novarocks_config::NovaRocksRemoteConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Load the test config and logging once per test binary.
pub fn setup() -> TestConfig {
    let cfg = TestConfig::default();
    let _ = cfg.load_config();
    cfg.init_logging();
    cfg
}

/// Generate a test replica group id.
pub fn test_group_id() -> UniqueId {
    UniqueId {
        hi: 1234567890,
        lo: 9876543210,
    }
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(_) => panic!("Expected Err, got Ok"),
            Err(e) => e,
        }
    };
}

// ---------------------------------------------------------------------------
// Block builders
// ---------------------------------------------------------------------------

pub fn int_header() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]))
}

/// Header whose second column carries partial `sum` states.
pub fn agg_state_header() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::Utf8, true),
        field_with_agg_state(Field::new("sum_v", DataType::Int64, true), "sum"),
    ]))
}

pub fn int_block(rows: usize) -> Block {
    let values: Vec<i64> = (0..rows as i64).collect();
    let batch = RecordBatch::try_new(int_header(), vec![Arc::new(Int64Array::from(values))])
        .expect("int block");
    Block::new(batch)
}

pub fn int_block_with_info(rows: usize, bucket_num: i32, is_overflows: bool) -> Block {
    let block = int_block(rows);
    Block::with_info(
        block.batch,
        BlockInfo {
            bucket_num,
            is_overflows,
        },
    )
}

pub fn agg_state_block(keys: &[&str]) -> Block {
    let sums: Vec<i64> = (0..keys.len() as i64).map(|v| v * 10).collect();
    let batch = RecordBatch::try_new(
        agg_state_header(),
        vec![
            Arc::new(StringArray::from(keys.to_vec())),
            Arc::new(Int64Array::from(sums)),
        ],
    )
    .expect("agg state block");
    Block::new(batch)
}

/// Block with the int header and no rows.
pub fn zero_row_block() -> Block {
    Block::new(RecordBatch::new_empty(int_header()))
}

// ---------------------------------------------------------------------------
// Scripted executor
// ---------------------------------------------------------------------------

/// One scripted answer to a read call.
pub enum Step {
    Data(Block),
    Fd(RawFd),
    Token,
    Nothing,
    /// End of stream: `None` for blocking reads, an empty block for async reads.
    End,
    Fail(String),
}

#[derive(Default)]
pub struct CallCounts {
    pub send_query: AtomicUsize,
    pub read_block: AtomicUsize,
    pub read_async: AtomicUsize,
    pub finish: AtomicUsize,
    pub cancel: AtomicUsize,
    pub totals: AtomicUsize,
    pub extremes: AtomicUsize,
}

impl CallCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        Self::get(&self.read_block) + Self::get(&self.read_async)
    }
}

/// Remote executor answering reads from a script and recording every call.
///
/// An exhausted script behaves like the end of the stream.
pub struct MockExecutor {
    header: SchemaRef,
    script: Mutex<VecDeque<Step>>,
    pub calls: CallCounts,
    send_error: Mutex<Option<String>>,
    finish_error: Mutex<Option<String>>,
    progress_on_send: Vec<Progress>,
    profile_on_finish: Option<ProfileInfo>,
    totals: Option<Block>,
    extremes: Option<Block>,
    progress_callback: Mutex<Option<ProgressCallback>>,
    profile_callback: Mutex<Option<ProfileInfoCallback>>,
}

impl MockExecutor {
    pub fn new(header: SchemaRef, script: Vec<Step>) -> Self {
        Self {
            header,
            script: Mutex::new(script.into()),
            calls: CallCounts::default(),
            send_error: Mutex::new(None),
            finish_error: Mutex::new(None),
            progress_on_send: Vec::new(),
            profile_on_finish: None,
            totals: None,
            extremes: None,
            progress_callback: Mutex::new(None),
            profile_callback: Mutex::new(None),
        }
    }

    pub fn with_totals(mut self, block: Block) -> Self {
        self.totals = Some(block);
        self
    }

    pub fn with_extremes(mut self, block: Block) -> Self {
        self.extremes = Some(block);
        self
    }

    /// Progress packets delivered while the query is being sent.
    pub fn with_progress(mut self, packets: Vec<Progress>) -> Self {
        self.progress_on_send = packets;
        self
    }

    /// Profile packet delivered when the executor is finished.
    pub fn with_profile_info(mut self, info: ProfileInfo) -> Self {
        self.profile_on_finish = Some(info);
        self
    }

    /// Make the next `send_query` fail once with `message`.
    pub fn fail_next_send(&self, message: &str) {
        *self.send_error.lock().expect("send error lock") = Some(message.to_string());
    }

    /// Make the next `finish` fail once with `message`.
    pub fn fail_next_finish(&self, message: &str) {
        *self.finish_error.lock().expect("finish error lock") = Some(message.to_string());
    }

    pub fn into_ref(self) -> Arc<MockExecutor> {
        Arc::new(self)
    }

    pub fn remaining_steps(&self) -> usize {
        self.script.lock().expect("script lock").len()
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Step::End)
    }
}

impl RemoteQueryExecutor for MockExecutor {
    fn header(&self) -> SchemaRef {
        Arc::clone(&self.header)
    }

    fn set_progress_callback(&self, callback: ProgressCallback) {
        *self.progress_callback.lock().expect("progress callback lock") = Some(callback);
    }

    fn set_profile_info_callback(&self, callback: ProfileInfoCallback) {
        *self.profile_callback.lock().expect("profile callback lock") = Some(callback);
    }

    fn send_query(&self) -> Result<(), String> {
        self.calls.send_query.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.send_error.lock().expect("send error lock").take() {
            return Err(err);
        }
        if let Some(callback) = self.progress_callback.lock().expect("progress callback lock").as_ref() {
            for packet in &self.progress_on_send {
                callback(packet);
            }
        }
        Ok(())
    }

    fn read_block(&self) -> Result<Option<Block>, String> {
        self.calls.read_block.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Data(block) => Ok(Some(block)),
            Step::End => Ok(None),
            Step::Fail(err) => Err(err),
            Step::Fd(_) | Step::Token | Step::Nothing => {
                Err("async step scripted for a blocking read".to_string())
            }
        }
    }

    fn read_async(&self) -> Result<ReadResult, String> {
        self.calls.read_async.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Data(block) => Ok(ReadResult::Data(block)),
            Step::Fd(fd) => Ok(ReadResult::FileDescriptor(fd)),
            Step::Token => Ok(ReadResult::ParallelReplicasToken),
            Step::Nothing => Ok(ReadResult::Nothing),
            Step::End => Ok(ReadResult::Data(Block::end_of_stream())),
            Step::Fail(err) => Err(err),
        }
    }

    fn finish(&self) -> Result<(), String> {
        self.calls.finish.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.finish_error.lock().expect("finish error lock").take() {
            return Err(err);
        }
        if let (Some(info), Some(callback)) = (
            self.profile_on_finish.as_ref(),
            self.profile_callback.lock().expect("profile callback lock").as_ref(),
        ) {
            callback(info);
        }
        Ok(())
    }

    fn cancel(&self) {
        self.calls.cancel.fetch_add(1, Ordering::SeqCst);
    }

    fn totals(&self) -> Option<Block> {
        self.calls.totals.fetch_add(1, Ordering::SeqCst);
        self.totals.clone()
    }

    fn extremes(&self) -> Option<Block> {
        self.calls.extremes.fetch_add(1, Ordering::SeqCst);
        self.extremes.clone()
    }
}
