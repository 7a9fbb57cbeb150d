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
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Progress packet reported by the remote side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub read_rows: u64,
    pub read_bytes: u64,
    /// Estimated rows the remote query will read in total; 0 when unknown.
    pub total_rows_to_read: u64,
}

/// Profile packet reported by the remote side after the result stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    pub applied_limit: bool,
    pub rows_before_limit: u64,
}

impl ProfileInfo {
    pub fn has_applied_limit(&self) -> bool {
        self.applied_limit
    }
}

/// Query progress accumulated from remote progress packets.
///
/// Counters only grow; they are updated from executor callbacks and read by
/// whoever reports query progress.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    read_rows: AtomicU64,
    read_bytes: AtomicU64,
    total_rows_approx: AtomicU64,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_total_rows_approx(&self, rows: u64) {
        self.total_rows_approx.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_progress(&self, read_rows: u64, read_bytes: u64) {
        self.read_rows.fetch_add(read_rows, Ordering::Relaxed);
        self.read_bytes.fetch_add(read_bytes, Ordering::Relaxed);
    }

    /// Fold one remote progress packet into the counters.
    pub fn on_progress(&self, value: &Progress) {
        if value.total_rows_to_read > 0 {
            self.add_total_rows_approx(value.total_rows_to_read);
        }
        self.add_progress(value.read_rows, value.read_bytes);
    }

    pub fn read_rows(&self) -> u64 {
        self.read_rows.load(Ordering::Relaxed)
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    pub fn total_rows_approx(&self) -> u64 {
        self.total_rows_approx.load(Ordering::Relaxed)
    }
}

/// Rows the remote query would have produced without its LIMIT.
#[derive(Debug, Default)]
pub struct RowsBeforeLimitCounter {
    rows: AtomicU64,
    applied: AtomicBool,
}

impl RowsBeforeLimitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, rows: u64) {
        self.rows.store(rows, Ordering::Release);
        self.applied.store(true, Ordering::Release);
    }

    pub fn get(&self) -> u64 {
        self.rows.load(Ordering::Acquire)
    }

    pub fn has_applied_limit(&self) -> bool {
        self.applied.load(Ordering::Acquire)
    }
}
