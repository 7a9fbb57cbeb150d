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
//! Read limits attached to pipeline sources.
//!
//! `local_limits` apply to the stream a source produces (row/byte caps, speed
//! and execution-time bounds). `leaf_limits` only make sense for sources that
//! scan storage directly; remote sources drop them.

use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowMode {
    /// Fail the query.
    #[default]
    Throw,
    /// Stop reading and return what was read so far.
    Break,
}

/// Row/byte cap; zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeLimits {
    pub max_rows: u64,
    pub max_bytes: u64,
    pub overflow_mode: OverflowMode,
}

impl SizeLimits {
    pub fn new(max_rows: u64, max_bytes: u64, overflow_mode: OverflowMode) -> Self {
        Self {
            max_rows,
            max_bytes,
            overflow_mode,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_rows == 0 && self.max_bytes == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LimitsMode {
    /// Limits apply to this stream only.
    #[default]
    Current,
    /// Limits apply to the whole query and are checked against total progress.
    Total,
}

/// Speed bounds checked once `timeout_before_checking_execution_speed` elapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSpeedLimits {
    pub min_execution_rps: u64,
    pub max_execution_rps: u64,
    pub max_execution_bps: u64,
    pub timeout_before_checking_execution_speed: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamLocalLimits {
    pub mode: LimitsMode,
    pub size_limits: SizeLimits,
    pub speed_limits: ExecutionSpeedLimits,
    pub max_execution_time: Option<Duration>,
    pub timeout_overflow_mode: OverflowMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageLimits {
    pub local_limits: StreamLocalLimits,
    pub leaf_limits: SizeLimits,
}

impl StorageLimits {
    pub fn new(local_limits: StreamLocalLimits, leaf_limits: SizeLimits) -> Self {
        Self {
            local_limits,
            leaf_limits,
        }
    }

    /// Same limits with the storage-scan (leaf) part removed.
    pub fn without_leaf_limits(&self) -> Self {
        Self {
            local_limits: self.local_limits.clone(),
            leaf_limits: SizeLimits::default(),
        }
    }
}

pub type StorageLimitsList = Vec<StorageLimits>;
