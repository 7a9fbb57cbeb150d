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
use crate::novarocks_config::config as novarocks_app_config;

pub fn remote_async_read() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.remote.async_read)
        .unwrap_or(true)
}

pub(crate) fn remote_async_wait_timeout_ms() -> u64 {
    novarocks_app_config()
        .ok()
        .map(|c| c.remote.async_wait_timeout_ms)
        .unwrap_or(300_000)
}

pub(crate) fn remote_poll_interval_ms() -> u64 {
    novarocks_app_config()
        .ok()
        .map(|c| c.remote.poll_interval_ms)
        .unwrap_or(100)
}

pub(crate) fn debug_log_remote_chunks() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.debug.log_remote_chunks)
        .unwrap_or(false)
}
