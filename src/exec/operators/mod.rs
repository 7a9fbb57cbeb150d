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
//! Execution operator module exports.
//!
//! Responsibilities:
//! - Provides the remote source processors and the assembler that groups them into a pipe.

mod remote_side_source;
mod remote_source;

pub use remote_side_source::{RemoteSideSource, SideChannel};
pub use remote_source::{
    RemoteSource, RemoteSourceCancelHandle, create_remote_source_pipe,
    create_remote_source_pipe_with_default_read_mode,
};
