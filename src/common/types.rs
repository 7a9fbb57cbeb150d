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
use std::fmt;

/// 128-bit identifier stored as two signed halves.
///
/// Used for parallel-replica group ids; the nil value means "no group".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct UniqueId {
    pub hi: i64,
    pub lo: i64,
}

fn write_uuid(f: &mut fmt::Formatter<'_>, hi: i64, lo: i64) -> fmt::Result {
    let hi = hi as u64;
    let lo = lo as u64;
    write!(
        f,
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        (hi >> 32) as u32,
        (hi >> 16) as u16,
        hi as u16,
        (lo >> 48) as u16,
        lo & 0x0000_FFFF_FFFF_FFFF
    )
}

pub fn format_uuid(hi: i64, lo: i64) -> String {
    UniqueId { hi, lo }.to_string()
}

impl UniqueId {
    pub const fn nil() -> Self {
        Self { hi: 0, lo: 0 }
    }

    pub fn is_nil(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }

    pub fn to_uuid_string(self) -> String {
        format_uuid(self.hi, self.lo)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_uuid(f, self.hi, self.lo)
    }
}
