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
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::buffer::Buffer;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatchOptions;

/// Field metadata key marking a column that carries partial aggregate states.
///
/// The value is the aggregate function name, e.g. `sum` or `uniq`.
pub const FIELD_META_AGG_STATE: &str = "novarocks.agg_state";

pub fn field_with_agg_state(field: Field, function: &str) -> Field {
    let mut meta = field.metadata().clone();
    meta.insert(FIELD_META_AGG_STATE.to_string(), function.to_string());
    field.with_metadata(meta)
}

pub fn is_agg_state_field(field: &Field) -> bool {
    field.metadata().contains_key(FIELD_META_AGG_STATE)
}

pub fn schema_has_agg_state(schema: &Schema) -> bool {
    schema.fields().iter().any(|f| is_agg_state_field(f.as_ref()))
}

/// Tag for chunks decoded from a partially aggregated remote stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatedChunkInfo {
    /// Two-level aggregation bucket, -1 for single-level data.
    pub bucket_num: i32,
    pub is_overflows: bool,
}

impl Default for AggregatedChunkInfo {
    fn default() -> Self {
        Self {
            bucket_num: -1,
            is_overflows: false,
        }
    }
}

/// Side information travelling with a chunk without touching its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkInfo {
    Aggregated(AggregatedChunkInfo),
}

/// A chunk of data, consisting of multiple rows.
///
/// Wraps an Arrow RecordBatch. A chunk with neither columns nor rows is the
/// "empty" chunk used as a coordination marker and as a no-output result.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
    info: Option<ChunkInfo>,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch, info: None }
    }

    /// Build a chunk from columns and an explicit row count.
    ///
    /// The row count is kept even when `columns` is empty.
    pub fn try_from_columns(
        schema: SchemaRef,
        columns: Vec<ArrayRef>,
        num_rows: usize,
    ) -> Result<Self, String> {
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let batch = RecordBatch::try_new_with_options(schema, columns, &options)
            .map_err(|e| format!("build chunk with {num_rows} rows failed: {e}"))?;
        Ok(Self::new(batch))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    /// True when the chunk carries rows or columns.
    pub fn has_payload(&self) -> bool {
        self.batch.num_rows() > 0 || self.batch.num_columns() > 0
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }

    pub fn chunk_info(&self) -> Option<&ChunkInfo> {
        self.info.as_ref()
    }

    pub fn set_chunk_info(&mut self, info: ChunkInfo) {
        self.info = Some(info);
    }

    pub fn with_chunk_info(mut self, info: ChunkInfo) -> Self {
        self.set_chunk_info(info);
        self
    }

    pub fn aggregated_info(&self) -> Option<&AggregatedChunkInfo> {
        match self.info.as_ref()? {
            ChunkInfo::Aggregated(info) => Some(info),
        }
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
            info: None,
        }
    }
}

/// Estimate RecordBatch size by summing unique buffers inside the batch.
///
/// Buffers are de-duplicated only within a single batch; shared buffers
/// across batches are counted once per batch.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}
