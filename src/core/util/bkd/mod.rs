// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

mod bkd_config;

pub use self::bkd_config::*;

mod doc_ids_writer;

pub use self::doc_ids_writer::*;

mod bkd_reader;

pub use self::bkd_reader::*;

mod bkd_writer;

pub use self::bkd_writer::*;

mod heap_point;

pub use self::heap_point::*;

mod offline_point;

pub use self::offline_point::*;

use crate::error::Result;

use crate::core::store::directory::Directory;
use crate::core::util::DocId;

pub const BKD_CODEC_NAME: &str = "BKD";
pub const BKD_VERSION_START: i32 = 0;
pub const BKD_VERSION_CURRENT: i32 = BKD_VERSION_START;

/// Number of splits after which exact bounds are recomputed when there are
/// more than two index dimensions.
pub const SPLITS_BEFORE_EXACT_BOUNDS: usize = 4;

/// Sequential cursor over points previously appended to a `PointWriter`.
pub trait PointReader {
    /// Advances to the next point, returns false once the range is exhausted.
    fn next(&mut self) -> Result<bool>;
    fn packed_value(&self) -> &[u8];
    fn doc_id(&self) -> DocId;
}

pub enum PointReaderEnum<'a> {
    Heap(HeapPointReader<'a>),
    Offline(OfflinePointReader),
}

impl<'a> PointReader for PointReaderEnum<'a> {
    fn next(&mut self) -> Result<bool> {
        match self {
            PointReaderEnum::Heap(h) => h.next(),
            PointReaderEnum::Offline(o) => o.next(),
        }
    }
    fn packed_value(&self) -> &[u8] {
        match self {
            PointReaderEnum::Heap(h) => h.packed_value(),
            PointReaderEnum::Offline(o) => o.packed_value(),
        }
    }
    fn doc_id(&self) -> DocId {
        match self {
            PointReaderEnum::Heap(h) => h.doc_id(),
            PointReaderEnum::Offline(o) => o.doc_id(),
        }
    }
}

/// Append-only sink of (packed value, doc id) pairs.
pub trait PointWriter {
    fn append(&mut self, packed_value: &[u8], doc_id: DocId) -> Result<()>;
    /// Returns a reader over `length` points starting at `start`.
    fn point_reader(&self, start: usize, length: usize) -> Result<PointReaderEnum<'_>>;
    fn count(&self) -> i64;
    /// Releases whatever storage backs this writer.
    fn destroy(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

pub enum PointWriterEnum<D: Directory> {
    Heap(HeapPointWriter),
    Offline(OfflinePointWriter<D>),
}

impl<D: Directory> PointWriter for PointWriterEnum<D> {
    fn append(&mut self, packed_value: &[u8], doc_id: DocId) -> Result<()> {
        match self {
            PointWriterEnum::Heap(h) => h.append(packed_value, doc_id),
            PointWriterEnum::Offline(o) => o.append(packed_value, doc_id),
        }
    }
    fn point_reader(&self, start: usize, length: usize) -> Result<PointReaderEnum<'_>> {
        match self {
            PointWriterEnum::Heap(h) => h.point_reader(start, length),
            PointWriterEnum::Offline(o) => o.point_reader(start, length),
        }
    }
    fn count(&self) -> i64 {
        match self {
            PointWriterEnum::Heap(h) => h.count(),
            PointWriterEnum::Offline(o) => o.count(),
        }
    }
    fn destroy(&mut self) -> Result<()> {
        match self {
            PointWriterEnum::Heap(h) => h.destroy(),
            PointWriterEnum::Offline(o) => o.destroy(),
        }
    }
    fn close(&mut self) -> Result<()> {
        match self {
            PointWriterEnum::Heap(h) => h.close(),
            PointWriterEnum::Offline(o) => o.close(),
        }
    }
}
