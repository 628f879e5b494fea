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

use crate::core::util::bit_set::FixedBitSet;
use crate::core::util::bkd::{BKDConfig, PointReader, PointReaderEnum, PointWriter};
use crate::core::util::selector::Selector;
use crate::core::util::string_util::bytes_difference;
use crate::core::util::DocId;

use crate::error::ErrorKind::{IllegalArgument, IllegalState};
use crate::error::Result;

use byteorder::{BigEndian, ByteOrder};
use std::cmp::Ordering;

/// Reads a range of a `HeapPointWriter` in slot order.
pub struct HeapPointReader<'a> {
    writer: &'a HeapPointWriter,
    curr_read: usize,
    next_read: usize,
    end: usize,
}

impl<'a> HeapPointReader<'a> {
    pub fn new(writer: &'a HeapPointWriter, start: usize, end: usize) -> HeapPointReader<'a> {
        HeapPointReader {
            writer,
            curr_read: start,
            next_read: start,
            end,
        }
    }
}

impl<'a> PointReader for HeapPointReader<'a> {
    fn next(&mut self) -> Result<bool> {
        if self.next_read < self.end {
            self.curr_read = self.next_read;
            self.next_read += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn packed_value(&self) -> &[u8] {
        self.writer.packed_value(self.curr_read)
    }

    fn doc_id(&self) -> DocId {
        self.writer.doc_id(self.curr_read)
    }
}

/// Points held in one flat byte arena.
///
/// Slot `i` occupies `bytes_per_doc` bytes: the packed value followed by
/// the big-endian doc id. Ranges of slots can be reordered in place.
pub struct HeapPointWriter {
    config: BKDConfig,
    block: Vec<u8>,
    size: usize,
    next_write: usize,
    closed: bool,
}

impl HeapPointWriter {
    /// Creates a writer that accepts at most `size` points.
    pub fn new(config: BKDConfig, size: usize) -> HeapPointWriter {
        HeapPointWriter {
            config,
            block: Vec::new(),
            size,
            next_write: 0,
            closed: false,
        }
    }

    #[inline]
    fn slot(&self, i: usize) -> &[u8] {
        let bytes_per_doc = self.config.bytes_per_doc();
        &self.block[i * bytes_per_doc..(i + 1) * bytes_per_doc]
    }

    #[inline]
    pub fn packed_value(&self, i: usize) -> &[u8] {
        debug_assert!(i < self.next_write);
        let start = i * self.config.bytes_per_doc();
        &self.block[start..start + self.config.packed_bytes_length()]
    }

    #[inline]
    pub fn doc_id(&self, i: usize) -> DocId {
        debug_assert!(i < self.next_write);
        let start = i * self.config.bytes_per_doc() + self.config.packed_bytes_length();
        BigEndian::read_i32(&self.block[start..start + 4])
    }

    /// Bytes of dimension `dim` of the value in slot `i`.
    #[inline]
    pub fn dim_value(&self, i: usize, dim: usize) -> &[u8] {
        let bytes_per_dim = self.config.bytes_per_dim();
        &self.packed_value(i)[dim * bytes_per_dim..(dim + 1) * bytes_per_dim]
    }

    pub fn swap(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        let bytes_per_doc = self.config.bytes_per_doc();
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        let (left, right) = self.block.split_at_mut(hi * bytes_per_doc);
        left[lo * bytes_per_doc..(lo + 1) * bytes_per_doc].swap_with_slice(&mut right[..bytes_per_doc]);
    }

    /// Per data dimension, the number of leading bytes shared by every value in `[from, to)`.
    pub fn compute_common_prefix_lengths(&self, from: usize, to: usize) -> Vec<usize> {
        let bytes_per_dim = self.config.bytes_per_dim();
        let mut common_prefix_lengths = vec![bytes_per_dim; self.config.num_dims()];
        let first = self.packed_value(from);
        for i in from + 1..to {
            let value = self.packed_value(i);
            for (dim, prefix) in common_prefix_lengths.iter_mut().enumerate() {
                if *prefix > 0 {
                    let offset = dim * bytes_per_dim;
                    *prefix = bytes_difference(
                        &first[offset..offset + *prefix],
                        &value[offset..offset + *prefix],
                    );
                }
            }
        }
        common_prefix_lengths
    }

    /// Number of runs of equal values in the sorted range `[from, to)`, comparing
    /// only the bytes after the common prefix of each data dimension.
    pub fn compute_cardinality(
        &self,
        from: usize,
        to: usize,
        common_prefix_lengths: &[usize],
    ) -> usize {
        let bytes_per_dim = self.config.bytes_per_dim();
        let mut cardinality = 1;
        for i in from + 1..to {
            let prev = self.packed_value(i - 1);
            let value = self.packed_value(i);
            let differs = common_prefix_lengths.iter().enumerate().any(|(dim, prefix)| {
                let start = dim * bytes_per_dim + prefix;
                let end = (dim + 1) * bytes_per_dim;
                prev[start..end] != value[start..end]
            });
            if differs {
                cardinality += 1;
            }
        }
        cardinality
    }

    /// Picks the data dimension whose first byte after the common prefix takes
    /// the fewest distinct values in `[from, to)`.
    pub fn sorted_dim(&self, from: usize, to: usize, common_prefix_lengths: &[usize]) -> usize {
        let bytes_per_dim = self.config.bytes_per_dim();
        let mut sorted_dim = 0;
        let mut sorted_dim_cardinality = usize::max_value();
        for (dim, &prefix) in common_prefix_lengths.iter().enumerate() {
            if prefix < bytes_per_dim {
                let offset = dim * bytes_per_dim + prefix;
                let mut used_bytes = FixedBitSet::new(256);
                for i in from..to {
                    used_bytes.set(self.packed_value(i)[offset] as usize);
                }
                let cardinality = used_bytes.cardinality();
                if cardinality < sorted_dim_cardinality {
                    sorted_dim = dim;
                    sorted_dim_cardinality = cardinality;
                }
            }
        }
        sorted_dim
    }

    /// Rearranges `[from, to)` so that slot `k` holds the k-th smallest point by
    /// (bytes of `dim`, packed value, doc id), smaller points before it and
    /// larger after.
    pub fn select(&mut self, from: usize, to: usize, k: usize, dim: usize) {
        let mut selector = HeapPointSelector::new(self, dim);
        selector.select(from, to, k);
    }

    /// Sorts `[from, to)` by (bytes of `dim`, packed value, doc id).
    pub fn sort(&mut self, from: usize, to: usize, dim: usize) {
        let bytes_per_doc = self.config.bytes_per_doc();
        let offset = dim * self.config.bytes_per_dim();
        let len = self.config.bytes_per_dim();
        let sorted = {
            let mut slots: Vec<&[u8]> = self.block[from * bytes_per_doc..to * bytes_per_doc]
                .chunks(bytes_per_doc)
                .collect();
            slots.sort_unstable_by(|a, b| {
                a[offset..offset + len]
                    .cmp(&b[offset..offset + len])
                    .then_with(|| a.cmp(b))
            });
            slots.concat()
        };
        self.block[from * bytes_per_doc..to * bytes_per_doc].copy_from_slice(&sorted);
    }

    /// Min and max of the index dimensions over `[from, to)`.
    pub fn compute_bounds(&self, from: usize, to: usize) -> (Vec<u8>, Vec<u8>) {
        let index_bytes = self.config.packed_index_bytes_length();
        let bytes_per_dim = self.config.bytes_per_dim();
        let mut min = self.packed_value(from)[..index_bytes].to_vec();
        let mut max = min.clone();
        for i in from + 1..to {
            let value = self.packed_value(i);
            for dim in 0..self.config.num_index_dims() {
                let range = dim * bytes_per_dim..(dim + 1) * bytes_per_dim;
                if value[range.clone()] < min[range.clone()] {
                    min[range.clone()].copy_from_slice(&value[range.clone()]);
                }
                if value[range.clone()] > max[range.clone()] {
                    max[range.clone()].copy_from_slice(&value[range]);
                }
            }
        }
        (min, max)
    }

    /// Doc ids of `[from, to)` in slot order.
    pub fn doc_ids(&self, from: usize, to: usize) -> Vec<DocId> {
        (from..to).map(|i| self.doc_id(i)).collect()
    }
}

impl PointWriter for HeapPointWriter {
    fn append(&mut self, packed_value: &[u8], doc_id: DocId) -> Result<()> {
        if self.closed {
            bail!(IllegalState("point writer is already closed".into()));
        }
        if packed_value.len() != self.config.packed_bytes_length() {
            bail!(IllegalArgument(format!(
                "packed_value should be length={}, got {}",
                self.config.packed_bytes_length(),
                packed_value.len()
            )));
        }
        if self.next_write >= self.size {
            bail!(IllegalState(format!(
                "heap point writer is full: size={}",
                self.size
            )));
        }

        self.block.extend_from_slice(packed_value);
        let mut doc_bytes = [0u8; 4];
        BigEndian::write_i32(&mut doc_bytes, doc_id);
        self.block.extend_from_slice(&doc_bytes);
        self.next_write += 1;
        Ok(())
    }

    fn point_reader(&self, start: usize, length: usize) -> Result<PointReaderEnum<'_>> {
        if start + length > self.next_write {
            bail!(IllegalArgument(format!(
                "start={} length={} is beyond count={}",
                start, length, self.next_write
            )));
        }
        Ok(PointReaderEnum::Heap(HeapPointReader::new(
            self,
            start,
            start + length,
        )))
    }

    fn count(&self) -> i64 {
        self.next_write as i64
    }

    fn destroy(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Orders heap slots by one dimension, then by the whole slot.
struct HeapPointSelector<'a> {
    writer: &'a mut HeapPointWriter,
    dim_offset: usize,
    pivot: Vec<u8>,
}

impl<'a> HeapPointSelector<'a> {
    fn new(writer: &'a mut HeapPointWriter, dim: usize) -> HeapPointSelector<'a> {
        let dim_offset = dim * writer.config.bytes_per_dim();
        let pivot = vec![0u8; writer.config.bytes_per_doc()];
        HeapPointSelector {
            writer,
            dim_offset,
            pivot,
        }
    }
}

impl<'a> Selector for HeapPointSelector<'a> {
    fn swap(&mut self, i: usize, j: usize) {
        self.writer.swap(i, j);
    }

    fn set_pivot(&mut self, i: usize) {
        self.pivot.copy_from_slice(self.writer.slot(i));
    }

    fn compare_pivot(&mut self, j: usize) -> Ordering {
        let range = self.dim_offset..self.dim_offset + self.writer.config.bytes_per_dim();
        let other = self.writer.slot(j);
        self.pivot[range.clone()]
            .cmp(&other[range])
            .then_with(|| self.pivot[..].cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_with(config: BKDConfig, points: &[(&[u8], DocId)]) -> HeapPointWriter {
        let mut writer = HeapPointWriter::new(config, points.len());
        for (value, doc) in points {
            writer.append(value, *doc).unwrap();
        }
        writer
    }

    #[test]
    fn test_append_and_read_back() {
        let config = BKDConfig::new(2, 2, 2, 4).unwrap();
        let mut writer = writer_with(config, &[(&[0, 1, 0, 2], 7), (&[0, 3, 0, 4], 300)]);
        assert_eq!(writer.count(), 2);
        assert_eq!(writer.packed_value(1), &[0, 3, 0, 4]);
        assert_eq!(writer.doc_id(1), 300);
        assert_eq!(writer.dim_value(1, 1), &[0, 4]);

        assert!(writer.append(&[0, 1, 2], 1).is_err());
        // full
        assert!(writer.append(&[0, 1, 2, 3], 1).is_err());

        let mut reader = writer.point_reader(1, 1).unwrap();
        assert!(reader.next().unwrap());
        assert_eq!(reader.packed_value(), &[0, 3, 0, 4]);
        assert_eq!(reader.doc_id(), 300);
        assert!(!reader.next().unwrap());
        assert!(writer.point_reader(1, 2).is_err());

        writer.close().unwrap();
        let mut writer = writer;
        assert!(writer.append(&[0, 0, 0, 0], 1).is_err());
    }

    #[test]
    fn test_swap() {
        let config = BKDConfig::new(1, 1, 1, 4).unwrap();
        let mut writer = writer_with(config, &[(&[1], 10), (&[2], 20), (&[3], 30)]);
        writer.swap(2, 0);
        assert_eq!(writer.packed_value(0), &[3]);
        assert_eq!(writer.doc_id(0), 30);
        assert_eq!(writer.packed_value(2), &[1]);
        assert_eq!(writer.doc_id(2), 10);
    }

    #[test]
    fn test_prefix_and_cardinality() {
        let config = BKDConfig::new(2, 1, 2, 8).unwrap();
        let mut writer = writer_with(
            config,
            &[
                (&[1, 5, 9, 1], 0),
                (&[1, 5, 9, 2], 1),
                (&[1, 7, 9, 2], 2),
                (&[1, 5, 9, 1], 3),
            ],
        );
        let prefix = writer.compute_common_prefix_lengths(0, 4);
        assert_eq!(prefix, vec![1, 1]);
        // dim 1 has two distinct suffix bytes, dim 0 also two: first wins
        assert_eq!(writer.sorted_dim(0, 4, &prefix), 0);

        writer.sort(0, 4, 0);
        assert_eq!(writer.doc_ids(0, 4), vec![0, 3, 1, 2]);
        assert_eq!(writer.compute_cardinality(0, 4, &prefix), 3);
        assert_eq!(writer.compute_bounds(0, 4), (vec![1, 5], vec![1, 7]));
    }

    #[test]
    fn test_select_by_dim() {
        let config = BKDConfig::new(2, 2, 1, 8).unwrap();
        let points: Vec<(Vec<u8>, DocId)> = (0..40)
            .map(|i| (vec![(i * 7 % 40) as u8, (i % 3) as u8], i))
            .collect();
        let refs: Vec<(&[u8], DocId)> = points.iter().map(|(v, d)| (&v[..], *d)).collect();
        let mut writer = writer_with(config, &refs);

        writer.select(0, 40, 20, 0);
        assert_eq!(writer.dim_value(20, 0), &[20]);
        for i in 0..20 {
            assert!(writer.dim_value(i, 0)[0] < 20);
        }
        for i in 21..40 {
            assert!(writer.dim_value(i, 0)[0] > 20);
        }

        writer.select(0, 40, 13, 1);
        let mut expected: Vec<(u8, Vec<u8>)> = (0..40)
            .map(|i| (writer.dim_value(i, 1)[0], writer.slot(i).to_vec()))
            .collect();
        expected.sort();
        assert_eq!(writer.slot(13), &expected[13].1[..]);
    }
}
