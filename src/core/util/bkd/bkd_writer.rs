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

use crate::core::codec::codec_util::{write_footer, write_header};
use crate::core::store::directory::{Directory, TrackingDirectoryWrapper};
use crate::core::store::io::{DataOutput, IndexOutput, RAMOutputStream};
use crate::core::util::bit_set::FixedBitSet;
use crate::core::util::bkd::{
    BKDConfig, DocIdsWriter, HeapPointWriter, OfflinePointWriter, PointReader, PointWriter,
    PointWriterEnum, BKD_CODEC_NAME, BKD_VERSION_CURRENT, SPLITS_BEFORE_EXACT_BOUNDS,
};
use crate::core::util::io::delete_file_ignoring_error;
use crate::core::util::math;
use crate::core::util::string_util::bytes_subtract;
use crate::core::util::DocId;

use crate::error::ErrorKind::{IllegalArgument, IllegalState};
use crate::error::Result;

use byteorder::{BigEndian, ByteOrder};
use std::cmp::Ordering;
use std::sync::Arc;

type TempDir<D> = TrackingDirectoryWrapper<D, Arc<D>>;

/// Mutable tables filled while the tree is built.
struct BuildState {
    leaf_node_offset: usize,
    leaf_block_fps: Vec<i64>,
    // per node: split dim byte followed by the split value
    split_packed_values: Vec<u8>,
    parent_splits: Vec<usize>,
    scratch_out: RAMOutputStream,
}

/// Recursively builds a block KD-tree to assign all incoming points in N-dim space to smaller
/// and smaller N-dim rectangles (cells) until the number of points in a given
/// rectangle is <= `max_points_in_leaf_node`.  The tree is
/// fully balanced, which means the leaf nodes will have between 50% and 100% of
/// the requested `max_points_in_leaf_node`.  Values that fall exactly
/// on a cell boundary may be in either cell.
///
/// Points are buffered in heap until `max_mb_sort_in_heap` is used up, then
/// spilled to a temp file. Ranges that still exceed the heap budget are
/// partitioned offline with histogram passes over the partition key.
///
/// See `BKDReader` for the on-disk format.
pub struct BKDWriter<D: Directory> {
    config: BKDConfig,
    temp_dir: Arc<TempDir<D>>,
    temp_file_name_prefix: String,
    max_points_sort_in_heap: usize,

    docs_seen: FixedBitSet,

    heap_point_writer: Option<HeapPointWriter>,
    offline_point_writer: Option<OfflinePointWriter<TempDir<D>>>,

    point_count: i64,
    total_point_count: i64,
    max_doc: DocId,
    finished: bool,

    // over the index dimensions
    min_packed_value: Vec<u8>,
    max_packed_value: Vec<u8>,
}

impl<D: Directory> BKDWriter<D> {
    pub fn new(
        max_doc: DocId,
        temp_dir: Arc<D>,
        temp_file_name_prefix: &str,
        config: BKDConfig,
        max_mb_sort_in_heap: f64,
        total_point_count: i64,
    ) -> Result<BKDWriter<D>> {
        Self::verify_params(max_doc, max_mb_sort_in_heap, total_point_count)?;

        let max_points_sort_in_heap =
            (max_mb_sort_in_heap * 1024.0 * 1024.0 / config.bytes_per_doc() as f64) as usize;

        Ok(BKDWriter {
            config,
            temp_dir: Arc::new(TrackingDirectoryWrapper::new(temp_dir)),
            temp_file_name_prefix: temp_file_name_prefix.to_string(),
            max_points_sort_in_heap,
            docs_seen: FixedBitSet::new(max_doc as usize),
            heap_point_writer: Some(HeapPointWriter::new(config, max_points_sort_in_heap)),
            offline_point_writer: None,
            point_count: 0,
            total_point_count,
            max_doc,
            finished: false,
            min_packed_value: vec![0u8; config.packed_index_bytes_length()],
            max_packed_value: vec![0u8; config.packed_index_bytes_length()],
        })
    }

    pub fn verify_params(
        max_doc: DocId,
        max_mb_sort_in_heap: f64,
        total_point_count: i64,
    ) -> Result<()> {
        if max_doc < 0 {
            bail!(IllegalArgument(format!(
                "max_doc must be >= 0, got {}",
                max_doc
            )));
        }
        if !max_mb_sort_in_heap.is_finite() || max_mb_sort_in_heap < 0.0 {
            bail!(IllegalArgument(format!(
                "max_mb_sort_in_heap must be >= 0.0, got {}",
                max_mb_sort_in_heap
            )));
        }
        if total_point_count < 0 {
            bail!(IllegalArgument(format!(
                "total_point_count must be >= 0, got {}",
                total_point_count
            )));
        }
        Ok(())
    }

    pub fn config(&self) -> &BKDConfig {
        &self.config
    }

    /// Number of points added so far.
    pub fn point_count(&self) -> i64 {
        self.point_count
    }

    pub fn add(&mut self, packed_value: &[u8], doc_id: DocId) -> Result<()> {
        if self.finished {
            bail!(IllegalState("already finished".into()));
        }
        if packed_value.len() != self.config.packed_bytes_length() {
            bail!(IllegalArgument(format!(
                "packed_value should be length={}, got {}",
                self.config.packed_bytes_length(),
                packed_value.len()
            )));
        }
        if doc_id < 0 || doc_id >= self.max_doc {
            bail!(IllegalArgument(format!(
                "doc_id must be 0 .. {}, got {}",
                self.max_doc, doc_id
            )));
        }
        if self.point_count >= self.total_point_count {
            bail!(IllegalState(format!(
                "total_point_count={} was passed when we were created, but we just hit {} values",
                self.total_point_count,
                self.point_count + 1
            )));
        }

        let heap_full = match self.heap_point_writer {
            Some(ref heap) => heap.count() as usize >= self.max_points_sort_in_heap,
            None => false,
        };
        if heap_full {
            self.spill_to_offline()?;
        }

        if let Some(ref mut offline) = self.offline_point_writer {
            offline.append(packed_value, doc_id)?;
        } else if let Some(ref mut heap) = self.heap_point_writer {
            heap.append(packed_value, doc_id)?;
        } else {
            bail!(IllegalState("no point writer available".into()));
        }

        let bytes_per_dim = self.config.bytes_per_dim();
        if self.point_count == 0 {
            let len = self.min_packed_value.len();
            self.min_packed_value.copy_from_slice(&packed_value[..len]);
            self.max_packed_value.copy_from_slice(&packed_value[..len]);
        } else {
            for dim in 0..self.config.num_index_dims() {
                let offset = dim * bytes_per_dim;
                let end_offset = offset + bytes_per_dim;
                if packed_value[offset..end_offset] < self.min_packed_value[offset..end_offset] {
                    self.min_packed_value[offset..end_offset]
                        .copy_from_slice(&packed_value[offset..end_offset]);
                }
                if packed_value[offset..end_offset] > self.max_packed_value[offset..end_offset] {
                    self.max_packed_value[offset..end_offset]
                        .copy_from_slice(&packed_value[offset..end_offset]);
                }
            }
        }

        self.point_count += 1;
        self.docs_seen.set(doc_id as usize);

        Ok(())
    }

    /// Writes the BKD tree to the provided `IndexOutput` and returns the file
    /// offset where the index starts, or `None` when no points were added.
    pub fn finish<O: IndexOutput>(&mut self, out: &mut O) -> Result<Option<i64>> {
        if self.finished {
            bail!(IllegalState("already finished".into()));
        }
        self.finished = true;

        let result = self.do_finish(out);
        self.destroy_temp_files();
        result
    }

    fn do_finish<O: IndexOutput>(&mut self, out: &mut O) -> Result<Option<i64>> {
        if self.point_count == 0 {
            return Ok(None);
        }

        let max_points_in_leaf = self.config.max_points_in_leaf_node() as i64;
        let mut count_per_leaf = self.point_count;
        let mut inner_node_count = 1i64;
        while count_per_leaf > max_points_in_leaf {
            count_per_leaf = (count_per_leaf + 1) / 2;
            inner_node_count *= 2;
        }
        let num_leaves = math::long_to_int_exact(inner_node_count)? as usize;
        self.check_max_leaf_node_count(num_leaves)?;

        debug!(
            "bkd finish: {} points in {} leaves, config={:?}",
            self.point_count, num_leaves, self.config
        );

        let mut state = BuildState {
            leaf_node_offset: num_leaves,
            leaf_block_fps: vec![0i64; num_leaves],
            split_packed_values: vec![0u8; num_leaves * (1 + self.config.bytes_per_dim())],
            parent_splits: vec![0usize; self.config.num_index_dims()],
            scratch_out: RAMOutputStream::new(false),
        };

        let source = self.take_source()?;
        let min_packed_value = self.min_packed_value.clone();
        let max_packed_value = self.max_packed_value.clone();
        self.build(
            out,
            source,
            1,
            &min_packed_value,
            &max_packed_value,
            &mut state,
        )?;

        let index_fp = out.file_pointer();
        debug!("bkd index written at fp={}", index_fp);
        self.write_index(out, &state)?;
        write_footer(out)?;
        Ok(Some(index_fp))
    }

    /// Hands over the buffered points, loading them into heap when they fit.
    fn take_source(&mut self) -> Result<PointWriterEnum<TempDir<D>>> {
        if let Some(mut offline) = self.offline_point_writer.take() {
            offline.close()?;
            let count = offline.count() as usize;
            if count <= self.heap_limit() {
                let heap = self.load_into_heap(&offline, count)?;
                offline.destroy()?;
                Ok(PointWriterEnum::Heap(heap))
            } else {
                Ok(PointWriterEnum::Offline(offline))
            }
        } else {
            match self.heap_point_writer.take() {
                Some(mut heap) => {
                    heap.close()?;
                    Ok(PointWriterEnum::Heap(heap))
                }
                None => bail!(IllegalState("no point writer available".into())),
            }
        }
    }

    #[inline]
    fn heap_limit(&self) -> usize {
        self.max_points_sort_in_heap
            .max(self.config.max_points_in_leaf_node())
    }

    fn spill_to_offline(&mut self) -> Result<()> {
        debug!(
            "spill {} points of '{}' to offline",
            self.point_count, self.temp_file_name_prefix
        );
        let mut offline = OfflinePointWriter::new(
            Arc::clone(&self.temp_dir),
            &self.temp_file_name_prefix,
            self.config,
            "spill",
            self.total_point_count,
        )?;
        if let Some(heap) = self.heap_point_writer.take() {
            let mut reader = heap.point_reader(0, heap.count() as usize)?;
            while reader.next()? {
                offline.append(reader.packed_value(), reader.doc_id())?;
            }
        }
        self.offline_point_writer = Some(offline);
        Ok(())
    }

    fn load_into_heap(&self, source: &impl PointWriter, count: usize) -> Result<HeapPointWriter> {
        let mut heap = HeapPointWriter::new(self.config, count);
        let mut reader = source.point_reader(0, count)?;
        while reader.next()? {
            heap.append(reader.packed_value(), reader.doc_id())?;
        }
        heap.close()?;
        Ok(heap)
    }

    fn point_writer(&self, count: usize, desc: &str) -> Result<PointWriterEnum<TempDir<D>>> {
        if count <= self.heap_limit() {
            Ok(PointWriterEnum::Heap(HeapPointWriter::new(self.config, count)))
        } else {
            Ok(PointWriterEnum::Offline(OfflinePointWriter::new(
                Arc::clone(&self.temp_dir),
                &self.temp_file_name_prefix,
                self.config,
                desc,
                count as i64,
            )?))
        }
    }

    fn check_max_leaf_node_count(&self, num_leaves: usize) -> Result<()> {
        if (1 + self.config.bytes_per_dim() as i64) * num_leaves as i64 > i64::from(i32::max_value()) {
            bail!(IllegalArgument(format!(
                "too many nodes; increase max_points_in_leaf_node (currently {}) and reindex",
                self.config.max_points_in_leaf_node()
            )));
        }
        Ok(())
    }

    fn build<O: IndexOutput>(
        &self,
        out: &mut O,
        source: PointWriterEnum<TempDir<D>>,
        node_id: usize,
        min_packed_value: &[u8],
        max_packed_value: &[u8],
        state: &mut BuildState,
    ) -> Result<()> {
        match source {
            PointWriterEnum::Heap(mut heap) => {
                let count = heap.count() as usize;
                self.build_heap(
                    out,
                    &mut heap,
                    0,
                    count,
                    node_id,
                    min_packed_value,
                    max_packed_value,
                    state,
                )
            }
            PointWriterEnum::Offline(offline) => self.build_offline(
                out,
                offline,
                node_id,
                min_packed_value,
                max_packed_value,
                state,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_heap<O: IndexOutput>(
        &self,
        out: &mut O,
        heap: &mut HeapPointWriter,
        from: usize,
        to: usize,
        node_id: usize,
        min_packed_value: &[u8],
        max_packed_value: &[u8],
        state: &mut BuildState,
    ) -> Result<()> {
        if node_id >= state.leaf_node_offset {
            return self.write_leaf_block(out, heap, from, to, node_id, state);
        }

        let (min_packed_value, max_packed_value) = if self.need_exact_bounds(node_id, state) {
            heap.compute_bounds(from, to)
        } else {
            (min_packed_value.to_vec(), max_packed_value.to_vec())
        };
        let split_dim =
            self.split_dim(&min_packed_value, &max_packed_value, &state.parent_splits)?;

        let count = to - from;
        let mid = from + (count - count / 2);
        let split_value = if mid < to {
            heap.select(from, to, mid, split_dim);
            heap.dim_value(mid, split_dim).to_vec()
        } else {
            // a single point, the right side stays empty
            heap.dim_value(from, split_dim).to_vec()
        };

        self.recurse(
            node_id,
            split_dim,
            &split_value,
            &min_packed_value,
            &max_packed_value,
            state,
            |state, child, min, max| {
                if child == 2 * node_id {
                    self.build_heap(out, heap, from, mid, child, min, max, state)
                } else {
                    self.build_heap(out, heap, mid, to, child, min, max, state)
                }
            },
        )
    }

    fn build_offline<O: IndexOutput>(
        &self,
        out: &mut O,
        mut source: OfflinePointWriter<TempDir<D>>,
        node_id: usize,
        min_packed_value: &[u8],
        max_packed_value: &[u8],
        state: &mut BuildState,
    ) -> Result<()> {
        let count = source.count() as usize;
        debug_assert!(node_id < state.leaf_node_offset);
        debug_assert!(count > self.heap_limit());

        let (min_packed_value, max_packed_value) = if self.need_exact_bounds(node_id, state) {
            self.compute_bounds_offline(&source, count)?
        } else {
            (min_packed_value.to_vec(), max_packed_value.to_vec())
        };
        let split_dim =
            self.split_dim(&min_packed_value, &max_packed_value, &state.parent_splits)?;

        let bytes_per_dim = self.config.bytes_per_dim();
        let key_len = bytes_per_dim + self.config.bytes_per_doc();
        let heap_limit = self.heap_limit();
        let left_count = count - count / 2;
        // rank of the first point of the right half
        let k = left_count;

        // narrow down the key prefix of the bucket holding rank k
        let mut prefix: Vec<u8> = Vec::with_capacity(key_len);
        let mut below = 0usize;
        let mut bucket_count = count;
        let mut key = Vec::with_capacity(key_len);
        while bucket_count > heap_limit && prefix.len() < key_len {
            let mut histogram = [0usize; 256];
            {
                let mut reader = source.point_reader(0, count)?;
                while reader.next()? {
                    self.select_key(reader.packed_value(), reader.doc_id(), split_dim, &mut key);
                    if key.starts_with(&prefix) {
                        histogram[key[prefix.len()] as usize] += 1;
                    }
                }
            }

            let target = k - below;
            let mut cumulative = 0usize;
            for (b, &n) in histogram.iter().enumerate() {
                if cumulative + n > target {
                    prefix.push(b as u8);
                    below += cumulative;
                    bucket_count = n;
                    break;
                }
                cumulative += n;
            }
        }

        let k_in_bucket = k - below;
        let bucket = if bucket_count <= heap_limit {
            let mut heap = HeapPointWriter::new(self.config, bucket_count);
            {
                let mut reader = source.point_reader(0, count)?;
                while reader.next()? {
                    self.select_key(reader.packed_value(), reader.doc_id(), split_dim, &mut key);
                    if key.starts_with(&prefix) {
                        heap.append(reader.packed_value(), reader.doc_id())?;
                    }
                }
            }
            heap.select(0, bucket_count, k_in_bucket, split_dim);
            Some(heap)
        } else {
            None
        };
        let split_value = match bucket {
            Some(ref heap) => heap.dim_value(k_in_bucket, split_dim).to_vec(),
            // every key in the bucket is identical
            None => prefix[..bytes_per_dim].to_vec(),
        };

        let mut left = self.point_writer(left_count, "left")?;
        let mut right = self.point_writer(count - left_count, "right")?;
        {
            let mut reader = source.point_reader(0, count)?;
            let mut bucket_seen = 0usize;
            while reader.next()? {
                self.select_key(reader.packed_value(), reader.doc_id(), split_dim, &mut key);
                match key[..prefix.len()].cmp(&prefix[..]) {
                    Ordering::Less => left.append(reader.packed_value(), reader.doc_id())?,
                    Ordering::Greater => right.append(reader.packed_value(), reader.doc_id())?,
                    Ordering::Equal => {
                        if bucket.is_none() {
                            if bucket_seen < k_in_bucket {
                                left.append(reader.packed_value(), reader.doc_id())?;
                            } else {
                                right.append(reader.packed_value(), reader.doc_id())?;
                            }
                            bucket_seen += 1;
                        }
                    }
                }
            }
        }
        if let Some(ref heap) = bucket {
            for i in 0..bucket_count {
                if i < k_in_bucket {
                    left.append(heap.packed_value(i), heap.doc_id(i))?;
                } else {
                    right.append(heap.packed_value(i), heap.doc_id(i))?;
                }
            }
        }
        left.close()?;
        right.close()?;
        debug_assert_eq!(left.count() as usize, left_count);
        source.destroy()?;

        let mut children = vec![right, left];
        self.recurse(
            node_id,
            split_dim,
            &split_value,
            &min_packed_value,
            &max_packed_value,
            state,
            |state, child, min, max| match children.pop() {
                Some(writer) => self.build(out, writer, child, min, max, state),
                None => bail!(IllegalState("missing child point writer".into())),
            },
        )
    }

    /// Records the split of `node_id` and builds both children with their
    /// narrowed cell bounds, left first.
    #[allow(clippy::too_many_arguments)]
    fn recurse<F>(
        &self,
        node_id: usize,
        split_dim: usize,
        split_value: &[u8],
        min_packed_value: &[u8],
        max_packed_value: &[u8],
        state: &mut BuildState,
        mut build_child: F,
    ) -> Result<()>
    where
        F: FnMut(&mut BuildState, usize, &[u8], &[u8]) -> Result<()>,
    {
        let bytes_per_dim = self.config.bytes_per_dim();
        let address = node_id * (1 + bytes_per_dim);
        state.split_packed_values[address] = split_dim as u8;
        state.split_packed_values[address + 1..address + 1 + bytes_per_dim]
            .copy_from_slice(split_value);

        let range = split_dim * bytes_per_dim..(split_dim + 1) * bytes_per_dim;
        let mut max_split_packed_value = max_packed_value.to_vec();
        max_split_packed_value[range.clone()].copy_from_slice(split_value);
        let mut min_split_packed_value = min_packed_value.to_vec();
        min_split_packed_value[range].copy_from_slice(split_value);

        state.parent_splits[split_dim] += 1;
        build_child(
            state,
            2 * node_id,
            min_packed_value,
            &max_split_packed_value,
        )?;
        build_child(
            state,
            2 * node_id + 1,
            &min_split_packed_value,
            max_packed_value,
        )?;
        state.parent_splits[split_dim] -= 1;
        Ok(())
    }

    fn need_exact_bounds(&self, node_id: usize, state: &BuildState) -> bool {
        self.config.num_index_dims() > 2
            && node_id > 1
            && state.parent_splits.iter().sum::<usize>() % SPLITS_BEFORE_EXACT_BOUNDS == 0
    }

    /// Picks the dimension to split the cell on.
    fn split_dim(
        &self,
        min_packed_value: &[u8],
        max_packed_value: &[u8],
        parent_splits: &[usize],
    ) -> Result<usize> {
        let bytes_per_dim = self.config.bytes_per_dim();
        let num_index_dims = self.config.num_index_dims();

        // first look at whether there is a dimension that has split less than 2x less than
        // the dim that has most splits, and return it if there is such a dimension and it
        // does not only have equals values
        if num_index_dims > 2 {
            let max_num_splits = parent_splits.iter().cloned().max().unwrap_or(0);
            for dim in 0..num_index_dims {
                let range = dim * bytes_per_dim..(dim + 1) * bytes_per_dim;
                if parent_splits[dim] < max_num_splits / 2
                    && min_packed_value[range.clone()] != max_packed_value[range]
                {
                    return Ok(dim);
                }
            }
        }

        let mut split_dim = 0;
        let mut max_diff = vec![0u8; bytes_per_dim];
        let mut scratch_diff = vec![0u8; bytes_per_dim];
        for dim in 0..num_index_dims {
            bytes_subtract(
                bytes_per_dim,
                dim,
                max_packed_value,
                min_packed_value,
                &mut scratch_diff,
            )?;
            if dim == 0 || scratch_diff > max_diff {
                max_diff.copy_from_slice(&scratch_diff);
                split_dim = dim;
            }
        }
        Ok(split_dim)
    }

    /// Partition key of a point: the bytes of `dim`, then the packed value,
    /// then the big-endian doc id.
    fn select_key(&self, packed_value: &[u8], doc_id: DocId, dim: usize, key: &mut Vec<u8>) {
        let bytes_per_dim = self.config.bytes_per_dim();
        key.clear();
        key.extend_from_slice(&packed_value[dim * bytes_per_dim..(dim + 1) * bytes_per_dim]);
        key.extend_from_slice(packed_value);
        let mut doc_bytes = [0u8; 4];
        BigEndian::write_i32(&mut doc_bytes, doc_id);
        key.extend_from_slice(&doc_bytes);
    }

    fn compute_bounds_offline(
        &self,
        source: &impl PointWriter,
        count: usize,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let bytes_per_dim = self.config.bytes_per_dim();
        let index_bytes = self.config.packed_index_bytes_length();
        let mut min = vec![0xFFu8; index_bytes];
        let mut max = vec![0u8; index_bytes];
        let mut reader = source.point_reader(0, count)?;
        while reader.next()? {
            let value = reader.packed_value();
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
        Ok((min, max))
    }

    fn write_leaf_block<O: IndexOutput>(
        &self,
        out: &mut O,
        heap: &mut HeapPointWriter,
        from: usize,
        to: usize,
        node_id: usize,
        state: &mut BuildState,
    ) -> Result<()> {
        let count = to - from;
        state.leaf_block_fps[node_id - state.leaf_node_offset] = out.file_pointer();
        if count == 0 {
            // only possible with one point per leaf and an odd split
            return out.write_vint(0);
        }

        let mut common_prefix_lengths = heap.compute_common_prefix_lengths(from, to);
        let sorted_dim = heap.sorted_dim(from, to, &common_prefix_lengths);
        heap.sort(from, to, sorted_dim);
        let leaf_cardinality = heap.compute_cardinality(from, to, &common_prefix_lengths);

        let scratch_out = &mut state.scratch_out;
        let doc_ids = heap.doc_ids(from, to);
        self.write_leaf_block_docs(scratch_out, &doc_ids)?;
        self.write_common_prefixes(scratch_out, &common_prefix_lengths, heap.packed_value(from))?;
        self.write_leaf_block_packed_values(
            scratch_out,
            heap,
            from,
            to,
            &mut common_prefix_lengths,
            sorted_dim,
            leaf_cardinality,
        )?;
        scratch_out.write_to(out)?;
        scratch_out.reset();
        Ok(())
    }

    fn write_leaf_block_docs(&self, out: &mut impl DataOutput, doc_ids: &[DocId]) -> Result<()> {
        out.write_vint(doc_ids.len() as i32)?;
        DocIdsWriter::write_doc_ids(out, doc_ids, 0, doc_ids.len())
    }

    fn write_common_prefixes(
        &self,
        out: &mut impl DataOutput,
        common_prefix_lengths: &[usize],
        packed_value: &[u8],
    ) -> Result<()> {
        let bytes_per_dim = self.config.bytes_per_dim();
        for (dim, &prefix) in common_prefix_lengths.iter().enumerate() {
            out.write_vint(prefix as i32)?;
            out.write_bytes(packed_value, dim * bytes_per_dim, prefix)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_leaf_block_packed_values(
        &self,
        out: &mut impl DataOutput,
        heap: &HeapPointWriter,
        from: usize,
        to: usize,
        common_prefix_lengths: &mut [usize],
        sorted_dim: usize,
        leaf_cardinality: usize,
    ) -> Result<()> {
        let packed_bytes_length = self.config.packed_bytes_length();
        let prefix_len_sum: usize = common_prefix_lengths.iter().sum();
        if prefix_len_sum == packed_bytes_length {
            // all values in this block are equal
            return out.write_byte(0xFF);
        }

        let count = to - from;
        let compressed_byte_offset =
            sorted_dim * self.config.bytes_per_dim() + common_prefix_lengths[sorted_dim];
        let (high_cardinality_cost, low_cardinality_cost) = if count == leaf_cardinality {
            (0, 1)
        } else {
            let mut num_run_lens = 0;
            let mut i = from;
            while i < to {
                i += Self::run_len(heap, i, to.min(i + 0xFF), compressed_byte_offset);
                num_run_lens += 1;
            }
            // estimate bytes needed for the high cardinality encoding
            let high = count * (packed_bytes_length - prefix_len_sum - 1) + 2 * num_run_lens;
            // estimate bytes needed for the low cardinality encoding
            let low = leaf_cardinality * (packed_bytes_length - prefix_len_sum + 1);
            (high, low)
        };

        if low_cardinality_cost <= high_cardinality_cost {
            out.write_byte(0xFE)?;
            self.write_low_cardinality_block(out, heap, from, to, common_prefix_lengths)
        } else {
            out.write_byte(sorted_dim as u8)?;
            self.write_high_cardinality_block(
                out,
                heap,
                from,
                to,
                common_prefix_lengths,
                compressed_byte_offset,
                sorted_dim,
            )
        }
    }

    fn write_low_cardinality_block(
        &self,
        out: &mut impl DataOutput,
        heap: &HeapPointWriter,
        from: usize,
        to: usize,
        common_prefix_lengths: &[usize],
    ) -> Result<()> {
        if self.config.num_index_dims() != 1 {
            self.write_actual_bounds(out, heap, from, to, common_prefix_lengths)?;
        }
        let bytes_per_dim = self.config.bytes_per_dim();
        let differs = |a: &[u8], b: &[u8]| {
            common_prefix_lengths
                .iter()
                .enumerate()
                .any(|(dim, &prefix)| {
                    let range = dim * bytes_per_dim + prefix..(dim + 1) * bytes_per_dim;
                    a[range.clone()] != b[range]
                })
        };

        let mut run_start = from;
        for i in from + 1..=to {
            if i == to || differs(heap.packed_value(run_start), heap.packed_value(i)) {
                out.write_vint((i - run_start) as i32)?;
                self.write_suffixes(out, heap.packed_value(run_start), common_prefix_lengths)?;
                run_start = i;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_high_cardinality_block(
        &self,
        out: &mut impl DataOutput,
        heap: &HeapPointWriter,
        from: usize,
        to: usize,
        common_prefix_lengths: &mut [usize],
        compressed_byte_offset: usize,
        sorted_dim: usize,
    ) -> Result<()> {
        if self.config.num_index_dims() != 1 {
            self.write_actual_bounds(out, heap, from, to, common_prefix_lengths)?;
        }
        common_prefix_lengths[sorted_dim] += 1;

        let mut i = from;
        while i < to {
            // do run-length compression on the byte at compressed_byte_offset
            let run_len = Self::run_len(heap, i, to.min(i + 0xFF), compressed_byte_offset);
            debug_assert!(run_len <= 0xFF);
            out.write_byte(heap.packed_value(i)[compressed_byte_offset])?;
            out.write_byte(run_len as u8)?;
            for j in i..i + run_len {
                self.write_suffixes(out, heap.packed_value(j), common_prefix_lengths)?;
            }
            i += run_len;
        }
        Ok(())
    }

    /// Per index dimension with a non-empty suffix, the min then max suffix of the leaf.
    fn write_actual_bounds(
        &self,
        out: &mut impl DataOutput,
        heap: &HeapPointWriter,
        from: usize,
        to: usize,
        common_prefix_lengths: &[usize],
    ) -> Result<()> {
        let bytes_per_dim = self.config.bytes_per_dim();
        for dim in 0..self.config.num_index_dims() {
            let prefix = common_prefix_lengths[dim];
            if prefix < bytes_per_dim {
                let mut min = heap.dim_value(from, dim);
                let mut max = min;
                for i in from + 1..to {
                    let value = heap.dim_value(i, dim);
                    if value < min {
                        min = value;
                    }
                    if value > max {
                        max = value;
                    }
                }
                out.write_bytes(min, prefix, bytes_per_dim - prefix)?;
                out.write_bytes(max, prefix, bytes_per_dim - prefix)?;
            }
        }
        Ok(())
    }

    fn write_suffixes(
        &self,
        out: &mut impl DataOutput,
        packed_value: &[u8],
        common_prefix_lengths: &[usize],
    ) -> Result<()> {
        let bytes_per_dim = self.config.bytes_per_dim();
        for (dim, &prefix) in common_prefix_lengths.iter().enumerate() {
            out.write_bytes(packed_value, dim * bytes_per_dim + prefix, bytes_per_dim - prefix)?;
        }
        Ok(())
    }

    fn run_len(heap: &HeapPointWriter, start: usize, end: usize, byte_offset: usize) -> usize {
        let b = heap.packed_value(start)[byte_offset];
        for i in start + 1..end {
            let b2 = heap.packed_value(i)[byte_offset];
            debug_assert!(b2 >= b);
            if b != b2 {
                return i - start;
            }
        }
        end - start
    }

    fn write_index<O: IndexOutput>(&self, out: &mut O, state: &BuildState) -> Result<()> {
        write_header(out, BKD_CODEC_NAME, BKD_VERSION_CURRENT)?;

        out.write_vint(self.config.num_dims() as i32)?;
        out.write_vint(self.config.num_index_dims() as i32)?;
        out.write_vint(self.config.bytes_per_dim() as i32)?;
        out.write_vint(self.config.max_points_in_leaf_node() as i32)?;

        let num_leaves = state.leaf_node_offset;
        out.write_vint(num_leaves as i32)?;
        let mut last_fp = 0;
        for &fp in &state.leaf_block_fps {
            out.write_vlong(fp - last_fp)?;
            last_fp = fp;
        }

        let bytes_per_dim = self.config.bytes_per_dim();
        out.write_vint(num_leaves as i32 - 1)?;
        for node_id in 1..num_leaves {
            let address = node_id * (1 + bytes_per_dim);
            if self.config.num_index_dims() > 1 {
                out.write_byte(state.split_packed_values[address])?;
            }
            out.write_bytes(&state.split_packed_values, address + 1, bytes_per_dim)?;
        }

        out.write_bytes(&self.min_packed_value, 0, self.min_packed_value.len())?;
        out.write_bytes(&self.max_packed_value, 0, self.max_packed_value.len())?;

        out.write_vlong(self.point_count)?;
        out.write_vint(self.docs_seen.cardinality() as i32)
    }

    fn destroy_temp_files(&mut self) {
        self.heap_point_writer = None;
        self.offline_point_writer = None;
        for name in self.temp_dir.create_files() {
            delete_file_ignoring_error(self.temp_dir.as_ref(), &name);
        }
    }
}

impl<D: Directory> Drop for BKDWriter<D> {
    fn drop(&mut self) {
        // only leaves files behind when finish was never called
        if !self.finished {
            self.destroy_temp_files();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::directory::FSDirectory;
    use crate::error::{Error, ErrorKind};

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(
        rng: &mut StdRng,
        config: &BKDConfig,
        count: usize,
        cardinality: u32,
    ) -> Vec<(Vec<u8>, DocId)> {
        (0..count)
            .map(|i| {
                let mut value = vec![0u8; config.packed_bytes_length()];
                for dim in 0..config.num_dims() {
                    let v = rng.gen_range(0..cardinality);
                    BigEndian::write_u32(&mut value[dim * 4..dim * 4 + 4], v);
                }
                (value, i as DocId)
            })
            .collect()
    }

    fn build(dir: &Arc<FSDirectory>, config: BKDConfig, mb: f64, points: &[(Vec<u8>, DocId)]) -> Vec<u8> {
        let mut writer = BKDWriter::new(
            points.len() as DocId,
            Arc::clone(dir),
            "field",
            config,
            mb,
            points.len() as i64,
        )
        .unwrap();
        for (value, doc) in points {
            writer.add(value, *doc).unwrap();
        }
        assert_eq!(writer.point_count(), points.len() as i64);
        let mut out = RAMOutputStream::new(true);
        assert!(writer.finish(&mut out).unwrap().is_some());
        out.into_bytes()
    }

    #[test]
    fn test_add_validation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let config = BKDConfig::new(2, 2, 4, 16).unwrap();
        let mut writer = BKDWriter::new(10, dir, "field", config, 1.0, 2).unwrap();

        match writer.add(&[0u8; 7], 1) {
            Err(Error(ErrorKind::IllegalArgument(_), _)) => {}
            other => panic!("expected IllegalArgument, got {:?}", other),
        }
        match writer.add(&[0u8; 8], 10) {
            Err(Error(ErrorKind::IllegalArgument(_), _)) => {}
            other => panic!("expected IllegalArgument, got {:?}", other),
        }
        assert!(writer.add(&[0u8; 8], -1).is_err());

        writer.add(&[0u8; 8], 1).unwrap();
        writer.add(&[1u8; 8], 2).unwrap();
        match writer.add(&[2u8; 8], 3) {
            Err(Error(ErrorKind::IllegalState(_), _)) => {}
            other => panic!("expected IllegalState, got {:?}", other),
        }

        let mut out = RAMOutputStream::new(true);
        assert!(writer.finish(&mut out).unwrap().is_some());
        match writer.finish(&mut out) {
            Err(Error(ErrorKind::IllegalState(_), _)) => {}
            other => panic!("expected IllegalState, got {:?}", other),
        }
        match writer.add(&[0u8; 8], 1) {
            Err(Error(ErrorKind::IllegalState(_), _)) => {}
            other => panic!("expected IllegalState, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_params() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let config = BKDConfig::default();
        assert!(BKDWriter::new(10, Arc::clone(&dir), "f", config, -1.0, 10).is_err());
        assert!(BKDWriter::new(10, Arc::clone(&dir), "f", config, ::std::f64::NAN, 10).is_err());
        assert!(BKDWriter::new(-1, Arc::clone(&dir), "f", config, 1.0, 10).is_err());
        assert!(BKDWriter::new(10, Arc::clone(&dir), "f", config, 1.0, -10).is_err());
        assert!(BKDWriter::new(10, dir, "f", config, 0.0, 10).is_ok());
    }

    #[test]
    fn test_leaf_tables_capacity() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let config = BKDConfig::new(2, 2, 4, 16).unwrap();
        let writer = BKDWriter::new(10, dir, "field", config, 1.0, 10).unwrap();

        // (1 + bytes_per_dim) bytes per split table entry must stay addressable by i32
        let largest = i32::max_value() as usize / 5;
        assert!(writer.check_max_leaf_node_count(largest).is_ok());
        for &num_leaves in &[largest + 1, i32::max_value() as usize] {
            match writer.check_max_leaf_node_count(num_leaves) {
                Err(Error(ErrorKind::IllegalArgument(_), _)) => {}
                other => panic!("expected IllegalArgument, got {:?}", other),
            }
        }

        // leaf counts beyond i32 are rejected before the table check
        match math::long_to_int_exact(1i64 << 31) {
            Err(Error(ErrorKind::IllegalArgument(_), _)) => {}
            other => panic!("expected IllegalArgument, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_writer_returns_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let mut writer = BKDWriter::new(10, dir, "field", BKDConfig::default(), 1.0, 10).unwrap();
        let mut out = RAMOutputStream::new(true);
        assert_eq!(writer.finish(&mut out).unwrap(), None);
        assert_eq!(out.file_pointer(), 0);
    }

    #[test]
    fn test_heap_and_offline_builds_are_identical() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let mut rng = StdRng::seed_from_u64(0x5EED);

        let configs = vec![
            (BKDConfig::new(1, 1, 4, 16).unwrap(), 1 << 20),
            (BKDConfig::new(2, 2, 4, 16).unwrap(), 1000),
            (BKDConfig::new(3, 2, 4, 20).unwrap(), 30),
            (BKDConfig::new(4, 4, 4, 8).unwrap(), 50),
        ];
        for (config, cardinality) in configs {
            let points = random_points(&mut rng, &config, 2000, cardinality);
            let in_heap = build(&dir, config, 16.0, &points);
            let offline = build(&dir, config, 0.0, &points);
            let mixed = build(&dir, config, 0.01, &points);
            assert!(in_heap == offline, "offline build differs for {:?}", config);
            assert!(in_heap == mixed, "mixed build differs for {:?}", config);
        }
        assert!(dir.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_identical_points_offline() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let config = BKDConfig::new(2, 2, 4, 4).unwrap();
        // every partition key is the same, so the bucket never fits in heap
        let points: Vec<(Vec<u8>, DocId)> = (0..100).map(|_| (vec![3u8; 8], 7)).collect();
        let mut writer = BKDWriter::new(10, Arc::clone(&dir), "field", config, 0.0, 100).unwrap();
        for (value, doc) in &points {
            writer.add(value, *doc).unwrap();
        }
        let mut offline = RAMOutputStream::new(true);
        writer.finish(&mut offline).unwrap();

        let mut writer = BKDWriter::new(10, Arc::clone(&dir), "field", config, 16.0, 100).unwrap();
        for (value, doc) in &points {
            writer.add(value, *doc).unwrap();
        }
        let mut in_heap = RAMOutputStream::new(true);
        writer.finish(&mut in_heap).unwrap();

        assert!(offline.bytes() == in_heap.bytes());
    }

    #[test]
    fn test_temp_files_removed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let config = BKDConfig::new(2, 2, 4, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let points = random_points(&mut rng, &config, 100, 1000);

        let mut writer = BKDWriter::new(100, Arc::clone(&dir), "field", config, 0.0, 100).unwrap();
        for (value, doc) in &points {
            writer.add(value, *doc).unwrap();
        }
        let files = dir.list_all().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("field_bkd_spill"));
        let mut out = RAMOutputStream::new(true);
        writer.finish(&mut out).unwrap();
        assert!(dir.list_all().unwrap().is_empty());

        // dropped without finish
        let mut writer = BKDWriter::new(100, Arc::clone(&dir), "field", config, 0.0, 100).unwrap();
        for (value, doc) in &points {
            writer.add(value, *doc).unwrap();
        }
        assert_eq!(dir.list_all().unwrap().len(), 1);
        drop(writer);
        assert!(dir.list_all().unwrap().is_empty());
    }
}
