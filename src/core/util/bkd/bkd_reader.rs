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

use crate::core::codec::codec_util::{check_header, checksum_entire_file, footer_length};
use crate::core::codec::points::{IntersectVisitor, Relation};
use crate::core::store::io::{DataInput, IndexInput};
use crate::core::util::bkd::{
    BKDConfig, DocIdsWriter, BKD_CODEC_NAME, BKD_VERSION_CURRENT, BKD_VERSION_START,
};
use crate::core::util::DocId;

use crate::error::ErrorKind::CorruptIndex;
use crate::error::Result;

/// Scratch buffers owned by a single call to `BKDReader::intersect`.
struct IntersectState {
    input: Box<dyn IndexInput>,
    scratch_doc_ids: Vec<DocId>,
    scratch_packed_value: Vec<u8>,
    scratch_min_index_packed_value: Vec<u8>,
    scratch_max_index_packed_value: Vec<u8>,
    common_prefix_lengths: Vec<usize>,
}

impl IntersectState {
    fn new(input: Box<dyn IndexInput>, config: &BKDConfig) -> IntersectState {
        IntersectState {
            input,
            scratch_doc_ids: vec![0; config.max_points_in_leaf_node()],
            scratch_packed_value: vec![0u8; config.packed_bytes_length()],
            scratch_min_index_packed_value: vec![0u8; config.packed_index_bytes_length()],
            scratch_max_index_packed_value: vec![0u8; config.packed_index_bytes_length()],
            common_prefix_lengths: vec![0; config.num_dims()],
        }
    }
}

/// Handles intersection of an multi-dimensional shape in bytes space with a block KD-tree
/// previously written with `BKDWriter`.
///
/// The split index and the leaf file pointers are loaded at open; leaf blocks
/// are read on demand. A reader is immutable once opened, every query clones
/// the underlying input.
pub struct BKDReader {
    config: BKDConfig,
    num_leaves: usize,
    leaf_block_fps: Vec<i64>,
    // per node: split dim byte followed by the split value, node 0 is unused
    split_packed_values: Vec<u8>,
    min_packed_value: Vec<u8>,
    max_packed_value: Vec<u8>,
    point_count: i64,
    doc_count: i32,
    input: Box<dyn IndexInput>,
}

fn read_count<I: DataInput + ?Sized>(input: &mut I, what: &str) -> Result<usize> {
    let v = input.read_vint()?;
    if v < 0 {
        bail!(CorruptIndex(format!("negative {}: {}", what, v)));
    }
    Ok(v as usize)
}

impl BKDReader {
    /// Opens the tree whose index starts at `index_fp`, after verifying the
    /// checksum of the whole file.
    pub fn open(input: Box<dyn IndexInput>, index_fp: i64) -> Result<BKDReader> {
        checksum_entire_file(input.as_ref())?;

        let len = input.len() as i64;
        let in_bounds = index_fp >= 0
            && index_fp
                .checked_add(footer_length() as i64)
                .map_or(false, |end| end <= len);
        if !in_bounds {
            bail!(CorruptIndex(format!(
                "index_fp={} is out of bounds for {} (length={})",
                index_fp,
                input.name(),
                len
            )));
        }

        let mut reader = input.as_ref().clone()?;
        reader.seek(index_fp)?;
        check_header(
            reader.as_mut(),
            BKD_CODEC_NAME,
            BKD_VERSION_START,
            BKD_VERSION_CURRENT,
        )?;

        let num_dims = read_count(reader.as_mut(), "num_dims")?;
        let num_index_dims = read_count(reader.as_mut(), "num_index_dims")?;
        let bytes_per_dim = read_count(reader.as_mut(), "bytes_per_dim")?;
        let max_points_in_leaf_node = read_count(reader.as_mut(), "max_points_in_leaf_node")?;
        let config = BKDConfig::new(
            num_dims,
            num_index_dims,
            bytes_per_dim,
            max_points_in_leaf_node,
        )
        .map_err(|e| CorruptIndex(format!("invalid config in {}: {}", input.name(), e)))?;

        let num_leaves = read_count(reader.as_mut(), "num_leaves")?;
        if num_leaves == 0 || !num_leaves.is_power_of_two() {
            bail!(CorruptIndex(format!("invalid num_leaves: {}", num_leaves)));
        }
        let mut leaf_block_fps = Vec::with_capacity(num_leaves);
        let mut last_fp = 0i64;
        for _ in 0..num_leaves {
            let delta = reader.read_vlong()?;
            if delta < 0 || last_fp + delta >= index_fp {
                bail!(CorruptIndex(format!(
                    "leaf block pointers out of order: last={} delta={} index_fp={}",
                    last_fp, delta, index_fp
                )));
            }
            last_fp += delta;
            leaf_block_fps.push(last_fp);
        }

        let num_splits = read_count(reader.as_mut(), "num_splits")?;
        if num_splits + 1 != num_leaves {
            bail!(CorruptIndex(format!(
                "num_splits={} does not match num_leaves={}",
                num_splits, num_leaves
            )));
        }
        let mut split_packed_values = vec![0u8; num_leaves * (1 + bytes_per_dim)];
        for node_id in 1..num_leaves {
            let address = node_id * (1 + bytes_per_dim);
            if num_index_dims > 1 {
                let split_dim = reader.read_byte()?;
                if split_dim as usize >= num_index_dims {
                    bail!(CorruptIndex(format!(
                        "invalid split dim {} for node {}",
                        split_dim, node_id
                    )));
                }
                split_packed_values[address] = split_dim;
            }
            reader.read_bytes(&mut split_packed_values, address + 1, bytes_per_dim)?;
        }

        let packed_index_bytes_length = config.packed_index_bytes_length();
        let mut min_packed_value = vec![0u8; packed_index_bytes_length];
        let mut max_packed_value = vec![0u8; packed_index_bytes_length];
        reader.read_bytes(&mut min_packed_value, 0, packed_index_bytes_length)?;
        reader.read_bytes(&mut max_packed_value, 0, packed_index_bytes_length)?;
        for dim in 0..num_index_dims {
            let range = dim * bytes_per_dim..(dim + 1) * bytes_per_dim;
            if min_packed_value[range.clone()] > max_packed_value[range] {
                bail!(CorruptIndex(format!(
                    "min_packed_value > max_packed_value for dim={}",
                    dim
                )));
            }
        }

        let point_count = reader.read_vlong()?;
        let doc_count = reader.read_vint()?;
        if point_count < 0 || doc_count < 0 || i64::from(doc_count) > point_count {
            bail!(CorruptIndex(format!(
                "invalid point_count={} doc_count={}",
                point_count, doc_count
            )));
        }
        if reader.file_pointer() + footer_length() as i64 != len {
            bail!(CorruptIndex(format!(
                "index of {} ends at {} but the footer starts at {}",
                input.name(),
                reader.file_pointer(),
                len - footer_length() as i64
            )));
        }

        Ok(BKDReader {
            config,
            num_leaves,
            leaf_block_fps,
            split_packed_values,
            min_packed_value,
            max_packed_value,
            point_count,
            doc_count,
            input,
        })
    }

    pub fn config(&self) -> &BKDConfig {
        &self.config
    }

    /// Minimum of the index dimensions over all points.
    pub fn min_packed_value(&self) -> &[u8] {
        &self.min_packed_value
    }

    pub fn max_packed_value(&self) -> &[u8] {
        &self.max_packed_value
    }

    pub fn point_count(&self) -> i64 {
        self.point_count
    }

    /// Number of distinct documents holding at least one point.
    pub fn doc_count(&self) -> i32 {
        self.doc_count
    }

    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    /// Visits every point whose cell is not ruled out by the visitor.
    pub fn intersect<V: IntersectVisitor + ?Sized>(&self, visitor: &mut V) -> Result<()> {
        let mut state = IntersectState::new(self.input.as_ref().clone()?, &self.config);
        self.intersect_node(
            &mut state,
            visitor,
            1,
            &self.min_packed_value,
            &self.max_packed_value,
        )
    }

    /// Upper bound on the number of points `intersect` would hand to the visitor.
    pub fn estimate_point_count<V: IntersectVisitor + ?Sized>(&self, visitor: &V) -> u64 {
        self.estimate_node(visitor, 1, &self.min_packed_value, &self.max_packed_value)
    }

    fn intersect_node<V: IntersectVisitor + ?Sized>(
        &self,
        state: &mut IntersectState,
        visitor: &mut V,
        node_id: usize,
        cell_min_packed: &[u8],
        cell_max_packed: &[u8],
    ) -> Result<()> {
        match visitor.compare(cell_min_packed, cell_max_packed) {
            Relation::CellOutsideQuery => Ok(()),
            Relation::CellInsideQuery => self.add_all(state, visitor, node_id),
            // a zero-volume cell overlapping the query lies inside it
            Relation::CellCrossesQuery if cell_min_packed == cell_max_packed => {
                self.add_all(state, visitor, node_id)
            }
            Relation::CellCrossesQuery => {
                if node_id >= self.num_leaves {
                    self.visit_leaf(state, visitor, node_id)
                } else {
                    let (split_dim, split_value) = self.split(node_id);
                    let bytes_per_dim = self.config.bytes_per_dim();
                    let range = split_dim * bytes_per_dim..(split_dim + 1) * bytes_per_dim;

                    let mut split_packed_value = cell_max_packed.to_vec();
                    split_packed_value[range.clone()].copy_from_slice(split_value);
                    self.intersect_node(
                        state,
                        visitor,
                        node_id * 2,
                        cell_min_packed,
                        &split_packed_value,
                    )?;

                    split_packed_value.copy_from_slice(cell_min_packed);
                    split_packed_value[range].copy_from_slice(split_value);
                    self.intersect_node(
                        state,
                        visitor,
                        node_id * 2 + 1,
                        &split_packed_value,
                        cell_max_packed,
                    )
                }
            }
        }
    }

    fn estimate_node<V: IntersectVisitor + ?Sized>(
        &self,
        visitor: &V,
        node_id: usize,
        cell_min_packed: &[u8],
        cell_max_packed: &[u8],
    ) -> u64 {
        let max_points_in_leaf = self.config.max_points_in_leaf_node() as u64;
        match visitor.compare(cell_min_packed, cell_max_packed) {
            Relation::CellOutsideQuery => 0,
            Relation::CellInsideQuery => max_points_in_leaf * self.leaves_under(node_id) as u64,
            Relation::CellCrossesQuery => {
                if node_id >= self.num_leaves {
                    max_points_in_leaf
                } else {
                    let (split_dim, split_value) = self.split(node_id);
                    let bytes_per_dim = self.config.bytes_per_dim();
                    let range = split_dim * bytes_per_dim..(split_dim + 1) * bytes_per_dim;

                    let mut split_packed_value = cell_max_packed.to_vec();
                    split_packed_value[range.clone()].copy_from_slice(split_value);
                    let left =
                        self.estimate_node(visitor, node_id * 2, cell_min_packed, &split_packed_value);

                    split_packed_value.copy_from_slice(cell_min_packed);
                    split_packed_value[range].copy_from_slice(split_value);
                    left + self.estimate_node(
                        visitor,
                        node_id * 2 + 1,
                        &split_packed_value,
                        cell_max_packed,
                    )
                }
            }
        }
    }

    #[inline]
    fn split(&self, node_id: usize) -> (usize, &[u8]) {
        let bytes_per_dim = self.config.bytes_per_dim();
        let address = node_id * (1 + bytes_per_dim);
        (
            self.split_packed_values[address] as usize,
            &self.split_packed_values[address + 1..address + 1 + bytes_per_dim],
        )
    }

    fn leaves_under(&self, node_id: usize) -> usize {
        let mut left = node_id;
        let mut right = node_id;
        while left < self.num_leaves {
            left *= 2;
            right = right * 2 + 1;
        }
        right - left + 1
    }

    /// Visits all docIDs under `node_id` without looking at their values.
    fn add_all<V: IntersectVisitor + ?Sized>(
        &self,
        state: &mut IntersectState,
        visitor: &mut V,
        node_id: usize,
    ) -> Result<()> {
        if node_id >= self.num_leaves {
            self.visit_doc_ids(state, visitor, node_id)
        } else {
            self.add_all(state, visitor, node_id * 2)?;
            self.add_all(state, visitor, node_id * 2 + 1)
        }
    }

    fn visit_doc_ids<V: IntersectVisitor + ?Sized>(
        &self,
        state: &mut IntersectState,
        visitor: &mut V,
        node_id: usize,
    ) -> Result<()> {
        let count = self.read_leaf_count(state, node_id)?;
        if count > 0 {
            visitor.grow(count);
            DocIdsWriter::read_ints_with_visitor(state.input.as_mut(), count, visitor)?;
        }
        Ok(())
    }

    fn read_leaf_count(&self, state: &mut IntersectState, node_id: usize) -> Result<usize> {
        state
            .input
            .seek(self.leaf_block_fps[node_id - self.num_leaves])?;
        let count = read_count(state.input.as_mut(), "leaf point count")?;
        if count > self.config.max_points_in_leaf_node() {
            bail!(CorruptIndex(format!(
                "leaf of node {} holds {} points, more than max_points_in_leaf_node={}",
                node_id,
                count,
                self.config.max_points_in_leaf_node()
            )));
        }
        Ok(count)
    }

    fn visit_leaf<V: IntersectVisitor + ?Sized>(
        &self,
        state: &mut IntersectState,
        visitor: &mut V,
        node_id: usize,
    ) -> Result<()> {
        let count = self.read_leaf_count(state, node_id)?;
        if count == 0 {
            return Ok(());
        }
        DocIdsWriter::read_ints(state.input.as_mut(), count, &mut state.scratch_doc_ids)?;
        self.visit_doc_values(state, visitor, count)
    }

    fn visit_doc_values<V: IntersectVisitor + ?Sized>(
        &self,
        state: &mut IntersectState,
        visitor: &mut V,
        count: usize,
    ) -> Result<()> {
        let IntersectState {
            ref mut input,
            ref scratch_doc_ids,
            ref mut scratch_packed_value,
            ref mut scratch_min_index_packed_value,
            ref mut scratch_max_index_packed_value,
            ref mut common_prefix_lengths,
        } = *state;
        let input = input.as_mut();
        let doc_ids = &scratch_doc_ids[..count];
        let index_bytes = self.config.packed_index_bytes_length();

        self.read_common_prefixes(input, common_prefix_lengths, scratch_packed_value)?;
        let compressed_dim = input.read_byte()?;

        if compressed_dim == 0xFF {
            // all values are the same
            let value = &scratch_packed_value[..index_bytes];
            return match visitor.compare(value, value) {
                Relation::CellOutsideQuery => Ok(()),
                Relation::CellInsideQuery | Relation::CellCrossesQuery => {
                    Self::visit_all(visitor, doc_ids)
                }
            };
        }

        if self.config.num_index_dims() != 1 {
            scratch_min_index_packed_value.copy_from_slice(&scratch_packed_value[..index_bytes]);
            scratch_max_index_packed_value.copy_from_slice(&scratch_packed_value[..index_bytes]);
            self.read_min_max(
                input,
                common_prefix_lengths,
                scratch_min_index_packed_value,
                scratch_max_index_packed_value,
            )?;
            match visitor.compare(
                scratch_min_index_packed_value,
                scratch_max_index_packed_value,
            ) {
                Relation::CellOutsideQuery => return Ok(()),
                Relation::CellInsideQuery => return Self::visit_all(visitor, doc_ids),
                Relation::CellCrossesQuery
                    if scratch_min_index_packed_value == scratch_max_index_packed_value =>
                {
                    return Self::visit_all(visitor, doc_ids)
                }
                Relation::CellCrossesQuery => {}
            }
        }

        visitor.grow(count);
        if compressed_dim == 0xFE {
            self.visit_sparse_raw_doc_values(
                input,
                visitor,
                doc_ids,
                common_prefix_lengths,
                scratch_packed_value,
            )
        } else {
            self.visit_compressed_doc_values(
                input,
                visitor,
                doc_ids,
                common_prefix_lengths,
                scratch_packed_value,
                compressed_dim as usize,
            )
        }
    }

    fn visit_all<V: IntersectVisitor + ?Sized>(visitor: &mut V, doc_ids: &[DocId]) -> Result<()> {
        visitor.grow(doc_ids.len());
        for &doc in doc_ids {
            visitor.visit(doc)?;
        }
        Ok(())
    }

    fn read_common_prefixes(
        &self,
        input: &mut dyn IndexInput,
        common_prefix_lengths: &mut [usize],
        scratch_packed_value: &mut [u8],
    ) -> Result<()> {
        let bytes_per_dim = self.config.bytes_per_dim();
        for (dim, prefix_len) in common_prefix_lengths.iter_mut().enumerate() {
            let prefix = read_count(input, "common prefix length")?;
            if prefix > bytes_per_dim {
                bail!(CorruptIndex(format!(
                    "common prefix length {} of dim {} exceeds bytes_per_dim={}",
                    prefix, dim, bytes_per_dim
                )));
            }
            *prefix_len = prefix;
            input.read_bytes(scratch_packed_value, dim * bytes_per_dim, prefix)?;
        }
        Ok(())
    }

    fn read_min_max(
        &self,
        input: &mut dyn IndexInput,
        common_prefix_lengths: &[usize],
        min_packed_value: &mut [u8],
        max_packed_value: &mut [u8],
    ) -> Result<()> {
        let bytes_per_dim = self.config.bytes_per_dim();
        for dim in 0..self.config.num_index_dims() {
            let prefix = common_prefix_lengths[dim];
            let offset = dim * bytes_per_dim + prefix;
            input.read_bytes(min_packed_value, offset, bytes_per_dim - prefix)?;
            input.read_bytes(max_packed_value, offset, bytes_per_dim - prefix)?;
        }
        Ok(())
    }

    fn read_suffixes(
        &self,
        input: &mut dyn IndexInput,
        common_prefix_lengths: &[usize],
        scratch_packed_value: &mut [u8],
    ) -> Result<()> {
        let bytes_per_dim = self.config.bytes_per_dim();
        for (dim, &prefix) in common_prefix_lengths.iter().enumerate() {
            input.read_bytes(
                scratch_packed_value,
                dim * bytes_per_dim + prefix,
                bytes_per_dim - prefix,
            )?;
        }
        Ok(())
    }

    fn visit_sparse_raw_doc_values<V: IntersectVisitor + ?Sized>(
        &self,
        input: &mut dyn IndexInput,
        visitor: &mut V,
        doc_ids: &[DocId],
        common_prefix_lengths: &[usize],
        scratch_packed_value: &mut [u8],
    ) -> Result<()> {
        let count = doc_ids.len();
        let mut i = 0;
        while i < count {
            let length = read_count(input, "run length")?;
            if length == 0 || i + length > count {
                bail!(CorruptIndex(format!(
                    "run of {} values at {} overflows leaf of {} points",
                    length, i, count
                )));
            }
            self.read_suffixes(input, common_prefix_lengths, scratch_packed_value)?;
            for &doc in &doc_ids[i..i + length] {
                visitor.visit_by_packed_value(doc, scratch_packed_value)?;
            }
            i += length;
        }
        Ok(())
    }

    fn visit_compressed_doc_values<V: IntersectVisitor + ?Sized>(
        &self,
        input: &mut dyn IndexInput,
        visitor: &mut V,
        doc_ids: &[DocId],
        common_prefix_lengths: &mut [usize],
        scratch_packed_value: &mut [u8],
        compressed_dim: usize,
    ) -> Result<()> {
        let bytes_per_dim = self.config.bytes_per_dim();
        if compressed_dim >= self.config.num_dims()
            || common_prefix_lengths[compressed_dim] >= bytes_per_dim
        {
            bail!(CorruptIndex(format!(
                "invalid compressed dim: {}",
                compressed_dim
            )));
        }

        // the byte at `compressed_byte_offset` is compressed using run-length compression,
        // other suffix bytes are stored in full
        let compressed_byte_offset =
            compressed_dim * bytes_per_dim + common_prefix_lengths[compressed_dim];
        common_prefix_lengths[compressed_dim] += 1;

        let count = doc_ids.len();
        let mut i = 0;
        while i < count {
            scratch_packed_value[compressed_byte_offset] = input.read_byte()?;
            let run_len = input.read_byte()? as usize;
            if run_len == 0 || i + run_len > count {
                bail!(CorruptIndex(format!(
                    "run of {} values at {} overflows leaf of {} points",
                    run_len, i, count
                )));
            }
            for &doc in &doc_ids[i..i + run_len] {
                self.read_suffixes(input, common_prefix_lengths, scratch_packed_value)?;
                visitor.visit_by_packed_value(doc, scratch_packed_value)?;
            }
            i += run_len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::directory::{Directory, FSDirectory};
    use crate::core::store::io::{ByteArrayDataInput, RAMOutputStream};
    use crate::core::store::IOContext;
    use crate::core::util::bkd::BKDWriter;
    use crate::error::{Error, ErrorKind};

    use byteorder::{BigEndian, ByteOrder};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::RefCell;
    use std::sync::Arc;

    type Points = Vec<(Vec<u8>, DocId)>;

    fn encode(values: &[u32]) -> Vec<u8> {
        let mut packed = vec![0u8; values.len() * 4];
        for (dim, &v) in values.iter().enumerate() {
            BigEndian::write_u32(&mut packed[dim * 4..dim * 4 + 4], v);
        }
        packed
    }

    fn random_points(rng: &mut StdRng, num_dims: usize, count: usize, cardinality: u32) -> Points {
        (0..count)
            .map(|i| {
                let values: Vec<u32> = (0..num_dims).map(|_| rng.gen_range(0..cardinality)).collect();
                (encode(&values), i as DocId)
            })
            .collect()
    }

    fn write_tree(config: BKDConfig, points: &[(Vec<u8>, DocId)], max_doc: DocId) -> (Vec<u8>, i64) {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let mut writer =
            BKDWriter::new(max_doc, dir, "points", config, 1.0, points.len() as i64).unwrap();
        for (value, doc) in points {
            writer.add(value, *doc).unwrap();
        }
        let mut out = RAMOutputStream::new(true);
        let index_fp = writer.finish(&mut out).unwrap().unwrap();
        (out.into_bytes(), index_fp)
    }

    fn open_tree(config: BKDConfig, points: &[(Vec<u8>, DocId)]) -> BKDReader {
        let (bytes, index_fp) = write_tree(config, points, points.len() as DocId + 1);
        BKDReader::open(Box::new(ByteArrayDataInput::new("points", bytes)), index_fp).unwrap()
    }

    /// Accepts points inside an inclusive box over the index dimensions.
    struct BoxVisitor {
        config: BKDConfig,
        query_min: Vec<u8>,
        query_max: Vec<u8>,
        docs: Vec<DocId>,
        grows: Vec<usize>,
    }

    impl BoxVisitor {
        fn new(config: BKDConfig, query_min: Vec<u8>, query_max: Vec<u8>) -> BoxVisitor {
            BoxVisitor {
                config,
                query_min,
                query_max,
                docs: vec![],
                grows: vec![],
            }
        }

        fn matches(&self, packed_value: &[u8]) -> bool {
            let bytes_per_dim = self.config.bytes_per_dim();
            (0..self.config.num_index_dims()).all(|dim| {
                let range = dim * bytes_per_dim..(dim + 1) * bytes_per_dim;
                packed_value[range.clone()] >= self.query_min[range.clone()]
                    && packed_value[range.clone()] <= self.query_max[range]
            })
        }
    }

    impl IntersectVisitor for BoxVisitor {
        fn visit(&mut self, doc_id: DocId) -> Result<()> {
            self.docs.push(doc_id);
            Ok(())
        }

        fn visit_by_packed_value(&mut self, doc_id: DocId, packed_value: &[u8]) -> Result<()> {
            if self.matches(packed_value) {
                self.docs.push(doc_id);
            }
            Ok(())
        }

        fn compare(&self, min_packed_value: &[u8], max_packed_value: &[u8]) -> Relation {
            let bytes_per_dim = self.config.bytes_per_dim();
            let mut crosses = false;
            for dim in 0..self.config.num_index_dims() {
                let range = dim * bytes_per_dim..(dim + 1) * bytes_per_dim;
                if max_packed_value[range.clone()] < self.query_min[range.clone()]
                    || min_packed_value[range.clone()] > self.query_max[range.clone()]
                {
                    return Relation::CellOutsideQuery;
                }
                crosses |= min_packed_value[range.clone()] < self.query_min[range.clone()]
                    || max_packed_value[range.clone()] > self.query_max[range];
            }
            if crosses {
                Relation::CellCrossesQuery
            } else {
                Relation::CellInsideQuery
            }
        }

        fn grow(&mut self, count: usize) {
            self.grows.push(count);
        }
    }

    /// Decodes every point.
    /// Decodes every point. Collects the index dimensions of each value
    /// together with its doc id.
    ///
    /// Every cell crosses the query, so `visit` is only reached for
    /// zero-volume cells and takes its value from the last compared cell.
    struct CollectingVisitor {
        index_bytes: usize,
        last_cell: RefCell<Vec<u8>>,
        points: Points,
        visits: usize,
        packed_visits: usize,
    }

    impl CollectingVisitor {
        fn new(config: &BKDConfig) -> CollectingVisitor {
            CollectingVisitor {
                index_bytes: config.packed_index_bytes_length(),
                last_cell: RefCell::new(vec![]),
                points: vec![],
                visits: 0,
                packed_visits: 0,
            }
        }
    }

    impl IntersectVisitor for CollectingVisitor {
        fn visit(&mut self, doc_id: DocId) -> Result<()> {
            self.visits += 1;
            self.points.push((self.last_cell.borrow().clone(), doc_id));
            Ok(())
        }

        fn visit_by_packed_value(&mut self, doc_id: DocId, packed_value: &[u8]) -> Result<()> {
            self.packed_visits += 1;
            self.points
                .push((packed_value[..self.index_bytes].to_vec(), doc_id));
            Ok(())
        }

        fn compare(&self, min_packed_value: &[u8], max_packed_value: &[u8]) -> Relation {
            if min_packed_value == max_packed_value {
                *self.last_cell.borrow_mut() = min_packed_value.to_vec();
            }
            Relation::CellCrossesQuery
        }
    }

    fn index_part(config: &BKDConfig, points: &[(Vec<u8>, DocId)]) -> Points {
        let index_bytes = config.packed_index_bytes_length();
        let mut result: Points = points
            .iter()
            .map(|(value, doc)| (value[..index_bytes].to_vec(), *doc))
            .collect();
        result.sort();
        result
    }

    fn brute_force(config: &BKDConfig, points: &[(Vec<u8>, DocId)], visitor: &BoxVisitor) -> Vec<DocId> {
        assert_eq!(config.bytes_per_dim(), visitor.config.bytes_per_dim());
        let mut docs: Vec<DocId> = points
            .iter()
            .filter(|(value, _)| visitor.matches(value))
            .map(|(_, doc)| *doc)
            .collect();
        docs.sort();
        docs
    }

    fn random_box(rng: &mut StdRng, num_index_dims: usize, cardinality: u32) -> (Vec<u8>, Vec<u8>) {
        let mut min = vec![];
        let mut max = vec![];
        for _ in 0..num_index_dims {
            let a = rng.gen_range(0..cardinality);
            let b = rng.gen_range(0..cardinality);
            min.push(a.min(b));
            max.push(a.max(b));
        }
        (encode(&min), encode(&max))
    }

    #[test]
    fn test_two_leaf_scenario() {
        let config = BKDConfig::new(2, 2, 4, 2).unwrap();
        let points = vec![
            (encode(&[5, 4]), 1),
            (encode(&[1, 2]), 1),
            (encode(&[1, 3]), 1),
            (encode(&[2, 9]), 2),
        ];
        let reader = open_tree(config, &points);
        assert_eq!(reader.num_leaves(), 2);
        assert_eq!(reader.point_count(), 4);
        assert_eq!(reader.doc_count(), 2);
        assert_eq!(reader.min_packed_value(), &encode(&[1, 2])[..]);
        assert_eq!(reader.max_packed_value(), &encode(&[5, 9])[..]);

        let mut visitor = BoxVisitor::new(config, encode(&[0, 0]), encode(&[3, 3]));
        reader.intersect(&mut visitor).unwrap();
        assert_eq!(visitor.docs, vec![1, 1]);
        // only the left leaf is read
        assert_eq!(visitor.grows, vec![2]);
        assert_eq!(reader.estimate_point_count(&visitor), 2);

        let mut visitor = BoxVisitor::new(config, encode(&[0, 0]), encode(&[10, 10]));
        reader.intersect(&mut visitor).unwrap();
        visitor.docs.sort();
        assert_eq!(visitor.docs, vec![1, 1, 1, 2]);
        assert_eq!(visitor.grows, vec![2, 2]);
    }

    #[test]
    fn test_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);
        let cases = vec![
            (BKDConfig::new(1, 1, 4, 16).unwrap(), 1 << 24),
            (BKDConfig::new(1, 1, 4, 32).unwrap(), 3),
            (BKDConfig::new(2, 2, 4, 16).unwrap(), 1000),
            (BKDConfig::new(3, 1, 4, 10).unwrap(), 40),
            (BKDConfig::new(3, 2, 4, 50).unwrap(), 5),
            (BKDConfig::new(4, 4, 4, 8).unwrap(), 100),
        ];
        for (config, cardinality) in cases {
            let points = random_points(&mut rng, config.num_dims(), 1000, cardinality);
            let reader = open_tree(config, &points);
            assert_eq!(reader.config(), &config);

            let mut visitor = CollectingVisitor::new(&config);
            reader.intersect(&mut visitor).unwrap();
            visitor.points.sort();
            assert!(
                index_part(&config, &points) == visitor.points,
                "round trip failed for {:?}",
                config
            );
        }
    }

    #[test]
    fn test_single_point_per_leaf() {
        let config = BKDConfig::new(1, 1, 4, 1).unwrap();
        let points = vec![
            (encode(&[8]), 0),
            (encode(&[3]), 1),
            (encode(&[5]), 2),
        ];
        let reader = open_tree(config, &points);
        assert_eq!(reader.num_leaves(), 4);

        let mut visitor = CollectingVisitor::new(&config);
        reader.intersect(&mut visitor).unwrap();
        visitor.points.sort();
        assert_eq!(index_part(&config, &points), visitor.points);
        // single point leaves are zero-volume
        assert_eq!(visitor.visits, 3);
        assert_eq!(visitor.packed_visits, 0);

        let mut visitor = BoxVisitor::new(config, encode(&[0]), encode(&[10]));
        reader.intersect(&mut visitor).unwrap();
        visitor.docs.sort();
        assert_eq!(visitor.docs, vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_volume_cells_are_inside() {
        let config = BKDConfig::new(2, 2, 4, 4).unwrap();
        let points: Points = (0..40).map(|doc| (encode(&[7, 11]), doc)).collect();
        let reader = open_tree(config, &points);
        assert_eq!(reader.num_leaves(), 16);

        let mut visitor = CollectingVisitor::new(&config);
        reader.intersect(&mut visitor).unwrap();
        assert_eq!(visitor.visits, 40);
        assert_eq!(visitor.packed_visits, 0);
        visitor.points.sort();
        assert_eq!(index_part(&config, &points), visitor.points);

        // equal values inside a leaf of an otherwise spread out tree
        let config = BKDConfig::new(1, 1, 4, 4).unwrap();
        let mut points: Points = (0..4).map(|doc| (encode(&[1]), doc)).collect();
        points.extend((4..8).map(|doc| (encode(&[9]), doc)));
        let reader = open_tree(config, &points);
        assert_eq!(reader.num_leaves(), 2);

        let mut visitor = CollectingVisitor::new(&config);
        reader.intersect(&mut visitor).unwrap();
        assert_eq!(visitor.visits, 8);
        assert_eq!(visitor.packed_visits, 0);
        visitor.points.sort();
        assert_eq!(index_part(&config, &points), visitor.points);
    }

    #[test]
    fn test_box_queries_match_brute_force() {
        let mut rng = StdRng::seed_from_u64(23);
        let cases = vec![
            (BKDConfig::new(1, 1, 4, 16).unwrap(), 5000),
            (BKDConfig::new(2, 2, 4, 16).unwrap(), 500),
            (BKDConfig::new(3, 2, 4, 12).unwrap(), 20),
            (BKDConfig::new(4, 3, 4, 8).unwrap(), 64),
        ];
        for (config, cardinality) in cases {
            let points = random_points(&mut rng, config.num_dims(), 2000, cardinality);
            let reader = open_tree(config, &points);
            for _ in 0..20 {
                let (query_min, query_max) = random_box(&mut rng, config.num_index_dims(), cardinality);
                let mut visitor = BoxVisitor::new(config, query_min, query_max);
                reader.intersect(&mut visitor).unwrap();
                let expected = brute_force(&config, &points, &visitor);
                visitor.docs.sort();
                assert_eq!(visitor.docs, expected);
                assert!(reader.estimate_point_count(&visitor) >= expected.len() as u64);
            }
        }
    }

    #[test]
    fn test_disjoint_box_is_pruned() {
        let mut rng = StdRng::seed_from_u64(5);
        let config = BKDConfig::new(2, 2, 4, 16).unwrap();
        let points = random_points(&mut rng, 2, 500, 1000);
        let reader = open_tree(config, &points);

        let mut visitor = BoxVisitor::new(config, encode(&[2000, 0]), encode(&[3000, 1000]));
        reader.intersect(&mut visitor).unwrap();
        assert!(visitor.docs.is_empty());
        assert!(visitor.grows.is_empty());
        assert_eq!(reader.estimate_point_count(&visitor), 0);
    }

    #[test]
    fn test_leaf_balance() {
        let mut rng = StdRng::seed_from_u64(99);
        let config = BKDConfig::new(2, 2, 4, 10).unwrap();
        let points = random_points(&mut rng, 2, 1234, 100_000);
        let reader = open_tree(config, &points);

        let mut visitor = BoxVisitor::new(config, encode(&[0, 0]), encode(&[100_000, 100_000]));
        reader.intersect(&mut visitor).unwrap();
        assert_eq!(visitor.grows.len(), reader.num_leaves());
        assert_eq!(visitor.grows.iter().sum::<usize>(), 1234);
        let smallest = *visitor.grows.iter().min().unwrap();
        let largest = *visitor.grows.iter().max().unwrap();
        assert!(largest <= 10);
        assert!(largest - smallest <= 1);
        assert_eq!(
            reader.estimate_point_count(&visitor),
            10 * reader.num_leaves() as u64
        );
    }

    #[test]
    fn test_corrupt_file_fails_on_open() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = BKDConfig::new(2, 2, 4, 16).unwrap();
        let points = random_points(&mut rng, 2, 300, 1000);
        let (bytes, index_fp) = write_tree(config, &points, 300);

        let mut flipped = bytes.clone();
        flipped[20] ^= 0x5A;
        let mut truncated = bytes.clone();
        truncated.truncate(bytes.len() - 3);

        let attempts = vec![
            (flipped, index_fp),
            (truncated, index_fp),
            (bytes.clone(), index_fp + 1),
            (bytes.clone(), -1),
            (bytes, i64::max_value()),
        ];
        for (bytes, index_fp) in attempts {
            match BKDReader::open(Box::new(ByteArrayDataInput::new("points", bytes)), index_fp) {
                Err(Error(ErrorKind::CorruptIndex(_), _)) => {}
                Err(e) => panic!("expected CorruptIndex, got {:?}", e),
                Ok(_) => panic!("opened a corrupt file"),
            }
        }
    }

    /// Stops the traversal after a fixed number of hits.
    struct LimitVisitor {
        limit: usize,
        visited: usize,
    }

    impl IntersectVisitor for LimitVisitor {
        fn visit(&mut self, _doc_id: DocId) -> Result<()> {
            if self.visited == self.limit {
                bail!(ErrorKind::IntersectTerminated);
            }
            self.visited += 1;
            Ok(())
        }

        fn visit_by_packed_value(&mut self, doc_id: DocId, _packed_value: &[u8]) -> Result<()> {
            self.visit(doc_id)
        }

        fn compare(&self, _min: &[u8], _max: &[u8]) -> Relation {
            Relation::CellInsideQuery
        }
    }

    #[test]
    fn test_cancellation_propagates() {
        let mut rng = StdRng::seed_from_u64(17);
        let config = BKDConfig::new(1, 1, 4, 8).unwrap();
        let points = random_points(&mut rng, 1, 200, 1000);
        let reader = open_tree(config, &points);

        let mut visitor = LimitVisitor {
            limit: 5,
            visited: 0,
        };
        let err = reader.intersect(&mut visitor).unwrap_err();
        assert!(err.is_terminated());
        assert_eq!(visitor.visited, 5);
    }

    #[test]
    fn test_concurrent_intersect() {
        let mut rng = StdRng::seed_from_u64(31);
        let config = BKDConfig::new(2, 2, 4, 16).unwrap();
        let points = random_points(&mut rng, 2, 3000, 1000);
        let reader = open_tree(config, &points);
        let queries: Vec<(Vec<u8>, Vec<u8>)> = (0..8).map(|_| random_box(&mut rng, 2, 1000)).collect();

        crossbeam::scope(|s| {
            for (query_min, query_max) in &queries {
                let reader = &reader;
                let points = &points;
                s.spawn(move |_| {
                    let mut visitor = BoxVisitor::new(config, query_min.clone(), query_max.clone());
                    reader.intersect(&mut visitor).unwrap();
                    let expected = brute_force(&config, points, &visitor);
                    visitor.docs.sort();
                    assert_eq!(visitor.docs, expected);
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn test_open_from_file() {
        let mut rng = StdRng::seed_from_u64(41);
        let config = BKDConfig::new(3, 2, 4, 32).unwrap();
        let points = random_points(&mut rng, 3, 700, 300);

        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let index_fp = {
            let mut writer =
                BKDWriter::new(700, Arc::clone(&dir), "points", config, 0.0, 700).unwrap();
            for (value, doc) in &points {
                writer.add(value, *doc).unwrap();
            }
            let mut out = dir.create_output("points.bkd", &IOContext::Default).unwrap();
            writer.finish(&mut out).unwrap().unwrap()
        };
        assert_eq!(dir.list_all().unwrap(), vec!["points.bkd".to_string()]);

        let input = dir.open_input("points.bkd", &IOContext::READ).unwrap();
        let reader = BKDReader::open(input, index_fp).unwrap();
        let mut visitor = BoxVisitor::new(config, encode(&[50, 50]), encode(&[150, 250]));
        reader.intersect(&mut visitor).unwrap();
        let expected = brute_force(&config, &points, &visitor);
        visitor.docs.sort();
        assert_eq!(visitor.docs, expected);
    }
}
