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

use crate::core::util::DocId;
use crate::error::Result;

/// Used by `BKDReader::intersect` to check how each recursive cell corresponds to the query.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Relation {
    /// Return this if the cell is fully contained by the query
    CellInsideQuery,
    /// Return this if the cell and query do not overlap
    CellOutsideQuery,
    /// Return this if the cell partially overlaps the query
    CellCrossesQuery,
}

/// We recurse the BKD tree, using a provided instance of this to guide the recursion.
///
/// Returning `ErrorKind::IntersectTerminated` from either `visit` method stops the
/// traversal; the error is handed back to the caller of `intersect` unchanged.
pub trait IntersectVisitor {
    /// Called for all documents in a leaf cell that's fully contained by the query.
    /// The consumer should blindly accept the docID.
    fn visit(&mut self, doc_id: DocId) -> Result<()>;

    /// Called for all documents in a leaf cell that crosses the query.  The consumer
    /// should scrutinize the packedValue to decide whether to accept it.  In the 1D case,
    /// values are visited in increasing order, and in the case of ties, in increasing
    /// docID order.
    fn visit_by_packed_value(&mut self, doc_id: DocId, packed_value: &[u8]) -> Result<()>;

    /// Called for non-leaf cells to test how the cell relates to the query, to
    /// determine how to further recurse down the tree.
    fn compare(&self, min_packed_value: &[u8], max_packed_value: &[u8]) -> Relation;

    /// Notifies the caller that this many documents (from one block) are about
    /// to be visited
    fn grow(&mut self, _count: usize) {}
}

/// Maximum number of bytes for each dimension
pub const MAX_NUM_BYTES: usize = 16;

/// Maximum number of dimensions
pub const MAX_DIMENSIONS: usize = 8;
