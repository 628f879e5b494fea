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

use crate::core::codec::points::{MAX_DIMENSIONS, MAX_NUM_BYTES};
use crate::core::codec::INT_BYTES;
use crate::error::{Error, ErrorKind::IllegalArgument, Result};

use std::convert::TryFrom;
use std::fmt;

/// Default maximum number of points in each leaf block
pub const DEFAULT_MAX_POINTS_IN_LEAF_NODE: usize = 1024;

/// Default maximum heap to use, before spilling to (slower) disk
pub const DEFAULT_MAX_MB_SORT_IN_HEAP: f64 = 16.0;

/// Maximum number of dimensions
pub const MAX_DIMS: usize = MAX_DIMENSIONS;

/// Shape of the points stored in one BKD tree.
///
/// The first `num_index_dims` dimensions drive the tree, the remaining data
/// dimensions are only stored in the leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BKDConfigParams")]
pub struct BKDConfig {
    num_dims: usize,
    num_index_dims: usize,
    bytes_per_dim: usize,
    max_points_in_leaf_node: usize,
}

#[derive(Deserialize)]
struct BKDConfigParams {
    num_dims: usize,
    num_index_dims: usize,
    bytes_per_dim: usize,
    max_points_in_leaf_node: usize,
}

impl TryFrom<BKDConfigParams> for BKDConfig {
    type Error = Error;

    fn try_from(p: BKDConfigParams) -> Result<BKDConfig> {
        BKDConfig::new(
            p.num_dims,
            p.num_index_dims,
            p.bytes_per_dim,
            p.max_points_in_leaf_node,
        )
    }
}

impl BKDConfig {
    pub fn new(
        num_dims: usize,
        num_index_dims: usize,
        bytes_per_dim: usize,
        max_points_in_leaf_node: usize,
    ) -> Result<BKDConfig> {
        Self::verify_params(
            num_dims,
            num_index_dims,
            bytes_per_dim,
            max_points_in_leaf_node,
        )?;
        Ok(BKDConfig {
            num_dims,
            num_index_dims,
            bytes_per_dim,
            max_points_in_leaf_node,
        })
    }

    pub fn verify_params(
        num_dims: usize,
        num_index_dims: usize,
        bytes_per_dim: usize,
        max_points_in_leaf_node: usize,
    ) -> Result<()> {
        if num_dims < 1 || num_dims > MAX_DIMS {
            bail!(IllegalArgument(format!(
                "num_dims must be 1 .. {}, got {}",
                MAX_DIMS, num_dims
            )));
        }
        if num_index_dims < 1 || num_index_dims > num_dims {
            bail!(IllegalArgument(format!(
                "num_index_dims must be 1 .. {} (num_dims), got {}",
                num_dims, num_index_dims
            )));
        }
        if bytes_per_dim < 1 || bytes_per_dim > MAX_NUM_BYTES {
            bail!(IllegalArgument(format!(
                "bytes_per_dim must be 1 .. {}, got {}",
                MAX_NUM_BYTES, bytes_per_dim
            )));
        }
        if max_points_in_leaf_node == 0 {
            bail!(IllegalArgument(
                "max_points_in_leaf_node must be > 0".into()
            ));
        }
        if max_points_in_leaf_node > i32::max_value() as usize {
            bail!(IllegalArgument(format!(
                "max_points_in_leaf_node must be <= {}, got {}",
                i32::max_value(),
                max_points_in_leaf_node
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn num_dims(&self) -> usize {
        self.num_dims
    }

    #[inline]
    pub fn num_index_dims(&self) -> usize {
        self.num_index_dims
    }

    #[inline]
    pub fn bytes_per_dim(&self) -> usize {
        self.bytes_per_dim
    }

    #[inline]
    pub fn max_points_in_leaf_node(&self) -> usize {
        self.max_points_in_leaf_node
    }

    /// Bytes of one full packed value, all dimensions.
    #[inline]
    pub fn packed_bytes_length(&self) -> usize {
        self.num_dims * self.bytes_per_dim
    }

    /// Bytes of the index dimensions of a packed value.
    #[inline]
    pub fn packed_index_bytes_length(&self) -> usize {
        self.num_index_dims * self.bytes_per_dim
    }

    /// Bytes of one point in the point writers: packed value and doc id.
    #[inline]
    pub fn bytes_per_doc(&self) -> usize {
        self.packed_bytes_length() + INT_BYTES
    }
}

impl Default for BKDConfig {
    fn default() -> Self {
        BKDConfig {
            num_dims: 1,
            num_index_dims: 1,
            bytes_per_dim: 4,
            max_points_in_leaf_node: DEFAULT_MAX_POINTS_IN_LEAF_NODE,
        }
    }
}

impl fmt::Display for BKDConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Ok(s) = ::serde_json::to_string_pretty(self) {
            write!(f, "{}", s)?;
        }

        Ok(())
    }
}
