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

use crate::core::util::bit_util;

/// BitSet of fixed length (num_bits), backed by a `Vec<i64>`.
///
/// Used by the point writer to count distinct documents.
pub struct FixedBitSet {
    bits: Vec<i64>,
    num_bits: usize,
}

impl FixedBitSet {
    pub fn new(num_bits: usize) -> FixedBitSet {
        FixedBitSet {
            bits: vec![0; bits2words(num_bits)],
            num_bits,
        }
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.num_bits);
        let word_num = index >> 6;
        let mask = 1i64 << (index & 0x3fusize);
        self.bits[word_num] |= mask;
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.num_bits);
        let mask = 1i64 << (index & 0x3fusize);
        self.bits[index >> 6] & mask != 0
    }

    pub fn cardinality(&self) -> usize {
        bit_util::pop_array(&self.bits)
    }

    pub fn len(&self) -> usize {
        self.num_bits
    }

    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }
}

/// returns the number of 64 bit words it would take to hold num_bits
pub fn bits2words(num_bits: usize) -> usize {
    (num_bits + 63) >> 6
}
