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

use crate::core::util::bit_util::UnsignedShift;
use crate::core::util::math;

use std::cmp::Ordering;

const INSERTION_SORT_THRESHOLD: usize = 16;

/// In-place selection over an indexed collection.
///
/// Implementors supply `swap` and a pivot comparison; `select` rearranges
/// `[from, to)` so that slot `k` holds the element it would hold if the range
/// were sorted, everything before it compares `<=` and everything after `>=`.
pub trait Selector {
    fn swap(&mut self, i: usize, j: usize);
    fn set_pivot(&mut self, i: usize);
    fn compare_pivot(&mut self, j: usize) -> Ordering;

    fn compare(&mut self, i: usize, j: usize) -> Ordering {
        self.set_pivot(i);
        self.compare_pivot(j)
    }

    fn select(&mut self, from: usize, to: usize, k: usize) {
        debug_assert!(from <= k && k < to);
        let max_depth = 2 * math::log((to - from) as i64, 2);
        self.quick_select(from, to, k, max_depth);
    }

    fn quick_select(&mut self, from: usize, to: usize, k: usize, max_depth: i32) {
        debug_assert!(from <= k && k < to);
        if to - from <= INSERTION_SORT_THRESHOLD {
            self.insertion_sort(from, to);
            return;
        }

        let max_depth = max_depth - 1;
        if max_depth < 0 {
            self.heap_sort(from, to);
            return;
        }

        let mid = ((from + to) as i64).unsigned_shift(1) as usize;
        // median of from, mid and to - 1 as the pivot
        if self.compare(from, to - 1) == Ordering::Greater {
            self.swap(from, to - 1);
        }

        if self.compare(to - 1, mid) == Ordering::Greater {
            self.swap(to - 1, mid);
            if self.compare(from, to - 1) == Ordering::Greater {
                self.swap(from, to - 1);
            }
        }

        self.set_pivot(to - 1);

        let mut left = from + 1;
        let mut right = to - 2;
        loop {
            while self.compare_pivot(left) == Ordering::Greater {
                left += 1;
            }

            while left < right && self.compare_pivot(right) != Ordering::Greater {
                right -= 1;
            }

            if left < right {
                self.swap(left, right);
                right -= 1;
            } else {
                break;
            }
        }

        self.swap(left, to - 1);

        match left.cmp(&k) {
            Ordering::Equal => {}
            Ordering::Less => self.quick_select(left + 1, to, k, max_depth),
            Ordering::Greater => self.quick_select(from, left, k, max_depth),
        }
    }

    fn insertion_sort(&mut self, from: usize, to: usize) {
        for i in from + 1..to {
            let mut j = i;
            while j > from && self.compare(j - 1, j) == Ordering::Greater {
                self.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    fn heap_sort(&mut self, from: usize, to: usize) {
        let n = to - from;
        if n <= 1 {
            return;
        }
        for i in (0..n / 2).rev() {
            self.sift_down(from, i, n);
        }
        for end in (1..n).rev() {
            self.swap(from, from + end);
            self.sift_down(from, 0, end);
        }
    }

    fn sift_down(&mut self, from: usize, mut i: usize, n: usize) {
        loop {
            let mut child = 2 * i + 1;
            if child >= n {
                break;
            }
            if child + 1 < n && self.compare(from + child, from + child + 1) == Ordering::Less {
                child += 1;
            }
            if self.compare(from + i, from + child) != Ordering::Less {
                break;
            }
            self.swap(from + i, from + child);
            i = child;
        }
    }
}
