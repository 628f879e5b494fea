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

use crate::error::ErrorKind::IllegalArgument;
use crate::error::Result;

/// Writes `a - b` for one dimension into `result`, treating both as unsigned
/// big-endian integers of `bytes_per_dim` bytes.
///
/// Fails if `a < b`.
pub fn bytes_subtract(
    bytes_per_dim: usize,
    dim: usize,
    a: &[u8],
    b: &[u8],
    result: &mut [u8],
) -> Result<()> {
    let start = dim * bytes_per_dim;
    let end = start + bytes_per_dim;
    let mut borrow = 0;
    for i in (start..end).rev() {
        let mut diff = i32::from(a[i]) - i32::from(b[i]) - borrow;
        if diff < 0 {
            diff += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        result[i - start] = diff as u8;
    }

    if borrow != 0 {
        bail!(IllegalArgument(format!(
            "bytes_subtract: a < b for dim {}",
            dim
        )));
    }
    Ok(())
}

/// Compares two byte slices, element by element, and returns the
/// number of elements common to both (from the start of each).
pub fn bytes_difference(left: &[u8], right: &[u8]) -> usize {
    left.iter()
        .zip(right.iter())
        .position(|(l, r)| l != r)
        .unwrap_or_else(|| left.len().min(right.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_subtract() {
        let a = [0u8, 0, 1, 0, 9, 9];
        let b = [0u8, 0, 0, 1, 0, 0];
        let mut result = [0u8; 2];
        bytes_subtract(2, 1, &a, &b, &mut result).unwrap();
        assert_eq!(result, [0, 255]);
        bytes_subtract(2, 2, &a, &b, &mut result).unwrap();
        assert_eq!(result, [9, 9]);
        assert!(bytes_subtract(2, 1, &b, &a, &mut result).is_err());
    }

    #[test]
    fn test_bytes_difference() {
        assert_eq!(bytes_difference(b"abcd", b"abxd"), 2);
        assert_eq!(bytes_difference(b"ab", b"abc"), 2);
        assert_eq!(bytes_difference(b"", b"a"), 0);
    }
}
