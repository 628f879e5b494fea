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

/// Returns `x <= 0 ? 0 : floor(log(x) / log(base))`.
pub fn log(mut x: i64, base: i32) -> i32 {
    debug_assert!(base > 1);

    let base = i64::from(base);
    let mut ret = 0;
    while x >= base {
        x /= base;
        ret += 1;
    }

    ret
}

pub fn long_to_int_exact(val: i64) -> Result<i32> {
    let ans = val as i32;
    if i64::from(ans) != val {
        bail!(IllegalArgument(format!("integer overflow: {}", val)));
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log() {
        assert_eq!(log(0, 2), 0);
        assert_eq!(log(1, 2), 0);
        assert_eq!(log(1024, 2), 10);
        assert_eq!(log(1023, 2), 9);
        assert_eq!(log(1000, 10), 3);
    }

    #[test]
    fn test_long_to_int_exact() {
        assert_eq!(long_to_int_exact(42).unwrap(), 42);
        assert!(long_to_int_exact(i64::from(i32::max_value()) + 1).is_err());
    }
}
