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

use crate::core::store::io::{DataInput, IndexInput};

use crate::error::ErrorKind::IllegalArgument;
use crate::error::Result;

use crc::{crc32, Hasher32};
use std::io::{self, Read};

/// An `IndexInput` that keeps a running CRC32 of every byte read so far.
pub trait ChecksumIndexInput: IndexInput {
    fn checksum(&self) -> i64;
}

/// Wraps another input and feeds every consumed byte into a CRC32 digest.
///
/// Seeking is only allowed forward; the skipped bytes are read and hashed.
pub struct BufferedChecksumIndexInput {
    delegate: Box<dyn IndexInput>,
    digest: crc32::Digest,
}

impl BufferedChecksumIndexInput {
    pub fn new(delegate: Box<dyn IndexInput>) -> BufferedChecksumIndexInput {
        BufferedChecksumIndexInput {
            delegate,
            digest: crc32::Digest::new_with_initial(crc32::IEEE, 0u32),
        }
    }
}

impl ChecksumIndexInput for BufferedChecksumIndexInput {
    fn checksum(&self) -> i64 {
        i64::from(self.digest.sum32())
    }
}

impl DataInput for BufferedChecksumIndexInput {}

impl Read for BufferedChecksumIndexInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let length = self.delegate.read(buf)?;
        self.digest.write(&buf[..length]);
        Ok(length)
    }
}

impl IndexInput for BufferedChecksumIndexInput {
    fn clone(&self) -> Result<Box<dyn IndexInput>> {
        Ok(Box::new(BufferedChecksumIndexInput {
            delegate: self.delegate.as_ref().clone()?,
            digest: crc32::Digest::new_with_initial(crc32::IEEE, self.digest.sum32()),
        }))
    }

    fn file_pointer(&self) -> i64 {
        self.delegate.file_pointer()
    }

    fn seek(&mut self, pos: i64) -> Result<()> {
        let curr_pos = self.file_pointer();
        if pos < curr_pos {
            bail!(IllegalArgument(format!(
                "Can't seek backwards: {} => {}",
                curr_pos, pos
            )));
        }
        self.skip_bytes((pos - curr_pos) as usize)
    }

    fn len(&self) -> u64 {
        self.delegate.len()
    }

    fn name(&self) -> &str {
        self.delegate.name()
    }
}
