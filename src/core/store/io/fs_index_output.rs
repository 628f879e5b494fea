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

use crate::core::store::io::{DataOutput, IndexOutput};

use crate::error::Result;

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::CrcWriter;

const CHUNK_SIZE: usize = 8192;

/// `IndexOutput` writing a new file of an `FSDirectory`.
///
/// Buffered bytes are flushed on drop.
pub struct FSIndexOutput {
    name: String,
    writer: CrcWriter<BufWriter<File>>,
    bytes_written: usize,
}

impl FSIndexOutput {
    pub fn new<P: AsRef<Path>>(name: String, path: P) -> Result<FSIndexOutput> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(FSIndexOutput {
            name,
            writer: CrcWriter::new(BufWriter::with_capacity(CHUNK_SIZE, file)),
            bytes_written: 0,
        })
    }
}

impl Drop for FSIndexOutput {
    fn drop(&mut self) {
        if let Err(ref desc) = self.writer.flush() {
            error!("failed to flush {}, errmsg: {}", self.name, desc);
        }
    }
}

impl DataOutput for FSIndexOutput {}

impl Write for FSIndexOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.writer.write(buf)?;
        self.bytes_written += count;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl IndexOutput for FSIndexOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_pointer(&self) -> i64 {
        self.bytes_written as i64
    }

    fn checksum(&self) -> Result<i64> {
        Ok(i64::from(self.writer.crc().sum()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Crc;

    #[test]
    fn test_write_and_checksum() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("hello.bin");
        let mut fsout = FSIndexOutput::new("hello.bin".to_string(), &path).unwrap();
        fsout.write_byte(b'a').unwrap();
        fsout.write_int(42).unwrap();
        assert_eq!(fsout.file_pointer(), 5);

        let mut crc = Crc::new();
        crc.update(&[b'a', 0, 0, 0, 42]);
        assert_eq!(fsout.checksum().unwrap(), i64::from(crc.sum()));
        drop(fsout);

        assert_eq!(::std::fs::read(&path).unwrap(), vec![b'a', 0, 0, 0, 42]);
    }

    #[test]
    fn test_refuses_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("dup.bin");
        File::create(&path).unwrap();
        assert!(FSIndexOutput::new("dup.bin".to_string(), &path).is_err());
    }
}
