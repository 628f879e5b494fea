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

use std::io::{self, Write};

use flate2::Crc;

/// A memory-resident `IndexOutput`.
///
/// Used to stage leaf blocks before they are copied to the real output.
pub struct RAMOutputStream {
    name: String,
    buffer: Vec<u8>,
    crc: Option<Crc>,
}

impl RAMOutputStream {
    pub fn new(checksum: bool) -> Self {
        RAMOutputStream {
            name: "noname".into(),
            buffer: Vec::new(),
            crc: if checksum { Some(Crc::new()) } else { None },
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_to(&self, out: &mut impl DataOutput) -> Result<()> {
        out.write_bytes(&self.buffer, 0, self.buffer.len())
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        if let Some(ref mut crc) = self.crc {
            crc.reset();
        }
    }
}

impl Write for RAMOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if let Some(ref mut crc) = self.crc {
            crc.update(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DataOutput for RAMOutputStream {}

impl IndexOutput for RAMOutputStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_pointer(&self) -> i64 {
        self.buffer.len() as i64
    }

    fn checksum(&self) -> Result<i64> {
        match self.crc {
            Some(ref crc) => Ok(i64::from(crc.sum())),
            None => bail!(crate::error::ErrorKind::IllegalState(
                "internal RAMOutputStream created with checksum disabled".into()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_and_reset() {
        let mut ram = RAMOutputStream::new(false);
        ram.write_vint(300).unwrap();
        ram.write_byte(7).unwrap();
        assert_eq!(ram.file_pointer(), 3);
        assert!(ram.checksum().is_err());

        let mut out: Vec<u8> = Vec::new();
        ram.write_to(&mut out).unwrap();
        assert_eq!(out, ram.bytes());

        ram.reset();
        assert_eq!(ram.file_pointer(), 0);
    }
}
