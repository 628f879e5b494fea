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

use crate::error::ErrorKind::{CorruptIndex, IllegalArgument, UnexpectedEOF};
use crate::error::Result;

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Read};

fn eof_error(e: io::Error, expected: usize) -> crate::error::Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        UnexpectedEOF(format!("Reached EOF when {} bytes are expected", expected)).into()
    } else {
        e.into()
    }
}

/// Reading side of the index file format: big-endian fixed width integers,
/// variable length integers and length prefixed strings.
pub trait DataInput: Read {
    fn read_byte(&mut self) -> Result<u8> {
        self.read_u8().map_err(|e| eof_error(e, 1))
    }

    fn read_bytes(&mut self, b: &mut [u8], offset: usize, length: usize) -> Result<()> {
        let end = offset + length;
        if b.len() < end {
            bail!(IllegalArgument(format!(
                "Buffer too small: writing [{}, {}) to [0, {})",
                offset,
                end,
                b.len()
            )));
        }

        self.read_exact(&mut b[offset..end])
            .map_err(|e| eof_error(e, length))
    }

    fn read_short(&mut self) -> Result<i16> {
        self.read_i16::<BigEndian>().map_err(|e| eof_error(e, 2))
    }

    fn read_int(&mut self) -> Result<i32> {
        self.read_i32::<BigEndian>().map_err(|e| eof_error(e, 4))
    }

    fn read_vint(&mut self) -> Result<i32> {
        let mut b = self.read_byte()?;
        let mut i = i32::from(b & 0x7f);
        let mut shift = 7;
        while b & 0x80 != 0 {
            if shift > 28 {
                bail!(CorruptIndex("Invalid vInt detected".into()));
            }
            b = self.read_byte()?;
            if shift == 28 && b & 0xf0 != 0 {
                bail!(CorruptIndex("Invalid vInt detected".into()));
            }
            i |= i32::from(b & 0x7f) << shift;
            shift += 7;
        }

        Ok(i)
    }

    fn read_long(&mut self) -> Result<i64> {
        self.read_i64::<BigEndian>().map_err(|e| eof_error(e, 8))
    }

    fn read_vlong(&mut self) -> Result<i64> {
        let mut b = self.read_byte()?;
        let mut i = i64::from(b & 0x7f);
        let mut shift = 7;
        while b & 0x80 != 0 {
            if shift > 56 {
                bail!(CorruptIndex("Invalid vLong detected".into()));
            }
            b = self.read_byte()?;
            i |= i64::from(b & 0x7f) << shift;
            shift += 7;
        }

        Ok(i)
    }

    fn read_string(&mut self) -> Result<String> {
        let length = self.read_vint()?;
        if length < 0 {
            bail!(CorruptIndex("Invalid String detected".into()));
        }

        let mut buffer = vec![0u8; length as usize];
        self.read_bytes(&mut buffer, 0, length as usize)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        const SKIP_BUFFER_SIZE: usize = 1024;
        let mut skip_buffer = [0u8; SKIP_BUFFER_SIZE];
        let mut skipped = 0;

        while skipped < count {
            let step = SKIP_BUFFER_SIZE.min(count - skipped);
            self.read_bytes(&mut skip_buffer, 0, step)?;
            skipped += step;
        }
        Ok(())
    }
}

impl<'a> DataInput for &'a [u8] {
    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        if self.len() < count {
            bail!(UnexpectedEOF(format!(
                "Reached EOF when skipping {} bytes",
                count
            )));
        }

        *self = &self[count..];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::io::DataOutput;

    #[test]
    fn test_vint_and_vlong() {
        let mut out: Vec<u8> = Vec::new();
        out.write_vint(0).unwrap();
        out.write_vint(127).unwrap();
        out.write_vint(128).unwrap();
        out.write_vint(i32::max_value()).unwrap();
        out.write_vint(-1).unwrap();
        out.write_vlong(1 << 40).unwrap();

        let mut input: &[u8] = &out;
        assert_eq!(input.read_vint().unwrap(), 0);
        assert_eq!(input.read_vint().unwrap(), 127);
        assert_eq!(input.read_vint().unwrap(), 128);
        assert_eq!(input.read_vint().unwrap(), i32::max_value());
        assert_eq!(input.read_vint().unwrap(), -1);
        assert_eq!(input.read_vlong().unwrap(), 1 << 40);
        assert!(input.is_empty());
    }

    #[test]
    fn test_read_past_end() {
        let data = [0u8, 1, 2];
        let mut input: &[u8] = &data;
        match DataInput::read_int(&mut input) {
            Err(crate::error::Error(UnexpectedEOF(_), _)) => {}
            other => panic!("expected EOF, got {:?}", other),
        }
    }
}
