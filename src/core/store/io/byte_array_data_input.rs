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

use crate::error::ErrorKind::{IllegalArgument, UnexpectedEOF};
use crate::error::Result;

use std::io::{self, Read};
use std::sync::Arc;

/// `IndexInput` backed by an in-memory byte array.
///
/// Clones share the bytes and carry their own position.
pub struct ByteArrayDataInput {
    name: String,
    bytes: Arc<Vec<u8>>,
    pos: usize,
}

impl ByteArrayDataInput {
    pub fn new<S: Into<String>>(name: S, bytes: Vec<u8>) -> ByteArrayDataInput {
        ByteArrayDataInput {
            name: name.into(),
            bytes: Arc::new(bytes),
            pos: 0,
        }
    }
}

impl DataInput for ByteArrayDataInput {
    fn read_byte(&mut self) -> Result<u8> {
        if self.pos >= self.bytes.len() {
            bail!(UnexpectedEOF(format!("read past EOF: {}", self.name)));
        }
        let b = self.bytes[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        if self.pos + count > self.bytes.len() {
            bail!(UnexpectedEOF(format!(
                "skip {} bytes past EOF: {}",
                count, self.name
            )));
        }
        self.pos += count;
        Ok(())
    }
}

impl Read for ByteArrayDataInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = buf.len().min(self.bytes.len() - self.pos);
        buf[..size].copy_from_slice(&self.bytes[self.pos..self.pos + size]);
        self.pos += size;
        Ok(size)
    }
}

impl IndexInput for ByteArrayDataInput {
    fn clone(&self) -> Result<Box<dyn IndexInput>> {
        Ok(Box::new(ByteArrayDataInput {
            name: self.name.clone(),
            bytes: Arc::clone(&self.bytes),
            pos: self.pos,
        }))
    }

    fn file_pointer(&self) -> i64 {
        self.pos as i64
    }

    fn seek(&mut self, pos: i64) -> Result<()> {
        if pos < 0 || pos as usize > self.bytes.len() {
            bail!(IllegalArgument(format!(
                "seek to {} is out of bounds for {} of length {}",
                pos,
                self.name,
                self.bytes.len()
            )));
        }
        self.pos = pos as usize;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }
}
