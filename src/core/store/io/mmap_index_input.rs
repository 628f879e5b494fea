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

use memmap::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

/// Shared read-only view of a memory mapped file.
///
/// An empty file has no mapping at all.
#[derive(Clone)]
pub struct ReadOnlySource {
    map: Option<Arc<Mmap>>,
}

impl ReadOnlySource {
    pub fn open(path: &Path) -> Result<ReadOnlySource> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len() as usize;
        let map = if file_len == 0 {
            None
        } else {
            let mmap = unsafe { MmapOptions::new().len(file_len).map(&file)? };
            Some(Arc::new(mmap))
        };
        Ok(ReadOnlySource { map })
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.map {
            Some(ref map) => &map[..],
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `IndexInput` over a memory mapped file.
#[derive(Clone)]
pub struct MmapIndexInput {
    source: ReadOnlySource,
    position: usize,
    name: String,
}

impl MmapIndexInput {
    pub fn new<P: AsRef<Path>>(name: &str, path: P) -> Result<MmapIndexInput> {
        let source = ReadOnlySource::open(path.as_ref())?;
        Ok(MmapIndexInput {
            source,
            position: 0,
            name: name.to_string(),
        })
    }

    fn remaining(&self) -> &[u8] {
        &self.source.as_slice()[self.position..]
    }
}

impl IndexInput for MmapIndexInput {
    fn clone(&self) -> Result<Box<dyn IndexInput>> {
        Ok(Box::new(Clone::clone(self)))
    }

    fn file_pointer(&self) -> i64 {
        self.position as i64
    }

    fn seek(&mut self, pos: i64) -> Result<()> {
        if pos < 0 || pos as usize > self.source.len() {
            bail!(IllegalArgument(format!(
                "seek to {} is out of bounds for {} of length {}",
                pos,
                self.name,
                self.source.len()
            )));
        }
        self.position = pos as usize;
        Ok(())
    }

    #[inline]
    fn len(&self) -> u64 {
        self.source.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl DataInput for MmapIndexInput {
    fn read_byte(&mut self) -> Result<u8> {
        match self.remaining().first() {
            Some(&b) => {
                self.position += 1;
                Ok(b)
            }
            None => bail!(UnexpectedEOF(format!("read past EOF: {}", self.name))),
        }
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        if self.position + count > self.source.len() {
            bail!(UnexpectedEOF(format!(
                "skip {} bytes past EOF: {}",
                count, self.name
            )));
        }
        self.position += count;
        Ok(())
    }
}

impl Read for MmapIndexInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = {
            let remaining = self.remaining();
            let count = buf.len().min(remaining.len());
            buf[..count].copy_from_slice(&remaining[..count]);
            count
        };
        self.position += count;
        Ok(count)
    }
}
