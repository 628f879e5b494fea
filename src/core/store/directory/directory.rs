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

use std::collections::HashSet;
use std::fmt;

use crate::core::store::io::{BufferedChecksumIndexInput, IndexInput, IndexOutput};
use crate::core::store::IOContext;
use crate::error::Result;

/// A Directory is a flat list of files.
///
/// Files may be written once, when they are created. Once a file is created it may only
/// be opened for read, or deleted.
pub trait Directory: fmt::Display {
    type IndexOutput: IndexOutput;
    type TempOutput: IndexOutput;

    /// Returns the names of all entries in the directory, sorted.
    fn list_all(&self) -> Result<Vec<String>>;

    fn file_length(&self, name: &str) -> Result<i64>;

    /// Creates a new, empty file in the directory with the given name.
    /// Returns a stream writing this file.
    fn create_output(&self, name: &str, context: &IOContext) -> Result<Self::IndexOutput>;

    fn open_input(&self, name: &str, ctx: &IOContext) -> Result<Box<dyn IndexInput>>;

    fn open_checksum_input(
        &self,
        name: &str,
        ctx: &IOContext,
    ) -> Result<BufferedChecksumIndexInput> {
        let input = self.open_input(name, ctx)?;
        Ok(BufferedChecksumIndexInput::new(input))
    }

    /// Creates a new file whose name is derived from `prefix` and `suffix`
    /// and is guaranteed not to collide with any other temp file of this directory.
    fn create_temp_output(
        &self,
        prefix: &str,
        suffix: &str,
        ctx: &IOContext,
    ) -> Result<Self::TempOutput>;

    fn delete_file(&self, name: &str) -> Result<()>;

    /// Files created through this directory that still exist, if it tracks them.
    fn create_files(&self) -> HashSet<String> {
        HashSet::new()
    }
}
