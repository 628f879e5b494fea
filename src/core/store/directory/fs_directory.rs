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

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::store::directory::Directory;
use crate::core::store::io::{FSIndexOutput, IndexInput, MmapIndexInput};
use crate::core::store::IOContext;
use crate::core::util::to_base36;
use crate::error::ErrorKind::IllegalState;
use crate::error::Result;

/// A `Directory` over one filesystem path.
///
/// Outputs are buffered `std::fs::File` writers, inputs are memory mapped.
pub struct FSDirectory {
    pub directory: PathBuf,
    next_temp_file_counter: AtomicUsize,
}

impl FSDirectory {
    pub fn new<T: AsRef<Path> + ?Sized>(directory: &T) -> Result<FSDirectory> {
        let directory = directory.as_ref();
        if !Path::exists(directory) {
            fs::create_dir_all(directory)?;
        } else if !Path::is_dir(directory) {
            bail!(IllegalState(format!(
                "Path {:?} exists but is not directory",
                directory
            )))
        }

        Ok(FSDirectory {
            directory: From::from(directory),
            next_temp_file_counter: AtomicUsize::new(0),
        })
    }

    pub fn resolve(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    fn next_temp_file_name(&self, prefix: &str, suffix: &str) -> String {
        let n = self.next_temp_file_counter.fetch_add(1, Ordering::AcqRel);
        format!("{}_{}_{}.tmp", prefix, suffix, to_base36(n as u64))
    }
}

impl Directory for FSDirectory {
    type IndexOutput = FSIndexOutput;
    type TempOutput = FSIndexOutput;

    fn list_all(&self) -> Result<Vec<String>> {
        let mut result = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if let Ok(filename) = entry.file_name().into_string() {
                result.push(filename);
            }
        }
        result.sort();
        Ok(result)
    }

    fn file_length(&self, name: &str) -> Result<i64> {
        let path = self.resolve(name);
        let meta = fs::metadata(&path)?;
        if meta.is_dir() {
            bail!(IllegalState(format!(
                "file_length called for directory: {}",
                path.display()
            )))
        }
        Ok(meta.len() as i64)
    }

    fn create_output(&self, name: &str, _context: &IOContext) -> Result<Self::IndexOutput> {
        FSIndexOutput::new(name.to_string(), self.resolve(name))
    }

    fn open_input(&self, name: &str, _ctx: &IOContext) -> Result<Box<dyn IndexInput>> {
        Ok(Box::new(MmapIndexInput::new(name, self.resolve(name))?))
    }

    fn create_temp_output(
        &self,
        prefix: &str,
        suffix: &str,
        _ctx: &IOContext,
    ) -> Result<Self::TempOutput> {
        loop {
            let name = self.next_temp_file_name(prefix, suffix);
            let path = self.resolve(&name);
            if path.exists() {
                continue;
            }
            return FSIndexOutput::new(name, &path);
        }
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        fs::remove_file(self.resolve(name))?;
        Ok(())
    }
}

impl fmt::Display for FSDirectory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FSDirectory({})", self.directory.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::io::{DataOutput, IndexOutput};

    #[test]
    fn test_temp_output_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = FSDirectory::new(temp_dir.path()).unwrap();
        let ctx = IOContext::Default;

        let first = dir.create_temp_output("field", "bkd_spill", &ctx).unwrap();
        let second = dir.create_temp_output("field", "bkd_spill", &ctx).unwrap();
        assert_eq!(first.name(), "field_bkd_spill_0.tmp");
        assert_eq!(second.name(), "field_bkd_spill_1.tmp");
        drop(first);
        drop(second);

        assert_eq!(
            dir.list_all().unwrap(),
            vec!["field_bkd_spill_0.tmp", "field_bkd_spill_1.tmp"]
        );
        dir.delete_file("field_bkd_spill_0.tmp").unwrap();
        assert_eq!(dir.list_all().unwrap(), vec!["field_bkd_spill_1.tmp"]);
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = FSDirectory::new(temp_dir.path()).unwrap();

        {
            let mut out = dir.create_output("points.bkd", &IOContext::Default).unwrap();
            out.write_vint(1_000).unwrap();
            out.write_string("bkd").unwrap();
        }
        assert_eq!(dir.file_length("points.bkd").unwrap(), 6);
        assert!(dir
            .create_output("points.bkd", &IOContext::Default)
            .is_err());

        let mut input = dir.open_input("points.bkd", &IOContext::READ).unwrap();
        assert_eq!(input.read_vint().unwrap(), 1_000);
        assert_eq!(input.read_string().unwrap(), "bkd");
        assert_eq!(input.name(), "points.bkd");
    }
}
