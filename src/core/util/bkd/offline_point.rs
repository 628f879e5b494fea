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

use crate::core::codec::codec_util::{check_footer, footer_length, write_footer};
use crate::core::store::directory::Directory;
use crate::core::store::io::{
    BufferedChecksumIndexInput, DataOutput, IndexInput, IndexOutput,
};
use crate::core::store::IOContext;
use crate::core::util::bkd::{BKDConfig, PointReader, PointReaderEnum, PointWriter};
use crate::core::util::DocId;

use crate::error::ErrorKind::{IllegalArgument, IllegalState};
use crate::error::Result;

use std::io::Write;
use std::sync::Arc;

enum OfflineInput {
    Plain(Box<dyn IndexInput>),
    // used when the whole file is read, so the footer can be verified at the end
    Checksum(BufferedChecksumIndexInput),
}

impl OfflineInput {
    fn input(&mut self) -> &mut dyn IndexInput {
        match self {
            OfflineInput::Plain(i) => i.as_mut(),
            OfflineInput::Checksum(i) => i,
        }
    }
}

/// Reads points back from a temp file written by `OfflinePointWriter`.
pub struct OfflinePointReader {
    count_left: usize,
    input: OfflineInput,
    packed_value: Vec<u8>,
    doc_id: DocId,
    name: String,
}

impl OfflinePointReader {
    pub fn new<D: Directory + ?Sized>(
        temp_dir: &D,
        temp_file_name: &str,
        config: &BKDConfig,
        start: usize,
        length: usize,
    ) -> Result<OfflinePointReader> {
        let bytes_per_doc = config.bytes_per_doc();
        let footer_length = footer_length();
        let file_length = temp_dir.file_length(temp_file_name)? as usize;

        if (start + length) * bytes_per_doc + footer_length > file_length {
            bail!(IllegalArgument(format!(
                "requested slice is beyond the length of this file: start={} length={} \
                 bytes_per_doc={} file_length={} temp_file_name={}",
                start, length, bytes_per_doc, file_length, temp_file_name
            )));
        }

        let mut input = if start == 0 && length * bytes_per_doc == file_length - footer_length {
            OfflineInput::Checksum(temp_dir.open_checksum_input(temp_file_name, &IOContext::READ_ONCE)?)
        } else {
            // reading a slice in the middle of the file, the full file gets
            // verified at another level of the recursion
            let mut input = temp_dir.open_input(temp_file_name, &IOContext::READ_ONCE)?;
            input.seek((start * bytes_per_doc) as i64)?;
            OfflineInput::Plain(input)
        };

        if length == 0 {
            if let OfflineInput::Checksum(ref mut i) = input {
                check_footer(i)?;
            }
        }

        Ok(OfflinePointReader {
            count_left: length,
            input,
            packed_value: vec![0u8; config.packed_bytes_length()],
            doc_id: 0,
            name: temp_file_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PointReader for OfflinePointReader {
    fn next(&mut self) -> Result<bool> {
        if self.count_left == 0 {
            return Ok(false);
        }
        self.count_left -= 1;

        let len = self.packed_value.len();
        let input = self.input.input();
        input.read_bytes(&mut self.packed_value, 0, len)?;
        self.doc_id = input.read_int()?;

        if self.count_left == 0 {
            if let OfflineInput::Checksum(ref mut i) = self.input {
                check_footer(i)?;
            }
        }
        Ok(true)
    }

    fn packed_value(&self) -> &[u8] {
        &self.packed_value
    }

    fn doc_id(&self) -> DocId {
        self.doc_id
    }
}

/// Writes points to a temp file in the directory, each point as its packed
/// value followed by the big-endian doc id. `close` appends a codec footer.
pub struct OfflinePointWriter<D: Directory> {
    temp_dir: Arc<D>,
    output: Option<D::TempOutput>,
    name: String,
    config: BKDConfig,
    count: i64,
    expected_count: i64,
    closed: bool,
}

impl<D: Directory> OfflinePointWriter<D> {
    pub fn new(
        temp_dir: Arc<D>,
        temp_file_name_prefix: &str,
        config: BKDConfig,
        desc: &str,
        expected_count: i64,
    ) -> Result<OfflinePointWriter<D>> {
        let output = temp_dir.create_temp_output(
            temp_file_name_prefix,
            &format!("bkd_{}", desc),
            &IOContext::Default,
        )?;
        let name = output.name().to_string();

        Ok(OfflinePointWriter {
            temp_dir,
            output: Some(output),
            name,
            config,
            count: 0,
            expected_count,
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D: Directory> PointWriter for OfflinePointWriter<D> {
    fn append(&mut self, packed_value: &[u8], doc_id: DocId) -> Result<()> {
        if packed_value.len() != self.config.packed_bytes_length() {
            bail!(IllegalArgument(format!(
                "packed_value should be length={}, got {}",
                self.config.packed_bytes_length(),
                packed_value.len()
            )));
        }
        let output = match self.output.as_mut() {
            Some(output) => output,
            None => bail!(IllegalState(format!("{} is already closed", self.name))),
        };

        output.write_bytes(packed_value, 0, packed_value.len())?;
        output.write_int(doc_id)?;
        self.count += 1;
        debug_assert!(self.expected_count == 0 || self.count <= self.expected_count);
        Ok(())
    }

    fn point_reader(&self, start: usize, length: usize) -> Result<PointReaderEnum<'_>> {
        if !self.closed {
            bail!(IllegalState(format!(
                "point writer {} must be closed before reading",
                self.name
            )));
        }
        if (start + length) as i64 > self.count {
            bail!(IllegalArgument(format!(
                "start={} length={} is beyond count={}",
                start, length, self.count
            )));
        }
        let reader =
            OfflinePointReader::new(self.temp_dir.as_ref(), &self.name, &self.config, start, length)?;
        Ok(PointReaderEnum::Offline(reader))
    }

    fn count(&self) -> i64 {
        self.count
    }

    fn destroy(&mut self) -> Result<()> {
        self.output = None;
        self.temp_dir.delete_file(&self.name)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            if let Some(mut output) = self.output.take() {
                write_footer(&mut output)?;
                output.flush()?;
            }
            self.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::directory::FSDirectory;
    use crate::error::{Error, ErrorKind::CorruptIndex};

    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom};

    fn new_writer(dir: &Arc<FSDirectory>, config: BKDConfig) -> OfflinePointWriter<FSDirectory> {
        let mut writer =
            OfflinePointWriter::new(Arc::clone(dir), "field", config, "spill", 0).unwrap();
        for i in 0..100i32 {
            let value = [(i >> 8) as u8, i as u8, 7, (100 - i) as u8];
            writer.append(&value, i * 3).unwrap();
        }
        writer
    }

    #[test]
    fn test_write_and_read_slices() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let config = BKDConfig::new(2, 2, 2, 16).unwrap();
        let mut writer = new_writer(&dir, config);
        assert_eq!(writer.count(), 100);
        assert!(writer.name().starts_with("field_bkd_spill"));

        // not closed yet
        assert!(writer.point_reader(0, 10).is_err());
        writer.close().unwrap();
        assert!(writer.append(&[0, 0, 0, 0], 1).is_err());

        let mut reader = writer.point_reader(40, 5).unwrap();
        let mut seen = vec![];
        while reader.next().unwrap() {
            assert_eq!(reader.packed_value()[2], 7);
            seen.push(reader.doc_id());
        }
        assert_eq!(seen, vec![120, 123, 126, 129, 132]);

        let mut reader = writer.point_reader(0, 100).unwrap();
        let mut n = 0;
        while reader.next().unwrap() {
            assert_eq!(reader.packed_value()[1], n as u8);
            n += 1;
        }
        assert_eq!(n, 100);

        assert!(writer.point_reader(90, 11).is_err());

        writer.destroy().unwrap();
        assert!(dir.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_full_read_detects_corruption() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = Arc::new(FSDirectory::new(temp_dir.path()).unwrap());
        let config = BKDConfig::new(2, 2, 2, 16).unwrap();
        let mut writer = new_writer(&dir, config);
        writer.close().unwrap();

        {
            let mut file = OpenOptions::new()
                .write(true)
                .open(dir.resolve(writer.name()))
                .unwrap();
            file.seek(SeekFrom::Start(10)).unwrap();
            file.write_all(&[0xAB]).unwrap();
        }

        // a slice is not verified
        let mut reader = writer.point_reader(50, 10).unwrap();
        while reader.next().unwrap() {}

        let mut reader = writer.point_reader(0, 100).unwrap();
        let result = (|| -> Result<()> {
            while reader.next()? {}
            Ok(())
        })();
        match result {
            Err(Error(CorruptIndex(_), _)) => {}
            other => panic!("expected corruption, got {:?}", other),
        }
    }
}
