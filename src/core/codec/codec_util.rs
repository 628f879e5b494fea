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

//! Utility functions for reading and writing versioned headers.
//!
//! Writing codec headers is useful to ensure that a file is in
//! the format you think it is.

use crate::core::store::io::{
    BufferedChecksumIndexInput, ChecksumIndexInput, DataInput, DataOutput, IndexInput, IndexOutput,
};

use crate::error::ErrorKind::{CorruptIndex, IllegalArgument, IllegalState};
use crate::error::Result;
use std::io::Read;

/// Constant to identify the start of a codec header.
pub const CODEC_MAGIC: i32 = 0x3FD7_6C17;
/// Constant to identify the start of a codec footer.
pub const FOOTER_MAGIC: i32 = !CODEC_MAGIC;

/// Writes a codec header, which records both a string to identify the file and a version number.
///
/// CodecHeader --> Magic,CodecName,Version
/// * Magic -->  DataOutput#write_int. This identifies the start of the header. It is always
///   `CODEC_MAGIC`.
/// * CodecName --> DataOutput#write_string. This is a string to identify this file.
/// * Version --> DataOutput#write_int. Records the version of the file.
pub fn write_header<T: DataOutput + ?Sized>(out: &mut T, codec: &str, version: i32) -> Result<()> {
    let clen = codec.len();
    if clen >= 128 {
        bail!(IllegalArgument(format!(
            "codec must be simple ASCII less than 128 characters, got {}[length={}]",
            codec, clen,
        )));
    }
    out.write_int(CODEC_MAGIC)?;
    out.write_string(codec)?;
    out.write_int(version)
}

/// Writes a codec footer, which records both a checksum
/// algorithm ID and a checksum.
///
/// CodecFooter --> Magic,AlgorithmID,Checksum
/// * Magic --> Uint32. Always `FOOTER_MAGIC`.
/// * AlgorithmID --> Uint32. Currently this is always 0, for zlib-crc32.
/// * Checksum --> Uint64. The actual checksum value for all previous bytes
///   in the stream, including the bytes from Magic and AlgorithmID.
pub fn write_footer<T: IndexOutput + ?Sized>(output: &mut T) -> Result<()> {
    output.write_int(FOOTER_MAGIC)?;
    output.write_int(0)?;
    write_crc(output)
}

/// Reads and validates a header previously written with `write_header`.
///
/// Returns the actual version, which must lie in `[min_ver, max_ver]`.
pub fn check_header<T: DataInput + ?Sized>(
    data_input: &mut T,
    codec: &str,
    min_ver: i32,
    max_ver: i32,
) -> Result<i32> {
    let actual_header = data_input.read_int()?;
    if actual_header != CODEC_MAGIC {
        bail!(CorruptIndex(format!(
            "codec header mismatch: actual=0x{:X}, expected=0x{:X}",
            actual_header, CODEC_MAGIC
        )));
    }
    check_header_no_magic(data_input, codec, min_ver, max_ver)
}

/// Like `check_header` except this version assumes the first i32 has already
/// been read and validated from the input.
pub fn check_header_no_magic<T: DataInput + ?Sized>(
    data_input: &mut T,
    codec: &str,
    min_ver: i32,
    max_ver: i32,
) -> Result<i32> {
    let actual_codec = data_input.read_string()?;
    if actual_codec != codec {
        bail!(CorruptIndex(format!(
            "codec mismatch: actual={}, expected={}",
            actual_codec, codec
        )));
    }
    let actual_ver = data_input.read_int()?;
    if actual_ver < min_ver || actual_ver > max_ver {
        bail!(CorruptIndex(format!(
            "index format either too new or too old: {} <= {} <= {} doesn't hold",
            min_ver, actual_ver, max_ver
        )));
    }
    Ok(actual_ver)
}

/// Computes the length of a codec footer.
#[inline(always)]
pub fn footer_length() -> usize {
    16
}

/// Checks that the cursor sits exactly on a footer and consumes its magic and algorithm id.
pub fn validate_footer<T: IndexInput + ?Sized>(input: &mut T) -> Result<()> {
    let remaining = input.len() as i64 - input.file_pointer();
    let expected = footer_length() as i64;

    if remaining < expected {
        bail!(CorruptIndex(format!(
            "misplaced codec footer (file truncated?): remaining={}, expected={}",
            remaining, expected
        )))
    } else if remaining > expected {
        bail!(CorruptIndex(format!(
            "misplaced codec footer (file extended?): remaining={}, expected={}",
            remaining, expected
        )))
    }

    let magic = input.read_int()?;
    if magic != FOOTER_MAGIC {
        bail!(CorruptIndex(format!(
            "codec footer mismatch: actual={} vs expected={}",
            magic, FOOTER_MAGIC
        )));
    }
    let algorithm_id = input.read_int()?;
    if algorithm_id != 0 {
        bail!(CorruptIndex(format!(
            "codec footer mismatch: unknown algorithm_id: {}",
            algorithm_id
        )));
    }
    Ok(())
}

/// Validates the codec footer previously written by `write_footer` against the
/// checksum of every byte read so far.
pub fn check_footer<T: ChecksumIndexInput + ?Sized>(input: &mut T) -> Result<i64> {
    validate_footer(input)?;
    let actual_checksum = input.checksum();
    check_checksum(input, actual_checksum)?;
    Ok(actual_checksum)
}

fn check_checksum<T: IndexInput + ?Sized>(input: &mut T, actual_checksum: i64) -> Result<()> {
    let expected_checksum = read_crc(input)?;
    if actual_checksum != expected_checksum {
        bail!(CorruptIndex(format!(
            "checksum failed (hardware problems?): expected=0x{:X}, actual=0x{:X}",
            expected_checksum, actual_checksum
        )));
    }
    Ok(())
}

fn read_crc<T: IndexInput + ?Sized>(input: &mut T) -> Result<i64> {
    let val = input.read_long()?;
    if (val as u64 & 0xFFFF_FFFF_0000_0000) != 0 {
        bail!(CorruptIndex(format!("Illegal CRC-32 checksum: {}", val)));
    }
    Ok(val)
}

fn write_crc<T: IndexOutput + ?Sized>(output: &mut T) -> Result<()> {
    let value = output.checksum()?;
    if value as u64 & 0xFFFF_FFFF_0000_0000 != 0 {
        bail!(IllegalState(format!("Illegal CRC-32 checksum: {}", value)));
    }
    output.write_long(value)
}

/// Clones the provided input, reads all bytes from the file, and verifies the footer.
///
/// Note that this method may be slow, as it must process the entire file.
pub fn checksum_entire_file<T: IndexInput + ?Sized>(input: &T) -> Result<i64> {
    let mut index = input.clone()?;
    index.seek(0)?;
    let mut checksum = BufferedChecksumIndexInput::new(index);
    let len = checksum.len();
    if len < footer_length() as u64 {
        bail!(CorruptIndex(format!(
            "misplaced codec footer (file truncated?): length={} but footer_length={}",
            len,
            footer_length()
        )));
    }
    const BUFSIZ: u64 = 1024 * 64;
    let mut buffer = [0u8; BUFSIZ as usize];
    let end = len - footer_length() as u64;
    let mut pos = 0u64;

    while pos < end {
        let size = (end - pos).min(BUFSIZ) as usize;
        let read = checksum.read(&mut buffer[..size])?;
        if read == 0 {
            bail!(CorruptIndex(format!(
                "unexpected EOF at {} while checksumming {}",
                pos,
                checksum.name()
            )));
        }
        pos += read as u64;
    }

    check_footer(&mut checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::io::{ByteArrayDataInput, RAMOutputStream};

    fn header_length(codec: &str) -> usize {
        9 + codec.len()
    }

    fn file_with_footer(payload: &[u8]) -> Vec<u8> {
        let mut out = RAMOutputStream::new(true);
        write_header(&mut out, "BKD", 3).unwrap();
        out.write_bytes(payload, 0, payload.len()).unwrap();
        write_footer(&mut out).unwrap();
        out.into_bytes()
    }

    #[test]
    fn test_header_and_footer() {
        let bytes = file_with_footer(b"points");
        assert_eq!(bytes.len(), header_length("BKD") + 6 + footer_length());

        let mut input = ByteArrayDataInput::new("bkd", bytes);
        assert_eq!(check_header(&mut input, "BKD", 0, 3).unwrap(), 3);
        let checksum = checksum_entire_file(&input).unwrap();
        input.seek((header_length("BKD") + 6 + footer_length() - 8) as i64).unwrap();
        assert_eq!(input.read_long().unwrap(), checksum);
    }

    #[test]
    fn test_header_mismatch() {
        let bytes = file_with_footer(b"");
        let mut input = ByteArrayDataInput::new("bkd", bytes.clone());
        assert!(check_header(&mut input, "KDB", 0, 3).is_err());
        let mut input = ByteArrayDataInput::new("bkd", bytes);
        assert!(check_header(&mut input, "BKD", 4, 5).is_err());
    }

    #[test]
    fn test_corrupted_byte_fails_checksum() {
        let mut bytes = file_with_footer(b"points");
        bytes[header_length("BKD") + 2] ^= 0x10;
        let input = ByteArrayDataInput::new("bkd", bytes);
        match checksum_entire_file(&input) {
            Err(crate::error::Error(CorruptIndex(_), _)) => {}
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_file() {
        let bytes = file_with_footer(b"points");
        let input = ByteArrayDataInput::new("bkd", bytes[..10].to_vec());
        assert!(checksum_entire_file(&input).is_err());
    }
}
