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

use crate::error::{ErrorKind::CorruptIndex, Result};

use crate::core::codec::points::IntersectVisitor;
use crate::core::store::io::{DataInput, DataOutput};
use crate::core::util::bit_util::UnsignedShift;
use crate::core::util::DocId;

/// Encodes the doc ids of one leaf block.
///
/// A leading byte picks the layout: `0` for sorted ids stored as vint deltas,
/// `24` for ids below 2^24 stored in three bytes each, `32` for raw ints.
pub struct DocIdsWriter;

impl DocIdsWriter {
    pub fn write_doc_ids(
        out: &mut impl DataOutput,
        doc_ids: &[DocId],
        start: usize,
        count: usize,
    ) -> Result<()> {
        let doc_ids = &doc_ids[start..start + count];
        // docs can be sorted either when all docs in a block have the same value
        // or when a segment is sorted
        let sorted = doc_ids.windows(2).all(|w| w[0] <= w[1]);

        if sorted {
            out.write_byte(0)?;
            let mut previous = 0;
            for &doc in doc_ids {
                out.write_vint(doc - previous)?;
                previous = doc;
            }
        } else {
            let max = doc_ids
                .iter()
                .fold(0u64, |max, &doc| max | u64::from(doc as u32));

            if max <= 0x00FF_FFFF {
                out.write_byte(24)?;
                for &doc in doc_ids {
                    out.write_short(doc.unsigned_shift(8) as i16)?;
                    out.write_byte(doc as u8)?;
                }
            } else {
                out.write_byte(32)?;
                for &doc in doc_ids {
                    out.write_int(doc)?;
                }
            }
        }

        Ok(())
    }

    /// Read `count` integers into `doc_ids`.
    pub fn read_ints<I: DataInput + ?Sized>(
        input: &mut I,
        count: usize,
        doc_ids: &mut [DocId],
    ) -> Result<()> {
        let bpv = input.read_byte()?;

        match bpv {
            0 => DocIdsWriter::read_delta_vints(input, count, doc_ids),
            32 => DocIdsWriter::read_ints32(input, count, doc_ids),
            24 => DocIdsWriter::read_ints24(input, count, doc_ids),
            _ => bail!(CorruptIndex(format!(
                "Unsupported number of bits per value: {}",
                bpv
            ))),
        }
    }

    fn read_delta_vints<I: DataInput + ?Sized>(
        input: &mut I,
        count: usize,
        doc_ids: &mut [DocId],
    ) -> Result<()> {
        let mut doc = 0;
        for id in doc_ids.iter_mut().take(count) {
            doc += input.read_vint()?;
            *id = doc;
        }

        Ok(())
    }

    fn read_ints32<I: DataInput + ?Sized>(
        input: &mut I,
        count: usize,
        doc_ids: &mut [DocId],
    ) -> Result<()> {
        for id in doc_ids.iter_mut().take(count) {
            *id = input.read_int()?;
        }

        Ok(())
    }

    fn read_ints24<I: DataInput + ?Sized>(
        input: &mut I,
        count: usize,
        doc_ids: &mut [DocId],
    ) -> Result<()> {
        let mut i = 0usize;

        // eight 3-byte ids fill exactly three longs
        while i + 7 < count {
            let l1 = input.read_long()?;
            let l2 = input.read_long()?;
            let l3 = input.read_long()?;

            doc_ids[i] = l1.unsigned_shift(40) as i32;
            doc_ids[i + 1] = (l1.unsigned_shift(16) & 0xFF_FFFF) as i32;
            doc_ids[i + 2] = (((l1 & 0xFFFF) << 8) | l2.unsigned_shift(56)) as i32;
            doc_ids[i + 3] = (l2.unsigned_shift(32) & 0xFF_FFFF) as i32;
            doc_ids[i + 4] = (l2.unsigned_shift(8) & 0xFF_FFFF) as i32;
            doc_ids[i + 5] = (((l2 & 0xFF) << 16) | l3.unsigned_shift(48)) as i32;
            doc_ids[i + 6] = (l3.unsigned_shift(24) & 0xFF_FFFF) as i32;
            doc_ids[i + 7] = (l3 & 0xFF_FFFF) as i32;

            i += 8;
        }

        for id in doc_ids.iter_mut().take(count).skip(i) {
            let l1 = u32::from(input.read_short()? as u16);
            let l2 = u32::from(input.read_byte()?);
            *id = ((l1 << 8) | l2) as i32;
        }

        Ok(())
    }

    /// Read `count` integers and feed the result directly to `IntersectVisitor::visit`.
    pub fn read_ints_with_visitor<I: DataInput + ?Sized, V: IntersectVisitor + ?Sized>(
        input: &mut I,
        count: usize,
        visitor: &mut V,
    ) -> Result<()> {
        let bpv = input.read_byte()?;

        match bpv {
            0 => {
                let mut doc = 0;
                for _ in 0..count {
                    doc += input.read_vint()?;
                    visitor.visit(doc)?;
                }
            }
            32 => {
                for _ in 0..count {
                    visitor.visit(input.read_int()?)?;
                }
            }
            24 => {
                for _ in 0..count {
                    let l1 = u32::from(input.read_short()? as u16);
                    let l2 = u32::from(input.read_byte()?);
                    visitor.visit(((l1 << 8) | l2) as i32)?;
                }
            }
            _ => bail!(CorruptIndex(format!(
                "Unsupported number of bits per value: {}",
                bpv
            ))),
        }

        Ok(())
    }
}
