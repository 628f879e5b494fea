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

//! Block k-d tree point index.
//!
//! Points are fixed-width byte values with one or more dimensions, each tagged with a
//! document id. `BKDWriter` bulk-builds a balanced tree of bounding cells over them
//! and writes it through a `Directory`; `BKDReader` answers range style queries by
//! walking that tree with a caller supplied `IntersectVisitor`.

#![recursion_limit = "1024"]
#![allow(clippy::cast_lossless)]

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;

extern crate byteorder;
extern crate crc;
extern crate flate2;
extern crate memmap;

pub mod core;
pub mod error;

pub use crate::core::codec::points::{IntersectVisitor, Relation};
pub use crate::core::util::bkd::{BKDConfig, BKDReader, BKDWriter};
