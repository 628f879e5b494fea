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

mod data_input;

pub use self::data_input::*;

mod index_input;

pub use self::index_input::*;

mod buffered_checksum_index_input;

pub use self::buffered_checksum_index_input::*;

mod mmap_index_input;

pub use self::mmap_index_input::*;

mod data_output;

pub use self::data_output::*;

mod index_output;

pub use self::index_output::*;

mod fs_index_output;

pub use self::fs_index_output::*;

mod byte_array_data_input;

pub use self::byte_array_data_input::*;

mod ram_output;

pub use self::ram_output::*;
