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

pub mod directory;
pub mod io;

/// Hints passed to a `Directory` describing how a file is going to be used.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum IOContext {
    /// Read access; `true` means the file is read once, sequentially.
    Read(bool),
    Default,
}

impl IOContext {
    pub const READ: IOContext = IOContext::Read(false);
    pub const READ_ONCE: IOContext = IOContext::Read(true);
}
