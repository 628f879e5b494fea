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

use crate::core::store::directory::Directory;

/// Deletes a file, logging rather than propagating any failure.
pub fn delete_file_ignoring_error<D: Directory + ?Sized>(dir: &D, file: &str) {
    if let Err(e) = dir.delete_file(file) {
        warn!("delete file '{}' failed by '{:?}'", file, e);
    }
}
