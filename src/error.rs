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

use std::sync::PoisonError;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    errors {
        Poisoned {
            description("a thread holding the locked panicked and poisoned the lock")
        }

        IllegalState(desc: String) {
            description(desc)
            display("Illegal state: {}", desc)
        }

        IllegalArgument(desc: String) {
            description(desc)
            display("Illegal argument: {}", desc)
        }

        UnexpectedEOF(errmsg: String) {
            description(errmsg)
            display("Unexpected EOF: {}", errmsg)
        }

        CorruptIndex(errmsg: String) {
            description(errmsg)
            display("Corrupt Index: {}", errmsg)
        }

        // returned by an `IntersectVisitor` to stop a traversal early
        IntersectTerminated {
            description("Intersect terminated")
        }
    }

    foreign_links {
        IoError(::std::io::Error);
        FromUtf8Err(::std::string::FromUtf8Error);
        SerdeJsonError(::serde_json::Error);
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_: PoisonError<Guard>) -> Error {
        ErrorKind::Poisoned.into()
    }
}

impl Error {
    /// Whether this error is the early-termination signal raised by a visitor.
    pub fn is_terminated(&self) -> bool {
        match self.kind() {
            ErrorKind::IntersectTerminated => true,
            _ => false,
        }
    }
}
