// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use core::fmt;

/// An error from a [`MemorySource`](crate::MemorySource) read or write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceError {
    /// The address range could not be read.
    Unreadable(i32),

    /// The address range could not be written.
    Unwritable(i32),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unreadable(code) => write!(f, "memory unreadable (os code {})", code),
            SourceError::Unwritable(code) => write!(f, "memory unwritable (os code {})", code),
        }
    }
}

impl std::error::Error for SourceError {}

/// An error from a [`PageEnumerator`](crate::PageEnumerator) walk.
///
/// Enumeration terminates the sequence on failure rather than panicking or
/// yielding a partial, possibly-misleading record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnumerateError(pub i32);

impl fmt::Display for EnumerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page enumeration failed (os code {})", self.0)
    }
}

impl std::error::Error for EnumerateError {}
