// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use std::fmt;

use membuf_sys::{EnumerateError, SourceError};

/// An error from placing, creating, or appending to a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// [`Placement`](crate::Placement) scanned every free page and found
    /// no candidate start address satisfying both the page and window
    /// containment tests.
    NoSuitableRegion,

    /// The operating system refused to commit memory at the address
    /// [`Placement`](crate::Placement) chose, typically because another
    /// allocator raced us for the same region.
    CommitFailed(i32),

    /// A [`MemorySource`](membuf_sys::MemorySource) read failed.
    Unreadable(i32),

    /// A [`MemorySource`](membuf_sys::MemorySource) write failed.
    Unwritable(i32),

    /// An append's payload does not fit in the buffer's remaining space.
    NoSpace,

    /// The spin-wait on a buffer's lock flag exceeded an implementation
    /// timeout.
    ///
    /// The default `Buffer::append` never returns this: the spin-wait is
    /// unbounded by design, since the lock-holder is trusted, cooperating
    /// code. `Options::lock_timeout` turns it on when a caller wants one.
    LockContention,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoSuitableRegion => write!(f, "no region satisfies the requested window"),
            Error::CommitFailed(code) => write!(f, "commit failed (os code {})", code),
            Error::Unreadable(code) => write!(f, "memory unreadable (os code {})", code),
            Error::Unwritable(code) => write!(f, "memory unwritable (os code {})", code),
            Error::NoSpace => write!(f, "buffer has insufficient remaining space"),
            Error::LockContention => write!(f, "timed out waiting for the buffer lock"),
        }
    }
}

impl std::error::Error for Error {}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unreadable(code) => Error::Unreadable(code),
            SourceError::Unwritable(code) => Error::Unwritable(code),
        }
    }
}

impl From<EnumerateError> for Error {
    fn from(_: EnumerateError) -> Self {
        // Enumeration failures surface as "found nothing usable": the
        // scan terminates early the same way it would if it had simply
        // run out of free pages.
        Error::NoSuitableRegion
    }
}
