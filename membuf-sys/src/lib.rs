// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Address ranges and the capabilities needed to place a buffer inside a
//! process's address space.
//!
//! This crate deliberately knows nothing about buffers, magic tags, or
//! headers — see the `membuffers` crate for that. It only provides:
//!
//! - [`AddressRange`]: a half-open `[start, end)` interval.
//! - [`PageState`] and [`PageRecord`]: the shape of a single address-space
//!   region as reported by the operating system.
//! - [`MemorySource`]: read/write access to a target process's memory.
//! - [`PageEnumerator`]: a lazy, single-pass walk of a target process's
//!   address space.
//! - [`InProcessMemorySource`] and [`InProcessPageEnumerator`]: the only
//!   concrete implementations this crate ships, both operating on the
//!   current process. A cross-process implementation is a matter of
//!   wiring up the same two traits to platform calls such as
//!   `ReadProcessMemory`/`WriteProcessMemory`/`VirtualQueryEx`; that
//!   wiring is out of scope here.

mod address_range;
mod error;
mod page;
mod source;

pub use address_range::AddressRange;
pub use error::{EnumerateError, SourceError};
pub use page::{PageProtection, PageRecord, PageState};
pub use source::{
    InProcessMemorySource, InProcessPageEnumerator, InProcessPages, MemorySource, PageEnumerator,
    SystemInfo,
};

/// The minimum alignment of a fresh OS allocation's base address.
///
/// 64 KiB on Windows x86/x64, the reference platform for this crate; other
/// targets may require a different value, but none is implemented here
/// (see the crate-level docs).
pub const ALLOCATION_GRANULARITY: u64 = 64 * 1024;

/// The page size this crate assumes when the host does not report one, or
/// when the reported size is smaller than is useful to round against.
pub const DEFAULT_PAGE_SIZE: u64 = 4 * 1024;

/// Rounds `n` up to the nearest multiple of `m`.
///
/// Returns `n` unchanged if `m == 0`.
pub const fn round_up(n: u64, m: u64) -> u64 {
    if m == 0 {
        return n;
    }
    let rem = n % m;
    if rem == 0 {
        n
    } else {
        n + (m - rem)
    }
}

/// Rounds `n` down to the nearest multiple of `m`.
///
/// Returns `n` unchanged if `m == 0`.
pub const fn round_down(n: u64, m: u64) -> u64 {
    if m == 0 {
        return n;
    }
    n - (n % m)
}
