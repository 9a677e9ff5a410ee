// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use bitflags::bitflags;

/// The allocation state of a region of address space, as reported by the
/// operating system's page-query primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    /// The region is not reserved or committed; it is available for a
    /// fresh allocation.
    Free,

    /// The region is reserved but has no backing storage committed.
    Reserved,

    /// The region is committed and backed by storage.
    Committed,
}

bitflags! {
    /// Opaque page protection bits.
    ///
    /// The exact bit assignment is platform-specific (it mirrors the
    /// reference platform's `PAGE_*` constants); this crate only ever
    /// compares or carries these bits, it never interprets them.
    pub struct PageProtection: u32 {
        const NONE = 0;
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// A single contiguous region of a process's address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRecord {
    /// The first address in the region.
    pub base: u64,

    /// The number of bytes in the region.
    pub size: u64,

    /// The region's allocation state.
    pub state: PageState,

    /// The region's current protection.
    pub protection: PageProtection,
}

impl PageRecord {
    /// Returns the address just past the end of the region.
    pub const fn end(&self) -> u64 {
        self.base + self.size
    }

    /// Returns whether the region is [`PageState::Free`].
    pub const fn is_free(&self) -> bool {
        matches!(self.state, PageState::Free)
    }

    /// Returns whether the region is [`PageState::Committed`].
    pub const fn is_committed(&self) -> bool {
        matches!(self.state, PageState::Committed)
    }
}
