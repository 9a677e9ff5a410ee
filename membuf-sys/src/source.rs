// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The [`MemorySource`] and [`PageEnumerator`] capability traits, plus the
//! only concrete implementations this crate ships: a pair that operate on
//! the current process.
//!
//! A cross-process implementation (backed by `ReadProcessMemory`,
//! `WriteProcessMemory`, and `VirtualQueryEx` on the reference platform) is
//! a matter of implementing the same two traits against a process handle;
//! it is out of scope for this crate (see the crate-level docs).

use crate::{EnumerateError, PageProtection, PageRecord, PageState, SourceError};

/// The system facts [`Placement`](../membuffers/struct.Placement.html)
/// needs before it can round anything: the page size memory is committed
/// in, and the granularity fresh allocations are based at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemInfo {
    /// The unit at which the OS commits memory, typically 4 KiB.
    pub page_size: u64,

    /// The minimum alignment of a fresh allocation's base address, 64 KiB
    /// on the reference platform.
    pub allocation_granularity: u64,
}

/// Read/write/commit access to a target process's memory.
///
/// Implementations must be safe to invoke concurrently on disjoint
/// addresses; the intra-buffer coordination in `membuffers` relies on
/// that, not on any locking inside `MemorySource` itself.
pub trait MemorySource {
    /// Reads `len` bytes starting at `addr`.
    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, SourceError>;

    /// Writes `bytes` starting at `addr`.
    fn write(&self, addr: u64, bytes: &[u8]) -> Result<(), SourceError>;

    /// Reads `len` bytes starting at `addr`, returning `None` rather than
    /// an error on failure.
    ///
    /// Discovery probes addresses that may legitimately be unreadable;
    /// `safe_read` lets it do so without matching on an error type it has
    /// no use for.
    fn safe_read(&self, addr: u64, len: usize) -> Option<Vec<u8>> {
        self.read(addr, len).ok()
    }

    /// Commits `len` bytes at exactly `addr`.
    ///
    /// Must fail if that range is not currently free; callers rely on this
    /// to detect a race with another allocator (see
    /// `Helper::create_buffer`'s retry loop).
    fn commit(&self, addr: u64, len: u64) -> Result<u64, SourceError>;

    /// Returns the page size and allocation granularity of the target.
    fn system_info(&self) -> SystemInfo;
}

/// A lazy, finite, single-pass walk of a process's address space.
///
/// Each call to [`enumerate`](PageEnumerator::enumerate) starts a fresh
/// pass, in ascending `base` order, with no gaps: every address is covered
/// by exactly one [`PageRecord`], whose state may be
/// [`PageState::Free`](crate::PageState::Free). The sequence is not
/// restartable mid-walk; a failure during enumeration ends the sequence
/// rather than panicking or yielding a partial, misleading record.
pub trait PageEnumerator {
    /// The iterator type a single pass returns.
    type Iter: Iterator<Item = Result<PageRecord, EnumerateError>>;

    /// Starts a fresh pass over the target's address space.
    fn enumerate(&self) -> Self::Iter;
}

/// The highest canonical user-space address on the reference platform's
/// 4-level paging mode. Enumeration never looks above this.
const ADDRESS_SPACE_END: u64 = 0x0000_7fff_ffff_ffff;

/// A [`MemorySource`] that reads, writes, and commits directly in the
/// current process, via ordinary pointer access and an anonymous mapping.
///
/// This is the only `MemorySource` this crate provides; it exists so that
/// `membuffers` is fully testable without any foreign-process plumbing.
#[derive(Clone, Copy, Debug, Default)]
pub struct InProcessMemorySource;

impl MemorySource for InProcessMemorySource {
    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, SourceError> {
        if addr == 0 {
            return Err(SourceError::Unreadable(0));
        }

        // Safety: the caller is responsible for `addr` designating `len`
        // readable bytes in this process; see the trait's documentation.
        // Buffer discovery always pairs this with a page-state query
        // first, so a stray read here only ever touches memory this
        // process itself committed.
        let bytes = unsafe { core::slice::from_raw_parts(addr as *const u8, len) };
        Ok(bytes.to_vec())
    }

    fn write(&self, addr: u64, bytes: &[u8]) -> Result<(), SourceError> {
        if addr == 0 {
            return Err(SourceError::Unwritable(0));
        }

        // Safety: see `read`; the caller guarantees `addr` designates
        // `bytes.len()` writable bytes it owns.
        let dst = unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, bytes.len()) };
        dst.copy_from_slice(bytes);
        Ok(())
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn commit(&self, addr: u64, len: u64) -> Result<u64, SourceError> {
        // MAP_FIXED_NOREPLACE fails rather than silently clobbering an
        // existing mapping at `addr`, which is exactly the race-detection
        // signal `Helper::create_buffer`'s retry loop depends on; plain
        // `MAP_FIXED` would instead overwrite a winning racer's buffer.
        let ptr = unsafe {
            libc::mmap(
                addr as *mut libc::c_void,
                len as libc::size_t,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_FIXED_NOREPLACE | libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SourceError::Unwritable(unsafe { *libc::__errno_location() }));
        }

        Ok(ptr as u64)
    }

    #[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
    fn commit(&self, _addr: u64, _len: u64) -> Result<u64, SourceError> {
        // `MAP_FIXED_NOREPLACE` has no equivalent on this platform; rather
        // than fall back to a `MAP_FIXED` that would silently clobber a
        // winning racer's mapping, refuse to commit at all.
        Err(SourceError::Unwritable(0))
    }

    #[cfg(not(unix))]
    fn commit(&self, _addr: u64, _len: u64) -> Result<u64, SourceError> {
        Err(SourceError::Unwritable(-1))
    }

    fn system_info(&self) -> SystemInfo {
        SystemInfo {
            page_size: region::page::size() as u64,
            allocation_granularity: crate::ALLOCATION_GRANULARITY,
        }
    }
}

/// A [`PageEnumerator`] that walks the current process's address space via
/// the operating system's page-query primitive (through the `region`
/// crate), synthesizing [`PageState::Free`] records for the gaps it
/// reports between mapped regions.
#[derive(Clone, Copy, Debug, Default)]
pub struct InProcessPageEnumerator;

impl PageEnumerator for InProcessPageEnumerator {
    type Iter = InProcessPages;

    fn enumerate(&self) -> Self::Iter {
        InProcessPages::new()
    }
}

/// The iterator returned by [`InProcessPageEnumerator::enumerate`].
pub struct InProcessPages {
    mapped: std::vec::IntoIter<PageRecord>,
    cursor: u64,
    pending: Option<PageRecord>,
    done: bool,
    failed: bool,
}

impl InProcessPages {
    fn new() -> Self {
        let mapped = match region::query_range(0usize, ADDRESS_SPACE_END as usize) {
            Ok(regions) => {
                let mut records = Vec::new();
                for region in regions {
                    match region {
                        Ok(r) => records.push(PageRecord {
                            base: r.as_range().start as u64,
                            size: r.len() as u64,
                            state: PageState::Committed,
                            protection: protection_from_region(r.protection()),
                        }),
                        Err(_) => break,
                    }
                }
                records
            }
            Err(_) => Vec::new(),
        };

        InProcessPages {
            mapped: mapped.into_iter(),
            cursor: 0,
            pending: None,
            done: false,
            failed: false,
        }
    }
}

impl Iterator for InProcessPages {
    type Item = Result<PageRecord, EnumerateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.failed {
            return None;
        }

        let next_mapped = self.pending.take().or_else(|| self.mapped.next());

        match next_mapped {
            Some(region) => {
                if self.cursor < region.base {
                    let gap = PageRecord {
                        base: self.cursor,
                        size: region.base - self.cursor,
                        state: PageState::Free,
                        protection: PageProtection::NONE,
                    };
                    self.cursor = region.base;
                    self.pending = Some(region);
                    Some(Ok(gap))
                } else {
                    self.cursor = region.end();
                    Some(Ok(region))
                }
            }
            None => {
                self.done = true;
                if self.cursor < ADDRESS_SPACE_END {
                    Some(Ok(PageRecord {
                        base: self.cursor,
                        size: ADDRESS_SPACE_END - self.cursor,
                        state: PageState::Free,
                        protection: PageProtection::NONE,
                    }))
                } else {
                    None
                }
            }
        }
    }
}

fn protection_from_region(protection: region::Protection) -> PageProtection {
    let mut out = PageProtection::NONE;
    if protection.contains(region::Protection::READ) {
        out |= PageProtection::READ;
    }
    if protection.contains(region::Protection::WRITE) {
        out |= PageProtection::WRITE;
    }
    if protection.contains(region::Protection::EXECUTE) {
        out |= PageProtection::EXECUTE;
    }
    out
}
