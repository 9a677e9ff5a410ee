// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The placement algorithm: given a requested payload size and an address
//! window, finds where a buffer can be committed.

use log::{debug, trace};
use membuf_sys::{round_down, round_up, AddressRange, MemorySource, PageEnumerator};

use crate::header::HEADER_SIZE;
use crate::magic::MAGIC;
use crate::Error;

/// Bytes of bookkeeping every buffer carries before its payload: the magic
/// tag plus the header.
pub const BUFFER_OVERHEAD: u64 = MAGIC.len() as u64 + HEADER_SIZE as u64;

/// A placement the scan accepted: a start address and the total size
/// (payload plus [`BUFFER_OVERHEAD`]) to commit there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    /// The address to commit the buffer at.
    pub address: u64,

    /// The total number of bytes to commit, a multiple of the effective
    /// page size.
    pub total_size: u64,
}

impl Placement {
    /// Scans `pages` for a region in which a buffer of `payload_size` bytes
    /// can be committed, with every byte of the buffer lying inside
    /// `[min, max)`.
    ///
    /// Returns [`Error::NoSuitableRegion`] if no free page yields an
    /// acceptable candidate.
    pub fn find<S, E>(source: &S, pages: &E, payload_size: u64, min: u64, max: u64) -> Result<Self, Error>
    where
        S: MemorySource,
        E: PageEnumerator,
    {
        let window = AddressRange::new(min, max);
        let info = source.system_info();
        let page_size = std::cmp::max(membuf_sys::DEFAULT_PAGE_SIZE, info.page_size);
        let page_size = round_up(page_size, info.page_size.max(1));
        let granularity = info.allocation_granularity;

        let total_size = round_up(payload_size + BUFFER_OVERHEAD, page_size);

        for record in pages.enumerate() {
            let record = record?;

            if !record.is_free() {
                trace!("placement: skipping page at {:#x}, not free", record.base);
                continue;
            }

            let page = AddressRange::new(record.base, record.end());
            if !page.overlaps(&window) {
                trace!("placement: skipping page at {:#x}, outside window", record.base);
                continue;
            }

            let candidates = [
                round_down(page.end().saturating_sub(total_size), granularity),
                round_up(page.start(), granularity),
                round_down(max.saturating_sub(total_size), granularity),
                round_up(min, granularity),
            ];

            for candidate in candidates {
                let span = AddressRange::new(candidate, candidate + total_size);
                if page.contains(&span) && window.contains(&span) {
                    debug!(
                        "placement: accepted {:#x}..{:#x} in page {:#x}..{:#x}",
                        span.start(),
                        span.end(),
                        page.start(),
                        page.end()
                    );
                    return Ok(Placement {
                        address: candidate,
                        total_size,
                    });
                }
            }
        }

        Err(Error::NoSuitableRegion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membuf_sys::{InProcessMemorySource, PageProtection, PageRecord, PageState};

    struct FixedPages(Vec<PageRecord>);

    impl PageEnumerator for FixedPages {
        type Iter = std::vec::IntoIter<Result<PageRecord, membuf_sys::EnumerateError>>;

        fn enumerate(&self) -> Self::Iter {
            self.0
                .iter()
                .copied()
                .map(Ok)
                .collect::<Vec<_>>()
                .into_iter()
        }
    }

    fn free_page(base: u64, size: u64) -> PageRecord {
        PageRecord {
            base,
            size,
            state: PageState::Free,
            protection: PageProtection::NONE,
        }
    }

    #[test]
    fn finds_a_placement_inside_a_large_free_page() {
        let source = InProcessMemorySource;
        let pages = FixedPages(vec![free_page(0x1_0000_0000, 0x10_0000)]);

        let placement = Placement::find(&source, &pages, 256, 0, u64::MAX).unwrap();

        assert_eq!(placement.address % membuf_sys::ALLOCATION_GRANULARITY, 0);
        assert!(placement.total_size >= 256 + BUFFER_OVERHEAD);
        let span = AddressRange::new(placement.address, placement.address + placement.total_size);
        assert!(AddressRange::new(0x1_0000_0000, 0x1_0000_0000 + 0x10_0000).contains(&span));
    }

    #[test]
    fn respects_a_narrow_window() {
        let source = InProcessMemorySource;
        let pages = FixedPages(vec![free_page(0, 0x1_0000_0000)]);
        let min = 0x1000_0000u64;
        let max = 0x2000_0000u64;

        let placement = Placement::find(&source, &pages, 256, min, max).unwrap();

        let span = AddressRange::new(placement.address, placement.address + placement.total_size);
        assert!(AddressRange::new(min, max).contains(&span));
        assert_eq!(placement.address % membuf_sys::ALLOCATION_GRANULARITY, 0);
    }

    #[test]
    fn fails_when_the_window_cannot_fit_a_buffer() {
        let source = InProcessMemorySource;
        let pages = FixedPages(vec![free_page(0, 0x1_0000_0000)]);

        let result = Placement::find(&source, &pages, 256, 0x1234, 0x1234);
        assert_eq!(result, Err(Error::NoSuitableRegion));
    }

    #[test]
    fn ignores_pages_outside_the_window() {
        let source = InProcessMemorySource;
        let pages = FixedPages(vec![free_page(0x1000_0000, 0x1000)]);

        let result = Placement::find(&source, &pages, 256, 0x9000_0000, 0xa000_0000);
        assert_eq!(result, Err(Error::NoSuitableRegion));
    }

    #[test]
    fn ignores_non_free_pages() {
        let source = InProcessMemorySource;
        let pages = FixedPages(vec![PageRecord {
            base: 0x1000_0000,
            size: 0x10_0000,
            state: PageState::Reserved,
            protection: PageProtection::NONE,
        }]);

        let result = Placement::find(&source, &pages, 256, 0, u64::MAX);
        assert_eq!(result, Err(Error::NoSuitableRegion));
    }
}
