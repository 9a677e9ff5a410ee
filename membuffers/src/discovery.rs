// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Walking a [`PageEnumerator`] to find already-placed buffers.

use log::debug;
use membuf_sys::{AddressRange, MemorySource, PageEnumerator};

use crate::buffer::Buffer;
use crate::header::BufferHeader;
use crate::placement::BUFFER_OVERHEAD;

/// A read-only snapshot of a discovered buffer, produced before any
/// [`Buffer`] handle exists for it.
///
/// Separating "where buffers are" from "a handle to append to one" keeps
/// a scan cheap: building a `Buffer` for every candidate just to filter
/// most of them back out would mean re-probing the magic tag twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    /// The address of the buffer's magic tag.
    pub address: u64,

    /// The address of the buffer's first payload byte.
    pub data_ptr: u64,

    /// The total payload size.
    pub size: u64,

    /// Bytes of payload not yet used, at scan time.
    pub remaining: u64,
}

/// Walks `pages`, inspecting every committed region for the canonical
/// magic tag, and returns a snapshot of every buffer found.
///
/// This is a point-in-time view: buffers created concurrently with the
/// scan may be missed, and two back-to-back scans with no intervening
/// `create` return the same set.
pub fn scan<S, E>(source: &S, pages: &E) -> Vec<BufferInfo>
where
    S: MemorySource,
    E: PageEnumerator,
{
    let mut found = Vec::new();

    for record in pages.enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(_) => break,
        };

        if !record.is_committed() {
            continue;
        }

        // Buffers always start at a granularity-aligned address, which is
        // also a region base, so probing only `record.base` is sufficient
        // rather than scanning every offset within the region.
        if !Buffer::is_buffer(source, record.base) {
            continue;
        }

        let header_addr = record.base + crate::magic::MAGIC.len() as u64;
        let header = match BufferHeader::read(source, header_addr) {
            Ok(header) => header,
            Err(_) => continue,
        };

        found.push(BufferInfo {
            address: record.base,
            data_ptr: header.data_ptr,
            size: header.size,
            remaining: header.remaining(),
        });
    }

    debug!("discovery: found {} buffer(s)", found.len());
    found
}

/// Filters `buffers` to those whose payload lies fully inside `range` and
/// which have at least `min_free_bytes` remaining.
pub fn filter(buffers: &[BufferInfo], min_free_bytes: u64, range: AddressRange) -> Vec<BufferInfo> {
    buffers
        .iter()
        .copied()
        .filter(|b| {
            let payload = AddressRange::new(b.data_ptr, b.data_ptr + b.size);
            range.contains(&payload) && b.remaining >= min_free_bytes
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Options, Placement};
    use membuf_sys::{EnumerateError, InProcessMemorySource, PageProtection, PageRecord, PageState};

    struct FixedPages(Vec<PageRecord>);

    impl PageEnumerator for FixedPages {
        type Iter = std::vec::IntoIter<Result<PageRecord, EnumerateError>>;

        fn enumerate(&self) -> Self::Iter {
            self.0.iter().copied().map(Ok).collect::<Vec<_>>().into_iter()
        }
    }

    fn make_buffer(source: &InProcessMemorySource, payload: u64) -> u64 {
        let total = BUFFER_OVERHEAD + payload;
        let backing = vec![0u8; total as usize].into_boxed_slice();
        let addr = Box::into_raw(backing) as *mut u8 as u64;
        let placement = Placement {
            address: addr,
            total_size: total,
        };
        Buffer::create(source, placement, true, Options::default()).unwrap();
        addr
    }

    fn committed(base: u64, size: u64) -> PageRecord {
        PageRecord {
            base,
            size,
            state: PageState::Committed,
            protection: PageProtection::READ | PageProtection::WRITE,
        }
    }

    #[test]
    fn scan_finds_every_created_buffer() {
        let source = InProcessMemorySource;
        let a = make_buffer(&source, 64);
        let b = make_buffer(&source, 128);

        let pages = FixedPages(vec![
            committed(a, BUFFER_OVERHEAD + 64),
            committed(b, BUFFER_OVERHEAD + 128),
        ]);

        let found = scan(&source, &pages);
        let addrs: Vec<_> = found.iter().map(|b| b.address).collect();
        assert!(addrs.contains(&a));
        assert!(addrs.contains(&b));
        for info in &found {
            assert_eq!(info.data_ptr, info.address + BUFFER_OVERHEAD);
        }
    }

    #[test]
    fn scan_ignores_committed_regions_without_the_magic() {
        let source = InProcessMemorySource;
        let plain = vec![0u8; 64].into_boxed_slice();
        let addr = Box::into_raw(plain) as *mut u8 as u64;

        let pages = FixedPages(vec![committed(addr, 64)]);
        assert!(scan(&source, &pages).is_empty());
    }

    #[test]
    fn filter_excludes_buffers_outside_the_range() {
        let a = BufferInfo {
            address: 0x1000_0000,
            data_ptr: 0x1000_0030,
            size: 256,
            remaining: 256,
        };
        let b = BufferInfo {
            address: 0x3000_0000,
            data_ptr: 0x3000_0030,
            size: 256,
            remaining: 256,
        };

        let result = filter(&[a, b], 1, AddressRange::new(0x2000_0000, 0x4000_0000));
        assert_eq!(result, vec![b]);
    }

    #[test]
    fn filter_excludes_buffers_with_too_little_remaining_space() {
        let a = BufferInfo {
            address: 0x1000_0000,
            data_ptr: 0x1000_0030,
            size: 256,
            remaining: 4,
        };

        let result = filter(&[a], 16, AddressRange::new(0, u64::MAX));
        assert!(result.is_empty());
    }
}
