// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! [`Helper`]: the single entry point composing placement, buffer
//! creation, and discovery.

use std::sync::Mutex;

use log::warn;
use membuf_sys::{AddressRange, MemorySource, PageEnumerator};

use crate::discovery::{self, BufferInfo};
use crate::options::Options;
use crate::{Buffer, Error, Placement};

struct Cache {
    buffers: Vec<BufferInfo>,
    generation: u64,
}

/// Finds an existing buffer meeting a caller's constraints, or creates
/// one: the façade composing [`Placement`], [`Buffer`], and
/// [`discovery`](crate::discovery).
pub struct Helper<'s, S: MemorySource, E: PageEnumerator> {
    source: &'s S,
    pages: E,
    options: Options,
    /// Guards both the discovery cache and the create-retry loop:
    /// staleness between a scan and a commit is otherwise exactly the
    /// kind of race the retry loop exists to paper over.
    state: Mutex<Cache>,
}

impl<'s, S: MemorySource, E: PageEnumerator> Helper<'s, S, E> {
    /// Builds a `Helper` over `source`/`pages` with default [`Options`].
    pub fn new(source: &'s S, pages: E) -> Self {
        Self::with_options(source, pages, Options::default())
    }

    /// Builds a `Helper` with explicit [`Options`].
    pub fn with_options(source: &'s S, pages: E, options: Options) -> Self {
        Helper {
            source,
            pages,
            options,
            state: Mutex::new(Cache {
                buffers: Vec::new(),
                generation: 0,
            }),
        }
    }

    /// Runs [`Placement::find`] without creating anything.
    pub fn find_buffer_location(&self, size: u64, min: u64, max: u64) -> Result<Placement, Error> {
        Placement::find(self.source, &self.pages, size, min, max)
    }

    /// Creates a buffer of at least `size` payload bytes, entirely inside
    /// `[min, max)`.
    ///
    /// Retries placement and commit up to `self.options.create_retries`
    /// times: between a scan completing and the commit call, another
    /// thread or an external process may grab the region. Every
    /// intermediate error is the same kind (a race on commit), so only the
    /// last one is surfaced once retries are exhausted.
    pub fn create_buffer(&self, size: u64, min: u64, max: u64) -> Result<Buffer<'s, S>, Error> {
        let _guard = self.state.lock().unwrap();

        let mut last_err = Error::NoSuitableRegion;
        for attempt in 0..self.options.create_retries.max(1) {
            let placement = match self.find_buffer_location(size, min, max) {
                Ok(placement) => placement,
                Err(e) => {
                    last_err = e;
                    warn!("create_buffer: placement attempt {} failed: {}", attempt, e);
                    continue;
                }
            };

            match Buffer::create(self.source, placement, false, self.options) {
                Ok(buffer) => return Ok(buffer),
                Err(e) => {
                    last_err = e;
                    warn!("create_buffer: commit attempt {} failed: {}", attempt, e);
                }
            }
        }

        Err(last_err)
    }

    /// Returns every discovered buffer with at least `min_free_bytes`
    /// remaining, across the entire address space.
    pub fn get_buffers(&self, min_free_bytes: u64, use_cache: bool) -> Vec<Buffer<'s, S>> {
        self.get_buffers_in_range(min_free_bytes, 0, u64::MAX, use_cache)
    }

    /// As [`get_buffers`](Self::get_buffers), restricted to buffers whose
    /// payload lies fully inside `[min, max)`.
    pub fn get_buffers_in_range(
        &self,
        min_free_bytes: u64,
        min: u64,
        max: u64,
        use_cache: bool,
    ) -> Vec<Buffer<'s, S>> {
        let mut state = self.state.lock().unwrap();

        if !use_cache || state.generation == 0 {
            state.buffers = discovery::scan(self.source, &self.pages);
            state.generation += 1;
        }

        let range = AddressRange::new(min, max);
        discovery::filter(&state.buffers, min_free_bytes, range)
            .into_iter()
            .filter_map(|info| Buffer::from_address(self.source, info.address, self.options))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membuf_sys::{EnumerateError, InProcessMemorySource, PageProtection, PageRecord, PageState};
    use std::sync::Mutex as StdMutex;

    struct RegionPages(StdMutex<Vec<PageRecord>>);

    impl PageEnumerator for &RegionPages {
        type Iter = std::vec::IntoIter<Result<PageRecord, EnumerateError>>;

        fn enumerate(&self) -> Self::Iter {
            self.0.lock().unwrap().iter().copied().map(Ok).collect::<Vec<_>>().into_iter()
        }
    }

    /// Reserves (but does not commit) a chunk of this process's address
    /// space, the way `Placement` expects a genuinely free region to look:
    /// present in the address space, but not backed by anything yet.
    fn reserve(size: usize) -> u64 {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        assert_ne!(ptr, libc::MAP_FAILED, "failed to reserve test address space");
        ptr as u64
    }

    #[test]
    fn creates_and_appends_to_a_fresh_buffer() {
        let source = InProcessMemorySource;
        let base = reserve(4096);
        let pages = RegionPages(StdMutex::new(vec![PageRecord {
            base,
            size: 4096,
            state: PageState::Free,
            protection: PageProtection::NONE,
        }]));

        let helper = Helper::new(&source, &pages);
        let buffer = helper.create_buffer(256, 0, u64::MAX).unwrap();

        let addr = buffer.append(&[0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(source.read(addr, 3).unwrap(), vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn create_buffer_fails_after_retries_exhausted() {
        let source = InProcessMemorySource;
        let pages = RegionPages(StdMutex::new(vec![]));

        let helper = Helper::new(&source, &pages);
        let err = helper.create_buffer(256, 0x1234, 0x1234).unwrap_err();
        assert_eq!(err, Error::NoSuitableRegion);
    }
}
