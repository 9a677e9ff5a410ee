// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! [`Buffer`]: the write/append protocol over an already-placed region,
//! plus discovery of a single buffer at a known address.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::warn;
use membuf_sys::MemorySource;

use crate::header::BufferHeader;
use crate::magic::{self, MAGIC};
use crate::options::Options;
use crate::Error;

/// Serializes every `Buffer::create`/`append` call made through this
/// module: it keeps two threads in *this* module from interleaving the
/// header read-lock-write-unlock cycle. It says nothing about other
/// modules, which is exactly what the header's own lock bit is for.
static APPEND_GUARD: Mutex<()> = Mutex::new(());

/// A handle to an existing, placed buffer: a magic tag and header at a
/// known address, plus a payload region appenders bump-allocate from.
pub struct Buffer<'s, S: MemorySource> {
    source: &'s S,
    address: u64,
    options: Options,
}

impl<'s, S: MemorySource> Buffer<'s, S> {
    /// The address this buffer's magic tag starts at.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The address of this buffer's header.
    fn header_addr(&self) -> u64 {
        self.address + MAGIC.len() as u64
    }

    /// Commits `placement.total_size` bytes at `placement.address` (unless
    /// `pre_committed` is set, e.g. when the caller already owns the
    /// memory), then writes a fresh magic tag and header.
    pub fn create(
        source: &'s S,
        placement: crate::Placement,
        pre_committed: bool,
        options: Options,
    ) -> Result<Self, Error> {
        if !pre_committed {
            source
                .commit(placement.address, placement.total_size)
                .map_err(|e| match e {
                    membuf_sys::SourceError::Unreadable(code) => Error::CommitFailed(code),
                    membuf_sys::SourceError::Unwritable(code) => Error::CommitFailed(code),
                })?;
        }

        source.write(placement.address, &MAGIC)?;

        let header = BufferHeader::new(
            placement.address + crate::placement::BUFFER_OVERHEAD,
            placement.total_size - crate::placement::BUFFER_OVERHEAD,
        );
        header.write(source, placement.address + MAGIC.len() as u64)?;

        Ok(Buffer {
            source,
            address: placement.address,
            options,
        })
    }

    /// Returns whether `addr` in `source` begins with the canonical magic
    /// tag, swallowing any I/O error as "not a buffer" — probing arbitrary
    /// addresses during discovery will legitimately hit unreadable memory.
    pub fn is_buffer(source: &S, addr: u64) -> bool {
        match source.safe_read(addr, MAGIC.len()) {
            Some(bytes) => magic::matches(&bytes),
            None => false,
        }
    }

    /// Builds a handle from an address already known to hold a buffer, or
    /// `None` if it does not.
    pub fn from_address(source: &'s S, addr: u64, options: Options) -> Option<Self> {
        if !Self::is_buffer(source, addr) {
            return None;
        }

        Some(Buffer {
            source,
            address: addr,
            options,
        })
    }

    /// Returns a snapshot of this buffer's header.
    pub fn header(&self) -> Result<BufferHeader, Error> {
        BufferHeader::read(self.source, self.header_addr())
    }

    /// Returns whether `n` more bytes currently fit.
    pub fn can_fit(&self, n: u64) -> Result<bool, Error> {
        Ok(self.header()?.can_fit(n))
    }

    /// Appends `bytes`, re-aligning to the header's stored alignment for
    /// the next caller. Equivalent to
    /// `append_aligned(bytes, header.alignment)`.
    pub fn append(&self, bytes: &[u8]) -> Result<u64, Error> {
        let alignment = self.header()?.alignment;
        self.append_aligned(bytes, alignment)
    }

    /// Appends `bytes`, then rounds the write offset up to `alignment`
    /// rather than the header's stored alignment.
    pub fn append_aligned(&self, bytes: &[u8], alignment: u32) -> Result<u64, Error> {
        let _guard = APPEND_GUARD.lock().unwrap();
        let header_addr = self.header_addr();

        self.wait_for_unlock(header_addr)?;

        let mut header = BufferHeader::read(self.source, header_addr)?;
        header.lock();
        header.write(self.source, header_addr)?;

        let result = self.append_while_locked(&mut header, bytes, alignment);

        header.unlock();
        // The lock must be cleared on every exit path, successful or not.
        let wrote = header.write(self.source, header_addr);

        match (result, wrote) {
            (Ok(addr), Ok(())) => Ok(addr),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    fn append_while_locked(
        &self,
        header: &mut BufferHeader,
        bytes: &[u8],
        alignment: u32,
    ) -> Result<u64, Error> {
        let n = bytes.len() as u64;
        if !header.can_fit(n) {
            return Err(Error::NoSpace);
        }

        let write_addr = header.write_ptr();
        self.source.write(write_addr, bytes)?;

        header.offset += n;
        header.align_to(alignment);

        Ok(write_addr)
    }

    /// Spin-waits, sleeping `self.options.lock_poll_interval` between
    /// reads, until the header's lock flag reads `Unlocked`.
    ///
    /// Unbounded by design: the lock-holder is trusted cooperating code
    /// writing a bounded number of bytes, so no timeout is the correct
    /// default. `Options::lock_timeout`, when set, turns this into
    /// `Error::LockContention` instead of waiting forever.
    fn wait_for_unlock(&self, header_addr: u64) -> Result<(), Error> {
        let mut waited = Duration::ZERO;
        let mut iterations = 0u32;

        loop {
            let header = BufferHeader::read(self.source, header_addr)?;
            if header.state == crate::header::LockState::Unlocked {
                return Ok(());
            }

            iterations += 1;
            if iterations == 100 {
                warn!("buffer at {:#x}: lock held for 100 polls, contention?", self.address);
            }

            if let Some(timeout) = self.options.lock_timeout {
                if waited >= timeout {
                    return Err(Error::LockContention);
                }
            }

            thread::sleep(self.options.lock_poll_interval);
            waited += self.options.lock_poll_interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membuf_sys::InProcessMemorySource;

    fn placed(payload: u64) -> (InProcessMemorySource, crate::Placement) {
        let source = InProcessMemorySource;
        // A heap allocation stands in for a committed OS region in these
        // unit tests; `create` is told not to commit over it.
        let total = crate::placement::BUFFER_OVERHEAD + payload;
        let backing = vec![0u8; total as usize].into_boxed_slice();
        let addr = Box::into_raw(backing) as *mut u8 as u64;
        (
            source,
            crate::Placement {
                address: addr,
                total_size: total,
            },
        )
    }

    #[test]
    fn create_then_append_round_trips_bytes() {
        let (source, placement) = placed(256);
        let buffer = Buffer::create(&source, placement, true, Options::default()).unwrap();

        let addr = buffer.append(&[0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(source.read(addr, 3).unwrap(), vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(buffer.header().unwrap().offset, 4);
    }

    #[test]
    fn is_buffer_true_after_create_false_elsewhere() {
        let (source, placement) = placed(64);
        let buffer = Buffer::create(&source, placement, true, Options::default()).unwrap();

        assert!(Buffer::is_buffer(&source, buffer.address()));
        assert!(!Buffer::is_buffer(&source, buffer.address() + 1));
    }

    #[test]
    fn append_fails_cleanly_when_out_of_space() {
        let (source, placement) = placed(4);
        let buffer = Buffer::create(&source, placement, true, Options::default()).unwrap();

        let before = buffer.header().unwrap();
        let err = buffer.append(&[0u8; 64]).unwrap_err();
        assert_eq!(err, Error::NoSpace);

        let after = buffer.header().unwrap();
        assert_eq!(after.state, crate::header::LockState::Unlocked);
        assert_eq!(after.offset, before.offset);
    }

    #[test]
    fn concurrent_appends_from_two_threads_stay_disjoint() {
        let (source, placement) = placed(1600);
        let buffer = Buffer::create(&source, placement, true, Options::default()).unwrap();

        let run = |tag: u8| {
            let mut addrs = Vec::new();
            for _ in 0..100 {
                addrs.push(buffer.append(&[tag; 8]).unwrap());
            }
            addrs
        };

        let (a, b) = thread::scope(|scope| {
            let t1 = scope.spawn(|| run(1));
            let t2 = scope.spawn(|| run(2));
            (t1.join().unwrap(), t2.join().unwrap())
        });

        assert_eq!(buffer.header().unwrap().offset, 1600);

        let a_set: std::collections::HashSet<_> = a.iter().copied().collect();
        let b_set: std::collections::HashSet<_> = b.iter().copied().collect();
        assert!(a_set.is_disjoint(&b_set));
    }
}
