// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The [`BufferHeader`] record and its stable, little-endian wire layout.
//!
//! A header always lives in the target process's memory, so it is never
//! accessed through a Rust reference; it is read and written as a whole
//! record through a [`MemorySource`](membuf_sys::MemorySource), the same
//! way the rest of this crate treats foreign memory.

use membuf_sys::MemorySource;

use crate::Error;

/// The lock bit of a [`BufferHeader`], guarding cross-module append
/// coordination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum LockState {
    Unlocked = 0,
    Locked = 1,
}

impl LockState {
    fn from_u32(v: u32) -> Self {
        if v == LockState::Locked as u32 {
            LockState::Locked
        } else {
            LockState::Unlocked
        }
    }
}

/// The on-disk (on-memory) size of an encoded [`BufferHeader`], in bytes:
/// three pointer-sized fields plus two 32-bit fields.
pub const HEADER_SIZE: usize = 8 + 8 + 8 + 4 + 4;

/// The record stored at a known offset inside every buffer, describing its
/// payload and the cooperative lock guarding appends to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHeader {
    /// Absolute address of the first payload byte.
    pub data_ptr: u64,

    /// Total bytes of payload region.
    pub size: u64,

    /// Bytes already used. Invariant: `0 <= offset <= size`.
    pub offset: u64,

    /// Whether another participant currently holds the append lock.
    pub state: LockState,

    /// Current required alignment for `data_ptr + offset`. Always a power
    /// of two, never zero.
    pub alignment: u32,
}

impl BufferHeader {
    /// Builds a fresh, unlocked, empty header for a payload region of
    /// `size` bytes starting at `data_ptr`.
    pub fn new(data_ptr: u64, size: u64) -> Self {
        BufferHeader {
            data_ptr,
            size,
            offset: 0,
            state: LockState::Unlocked,
            alignment: 4,
        }
    }

    /// The address the next `append` would write to.
    pub fn write_ptr(&self) -> u64 {
        self.data_ptr + self.offset
    }

    /// The number of payload bytes not yet used.
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }

    /// Returns whether `n` more bytes fit in the buffer.
    pub fn can_fit(&self, n: u64) -> bool {
        self.remaining() >= n
    }

    /// Marks the buffer locked.
    pub fn lock(&mut self) {
        self.state = LockState::Locked;
    }

    /// Marks the buffer unlocked.
    pub fn unlock(&mut self) {
        self.state = LockState::Unlocked;
    }

    /// Rounds `offset` up to the nearest multiple of `alignment`, capped at
    /// `size` so a buffer can never be pushed past its own end by
    /// alignment alone.
    pub fn align(&mut self) {
        self.offset = membuf_sys::round_up(self.offset, self.alignment as u64).min(self.size);
    }

    /// Rounds `offset` up to the nearest multiple of `alignment`, as
    /// [`align`](Self::align), but using `alignment` rather than the
    /// header's stored value. Used by
    /// [`Buffer::append_aligned`](crate::Buffer::append_aligned).
    pub fn align_to(&mut self, alignment: u32) {
        self.offset = membuf_sys::round_up(self.offset, alignment as u64).min(self.size);
    }

    /// Encodes this header into its stable little-endian wire layout.
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(&self.data_ptr.to_le_bytes());
        out[8..16].copy_from_slice(&self.size.to_le_bytes());
        out[16..24].copy_from_slice(&self.offset.to_le_bytes());
        out[24..28].copy_from_slice(&(self.state as u32).to_le_bytes());
        out[28..32].copy_from_slice(&self.alignment.to_le_bytes());
        out
    }

    /// Decodes a header from its stable little-endian wire layout.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than [`HEADER_SIZE`]; callers always
    /// read exactly `HEADER_SIZE` bytes before calling this.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert!(bytes.len() >= HEADER_SIZE, "short header read");

        let data_ptr = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let size = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let offset = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        let state = u32::from_le_bytes(bytes[24..28].try_into().unwrap());
        let alignment = u32::from_le_bytes(bytes[28..32].try_into().unwrap());

        BufferHeader {
            data_ptr,
            size,
            offset,
            state: LockState::from_u32(state),
            alignment,
        }
    }

    /// Reads the header at `header_addr` through `source`.
    pub fn read(source: &dyn MemorySource, header_addr: u64) -> Result<Self, Error> {
        let bytes = source.read(header_addr, HEADER_SIZE)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Writes this header to `header_addr` through `source`.
    pub fn write(&self, source: &dyn MemorySource, header_addr: u64) -> Result<(), Error> {
        source.write(header_addr, &self.to_bytes())?;
        Ok(())
    }
}
