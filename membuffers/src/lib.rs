// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Range-constrained, discoverable bump-allocated memory buffers.
//!
//! This crate solves one problem: given a desired payload size and an
//! absolute address window `[min, max)`, locate and commit a region of
//! memory whose entire extent lies within that window, then expose it as a
//! small bump allocator whose existence is *discoverable* by any other
//! cooperating module in the same process via a self-describing in-memory
//! marker.
//!
//! The motivating use case is code-cave allocation for runtime code
//! patching: jump trampolines, detour thunks, and small data blobs must
//! often live within a bounded displacement of a target instruction so
//! that relative addressing fits in a fixed-width field. This crate finds
//! and hands out that memory; it does not patch anything itself.
//!
//! # Layering
//!
//! - [`Placement`] runs the scan of [`membuf_sys::PageEnumerator`] records
//!   described in the module docs and returns where to commit.
//! - [`Buffer`] commits that region (or takes ownership of an
//!   already-committed one), writes the magic tag and header, and then
//!   serves `append` calls.
//! - [`discovery`] walks a [`membuf_sys::PageEnumerator`] looking for the
//!   magic tag in already-committed regions.
//! - [`Helper`] composes the three: find an existing buffer meeting a
//!   caller's constraints, or create one.
//!
//! # Cross-module discovery
//!
//! Every buffer starts with a fixed, compile-time [`MAGIC`](magic::MAGIC)
//! tag followed by a [`BufferHeader`]. Because independently-loaded
//! modules share no language-level runtime state, the header's lock bit
//! doubles as a cooperative mutex embedded in the data it guards — see
//! [`Buffer::append`] for the protocol.

mod buffer;
mod discovery;
mod error;
mod header;
mod helper;
mod magic;
mod options;
mod placement;

pub use buffer::Buffer;
pub use discovery::BufferInfo;
pub use error::Error;
pub use header::{BufferHeader, LockState, HEADER_SIZE};
pub use helper::Helper;
pub use magic::MAGIC;
pub use options::Options;
pub use placement::{Placement, BUFFER_OVERHEAD};

pub use membuf_sys::{
    AddressRange, InProcessMemorySource, InProcessPageEnumerator, MemorySource, PageEnumerator,
    PageProtection, PageRecord, PageState,
};
