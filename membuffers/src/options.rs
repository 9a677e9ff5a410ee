// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use std::time::Duration;

/// Tunable knobs for [`Helper`](crate::Helper) and the buffers it produces.
///
/// There is no on-disk configuration here, since this crate is a library
/// rather than a service, but the constants a caller would otherwise have
/// to fork the crate to change are surfaced explicitly instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// How long to sleep between polls of a buffer's lock flag while
    /// waiting for another participant to finish appending.
    pub lock_poll_interval: Duration,

    /// An optional cap on the total time spent spin-waiting on a buffer's
    /// lock flag before giving up with
    /// [`Error::LockContention`](crate::Error::LockContention).
    ///
    /// `None` (the default) waits forever: the lock-holder is trusted,
    /// cooperating code, so there is nothing sensible to do on timeout
    /// besides wait longer.
    pub lock_timeout: Option<Duration>,

    /// How many times [`Helper::create_buffer`](crate::Helper::create_buffer)
    /// retries placement and commit before surfacing the last error.
    pub create_retries: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            lock_poll_interval: Duration::from_millis(1),
            lock_timeout: None,
            create_retries: 3,
        }
    }
}
