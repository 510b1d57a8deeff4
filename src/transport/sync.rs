//! Synchronous Transport - typically used by a Target.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::Result;

/// Trait for moving bytes over one physical medium.
///
/// Both operations either complete in full within `timeout_ms`, or fail.
/// There is no partial completion.  A stalled medium must be reported as
/// [`crate::Error::Timeout`] rather than blocking indefinitely, as the
/// engines rely on the transport to enforce every deadline.
pub trait Transport {
    /// Fill `buf` completely with received bytes.
    fn get_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<()>;

    /// Send all of `data`.
    fn put_bytes(&mut self, data: &[u8], timeout_ms: u32) -> Result<()>;

    /// Discard any bytes received but not yet read.  Called before a new
    /// command is sent and after a packet fails validation, so that a
    /// partial packet does not poison the next attempt.
    fn flush(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn get_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<()> {
        (**self).get_bytes(buf, timeout_ms)
    }

    fn put_bytes(&mut self, data: &[u8], timeout_ms: u32) -> Result<()> {
        (**self).put_bytes(data, timeout_ms)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}
