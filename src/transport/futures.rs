//! Asynchronous Transport - typically used by a Host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use async_trait::async_trait;

use crate::Result;

/// Async version of [`crate::transport::Transport`], for Hosts which drive
/// the medium from an async runtime, such as a USB-serial adapter.
#[async_trait(?Send)]
pub trait AsyncTransport {
    /// Fill `buf` completely with received bytes within `timeout_ms`.
    async fn get_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<()>;

    /// Send all of `data` within `timeout_ms`.
    async fn put_bytes(&mut self, data: &[u8], timeout_ms: u32) -> Result<()>;

    /// Discard any bytes received but not yet read.
    async fn flush(&mut self) {}
}
