//! Master engine, the calling side of a remote procedure call.
//!
//! A call is a command exchange followed by a result exchange:
//! - [`Master::put_command()`] sends the command-header and command-data
//!   packets
//! - [`Master::get_result()`] receives the result-header and result-data
//!   packets
//!
//! [`Master::call()`] does both, and is what applications normally use.
//! Calls take `&mut self`, so only one can be in flight per engine, and the
//! packets of consecutive calls never interleave.
//!
//! A Slave with no callback registered for the call identifier sends
//! nothing back, so such a call fails with [`crate::Error::Timeout`].
//!
//! See [`AsyncMaster`] for the async version, typically used on a Host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::AsyncMaster;
pub use sync::Master;

use crate::packet::{Header, data_capacity};
use crate::{Error, Result};

/// Where a Master is within a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    /// No call in flight
    Idle,
    /// Command sent, result not yet received
    AwaitingResult,
}

// Helper functions

fn check_request(data: &[u8], buf_len: usize) -> Result<()> {
    if data.len() > data_capacity(buf_len) {
        Err(Error::PayloadTooLarge)
    } else {
        Ok(())
    }
}

fn check_result(header: &Header, response_len: usize, buf_len: usize) -> Result<usize> {
    let len = header.data_len as usize;
    if len > data_capacity(buf_len) {
        Err(Error::PayloadTooLarge)
    } else if len > response_len {
        Err(Error::BufferTooSmall)
    } else {
        Ok(len)
    }
}
