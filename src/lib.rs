//! Remote Procedure Call crate for microcontrollers talking over I2C, UART,
//! bit-banged serial, SPI and similar byte-oriented links.
//!
//! One device, the Master, invokes numbered functions on another device, the
//! Slave.  The Master sends a request payload and waits for the Slave's
//! response payload.  Links are assumed to be noisy, slow and half-duplex,
//! and devices are assumed to have very little RAM, so the protocol is
//! strictly one call at a time, every packet is protected by a CRC-16, and
//! nothing in the target path allocates.
//!
//! `no_std`.  Requires `alloc` only for the async traits, typically used on a
//! Host acting as Master.
//!
//! ## Architecture
//!
//! - [`checksum`] - 16-bit checksum used to validate every packet
//! - [`packet`] - Packet framing, validation, and the retried packet
//!   exchanges built on top of a transport
//! - [`timeout`] - The short-timeout/retry discipline shared by every
//!   exchange
//! - [`transport`] - The byte transport traits implemented once per medium,
//!   and a buffered handoff for interrupt driven bus slaves
//! - [`master`] - Master engine, the caller side of a remote call
//! - [`slave`] - Slave engine, callback table and dispatch loop
//!
//! ## Wire format
//!
//! A call is two exchanges, each made of two packets:
//!
//! ```text
//! Master -> Slave: [command-header][command-data]
//! Slave -> Master: [result-header][result-data]
//! ```
//!
//! Every packet is `marker (2) | payload (0..N) | crc16 (2)`, little endian.
//! The payload of every packet the engines send starts with a 32-bit control
//! word, so the smallest valid packet is [`MIN_PACKET_SIZE`] bytes:
//!
//! | Packet | Payload |
//! |---|---|
//! | command-header | `rpc_id: u32, data_len: u32` |
//! | command-data | `data_len: u32, data` |
//! | result-header | `rpc_id: u32, data_len: u32` |
//! | result-data | `data_len: u32, data` |
//!
//! ## Getting Started
//!
//! Implement [`transport::Transport`] for your medium.  It only has to move
//! a given number of bytes within a given number of milliseconds.
//!
//! **Slave setup**:
//! 1. Create a [`slave::Slave`] with your transport
//! 2. Register a [`slave::Callback`] for each call identifier
//! 3. Call [`slave::Slave::poll()`] from your main loop
//!
//! **Master setup**:
//! 1. Create a [`master::Master`] with your transport
//! 2. Use [`master::Master::call()`] to invoke a remote function
//!
//! ```rust,ignore
//! fn reverse(_event: u32, data: &mut [u8], len: u32) -> u32 {
//!     data[..len as usize].reverse();
//!     len
//! }
//!
//! let mut slave = Slave::new(uart);
//! slave.register_callback(0x01, reverse)?;
//! loop {
//!     slave.poll()?;
//! }
//! ```
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async transport trait and master engine (requires
//!   `alloc`), which is generally used by a Host, but not by a Target.
//!
//! Compile with `--no-default-features` to disable async support for a
//! Target.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "async")]
extern crate alloc;

pub mod checksum;
pub mod master;
pub mod packet;
pub mod slave;
pub mod timeout;
pub mod transport;

/// Maximum number of callbacks a Slave can register by default.
#[cfg(target_arch = "avr")]
pub const MAX_CALLBACKS: usize = 16;
/// Maximum number of callbacks a Slave can register by default.
#[cfg(not(target_arch = "avr"))]
pub const MAX_CALLBACKS: usize = 32;

/// Default size of the local buffer used to send and receive a single
/// packet.  This bounds the largest payload one call can carry.
#[cfg(target_arch = "avr")]
pub const MAX_LOCAL_BUFFER: usize = 32;
/// Default size of the local buffer used to send and receive a single
/// packet.  This bounds the largest payload one call can carry.
#[cfg(not(target_arch = "avr"))]
pub const MAX_LOCAL_BUFFER: usize = 256;

/// Smallest packet accepted off the wire: marker, 32-bit control word and
/// checksum.
pub const MIN_PACKET_SIZE: usize = 8;

/// RPC errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No response within the attempt/retry budget
    Timeout,
    /// Packet corrupted in transit
    ChecksumMismatch,
    /// Unexpected packet type, usually out of sequence
    MarkerMismatch,
    /// Fewer bytes than the smallest valid packet
    Truncated,
    /// Callback table has no free entries
    TableFull,
    /// No callback registered for this call identifier
    NotFound,
    /// Packet contents disagree with the header that announced them
    SequenceMismatch,
    /// Payload too large for the local buffer
    PayloadTooLarge,
    /// Buffer too small for operation
    BufferTooSmall,
    /// I/O error reported by the transport
    Io,
}

impl Error {
    /// Whether an exchange that failed with this error is worth attempting
    /// again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout
                | Error::Io
                | Error::ChecksumMismatch
                | Error::MarkerMismatch
                | Error::Truncated
                | Error::SequenceMismatch
        )
    }

    /// Whether this error comes from validating a received packet, as
    /// opposed to the transport failing to move bytes.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch
                | Error::MarkerMismatch
                | Error::Truncated
                | Error::SequenceMismatch
        )
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Error::Timeout => "timed out",
            Error::ChecksumMismatch => "checksum mismatch",
            Error::MarkerMismatch => "unexpected packet marker",
            Error::Truncated => "packet truncated",
            Error::TableFull => "callback table full",
            Error::NotFound => "no callback registered",
            Error::SequenceMismatch => "packet out of sequence",
            Error::PayloadTooLarge => "payload too large",
            Error::BufferTooSmall => "buffer too small",
            Error::Io => "transport I/O error",
        };
        f.write_str(s)
    }
}

/// Type to represent the result of an RPC operation
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
pub(crate) mod testutil;
