//! Byte transports the engines run over.
//!
//! A transport moves a given number of bytes over one physical medium
//! (I2C, UART, bit-banged serial, SPI, ...) within a given number of
//! milliseconds.  It knows nothing about packets.  One implementation is
//! written per medium and handed to a [`crate::master::Master`] or
//! [`crate::slave::Slave`].
//!
//! [`bus`] contains a buffered transport for bus-addressed slaves, whose
//! bytes arrive in interrupt context.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod bus;
#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

pub use bus::{BusBuffers, BusIsr, BusSlaveTransport};
#[cfg(feature = "async")]
pub use futures::AsyncTransport;
pub use sync::Transport;

/// Bus address used by the Slave on bus-addressed media.  Chosen to stay
/// clear of common peripherals.
pub const BUS_SLAVE_ADDR: u8 = 0x12;

/// Millisecond time source, used by transports that have to enforce their
/// own deadlines.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch.  Expected to wrap.
    fn now_ms(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Whether `timeout_ms` has passed since `start_ms`, tolerating wrap.
pub(crate) fn expired(clock: &impl Clock, start_ms: u32, timeout_ms: u32) -> bool {
    clock.now_ms().wrapping_sub(start_ms) >= timeout_ms
}
