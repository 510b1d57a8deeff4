//! Buffered transport for bus-addressed (I2C style) slaves.
//!
//! On a bus-addressed slave bytes arrive, and are requested, in interrupt
//! context.  The interrupt handlers must not block or allocate, so they
//! only copy bytes into and out of a pair of single-producer,
//! single-consumer queues:
//!
//! ```text
//! receive interrupt  -> [rx queue] -> BusSlaveTransport::get_bytes()
//! request interrupt  <- [tx queue] <- BusSlaveTransport::put_bytes()
//! ```
//!
//! [`BusBuffers`] owns the queues.  [`BusBuffers::split()`] hands the
//! interrupt half ([`BusIsr`]) and the main loop half
//! ([`BusSlaveTransport`]) out separately, so each queue end has exactly one
//! owner.
//!
//! The queues hold `N - 1` bytes, which bounds the largest packet that can
//! be in flight on this medium.  Size `N` to at least the Slave's local
//! buffer plus one.
//!
//! ```rust,ignore
//! static mut BUFFERS: BusBuffers<{ MAX_LOCAL_BUFFER + 1 }> = BusBuffers::new();
//! let (transport, isr) = unsafe { BUFFERS.split(SysTickClock) };
//! // Move `isr` into the I2C interrupt handlers, `transport` into the Slave
//! let mut slave = Slave::new(transport);
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use heapless::spsc::{Consumer, Producer, Queue};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::transport::{Clock, Transport, expired};
use crate::{Error, Result};

/// Storage for the interrupt/main loop handoff.
pub struct BusBuffers<const N: usize> {
    rx: Queue<u8, N>,
    tx: Queue<u8, N>,
}

impl<const N: usize> BusBuffers<N> {
    /// Create empty buffers.  `const` so they can live in a `static`.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            rx: Queue::new(),
            tx: Queue::new(),
        }
    }

    /// Split into the main loop transport and the interrupt half.
    ///
    /// Arguments:
    /// - `clock` - time source the transport uses to enforce deadlines
    pub fn split<C: Clock>(&mut self, clock: C) -> (BusSlaveTransport<'_, C, N>, BusIsr<'_, N>) {
        let (rx_producer, rx_consumer) = self.rx.split();
        let (tx_producer, tx_consumer) = self.tx.split();
        (
            BusSlaveTransport {
                rx: rx_consumer,
                tx: tx_producer,
                clock,
            },
            BusIsr {
                rx: rx_producer,
                tx: tx_consumer,
            },
        )
    }
}

/// Interrupt half of the handoff.  Call from the bus driver's receive and
/// request interrupt handlers.
pub struct BusIsr<'a, const N: usize> {
    rx: Producer<'a, u8, N>,
    tx: Consumer<'a, u8, N>,
}

impl<const N: usize> BusIsr<'_, N> {
    /// Bytes written to us by the bus master.  Returns how many were
    /// accepted.  Bytes that do not fit are dropped, and the packet they
    /// belong to will fail validation.
    pub fn on_receive(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for &byte in bytes {
            if self.rx.enqueue(byte).is_err() {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// The bus master is reading from us.  Fills `out` with as many queued
    /// response bytes as are available and returns the count.
    pub fn on_request(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        for slot in out.iter_mut() {
            match self.tx.dequeue() {
                Some(byte) => {
                    *slot = byte;
                    written += 1;
                }
                None => break,
            }
        }
        written
    }
}

/// Main loop half of the handoff, used as the Slave's [`Transport`].
pub struct BusSlaveTransport<'a, C: Clock, const N: usize> {
    rx: Consumer<'a, u8, N>,
    tx: Producer<'a, u8, N>,
    clock: C,
}

impl<C: Clock, const N: usize> BusSlaveTransport<'_, C, N> {
    /// Number of received bytes waiting to be read.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl<C: Clock, const N: usize> Transport for BusSlaveTransport<'_, C, N> {
    fn get_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<()> {
        let start = self.clock.now_ms();
        let mut filled = 0;
        while filled < buf.len() {
            match self.rx.dequeue() {
                Some(byte) => {
                    buf[filled] = byte;
                    filled += 1;
                }
                None if expired(&self.clock, start, timeout_ms) => {
                    trace!("Bus receive timed out after {filled}/{} bytes", buf.len());
                    return Err(Error::Timeout);
                }
                None => core::hint::spin_loop(),
            }
        }
        Ok(())
    }

    fn put_bytes(&mut self, data: &[u8], timeout_ms: u32) -> Result<()> {
        if data.len() > self.tx.capacity() {
            warn!(
                "{} byte write exceeds the {} byte bus queue",
                data.len(),
                self.tx.capacity()
            );
            return Err(Error::PayloadTooLarge);
        }

        // All or nothing, so a timed out write leaves no partial packet queued
        let start = self.clock.now_ms();
        while self.tx.capacity() - self.tx.len() < data.len() {
            if expired(&self.clock, start, timeout_ms) {
                trace!(
                    "Bus transmit timed out, {} bytes still queued",
                    self.tx.len()
                );
                return Err(Error::Timeout);
            }
            core::hint::spin_loop();
        }
        for &byte in data {
            self.tx.enqueue(byte).map_err(|_| Error::Io)?;
        }
        Ok(())
    }

    fn flush(&mut self) {
        while self.rx.dequeue().is_some() {}
    }
}
