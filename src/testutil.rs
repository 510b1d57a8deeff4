//! In-memory transport used by the unit tests.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::collections::VecDeque;
use std::vec::Vec;

use crate::transport::Transport;
use crate::{Error, Result};

/// Transport backed by byte queues.
///
/// `arrivals` are chunks that "arrive" one at a time, only when a read
/// needs more bytes than are already buffered in `rx`.  This lets a test
/// queue a corrupt packet followed by a good one and have the good one
/// survive the flush that follows the corrupt one.
#[derive(Default)]
pub struct MockTransport {
    pub rx: VecDeque<u8>,
    pub arrivals: VecDeque<Vec<u8>>,
    pub tx: Vec<u8>,
    pub gets: usize,
    pub puts: usize,
    pub flushes: usize,
    /// Number of upcoming writes to fail
    pub fail_puts: usize,
    /// Every write fails
    pub stalled: bool,
    /// Timeouts handed to the transport, in order
    pub timeouts: Vec<u32>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arrive(&mut self, bytes: &[u8]) {
        self.arrivals.push_back(bytes.to_vec());
    }
}

impl Transport for MockTransport {
    fn get_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<()> {
        self.gets += 1;
        self.timeouts.push(timeout_ms);
        while self.rx.len() < buf.len() {
            match self.arrivals.pop_front() {
                Some(chunk) => self.rx.extend(chunk),
                None => break,
            }
        }
        if self.rx.len() < buf.len() {
            self.rx.clear();
            return Err(Error::Timeout);
        }
        for slot in buf.iter_mut() {
            *slot = self.rx.pop_front().unwrap();
        }
        Ok(())
    }

    fn put_bytes(&mut self, data: &[u8], timeout_ms: u32) -> Result<()> {
        self.puts += 1;
        self.timeouts.push(timeout_ms);
        if self.stalled {
            return Err(Error::Timeout);
        }
        if self.fail_puts > 0 {
            self.fail_puts -= 1;
            return Err(Error::Timeout);
        }
        self.tx.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) {
        self.flushes += 1;
        self.rx.clear();
    }
}
