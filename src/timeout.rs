//! Timeout and retry discipline shared by every packet exchange.
//!
//! Each attempt at moving a packet is given a short timeout.  A failed
//! attempt, whether the transport stalled or the packet failed validation,
//! is retried with the same short timeout up to a fixed number of times.
//! Worst case latency of an exchange is therefore `retries * short_timeout`.
//!
//! The engines keep no clock of their own.  Deadlines are enforced by the
//! transport, which is handed the per-attempt timeout on every call.  A
//! caller wanting a longer overall budget makes more calls.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Default per-attempt timeout in milliseconds.
pub const SHORT_TIMEOUT_MS: u32 = 100;

/// Default overall budget in milliseconds for exchanges which are not
/// given an explicit timeout by the caller.
pub const LONG_TIMEOUT_MS: u32 = 5000;

/// Number of attempts at each exchange made by a Master.
pub const MASTER_RETRIES: u8 = 3;

/// Number of attempts at each exchange made by a Slave.
pub const SLAVE_RETRIES: u8 = 2;

/// Timeout configuration for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Timeout applied to each individual attempt
    pub short_timeout_ms: u32,
    /// Budget used by exchanges which the caller gives no timeout
    pub long_timeout_ms: u32,
    /// Number of attempts before giving up.  Zero is treated as one.
    pub retries: u8,
}

impl TimeoutPolicy {
    /// Policy used by a Master.
    pub const fn master() -> Self {
        Self {
            short_timeout_ms: SHORT_TIMEOUT_MS,
            long_timeout_ms: LONG_TIMEOUT_MS,
            retries: MASTER_RETRIES,
        }
    }

    /// Policy used by a Slave.
    pub const fn slave() -> Self {
        Self {
            short_timeout_ms: SHORT_TIMEOUT_MS,
            long_timeout_ms: LONG_TIMEOUT_MS,
            retries: SLAVE_RETRIES,
        }
    }

    /// Timeout to hand the transport for a single attempt, given the
    /// caller's budget for the whole exchange.
    pub fn attempt_timeout(&self, budget_ms: u32) -> u32 {
        self.short_timeout_ms.min(budget_ms)
    }

    /// Number of attempts made at each exchange.
    pub fn attempts(&self) -> u8 {
        self.retries.max(1)
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// `op` is given the per-attempt timeout and the attempt number.
    ///
    /// Errors which cannot be cured by retrying are returned immediately.
    /// Once the attempts are exhausted transport failures are reported as
    /// [`Error::Timeout`], and validation failures as the last validation
    /// error seen.
    pub fn run<T, F>(&self, budget_ms: u32, mut op: F) -> Result<T>
    where
        F: FnMut(u32, u8) -> Result<T>,
    {
        let timeout = self.attempt_timeout(budget_ms);
        let mut last = Error::Timeout;
        for attempt in 0..self.attempts() {
            match op(timeout, attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Attempt {}/{} failed: {e}", attempt + 1, self.attempts());
                    last = e;
                }
            }
        }
        Err(Self::exhausted(last))
    }

    pub(crate) fn exhausted(last: Error) -> Error {
        if last.is_protocol() {
            last
        } else {
            Error::Timeout
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::master()
    }
}
