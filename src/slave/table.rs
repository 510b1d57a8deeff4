//! Fixed capacity table mapping call identifiers to callbacks.
//!
//! Lookup is a linear scan.  Tables are small and a lookup costs far less
//! than the packet exchange that precedes it.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use heapless::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, MAX_CALLBACKS, Result};

/// Function invoked for a call.
///
/// Arguments:
/// - `event`: the call identifier
/// - `data`: the Slave's whole payload area.  The first `data_len` bytes
///   hold the request.  Write the response into the same area.
/// - `data_len`: length of the request
///
/// Returns the length of the response written to `data`.  Values larger
/// than `data.len()` are clamped.
pub type Callback = fn(event: u32, data: &mut [u8], data_len: u32) -> u32;

/// Function deferred until after the current reply has been sent.
pub type ScheduledCallback = fn();

/// One registered callback.
#[derive(Clone, Copy)]
pub struct CallbackEntry {
    pub rpc_id: u32,
    pub callback: Callback,
}

impl core::fmt::Debug for CallbackEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("rpc_id", &format_args!("{:#010X}", self.rpc_id))
            .finish_non_exhaustive()
    }
}

/// Callback table holding up to `N` entries, no two with the same
/// identifier.
#[derive(Debug)]
pub struct CallbackTable<const N: usize = MAX_CALLBACKS> {
    entries: Vec<CallbackEntry, N>,
}

impl<const N: usize> CallbackTable<N> {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `callback` for `rpc_id`.
    ///
    /// Registering an identifier a second time replaces its callback.
    /// Fails with [`Error::TableFull`] if a new identifier does not fit.
    pub fn register(&mut self, rpc_id: u32, callback: Callback) -> Result<()> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.rpc_id == rpc_id) {
            debug!("Replacing callback for {rpc_id:#010X}");
            entry.callback = callback;
            return Ok(());
        }
        self.entries
            .push(CallbackEntry { rpc_id, callback })
            .map_err(|_| {
                warn!("Callback table full ({N} entries), cannot register {rpc_id:#010X}");
                Error::TableFull
            })
    }

    /// Look up the callback for `rpc_id`.
    pub fn find(&self, rpc_id: u32) -> Result<Callback> {
        self.entries
            .iter()
            .find(|e| e.rpc_id == rpc_id)
            .map(|e| e.callback)
            .ok_or(Error::NotFound)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallbackEntry> {
        self.entries.iter()
    }
}
