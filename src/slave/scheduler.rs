//! Slot holding the callback a Slave runs after its next reply.
//!
//! Callbacks are plain function pointers with no access to the Slave that
//! invoked them.  A handler which wants to defer work until its reply has
//! gone out schedules it on a [`Scheduler`] in a static, which the Slave
//! was given with [`crate::slave::Slave::with_scheduler()`]:
//!
//! ```rust,ignore
//! static SCHEDULER: Scheduler = Scheduler::new();
//!
//! fn reboot(_event: u32, _data: &mut [u8], _len: u32) -> u32 {
//!     SCHEDULER.schedule(do_reboot);
//!     0
//! }
//!
//! let mut slave: Slave<_> = Slave::new(uart).with_scheduler(&SCHEDULER);
//! slave.register_callback(0x10, reboot)?;
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::slave::ScheduledCallback;

/// Holds at most one [`ScheduledCallback`].
///
/// Scheduling again before the callback has run replaces it.  Safe to
/// share between the main loop and interrupt handlers.
pub struct Scheduler {
    slot: AtomicPtr<()>,
}

impl Scheduler {
    /// Create an empty Scheduler.  `const` so it can live in a static.
    pub const fn new() -> Self {
        Self {
            slot: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Schedule `callback`.  Returns whether this replaced a callback which
    /// had not yet run.
    pub fn schedule(&self, callback: ScheduledCallback) -> bool {
        let previous = self.slot.swap(callback as *mut (), Ordering::AcqRel);
        !previous.is_null()
    }

    /// Remove and return the scheduled callback, if any.
    pub fn take(&self) -> Option<ScheduledCallback> {
        let callback = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
        if callback.is_null() {
            None
        } else {
            // SAFETY: the only non-null values stored are `ScheduledCallback`
            // pointers, written by `schedule()`
            Some(unsafe { core::mem::transmute::<*mut (), ScheduledCallback>(callback) })
        }
    }

    /// Whether a callback is waiting to run.
    pub fn is_pending(&self) -> bool {
        !self.slot.load(Ordering::Acquire).is_null()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.is_pending())
            .finish()
    }
}
