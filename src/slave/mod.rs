//! Slave engine, the called side of a remote procedure call.
//!
//! The Slave waits for a command-header/command-data pair, looks the call
//! identifier up in its [`CallbackTable`], runs the callback, and sends the
//! callback's response back as a result-header/result-data pair.
//!
//! Commands for identifiers with no registered callback are dropped without
//! a reply.  The Master's call then times out.
//!
//! The Slave owns no thread.  Call [`Slave::poll()`] repeatedly from the
//! application's main loop.  A single poll blocks for at most the policy's
//! `retries * short_timeout` while waiting for a command, plus the time
//! taken to receive, dispatch and reply to one that arrives.
//!
//! Callbacks are plain function pointers, and are expected to be registered
//! during setup, before polling starts.  A callback defers work until after
//! its reply through a shared [`Scheduler`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod scheduler;
pub mod table;

pub use scheduler::Scheduler;
pub use table::{Callback, CallbackEntry, CallbackTable, ScheduledCallback};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::packet::{
    DATA_OFFSET, Header, Marker, data_capacity, encode_data_in_place, encode_header, get_data,
    get_header, put_packet,
};
use crate::timeout::TimeoutPolicy;
use crate::transport::Transport;
use crate::{Error, MAX_CALLBACKS, MAX_LOCAL_BUFFER, Result};

/// Where a Slave is within its receive/dispatch/reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    WaitingForCommand,
    Dispatching,
}

/// Outcome of one [`Slave::poll()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// No command arrived
    Idle,
    /// Command received for an identifier with no callback, and dropped
    Dropped(u32),
    /// Command dispatched and the result sent
    Handled(u32),
}

/// Slave engine over a synchronous [`Transport`].
///
/// - `CALLBACKS` - capacity of the callback table
/// - `BUF` - size of the local packet buffer, bounding request and
///   response sizes to `BUF - 8` bytes
///
/// ```rust,ignore
/// fn reverse(_event: u32, data: &mut [u8], len: u32) -> u32 {
///     data[..len as usize].reverse();
///     len
/// }
///
/// let mut slave: Slave<_> = Slave::new(uart);
/// slave.register_callback(0x01, reverse)?;
/// loop {
///     slave.poll()?;
///     // other cooperative work
/// }
/// ```
pub struct Slave<
    T: Transport,
    const CALLBACKS: usize = MAX_CALLBACKS,
    const BUF: usize = MAX_LOCAL_BUFFER,
> {
    transport: T,
    policy: TimeoutPolicy,
    state: SlaveState,
    table: CallbackTable<CALLBACKS>,
    scheduler: Scheduler,
    shared_scheduler: Option<&'static Scheduler>,
    loop_setup: Option<ScheduledCallback>,
    loop_end: Option<ScheduledCallback>,
    command: Option<Header>,
    buf: [u8; BUF],
}

impl<T: Transport, const CALLBACKS: usize, const BUF: usize> Slave<T, CALLBACKS, BUF> {
    /// Create a new Slave using the default slave [`TimeoutPolicy`].
    pub fn new(transport: T) -> Self {
        Self::with_policy(transport, TimeoutPolicy::slave())
    }

    /// Create a new Slave with an explicit [`TimeoutPolicy`].
    pub fn with_policy(transport: T, policy: TimeoutPolicy) -> Self {
        Self {
            transport,
            policy,
            state: SlaveState::WaitingForCommand,
            table: CallbackTable::new(),
            scheduler: Scheduler::new(),
            shared_scheduler: None,
            loop_setup: None,
            loop_end: None,
            command: None,
            buf: [0; BUF],
        }
    }

    /// Take scheduled callbacks from `scheduler`, which callbacks can reach
    /// through a static, instead of from the Slave's own slot.
    pub fn with_scheduler(mut self, scheduler: &'static Scheduler) -> Self {
        if let Some(pending) = self.scheduler.take() {
            scheduler.schedule(pending);
        }
        self.shared_scheduler = Some(scheduler);
        self
    }

    /// Register `callback` for `rpc_id`.  Re-registering an identifier
    /// replaces its callback.
    pub fn register_callback(&mut self, rpc_id: u32, callback: Callback) -> Result<()> {
        self.table.register(rpc_id, callback)
    }

    /// Look up the callback registered for `rpc_id`.
    pub fn find_callback(&self, rpc_id: u32) -> Result<Callback> {
        self.table.find(rpc_id)
    }

    /// Defer `callback` until after the next reply has been sent, outside
    /// the time sensitive receive path.  It runs once.  Scheduling again
    /// before it has run replaces it.
    ///
    /// From within a callback, schedule on the [`Scheduler`] given to
    /// [`Self::with_scheduler()`] instead.
    pub fn schedule_callback(&self, callback: ScheduledCallback) {
        if self.scheduler().schedule(callback) {
            debug!("Replacing scheduled callback");
        }
    }

    /// Run `callback` at the start of every [`Self::poll()`].
    pub fn set_loop_setup(&mut self, callback: Option<ScheduledCallback>) {
        self.loop_setup = callback;
    }

    /// Run `callback` at the end of every [`Self::poll()`].
    pub fn set_loop_end(&mut self, callback: Option<ScheduledCallback>) {
        self.loop_end = callback;
    }

    /// One iteration of the receive/dispatch/reply cycle.
    ///
    /// Returns:
    /// - `Ok(Poll::Idle)`: no complete, valid command arrived in time
    /// - `Ok(Poll::Dropped(id))`: a command arrived with no callback
    /// - `Ok(Poll::Handled(id))`: a command was dispatched and answered
    /// - `Err(error)`: a command could not be received or answered
    pub fn poll(&mut self) -> Result<Poll> {
        if let Some(setup) = self.loop_setup {
            setup();
        }
        let result = self.poll_command();
        if let Some(end) = self.loop_end {
            end();
        }
        result
    }

    /// Wait for a command-header and command-data packet pair.
    ///
    /// The command's data is then available from [`Self::data()`].
    pub fn get_command(&mut self) -> Result<Header> {
        self.command = None;
        let budget = self.policy.long_timeout_ms;
        let header = get_header(
            &mut self.transport,
            &self.policy,
            budget,
            Marker::CommandHeader,
            None,
        )?;

        let len = header.data_len as usize;
        if len > data_capacity(BUF) {
            warn!(
                "Command {:#010X} too large ({len} > {} bytes)",
                header.rpc_id,
                data_capacity(BUF)
            );
            self.transport.flush();
            return Err(Error::PayloadTooLarge);
        }

        get_data(
            &mut self.transport,
            &self.policy,
            budget,
            Marker::CommandData,
            &mut self.buf,
            len,
        )?;

        trace!("Command {:#010X} received ({len} bytes)", header.rpc_id);
        self.command = Some(header);
        Ok(header)
    }

    /// Data of the last command received.
    pub fn data(&self) -> &[u8] {
        let len = self.command.map_or(0, |c| c.data_len as usize);
        &self.buf[DATA_OFFSET..DATA_OFFSET + len]
    }

    /// Send `data` as the result of the last command received.
    pub fn put_result(&mut self, data: &[u8]) -> Result<()> {
        let command = self.command.ok_or(Error::SequenceMismatch)?;
        if data.len() > data_capacity(BUF) {
            return Err(Error::PayloadTooLarge);
        }
        self.buf[DATA_OFFSET..DATA_OFFSET + data.len()].copy_from_slice(data);
        self.send_result(command.rpc_id, data.len())
    }

    /// Current state of the engine.
    pub fn state(&self) -> SlaveState {
        self.state
    }

    /// Timeout policy in use.
    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// The registered callbacks.
    pub fn callbacks(&self) -> &CallbackTable<CALLBACKS> {
        &self.table
    }

    /// Access the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the engine, returning the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }
}

// Internal functions
impl<T: Transport, const CALLBACKS: usize, const BUF: usize> Slave<T, CALLBACKS, BUF> {
    fn scheduler(&self) -> &Scheduler {
        self.shared_scheduler.unwrap_or(&self.scheduler)
    }

    fn poll_command(&mut self) -> Result<Poll> {
        let header = match self.get_command() {
            Ok(header) => header,
            Err(Error::Timeout) => return Ok(Poll::Idle),
            Err(e) if e.is_protocol() => {
                warn!("Discarding invalid command: {e}");
                return Ok(Poll::Idle);
            }
            Err(e) => return Err(e),
        };
        let rpc_id = header.rpc_id;

        let callback = match self.table.find(rpc_id) {
            Ok(callback) => callback,
            Err(_) => {
                warn!("No callback registered for {rpc_id:#010X}, dropping command");
                self.command = None;
                return Ok(Poll::Dropped(rpc_id));
            }
        };

        self.state = SlaveState::Dispatching;
        let capacity = data_capacity(BUF);
        let area = &mut self.buf[DATA_OFFSET..DATA_OFFSET + capacity];
        let returned = callback(rpc_id, area, header.data_len) as usize;
        if returned > capacity {
            warn!("Callback {rpc_id:#010X} returned {returned} bytes, clamping to {capacity}");
        }
        let result = self.send_result(rpc_id, returned.min(capacity));
        self.state = SlaveState::WaitingForCommand;
        self.command = None;

        if let Some(scheduled) = self.scheduler().take() {
            trace!("Running scheduled callback");
            scheduled();
        }

        result.map(|()| Poll::Handled(rpc_id))
    }

    /// Send the `len` bytes at `buf[DATA_OFFSET..]` as the result of
    /// `rpc_id`.
    fn send_result(&mut self, rpc_id: u32, len: usize) -> Result<()> {
        let budget = self.policy.long_timeout_ms;
        let header = encode_header(
            Marker::ResultHeader,
            &Header {
                rpc_id,
                data_len: len as u32,
            },
        );
        put_packet(&mut self.transport, &self.policy, budget, &header)?;

        let frame_len = encode_data_in_place(Marker::ResultData, len, &mut self.buf)?;
        put_packet(
            &mut self.transport,
            &self.policy,
            budget,
            &self.buf[..frame_len],
        )?;
        debug!("Result for {rpc_id:#010X} sent ({len} bytes)");
        Ok(())
    }
}
