//! Asynchronous Master - typically used by a Host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::master::{MasterState, check_request, check_result};
use crate::packet::{
    DATA_OFFSET, DATA_PACKET_OVERHEAD, HEADER_PACKET_SIZE, Header, Marker, check_echo,
    data_capacity, decode, decode_data, encode_data_in_place, encode_header,
};
use crate::timeout::TimeoutPolicy;
use crate::transport::AsyncTransport;
use crate::{Error, MAX_LOCAL_BUFFER, Result};

/// Master engine over an [`AsyncTransport`].
///
/// Behaves exactly as [`crate::master::Master`], yielding to the runtime
/// while the transport waits.
///
/// ```rust,ignore
/// let mut master = AsyncMaster::<_>::new(usb_serial);
/// let mut response = [0u8; 64];
/// let len = master.call(0x01, &command, &mut response, 1000, 1000).await?;
/// ```
pub struct AsyncMaster<T: AsyncTransport, const BUF: usize = MAX_LOCAL_BUFFER> {
    transport: T,
    policy: TimeoutPolicy,
    state: MasterState,
    in_flight: Option<u32>,
    buf: [u8; BUF],
}

impl<T: AsyncTransport, const BUF: usize> AsyncMaster<T, BUF> {
    /// Create a new AsyncMaster using the default master [`TimeoutPolicy`].
    pub fn new(transport: T) -> Self {
        Self::with_policy(transport, TimeoutPolicy::master())
    }

    /// Create a new AsyncMaster with an explicit [`TimeoutPolicy`].
    pub fn with_policy(transport: T, policy: TimeoutPolicy) -> Self {
        Self {
            transport,
            policy,
            state: MasterState::Idle,
            in_flight: None,
            buf: [0; BUF],
        }
    }

    /// Call remote function `rpc_id`.  See
    /// [`crate::master::Master::call()`].
    pub async fn call(
        &mut self,
        rpc_id: u32,
        request: &[u8],
        response: &mut [u8],
        send_timeout_ms: u32,
        recv_timeout_ms: u32,
    ) -> Result<usize> {
        debug!("Calling {rpc_id:#010X} ({} bytes)", request.len());
        let result = match self.put_command(rpc_id, request, send_timeout_ms).await {
            Ok(()) => self.get_result(response, recv_timeout_ms).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(len) => debug!("Call {rpc_id:#010X} completed ({len} bytes received)"),
            Err(e) => {
                warn!("Call {rpc_id:#010X} failed: {e}");
                self.reset();
            }
        }
        result
    }

    /// Send a command-header and command-data packet pair.
    pub async fn put_command(&mut self, rpc_id: u32, data: &[u8], timeout_ms: u32) -> Result<()> {
        check_request(data, BUF)?;

        self.transport.flush().await;
        self.reset();

        let header = encode_header(
            Marker::CommandHeader,
            &Header {
                rpc_id,
                data_len: data.len() as u32,
            },
        );
        put_packet(&mut self.transport, &self.policy, timeout_ms, &header).await?;

        self.buf[DATA_OFFSET..DATA_OFFSET + data.len()].copy_from_slice(data);
        let len = encode_data_in_place(Marker::CommandData, data.len(), &mut self.buf)?;
        put_packet(&mut self.transport, &self.policy, timeout_ms, &self.buf[..len]).await?;

        trace!("Command {rpc_id:#010X} sent");
        self.state = MasterState::AwaitingResult;
        self.in_flight = Some(rpc_id);
        Ok(())
    }

    /// Receive a result-header and result-data packet pair into
    /// `response`.  Returns the number of bytes received.
    pub async fn get_result(&mut self, response: &mut [u8], timeout_ms: u32) -> Result<usize> {
        let result = self.receive_result(response, timeout_ms).await;
        if result.is_err() {
            self.transport.flush().await;
        }
        self.reset();
        result
    }

    /// Current state of the engine.
    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Timeout policy in use.
    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
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
impl<T: AsyncTransport, const BUF: usize> AsyncMaster<T, BUF> {
    async fn receive_result(&mut self, response: &mut [u8], timeout_ms: u32) -> Result<usize> {
        let header = get_header(
            &mut self.transport,
            &self.policy,
            timeout_ms,
            self.in_flight,
        )
        .await?;
        let len = check_result(&header, response.len(), BUF)
            .inspect_err(|e| warn!("Rejected result header {header:?}: {e}"))?;

        get_data(
            &mut self.transport,
            &self.policy,
            timeout_ms,
            &mut self.buf,
            len,
        )
        .await?;
        response[..len].copy_from_slice(&self.buf[DATA_OFFSET..DATA_OFFSET + len]);
        Ok(len)
    }

    fn reset(&mut self) {
        self.state = MasterState::Idle;
        self.in_flight = None;
    }
}

// Async counterparts of the packet exchanges in `crate::packet`

async fn put_packet<T: AsyncTransport>(
    transport: &mut T,
    policy: &TimeoutPolicy,
    budget_ms: u32,
    frame: &[u8],
) -> Result<()> {
    let timeout = policy.attempt_timeout(budget_ms);
    let attempts = policy.attempts();
    let mut last = Error::Timeout;
    for attempt in 0..attempts {
        match transport.put_bytes(frame, timeout).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                warn!("Attempt {}/{attempts} failed: {e}", attempt + 1);
                last = e;
            }
        }
    }
    error!("Failed to send {} byte packet: {last}", frame.len());
    Err(TimeoutPolicy::exhausted(last))
}

async fn get_header<T: AsyncTransport>(
    transport: &mut T,
    policy: &TimeoutPolicy,
    budget_ms: u32,
    expected_id: Option<u32>,
) -> Result<Header> {
    let timeout = policy.attempt_timeout(budget_ms);
    let attempts = policy.attempts();
    let mut frame = [0u8; HEADER_PACKET_SIZE];
    let mut last = Error::Timeout;
    for attempt in 0..attempts {
        let result = match transport.get_bytes(&mut frame, timeout).await {
            Ok(()) => decode(&frame, Marker::ResultHeader)
                .and_then(Header::from_payload)
                .and_then(|header| check_echo(header, expected_id)),
            Err(e) => Err(e),
        };
        match result {
            Ok(header) => return Ok(header),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                warn!("Attempt {}/{attempts} failed: {e}", attempt + 1);
                if e.is_protocol() {
                    transport.flush().await;
                }
                last = e;
            }
        }
    }
    Err(TimeoutPolicy::exhausted(last))
}

async fn get_data<T: AsyncTransport>(
    transport: &mut T,
    policy: &TimeoutPolicy,
    budget_ms: u32,
    buf: &mut [u8],
    data_len: usize,
) -> Result<()> {
    if data_len > data_capacity(buf.len()) {
        return Err(Error::PayloadTooLarge);
    }
    let timeout = policy.attempt_timeout(budget_ms);
    let attempts = policy.attempts();
    let frame = &mut buf[..data_len + DATA_PACKET_OVERHEAD];
    let mut last = Error::Timeout;
    for attempt in 0..attempts {
        let result = match transport.get_bytes(frame, timeout).await {
            Ok(()) => decode_data(frame, Marker::ResultData, data_len),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                warn!("Attempt {}/{attempts} failed: {e}", attempt + 1);
                if e.is_protocol() {
                    transport.flush().await;
                }
                last = e;
            }
        }
    }
    Err(TimeoutPolicy::exhausted(last))
}
