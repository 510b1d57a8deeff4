//! Synchronous Master.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::master::{MasterState, check_request, check_result};
use crate::packet::{
    DATA_OFFSET, Header, Marker, encode_data_in_place, encode_header, get_data, get_header,
    put_packet,
};
use crate::timeout::TimeoutPolicy;
use crate::transport::Transport;
use crate::{MAX_LOCAL_BUFFER, Result};

/// Master engine over a synchronous [`Transport`].
///
/// `BUF` is the size of the local packet buffer, which bounds the request
/// and response sizes to `BUF - 8` bytes.  It must match, or be smaller
/// than, the Slave's.
///
/// ```rust,ignore
/// let mut master = Master::new(uart);
/// let mut response = [0u8; 16];
/// let len = master.call(0x01, &[0xDE, 0xAD], &mut response, 1000, 1000)?;
/// ```
pub struct Master<T: Transport, const BUF: usize = MAX_LOCAL_BUFFER> {
    transport: T,
    policy: TimeoutPolicy,
    state: MasterState,
    in_flight: Option<u32>,
    buf: [u8; BUF],
}

impl<T: Transport, const BUF: usize> Master<T, BUF> {
    /// Create a new Master using the default master [`TimeoutPolicy`].
    pub fn new(transport: T) -> Self {
        Self::with_policy(transport, TimeoutPolicy::master())
    }

    /// Create a new Master with an explicit [`TimeoutPolicy`].
    pub fn with_policy(transport: T, policy: TimeoutPolicy) -> Self {
        Self {
            transport,
            policy,
            state: MasterState::Idle,
            in_flight: None,
            buf: [0; BUF],
        }
    }

    /// Call remote function `rpc_id`.
    ///
    /// Arguments:
    /// - `rpc_id`: identifier of the function to call
    /// - `request`: argument bytes sent to the Slave
    /// - `response`: buffer for the bytes the Slave returns
    /// - `send_timeout_ms`: budget for each packet of the command exchange
    /// - `recv_timeout_ms`: budget for each packet of the result exchange
    ///
    /// Returns:
    /// - `Ok(len)`: the first `len` bytes of `response` hold the result
    /// - `Err(error)`: the call failed.  Nothing is resumed, call again to
    ///   retry.
    pub fn call(
        &mut self,
        rpc_id: u32,
        request: &[u8],
        response: &mut [u8],
        send_timeout_ms: u32,
        recv_timeout_ms: u32,
    ) -> Result<usize> {
        debug!("Calling {rpc_id:#010X} ({} bytes)", request.len());
        let result = self
            .put_command(rpc_id, request, send_timeout_ms)
            .and_then(|()| self.get_result(response, recv_timeout_ms));
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
    pub fn put_command(&mut self, rpc_id: u32, data: &[u8], timeout_ms: u32) -> Result<()> {
        check_request(data, BUF)?;

        // Anything still buffered belongs to an earlier, abandoned call
        self.transport.flush();
        self.reset();

        let header = encode_header(
            Marker::CommandHeader,
            &Header {
                rpc_id,
                data_len: data.len() as u32,
            },
        );
        put_packet(&mut self.transport, &self.policy, timeout_ms, &header)?;

        self.buf[DATA_OFFSET..DATA_OFFSET + data.len()].copy_from_slice(data);
        let len = encode_data_in_place(Marker::CommandData, data.len(), &mut self.buf)?;
        put_packet(&mut self.transport, &self.policy, timeout_ms, &self.buf[..len])?;

        trace!("Command {rpc_id:#010X} sent");
        self.state = MasterState::AwaitingResult;
        self.in_flight = Some(rpc_id);
        Ok(())
    }

    /// Receive a result-header and result-data packet pair into
    /// `response`.  Returns the number of bytes received.
    pub fn get_result(&mut self, response: &mut [u8], timeout_ms: u32) -> Result<usize> {
        let result = self.receive_result(response, timeout_ms);
        if result.is_err() {
            self.transport.flush();
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
impl<T: Transport, const BUF: usize> Master<T, BUF> {
    fn receive_result(&mut self, response: &mut [u8], timeout_ms: u32) -> Result<usize> {
        let header = get_header(
            &mut self.transport,
            &self.policy,
            timeout_ms,
            Marker::ResultHeader,
            self.in_flight,
        )?;
        let len = check_result(&header, response.len(), BUF)
            .inspect_err(|e| warn!("Rejected result header {header:?}: {e}"))?;

        get_data(
            &mut self.transport,
            &self.policy,
            timeout_ms,
            Marker::ResultData,
            &mut self.buf,
            len,
        )?;
        response[..len].copy_from_slice(&self.buf[DATA_OFFSET..DATA_OFFSET + len]);
        Ok(len)
    }

    fn reset(&mut self) {
        self.state = MasterState::Idle;
        self.in_flight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::packet::{HEADER_PACKET_SIZE, decode, decode_data};
    use crate::testutil::MockTransport;
    use std::vec::Vec;

    fn result_frames(rpc_id: u32, data: &[u8]) -> Vec<u8> {
        let mut frames = encode_header(
            Marker::ResultHeader,
            &Header {
                rpc_id,
                data_len: data.len() as u32,
            },
        )
        .to_vec();
        let mut buf = [0u8; 64];
        buf[DATA_OFFSET..DATA_OFFSET + data.len()].copy_from_slice(data);
        let len = encode_data_in_place(Marker::ResultData, data.len(), &mut buf).unwrap();
        frames.extend_from_slice(&buf[..len]);
        frames
    }

    #[test]
    fn call_sends_command_and_returns_result() {
        let mut transport = MockTransport::new();
        transport.arrive(&result_frames(0x01, &[0xAD, 0xDE]));
        let mut master: Master<_, 64> = Master::new(transport);

        let mut response = [0u8; 8];
        let len = master
            .call(0x01, &[0xDE, 0xAD], &mut response, 100, 100)
            .unwrap();
        assert_eq!(&response[..len], &[0xAD, 0xDE]);
        assert_eq!(master.state(), MasterState::Idle);

        let tx = &master.transport_mut().tx;
        let header = decode(&tx[..HEADER_PACKET_SIZE], Marker::CommandHeader).unwrap();
        assert_eq!(
            Header::from_payload(header),
            Ok(Header {
                rpc_id: 0x01,
                data_len: 2
            })
        );
        let data = &tx[HEADER_PACKET_SIZE..];
        assert_eq!(decode_data(data, Marker::CommandData, 2), Ok(()));
        assert_eq!(&data[DATA_OFFSET..DATA_OFFSET + 2], &[0xDE, 0xAD]);
    }

    #[test]
    fn put_command_enters_awaiting_result() {
        let mut master: Master<_, 64> = Master::new(MockTransport::new());
        master.put_command(7, &[1, 2, 3], 100).unwrap();
        assert_eq!(master.state(), MasterState::AwaitingResult);
    }

    #[test]
    fn zero_send_timeout_on_stalled_transport_fails() {
        let mut transport = MockTransport::new();
        transport.stalled = true;
        let mut master: Master<_, 64> = Master::new(transport);

        let mut response = [0u8; 8];
        assert_eq!(
            master.call(0x01, &[1], &mut response, 0, 0),
            Err(Error::Timeout)
        );
        assert_eq!(master.state(), MasterState::Idle);
        let transport = master.into_inner();
        assert_eq!(transport.puts, 3);
        assert_eq!(transport.gets, 0);
        assert!(transport.timeouts.iter().all(|&t| t == 0));
    }

    #[test]
    fn silent_slave_times_out() {
        let mut master: Master<_, 64> = Master::new(MockTransport::new());
        let mut response = [0u8; 8];
        assert_eq!(
            master.call(0x42, &[], &mut response, 100, 100),
            Err(Error::Timeout)
        );
        assert_eq!(master.into_inner().gets, 3);
    }

    #[test]
    fn result_for_another_call_is_rejected() {
        let mut transport = MockTransport::new();
        transport.arrive(&result_frames(0x02, &[1]));
        transport.arrive(&result_frames(0x02, &[1]));
        transport.arrive(&result_frames(0x02, &[1]));
        let mut master: Master<_, 64> = Master::new(transport);
        let mut response = [0u8; 8];
        assert_eq!(
            master.call(0x01, &[], &mut response, 100, 100),
            Err(Error::SequenceMismatch)
        );
        assert_eq!(master.into_inner().gets, 3);
    }

    #[test]
    fn stale_result_is_skipped() {
        let stale = encode_header(
            Marker::ResultHeader,
            &Header {
                rpc_id: 0x02,
                data_len: 0,
            },
        );
        let mut transport = MockTransport::new();
        transport.arrive(&stale);
        transport.arrive(&result_frames(0x01, &[0x11, 0x22]));
        let mut master: Master<_, 64> = Master::new(transport);

        let mut response = [0u8; 8];
        assert_eq!(master.call(0x01, &[], &mut response, 100, 100), Ok(2));
        assert_eq!(&response[..2], &[0x11, 0x22]);
        assert_eq!(master.into_inner().gets, 3);
    }

    #[test]
    fn response_buffer_too_small() {
        let mut transport = MockTransport::new();
        transport.arrive(&result_frames(0x01, &[1, 2, 3, 4]));
        let mut master: Master<_, 64> = Master::new(transport);
        let mut response = [0u8; 2];
        assert_eq!(
            master.call(0x01, &[], &mut response, 100, 100),
            Err(Error::BufferTooSmall)
        );
    }

    #[test]
    fn request_too_large() {
        let mut master: Master<_, 16> = Master::new(MockTransport::new());
        let mut response = [0u8; 2];
        assert_eq!(
            master.call(0x01, &[0; 9], &mut response, 100, 100),
            Err(Error::PayloadTooLarge)
        );
        assert_eq!(master.into_inner().puts, 0);
    }

    #[test]
    fn corrupt_result_data_is_retried() {
        let frames = result_frames(0x03, &[5, 6, 7]);
        let (header, data) = frames.split_at(HEADER_PACKET_SIZE);
        let mut bad = data.to_vec();
        bad[DATA_OFFSET] ^= 0x01;

        let mut transport = MockTransport::new();
        transport.arrive(header);
        transport.arrive(&bad);
        transport.arrive(data);
        let mut master: Master<_, 64> = Master::new(transport);

        let mut response = [0u8; 8];
        assert_eq!(master.call(0x03, &[], &mut response, 100, 100), Ok(3));
        assert_eq!(&response[..3], &[5, 6, 7]);
    }

    #[test]
    fn sequential_calls_do_not_interleave() {
        let mut transport = MockTransport::new();
        transport.arrive(&result_frames(0x01, &[1]));
        let mut master: Master<_, 64> = Master::new(transport);
        let mut response = [0u8; 8];
        master.call(0x01, &[0xA], &mut response, 100, 100).unwrap();

        let first_call_bytes = master.transport_mut().tx.len();
        master.transport_mut().arrive(&result_frames(0x02, &[2]));
        master.call(0x02, &[0xB], &mut response, 100, 100).unwrap();

        let tx = &master.transport_mut().tx;
        let second = &tx[first_call_bytes..];
        let header = decode(&second[..HEADER_PACKET_SIZE], Marker::CommandHeader).unwrap();
        assert_eq!(Header::from_payload(header).unwrap().rpc_id, 0x02);
        assert_eq!(response[0], 2);
    }
}
