//! Master and Slave talking to each other on separate threads.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mcu_rpc::master::Master;
use mcu_rpc::packet::Marker;
use mcu_rpc::slave::{Poll, Slave};
use mcu_rpc::timeout::TimeoutPolicy;
use mcu_rpc::transport::{BusBuffers, BusIsr, Clock, Transport};
use mcu_rpc::{Error, Result};

/// One end of an in-memory full duplex byte link
struct LinkEnd {
    rx: Receiver<u8>,
    tx: Sender<u8>,
}

fn link() -> (LinkEnd, LinkEnd) {
    let (a_tx, b_rx) = channel();
    let (b_tx, a_rx) = channel();
    (LinkEnd { rx: a_rx, tx: a_tx }, LinkEnd { rx: b_rx, tx: b_tx })
}

impl Transport for LinkEnd {
    fn get_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        for slot in buf.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            *slot = match self.rx.recv_timeout(remaining) {
                Ok(byte) => byte,
                Err(RecvTimeoutError::Timeout) => return Err(Error::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(Error::Io),
            };
        }
        Ok(())
    }

    fn put_bytes(&mut self, data: &[u8], _timeout_ms: u32) -> Result<()> {
        for &byte in data {
            self.tx.send(byte).map_err(|_| Error::Io)?;
        }
        Ok(())
    }

    fn flush(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Records the marker of every packet passing through the wrapped transport
struct Recording<T> {
    inner: T,
    log: Arc<Mutex<Vec<(char, u16)>>>,
}

impl<T: Transport> Transport for Recording<T> {
    fn get_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<()> {
        self.inner.get_bytes(buf, timeout_ms)?;
        self.record('<', buf);
        Ok(())
    }

    fn put_bytes(&mut self, data: &[u8], timeout_ms: u32) -> Result<()> {
        self.inner.put_bytes(data, timeout_ms)?;
        self.record('>', data);
        Ok(())
    }

    fn flush(&mut self) {
        self.inner.flush()
    }
}

impl<T> Recording<T> {
    fn record(&self, direction: char, frame: &[u8]) {
        let marker = u16::from_le_bytes([frame[0], frame[1]]);
        self.log.lock().unwrap().push((direction, marker));
    }
}

fn reverse(_event: u32, data: &mut [u8], len: u32) -> u32 {
    data[..len as usize].reverse();
    len
}

fn sum(_event: u32, data: &mut [u8], len: u32) -> u32 {
    let total: u32 = data[..len as usize].iter().map(|&b| b as u32).sum();
    data[..4].copy_from_slice(&total.to_le_bytes());
    4
}

fn fast_policy(retries: u8) -> TimeoutPolicy {
    TimeoutPolicy {
        short_timeout_ms: 50,
        long_timeout_ms: 1000,
        retries,
    }
}

/// Run a Slave over `transport` on its own thread until `stop` is set
fn spawn_slave<T: Transport + Send + 'static>(
    transport: T,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut slave: Slave<_> = Slave::with_policy(transport, fast_policy(2));
        slave.register_callback(0x01, reverse).unwrap();
        slave.register_callback(0x02, sum).unwrap();
        while !stop.load(Ordering::Relaxed) {
            let _ = slave.poll();
        }
    })
}

#[test]
fn reversed_echo() {
    let (master_end, slave_end) = link();
    let stop = Arc::new(AtomicBool::new(false));
    let slave = spawn_slave(slave_end, stop.clone());

    let mut master: Master<_> = Master::with_policy(master_end, fast_policy(3));
    let mut response = [0u8; 16];
    let len = master
        .call(0x01, &[0xDE, 0xAD], &mut response, 1000, 1000)
        .unwrap();
    assert_eq!(&response[..len], &[0xAD, 0xDE]);

    stop.store(true, Ordering::Relaxed);
    slave.join().unwrap();
}

#[test]
fn unregistered_identifier_times_out() {
    let (master_end, slave_end) = link();
    let stop = Arc::new(AtomicBool::new(false));
    let slave = spawn_slave(slave_end, stop.clone());

    let mut master: Master<_> = Master::with_policy(master_end, fast_policy(3));
    let mut response = [0u8; 16];
    let start = Instant::now();
    assert_eq!(
        master.call(0x77, &[1, 2, 3], &mut response, 1000, 1000),
        Err(Error::Timeout)
    );
    // Three attempts at the result header, 50ms each
    assert!(start.elapsed() < Duration::from_secs(2));

    // The link is still usable afterwards
    let len = master.call(0x02, &[1, 2, 3], &mut response, 1000, 1000).unwrap();
    assert_eq!(&response[..len], &6u32.to_le_bytes());

    stop.store(true, Ordering::Relaxed);
    slave.join().unwrap();
}

#[test]
fn sequential_calls_never_interleave() {
    let (master_end, slave_end) = link();
    let stop = Arc::new(AtomicBool::new(false));
    let slave = spawn_slave(slave_end, stop.clone());

    let log = Arc::new(Mutex::new(Vec::new()));
    let transport = Recording {
        inner: master_end,
        log: log.clone(),
    };
    let mut master: Master<_> = Master::with_policy(transport, fast_policy(3));
    let mut response = [0u8; 16];
    master.call(0x01, &[1, 2], &mut response, 1000, 1000).unwrap();
    master.call(0x02, &[3, 4], &mut response, 1000, 1000).unwrap();

    stop.store(true, Ordering::Relaxed);
    slave.join().unwrap();

    let one_call = [
        ('>', Marker::CommandHeader.value()),
        ('>', Marker::CommandData.value()),
        ('<', Marker::ResultHeader.value()),
        ('<', Marker::ResultData.value()),
    ];
    let expected: Vec<_> = one_call.iter().chain(one_call.iter()).copied().collect();
    assert_eq!(*log.lock().unwrap(), expected);
}

#[test]
fn zero_send_timeout_on_stalled_link() {
    struct Stalled;

    impl Transport for Stalled {
        fn get_bytes(&mut self, _buf: &mut [u8], _timeout_ms: u32) -> Result<()> {
            Err(Error::Timeout)
        }

        fn put_bytes(&mut self, _data: &[u8], _timeout_ms: u32) -> Result<()> {
            Err(Error::Timeout)
        }
    }

    let mut master: Master<_> = Master::new(Stalled);
    let mut response = [0u8; 4];
    assert_eq!(
        master.call(0x01, &[0xDE, 0xAD], &mut response, 0, 0),
        Err(Error::Timeout)
    );
}

struct StdClock(Instant);

impl Clock for StdClock {
    fn now_ms(&self) -> u32 {
        self.0.elapsed().as_millis() as u32
    }
}

/// Master side of a bus, driving the Slave's interrupt handlers directly,
/// as the bus hardware would
struct BusMaster<'a, const N: usize> {
    isr: BusIsr<'a, N>,
}

impl<const N: usize> Transport for BusMaster<'_, N> {
    fn get_bytes(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.isr.on_request(&mut buf[filled..]);
            if filled < buf.len() {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout);
                }
                thread::yield_now();
            }
        }
        Ok(())
    }

    fn put_bytes(&mut self, data: &[u8], timeout_ms: u32) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut sent = 0;
        while sent < data.len() {
            sent += self.isr.on_receive(&data[sent..]);
            if sent < data.len() {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout);
                }
                thread::yield_now();
            }
        }
        Ok(())
    }
}

#[test]
fn call_over_buffered_bus() {
    let mut buffers: BusBuffers<64> = BusBuffers::new();
    let (slave_transport, isr) = buffers.split(StdClock(Instant::now()));
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            let mut slave: Slave<_, 4, 32> = Slave::with_policy(slave_transport, fast_policy(2));
            slave.register_callback(0x01, reverse).unwrap();
            while !stop.load(Ordering::Relaxed) {
                if let Ok(Poll::Handled(id)) = slave.poll() {
                    assert_eq!(id, 0x01);
                }
            }
        });

        let mut master: Master<_, 32> =
            Master::with_policy(BusMaster { isr }, fast_policy(3));
        let mut response = [0u8; 24];
        let request = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let len = master
            .call(0x01, &request, &mut response, 1000, 1000)
            .unwrap();
        assert_eq!(&response[..len], &[8, 7, 6, 5, 4, 3, 2, 1]);

        stop.store(true, Ordering::Relaxed);
    });
}
