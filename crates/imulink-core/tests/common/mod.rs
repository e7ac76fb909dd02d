//! In-memory sensor used by the integration tests
#![allow(dead_code)]

use imulink_core::config::LinkConfig;
use imulink_core::protocol::{
    encode_frame, Connector, FrameCodec, ProtocolError, Transport, PREAMBLE_LEN,
};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// State of the mock device, shared between the test and every transport it opens
#[derive(Default)]
pub struct MockDevice {
    pub present: AtomicBool,
    pub fail_open: AtomicBool,
    pub fail_writes: AtomicBool,
    pub read_fault: AtomicBool,
    pub opens: AtomicUsize,
    pub written: Mutex<Vec<u8>>,
    pub inbound: Mutex<VecDeque<u8>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        let device = Self::default();
        device.present.store(true, Ordering::SeqCst);
        Arc::new(device)
    }

    /// Queue bytes for the host to read
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.inbound.lock().unwrap().extend(bytes.iter().copied());
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.lock().unwrap().len()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every command payload written so far, decoded from the wire
    pub fn commands(&self) -> Vec<Vec<u8>> {
        let written = self.written.lock().unwrap();
        let mut codec = FrameCodec::device();
        written
            .iter()
            .filter_map(|b| codec.feed(*b))
            .map(|f| f.payload)
            .collect()
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

pub struct MockConnector(pub Arc<MockDevice>);

impl Connector for MockConnector {
    fn is_present(&self) -> bool {
        self.0.present.load(Ordering::SeqCst)
    }

    fn open(&self) -> Result<Box<dyn Transport>, ProtocolError> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_open.load(Ordering::SeqCst) || !self.is_present() {
            return Err(ProtocolError::ConnectionFailed("mock open failure".to_string()));
        }
        self.0.read_fault.store(false, Ordering::SeqCst);
        Ok(Box::new(MockTransport(Arc::clone(&self.0))))
    }

    fn describe(&self) -> String {
        "mock sensor".to_string()
    }
}

pub struct MockTransport(Arc<MockDevice>);

impl MockTransport {
    fn dead(&self) -> bool {
        self.0.read_fault.load(Ordering::SeqCst) || !self.0.present.load(Ordering::SeqCst)
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.dead() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock unplugged"));
        }
        let next = self.0.inbound.lock().unwrap().pop_front();
        match next {
            Some(b) if !buf.is_empty() => {
                buf[0] = b;
                Ok(1)
            }
            _ => {
                thread::sleep(Duration::from_millis(1));
                Err(io::Error::new(io::ErrorKind::TimedOut, "mock timeout"))
            }
        }
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.0.fail_writes.load(Ordering::SeqCst) || self.dead() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        self.0.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        if self.dead() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock unplugged"));
        }
        Ok(self.0.inbound.lock().unwrap().len() as u32)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.0.inbound.lock().unwrap().clear();
        Ok(())
    }
}

/// Config with short intervals so supervision tests run quickly
pub fn fast_config() -> LinkConfig {
    LinkConfig {
        port: "mock".to_string(),
        check_interval_ms: 20,
        reconnect_interval_ms: 20,
        presence_timeout_ms: 200,
        ..LinkConfig::default()
    }
}

/// A sensor report frame carrying only a timestamp
pub fn timestamp_report(address: u8, timestamp: u32) -> Vec<u8> {
    let mut payload = vec![0x11, 0x00, 0x00];
    payload.extend_from_slice(&timestamp.to_le_bytes());
    encode_frame(&payload, address).unwrap()
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Length of one framed single-byte command on the wire
pub const SINGLE_BYTE_COMMAND_LEN: usize = PREAMBLE_LEN + 6;

/// Route library logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("imulink_core=debug")
        .try_init();
}
