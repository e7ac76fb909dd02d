//! Session management
//!
//! Handles the link lifecycle, the device handshake and sample delivery.
//!
//! Two workers run while a session is up: the reader, which pulls single
//! bytes off the transport and feeds them to a [`StreamDecoder`], and the
//! hotplug supervisor. Every transport operation goes through one mutex and
//! is held only around the I/O call itself.
//!
//! With the default inline dispatch the data callback runs on the reader
//! thread; a slow callback stalls byte ingestion. Set
//! [`LinkConfig::queue_capacity`] to hand samples to a separate dispatch
//! thread instead.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::hotplug::HotplugSupervisor;
use crate::config::LinkConfig;
use crate::protocol::{
    encode_command, Command, Connector, ProtocolError, Sample, SerialConnector, StreamDecoder,
    Transport,
};

/// Pause after the parameter and wake commands before the next step
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Reader back-off while there is no usable transport
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Reader back-off after a read that returned nothing
const EMPTY_READ_POLL: Duration = Duration::from_millis(1);

/// Longest uninterrupted sleep of a worker, so shutdown is seen promptly
pub(crate) const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Data callback type
pub type SampleCallback = Box<dyn FnMut(Sample) + Send + 'static>;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport, no workers
    Stopped,
    /// Opening the transport
    Opening,
    /// Sending the handshake commands
    Handshaking,
    /// Streaming samples
    Running,
    /// Link lost; the supervisor is trying to restore it
    Reconnecting,
}

/// Snapshot of the session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Bytes read from the transport
    pub rx_bytes: u64,
    /// Bytes written to the transport
    pub tx_bytes: u64,
    /// Samples handed to the data callback
    pub samples: u64,
    /// Aborted frame attempts (bad address, length, checksum or end byte)
    pub frame_errors: u64,
    /// Samples dropped because the dispatch queue was full
    pub samples_dropped: u64,
    /// Reconnect attempts made by the supervisor
    pub reconnect_attempts: u64,
    /// Reconnects that completed the handshake
    pub reconnects: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    samples: AtomicU64,
    frame_errors: AtomicU64,
    samples_dropped: AtomicU64,
    pub(crate) reconnect_attempts: AtomicU64,
    pub(crate) reconnects: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> LinkStats {
        LinkStats {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

enum ReadOutcome {
    /// A byte, tagged with the epoch of the transport it came from
    Byte(u8, u64),
    /// The read timed out or returned nothing
    Empty,
    /// No transport, or the transport is faulted
    Unavailable,
}

/// State shared between the session handle and its workers
pub(crate) struct Shared {
    pub(crate) config: LinkConfig,
    pub(crate) connector: Box<dyn Connector>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    state: Mutex<SessionState>,
    running: AtomicBool,
    faulted: AtomicBool,
    /// Bumped on every successful open; the reader resets its codec when it changes
    epoch: AtomicU64,
    pub(crate) counters: Counters,
}

impl Shared {
    fn new(config: LinkConfig, connector: Box<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            transport: Mutex::new(None),
            state: Mutex::new(SessionState::Stopped),
            running: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    fn lock_transport(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            info!("session state: {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.lock_transport().is_some()
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    fn mark_faulted(&self, reason: &str) {
        if !self.faulted.swap(true, Ordering::AcqRel) {
            warn!("transport fault: {reason}");
        }
    }

    /// Open a fresh transport and install it
    pub(crate) fn open(&self) -> Result<(), ProtocolError> {
        let transport = self.connector.open()?;
        let mut guard = self.lock_transport();
        *guard = Some(transport);
        // Bumped under the transport lock so every byte read from the new
        // transport carries the new epoch
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.faulted.store(false, Ordering::Release);
        info!("opened {}", self.connector.describe());
        Ok(())
    }

    /// Drop the transport, if any
    pub(crate) fn close(&self) {
        if self.lock_transport().take().is_some() {
            info!("closed {}", self.connector.describe());
        }
    }

    /// Whether the transport is open, not faulted and answers a liveness probe
    pub(crate) fn probe(&self) -> bool {
        let mut guard = self.lock_transport();
        let Some(transport) = guard.as_mut() else {
            return false;
        };
        if self.is_faulted() {
            return false;
        }
        match transport.bytes_to_read() {
            Ok(_) => true,
            Err(e) => {
                self.mark_faulted(&format!("liveness probe failed: {e}"));
                false
            }
        }
    }

    /// Frame and write one command
    pub(crate) fn send(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        let bytes = encode_command(payload, self.config.device_address)?;
        let mut guard = self.lock_transport();
        let transport = guard.as_mut().ok_or(ProtocolError::NotConnected)?;

        debug!("sending {} bytes, command {:#04x}", bytes.len(), payload[0]);
        let result = transport.write_all(&bytes).and_then(|_| transport.flush());
        drop(guard);

        match result {
            Ok(()) => {
                self.counters
                    .tx_bytes
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.mark_faulted(&format!("write failed: {e}"));
                Err(ProtocolError::SerialError(e.to_string()))
            }
        }
    }

    /// Configure parameters, wake the sensor, enable auto-report.
    ///
    /// The transport lock is only held per write, never across the settle delays.
    pub(crate) fn handshake(&self) -> Result<(), ProtocolError> {
        let params = self.config.device_params().to_payload();
        let wake = [Command::Wake.byte()];
        let auto_report = [Command::EnableAutoReport.byte()];
        let steps: [(Command, &[u8], bool); 3] = [
            (Command::ConfigureParams, &params, true),
            (Command::Wake, &wake, true),
            (Command::EnableAutoReport, &auto_report, false),
        ];

        for (command, payload, settle) in steps {
            self.send(payload)
                .map_err(|e| ProtocolError::HandshakeFailed {
                    step: command.name(),
                    reason: e.to_string(),
                })?;
            debug!("handshake: sent {}", command.name());
            if settle {
                thread::sleep(SETTLE_DELAY);
            }
        }

        info!("handshake complete");
        Ok(())
    }

    /// Sleep up to `duration`, waking early on shutdown.
    /// Returns whether the session is still running.
    pub(crate) fn sleep_while_running(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
        false
    }

    fn read_byte(&self) -> ReadOutcome {
        let mut guard = self.lock_transport();
        let Some(transport) = guard.as_mut() else {
            return ReadOutcome::Unavailable;
        };
        if self.is_faulted() {
            return ReadOutcome::Unavailable;
        }

        let mut buf = [0u8; 1];
        match transport.read(&mut buf) {
            Ok(0) => ReadOutcome::Empty,
            Ok(_) => {
                self.counters.rx_bytes.fetch_add(1, Ordering::Relaxed);
                ReadOutcome::Byte(buf[0], self.epoch.load(Ordering::Acquire))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                ReadOutcome::Empty
            }
            Err(e) => {
                self.mark_faulted(&format!("read failed: {e}"));
                ReadOutcome::Unavailable
            }
        }
    }
}

/// Where decoded samples go
enum SampleSink {
    Inline(SampleCallback),
    Queued(SyncSender<Sample>),
    Discard,
}

impl SampleSink {
    fn deliver(&mut self, sample: Sample, counters: &Counters) {
        match self {
            SampleSink::Inline(callback) => {
                if invoke_guarded(callback, sample) {
                    counters.samples.fetch_add(1, Ordering::Relaxed);
                }
            }
            SampleSink::Queued(tx) => match tx.try_send(sample) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    if counters.samples_dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                        warn!("dispatch queue full, dropping samples");
                    }
                }
            },
            SampleSink::Discard => {}
        }
    }

    fn into_callback(self) -> Option<SampleCallback> {
        match self {
            SampleSink::Inline(callback) => Some(callback),
            _ => None,
        }
    }
}

/// Run the callback, containing any panic so it never unwinds into a worker
fn invoke_guarded(callback: &mut SampleCallback, sample: Sample) -> bool {
    match catch_unwind(AssertUnwindSafe(|| callback(sample))) {
        Ok(()) => true,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("data callback panicked: {msg}");
            false
        }
    }
}

fn run_reader(shared: Arc<Shared>, mut sink: SampleSink) -> Option<SampleCallback> {
    let mut decoder = StreamDecoder::new(shared.config.device_address);
    let mut seen_epoch = shared.epoch.load(Ordering::Acquire);
    let mut reported_errors = 0;

    debug!("reader started");
    while shared.is_running() {
        match shared.read_byte() {
            ReadOutcome::Byte(byte, epoch) => {
                if epoch != seen_epoch {
                    decoder.reset();
                    seen_epoch = epoch;
                }
                if let Some(sample) = decoder.push(byte) {
                    sink.deliver(sample, &shared.counters);
                }
                let errors = decoder.frame_stats().aborted();
                if errors != reported_errors {
                    shared
                        .counters
                        .frame_errors
                        .fetch_add(errors - reported_errors, Ordering::Relaxed);
                    reported_errors = errors;
                }
            }
            ReadOutcome::Empty => thread::sleep(EMPTY_READ_POLL),
            ReadOutcome::Unavailable => {
                shared.sleep_while_running(IDLE_POLL);
            }
        }
    }
    debug!("reader stopped");

    sink.into_callback()
}

fn run_dispatch(
    shared: Arc<Shared>,
    rx: Receiver<Sample>,
    mut callback: SampleCallback,
) -> Option<SampleCallback> {
    // Ends once the reader drops its sender
    for sample in rx {
        if invoke_guarded(&mut callback, sample) {
            shared.counters.samples.fetch_add(1, Ordering::Relaxed);
        }
    }
    Some(callback)
}

/// A supervised link to one sensor
pub struct LinkSession {
    shared: Arc<Shared>,
    callback: Option<SampleCallback>,
    workers: Vec<JoinHandle<Option<SampleCallback>>>,
}

impl LinkSession {
    /// Create a session over any connector (not yet started)
    pub fn new(config: LinkConfig, connector: impl Connector + 'static) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, Box::new(connector))),
            callback: None,
            workers: Vec::new(),
        }
    }

    /// Create a session over the serial port named in the config
    pub fn serial(config: LinkConfig) -> Self {
        let connector = SerialConnector::new(&config.port, config.baud_rate, config.read_timeout());
        Self::new(config, connector)
    }

    /// Set the function called for every decoded, address-matched sample.
    ///
    /// Takes effect on the next [`start`](Self::start).
    pub fn set_data_callback<F>(&mut self, callback: F)
    where
        F: FnMut(Sample) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Configuration the session was created with
    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Whether the workers are running
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Whether a healthy transport is currently open
    pub fn is_connected(&self) -> bool {
        self.shared.is_open() && !self.shared.is_faulted()
    }

    /// Counter snapshot
    pub fn stats(&self) -> LinkStats {
        self.shared.counters.snapshot()
    }

    /// Open the transport, run the handshake and start the workers
    pub fn start(&mut self) -> Result<(), ProtocolError> {
        if self.shared.is_running() || !self.workers.is_empty() {
            return Err(ProtocolError::AlreadyRunning);
        }

        self.shared.set_state(SessionState::Opening);
        if let Err(e) = self.shared.open() {
            self.shared.set_state(SessionState::Stopped);
            return Err(e);
        }

        self.shared.set_state(SessionState::Handshaking);
        if let Err(e) = self.shared.handshake() {
            self.shared.close();
            self.shared.set_state(SessionState::Stopped);
            return Err(e);
        }

        self.shared.running.store(true, Ordering::Release);
        self.shared.set_state(SessionState::Running);

        if let Err(e) = self.spawn_workers() {
            self.stop();
            return Err(e);
        }
        Ok(())
    }

    fn spawn_workers(&mut self) -> Result<(), ProtocolError> {
        let sink = match (self.callback.take(), self.shared.config.queue_capacity) {
            (None, _) => SampleSink::Discard,
            (Some(callback), 0) => SampleSink::Inline(callback),
            (Some(callback), capacity) => {
                let (tx, rx) = mpsc::sync_channel(capacity);
                let shared = Arc::clone(&self.shared);
                let handle = thread::Builder::new()
                    .name("imulink-dispatch".to_string())
                    .spawn(move || run_dispatch(shared, rx, callback))?;
                self.workers.push(handle);
                SampleSink::Queued(tx)
            }
        };

        let shared = Arc::clone(&self.shared);
        let reader = thread::Builder::new()
            .name("imulink-reader".to_string())
            .spawn(move || run_reader(shared, sink))?;
        self.workers.push(reader);

        let supervisor = HotplugSupervisor::new(Arc::clone(&self.shared));
        let handle = thread::Builder::new()
            .name("imulink-hotplug".to_string())
            .spawn(move || {
                supervisor.run();
                None
            })?;
        self.workers.push(handle);
        Ok(())
    }

    /// Stop the workers and release the transport. Valid from any state.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);

        for handle in self.workers.drain(..) {
            match handle.join() {
                Ok(Some(callback)) => self.callback = Some(callback),
                Ok(None) => {}
                Err(_) => error!("worker thread panicked"),
            }
        }

        self.shared.close();
        self.shared.set_state(SessionState::Stopped);
    }

    /// Frame and send a command payload to the configured device address
    pub fn send_command(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        if self.shared.is_faulted() {
            return Err(ProtocolError::NotConnected);
        }
        self.shared.send(payload)
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        self.stop();
    }
}
