//! Demo Mode - Simulated IMU for running without hardware
//!
//! The simulated sensor listens for the handshake like the real module and,
//! once auto-report is enabled, streams sensor reports at the configured
//! rate. The board slowly yaws while sitting level, with a little noise on
//! every axis. Presence can be toggled to exercise hotplug handling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::protocol::{
    packet::build_frame,
    sample::{
        SCALE_ACCEL, SCALE_AIR_PRESSURE, SCALE_ANGLE, SCALE_ANGLE_SPEED, SCALE_HEIGHT, SCALE_MAG,
        SCALE_QUAT, SCALE_TEMPERATURE,
    },
    Command, Connector, FieldMask, FrameCodec, ProtocolError, Transport, BROADCAST_ADDRESS,
};

/// Standard gravity, m/s²
const GRAVITY: f32 = 9.806_65;

/// Yaw rate of the simulated board, degrees per second
const YAW_RATE_DPS: f32 = 12.0;

/// Address the simulated sensor reports from
const DEMO_ADDRESS: u8 = 0x50;

/// Longest a read blocks waiting for the next report
const READ_WAIT: Duration = Duration::from_millis(10);

/// Connector for the simulated sensor
#[derive(Debug, Clone)]
pub struct DemoConnector {
    present: Arc<AtomicBool>,
}

impl Default for DemoConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoConnector {
    /// Create a plugged-in simulated sensor
    pub fn new() -> Self {
        Self {
            present: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate plugging or unplugging the device
    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::Release);
    }
}

impl Connector for DemoConnector {
    fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    fn open(&self) -> Result<Box<dyn Transport>, ProtocolError> {
        if !self.is_present() {
            return Err(ProtocolError::PortNotFound("demo".to_string()));
        }
        Ok(Box::new(DemoTransport::new(Arc::clone(&self.present))))
    }

    fn describe(&self) -> String {
        "demo sensor".to_string()
    }
}

/// One open link to the simulated sensor
pub struct DemoTransport {
    present: Arc<AtomicBool>,
    started: Instant,
    next_report: Instant,
    interval: Duration,
    fields: FieldMask,
    streaming: bool,
    rx: FrameCodec,
    outbound: VecDeque<u8>,
    rng: StdRng,
}

impl DemoTransport {
    fn new(present: Arc<AtomicBool>) -> Self {
        let now = Instant::now();
        Self {
            present,
            started: now,
            next_report: now,
            interval: Duration::from_millis(1000 / 60),
            fields: FieldMask::ALL,
            streaming: false,
            rx: FrameCodec::device(),
            outbound: VecDeque::new(),
            rng: StdRng::from_entropy(),
        }
    }

    fn check_present(&self) -> io::Result<()> {
        if self.present.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "demo sensor unplugged"))
        }
    }

    fn handle_command(&mut self, payload: &[u8]) {
        match payload.first().copied().and_then(Command::from_byte) {
            Some(Command::ConfigureParams) if payload.len() >= 11 => {
                let rate = payload[5].max(1) as u64;
                self.interval = Duration::from_millis(1000 / rate);
                self.fields = FieldMask(u16::from_le_bytes([payload[9], payload[10]]));
            }
            Some(Command::EnableAutoReport) => {
                self.streaming = true;
                self.next_report = Instant::now();
            }
            _ => {}
        }
    }

    fn noise(&mut self, amplitude: f32) -> f32 {
        self.rng.gen_range(-amplitude..=amplitude)
    }

    /// Build one sensor report payload for the current simulated pose
    fn report_payload(&mut self) -> Vec<u8> {
        let elapsed = self.started.elapsed();
        let t = elapsed.as_secs_f32();
        let yaw = (t * YAW_RATE_DPS + 180.0).rem_euclid(360.0) - 180.0;
        let half = yaw.to_radians() / 2.0;

        let mut payload = vec![Command::SensorReport.byte()];
        payload.extend_from_slice(&self.fields.bits().to_le_bytes());
        payload.extend_from_slice(&(elapsed.as_millis() as u32).to_le_bytes());

        for (bit, _) in FieldMask::BLOCKS {
            if !self.fields.contains(bit) {
                continue;
            }
            match bit {
                FieldMask::ACCEL => {
                    let v = [self.noise(0.05), self.noise(0.05), self.noise(0.05)];
                    push_scaled(&mut payload, &v, SCALE_ACCEL);
                }
                FieldMask::ACCEL_WITH_GRAVITY => {
                    let v = [self.noise(0.05), self.noise(0.05), GRAVITY + self.noise(0.05)];
                    push_scaled(&mut payload, &v, SCALE_ACCEL);
                }
                FieldMask::GYRO => {
                    let v = [self.noise(0.3), self.noise(0.3), YAW_RATE_DPS + self.noise(0.3)];
                    push_scaled(&mut payload, &v, SCALE_ANGLE_SPEED);
                }
                FieldMask::MAG => {
                    let (s, c) = yaw.to_radians().sin_cos();
                    let v = [30.0 * c, -30.0 * s, -40.0 + self.noise(0.5)];
                    push_scaled(&mut payload, &v, SCALE_MAG);
                }
                FieldMask::ENVIRONMENT => {
                    let temperature = 24.5 + self.noise(0.1);
                    push_scaled(&mut payload, &[temperature], SCALE_TEMPERATURE);
                    let pressure = 1013.25 + self.noise(0.05);
                    push_i24(&mut payload, (pressure / SCALE_AIR_PRESSURE) as i32);
                    let altitude = 12.0 + self.noise(0.2);
                    push_i24(&mut payload, (altitude / SCALE_HEIGHT) as i32);
                }
                FieldMask::QUATERNION => {
                    let q = [half.cos(), 0.0, 0.0, half.sin()];
                    push_scaled(&mut payload, &q, SCALE_QUAT);
                }
                FieldMask::EULER => {
                    let v = [self.noise(0.2), self.noise(0.2), yaw];
                    push_scaled(&mut payload, &v, SCALE_ANGLE);
                }
                _ => {}
            }
        }
        payload
    }

    fn queue_due_report(&mut self) {
        if !self.streaming || !self.outbound.is_empty() {
            return;
        }
        let now = Instant::now();
        if now < self.next_report {
            thread::sleep((self.next_report - now).min(READ_WAIT));
            return;
        }
        self.next_report += self.interval;
        if self.next_report < now {
            // Fell behind; do not burst to catch up
            self.next_report = now + self.interval;
        }
        let payload = self.report_payload();
        // Reports may exceed the host-to-device length limit
        self.outbound.extend(build_frame(&payload, DEMO_ADDRESS));
    }
}

/// Whether a command addressed to `address` reaches the simulated sensor
fn is_for_demo(address: u8) -> bool {
    address == BROADCAST_ADDRESS || address == DEMO_ADDRESS
}

fn push_scaled(payload: &mut Vec<u8>, values: &[f32], scale: f32) {
    for v in values {
        let raw = (v / scale).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        payload.extend_from_slice(&raw.to_le_bytes());
    }
}

fn push_i24(payload: &mut Vec<u8>, value: i32) {
    payload.extend_from_slice(&value.to_le_bytes()[..3]);
}

impl Read for DemoTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_present()?;
        self.queue_due_report();
        let mut n = 0;
        while n < buf.len() {
            match self.outbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        Ok(n)
    }
}

impl Write for DemoTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_present()?;
        for &b in buf {
            match self.rx.feed(b) {
                Some(frame) if is_for_demo(frame.address) => self.handle_command(&frame.payload),
                Some(frame) => debug!("ignoring command for address {}", frame.address),
                None => {}
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_present()
    }
}

impl Transport for DemoTransport {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.check_present()?;
        Ok(self.outbound.len() as u32)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.check_present()?;
        self.outbound.clear();
        Ok(())
    }
}
