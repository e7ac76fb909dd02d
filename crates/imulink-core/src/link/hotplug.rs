//! Hotplug supervision
//!
//! Periodically checks that the device is present and the transport is
//! alive. A present-but-dead link is torn down and reopened on a fixed
//! interval, replaying the full handshake after each successful open.
//!
//! After `max_reconnect` consecutive failures the supervisor gives up until
//! the device is seen absent again; the next time it appears a fresh round
//! of attempts starts.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::session::{SessionState, Shared, SLEEP_SLICE};
use crate::config::LinkConfig;
use crate::protocol::ProtocolError;

/// Reconnect timing and budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Interval between health checks
    pub check_interval: Duration,
    /// Interval between reconnect attempts
    pub reconnect_interval: Duration,
    /// Maximum consecutive attempts (0 = unbounded)
    pub max_attempts: u32,
    /// How long an attempt waits for the device to be present
    pub presence_timeout: Duration,
}

impl ReconnectPolicy {
    /// Policy described by a link config
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            check_interval: config.check_interval(),
            reconnect_interval: config.reconnect_interval(),
            max_attempts: config.max_reconnect,
            presence_timeout: config.presence_timeout(),
        }
    }

    /// Whether another attempt is allowed after `attempts` consecutive failures
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

enum AttemptError {
    /// Device disappeared or never showed up
    Absent,
    Failed(ProtocolError),
}

pub(crate) struct HotplugSupervisor {
    shared: Arc<Shared>,
    policy: ReconnectPolicy,
    attempts: u32,
    exhausted: bool,
}

impl HotplugSupervisor {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let policy = ReconnectPolicy::from_config(&shared.config);
        Self {
            shared,
            policy,
            attempts: 0,
            exhausted: false,
        }
    }

    pub(crate) fn run(mut self) {
        debug!("hotplug supervisor started");
        while self.shared.sleep_while_running(self.policy.check_interval) {
            self.check();
        }
        debug!("hotplug supervisor stopped");
    }

    fn check(&mut self) {
        if !self.shared.connector.is_present() {
            if self.attempts > 0 || self.exhausted {
                debug!("device absent, reconnect budget reset");
            }
            self.attempts = 0;
            self.exhausted = false;
            if self.shared.is_open() {
                warn!("device {} removed", self.shared.connector.describe());
                self.shared.close();
                self.shared.set_state(SessionState::Reconnecting);
            }
            return;
        }

        if self.shared.probe() || self.exhausted {
            return;
        }

        warn!("link to {} lost, reconnecting", self.shared.connector.describe());
        self.shared.close();
        self.shared.set_state(SessionState::Reconnecting);
        self.reconnect();
    }

    fn reconnect(&mut self) {
        while self.shared.is_running() {
            if !self.policy.allows(self.attempts) {
                error!(
                    "giving up after {} reconnect attempts; waiting for the device to be replugged",
                    self.attempts
                );
                self.exhausted = true;
                return;
            }

            self.attempts += 1;
            self.shared
                .counters
                .reconnect_attempts
                .fetch_add(1, Ordering::Relaxed);
            info!("reconnect attempt {}", self.attempts);

            match self.attempt() {
                Ok(()) => {
                    info!("reconnected after {} attempt(s)", self.attempts);
                    self.attempts = 0;
                    self.shared.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.shared.set_state(SessionState::Running);
                    return;
                }
                Err(AttemptError::Absent) => {
                    info!("device absent, abandoning reconnect");
                    return;
                }
                Err(AttemptError::Failed(e)) => {
                    warn!("reconnect attempt {} failed: {}", self.attempts, e);
                }
            }

            if !self.wait_retry_interval() {
                return;
            }
        }
    }

    fn attempt(&self) -> Result<(), AttemptError> {
        if !self.wait_for_presence() {
            return Err(AttemptError::Absent);
        }

        self.shared.open().map_err(AttemptError::Failed)?;

        // Opening bumped the transport epoch, so the reader resets its
        // codec before it feeds any byte from the new link
        self.shared.set_state(SessionState::Handshaking);
        if let Err(e) = self.shared.handshake() {
            self.shared.close();
            self.shared.set_state(SessionState::Reconnecting);
            return Err(AttemptError::Failed(e));
        }
        Ok(())
    }

    /// Poll for presence up to the presence timeout
    fn wait_for_presence(&self) -> bool {
        let deadline = Instant::now() + self.policy.presence_timeout;
        loop {
            if self.shared.connector.is_present() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline || !self.shared.is_running() {
                return false;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    /// Sleep out the reconnect interval. Returns false if the session stops
    /// or the device disappears meanwhile.
    fn wait_retry_interval(&self) -> bool {
        let deadline = Instant::now() + self.policy.reconnect_interval;
        loop {
            if !self.shared.is_running() {
                return false;
            }
            if !self.shared.connector.is_present() {
                info!("device absent, abandoning reconnect");
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_policy() {
        let policy = ReconnectPolicy::from_config(&LinkConfig::default());
        assert!(policy.allows(0));
        assert!(policy.allows(u32::MAX - 1));
    }

    #[test]
    fn test_bounded_policy() {
        let config = LinkConfig {
            max_reconnect: 2,
            ..LinkConfig::default()
        };
        let policy = ReconnectPolicy::from_config(&config);
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }
}
