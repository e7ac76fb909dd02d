//! Link lifetime management
//!
//! [`LinkSession`] owns the transport, runs the startup handshake and the
//! reader worker. [`hotplug`] supervises link health and replays the
//! handshake after the device is replugged.

pub mod hotplug;
mod session;

pub use hotplug::ReconnectPolicy;
pub use session::{LinkSession, LinkStats, SessionState, SETTLE_DELAY};
