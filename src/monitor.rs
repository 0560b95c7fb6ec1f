//! Connection state classification and liveness tracking.
//!
//! The driver task owns both types: [`ConnectionState`] is the classification
//! exposed through [`Link::connection_state`](crate::Link::connection_state),
//! [`Liveness`] decides when an open transport should be declared dead
//! because the device stopped answering probes.

use tokio::time::{Duration, Instant};

/// Classification of the transport channel.
#[derive(strum::Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// No transport, or the device stopped responding.
    Offline,
    /// A transport is being opened or probed, no response seen yet.
    Connecting,
    /// The device is answering.
    Alive,
}

/// Tracks the time of the last inbound traffic on an open transport.
#[derive(Debug)]
pub(crate) struct Liveness {
    last_rx: Instant,
    timeout: Duration,
}

impl Liveness {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_rx: Instant::now(),
            timeout,
        }
    }

    /// Records inbound traffic.
    pub fn record(&mut self) {
        self.last_rx = Instant::now();
    }

    /// Returns whether the device has been silent for longer than the
    /// configured timeout.
    pub fn expired(&self) -> bool {
        self.last_rx.elapsed() >= self.timeout
    }
}
