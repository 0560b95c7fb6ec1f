//! Control a remote firing box over its serial uplink.
//!
//! # Overview
//!
//! The `padlink` crate implements the host side of a firing box's serial
//! control protocol. It offers an asynchronous adapter that owns the
//! connection lifecycle, transmits arm/disarm/fire commands, correlates the
//! device's acknowledgment and error frames, and enforces the armed/disarmed
//! safety interlock.
//!
//! The central type is [`Link`]:
//!
//! - [`Link::arm`] and [`Link::disarm`] drive the safety interlock. The
//!   interlock state changes only on a confirmed device acknowledgment,
//!   never optimistically.
//! - [`Link::fire_action_group`] fires one of the pre-configured
//!   [`ActionGroup`]s. Firing is rejected locally while disarmed; the
//!   adapter enforces the interlock itself instead of trusting the UI.
//! - An [`Observer`] receives the four notifications a front-end needs:
//!   connection changes, acknowledgments, failures and arm state changes.
//!
//! At most one command is in flight at any time. Further submissions are
//! rejected (not queued), so a stale command can never fire late. A lost
//! connection immediately fails the pending command and forces the interlock
//! to disarmed; after a reconnection the device's arm state is never assumed.
//!
//! # Transports
//!
//! The adapter works over any duplex byte stream. A [`Connect`] implementation
//! supplies fresh transports for the initial connection and every
//! reconnection:
//!
//! ```no_run
//! use padlink::{async_trait, Connect, Link, LinkConfig, Observer, Snapshot};
//! use std::io;
//! use tokio::net::TcpStream;
//!
//! /// Firing box reachable through a TCP serial bridge.
//! struct Bridge(String);
//!
//! #[async_trait]
//! impl Connect for Bridge {
//!     type Transport = TcpStream;
//!
//!     async fn connect(&mut self) -> io::Result<TcpStream> {
//!         TcpStream::connect(&self.0).await
//!     }
//! }
//!
//! struct Panel;
//!
//! impl Observer for Panel {
//!     fn connection_changed(&self, snapshot: Snapshot) {
//!         println!("Connected: {}", snapshot.connected);
//!     }
//!
//!     fn arm_status_changed(&self, snapshot: Snapshot) {
//!         println!("Armed: {}", snapshot.armed);
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let link = Link::open(Bridge("10.0.0.7:2000".into()), Panel, LinkConfig::default());
//!
//! if let Err(err) = link.arm() {
//!     eprintln!("Arm rejected: {err}");
//! }
//! # }
//! ```
//!
//! With the `native-serial` feature enabled, [`serial::SerialConnector`]
//! provides the same for a local serial port.
//!
//! # Protocol details
//!
//! The uplink is a reliable-order, unreliable-delivery byte stream carrying
//! fixed six-byte frames (see [`frame`]). Every request carries a sequence
//! number echoed by the device's response; responses that match no pending
//! command are discarded as stale. The adapter probes the device periodically
//! and declares the link dead after a configurable silence, so a firing panel
//! never acts on a connection that only looks open.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod action;
mod command;
mod dispatch;
mod driver;
pub mod frame;
mod link;
mod monitor;

#[cfg(feature = "native-serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-serial")))]
pub mod serial;

pub use action::{load_action_sets, ActionGroup, ActionSet, GroupId};
pub use async_trait::async_trait;
pub use command::{ArmState, Command, CorrelationId, Failure};
pub use frame::DeviceReason;
pub use link::{Link, LinkConfig, Observer, Snapshot};
pub use monitor::ConnectionState;

use tokio::io::{AsyncRead, AsyncWrite};

/// Factory for transports to the firing box.
///
/// Invoked by the link's driver task for the initial connection and again
/// after every transport loss.
#[async_trait]
pub trait Connect: Send + 'static {
    /// Transport type produced by this connector.
    type Transport: AsyncRead + AsyncWrite + Send + 'static;

    /// Opens a fresh transport to the device.
    async fn connect(&mut self) -> std::io::Result<Self::Transport>;
}
