//! Command and failure types shared across the adapter.

use crate::{action::GroupId, frame::DeviceReason};
use core::fmt::{Display, Formatter};

/// A user intent transmitted to the firing box.
///
/// Commands are transient values: one exists only from submission until the
/// matching acknowledgment, error, timeout or forced disconnect-failure.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Command {
    /// Engage the safety interlock, allowing action groups to be fired.
    Arm,
    /// Release the safety interlock.
    Disarm,
    /// Fire the action group with the given identifier.
    Fire(GroupId),
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Arm => write!(f, "arm"),
            Self::Disarm => write!(f, "disarm"),
            Self::Fire(group) => write!(f, "fire group {group}"),
        }
    }
}

/// Identifier tying a response frame to the request that caused it.
///
/// Allocated from a wrapping sequence counter when a command is accepted.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct CorrelationId(pub(crate) u8);

impl CorrelationId {
    /// Returns the raw sequence number carried on the wire.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Safety interlock state.
///
/// Reflects the last **acknowledged** device state, never the last requested
/// one. The only mutation paths are a confirmed arm/disarm acknowledgment and
/// the forced disarm on connection loss.
#[derive(strum::Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "lowercase")]
pub enum ArmState {
    /// Actuation commands are rejected locally.
    Disarmed,
    /// Actuation commands may be transmitted.
    Armed,
}

/// Reason a command was rejected or resolved unsuccessfully.
///
/// Every variant reaches the UI through the single
/// [`Observer::command_failed`](crate::Observer::command_failed) callback.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Failure {
    /// Another command is already in flight.
    Busy,
    /// The transport is not alive.
    NotConnected,
    /// An action group was fired while the interlock was disarmed.
    Disarmed,
    /// The requested arm state is already in effect.
    Redundant,
    /// The device answered with an explicit error frame.
    Device(DeviceReason),
    /// No response arrived before the deadline; the device is assumed
    /// not to have acted.
    Timeout,
    /// The connection was lost while the command was in flight.
    Disconnected,
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "another command is in flight"),
            Self::NotConnected => write!(f, "device not connected"),
            Self::Disarmed => write!(f, "system is disarmed"),
            Self::Redundant => write!(f, "already in the requested arm state"),
            Self::Device(reason) => write!(f, "device error: {reason}"),
            Self::Timeout => write!(f, "no response before the deadline"),
            Self::Disconnected => write!(f, "connection lost while command was in flight"),
        }
    }
}

impl core::error::Error for Failure {}
