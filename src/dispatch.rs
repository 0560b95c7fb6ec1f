//! Single-outstanding-command dispatch.
//!
//! The dispatcher owns the pending-command slot and the sequence counter.
//! At most one command is in flight at any instant; further submissions are
//! rejected instead of queued, so a stale command can never fire late. The
//! slot is released only by a matching acknowledgment or error frame, by
//! deadline expiry, or by a forced abort on connection loss.

use crate::{
    command::{ArmState, Command, CorrelationId, Failure},
    frame::{FRAME_LEN, RequestFrame},
    monitor::ConnectionState,
};
use core::num::Wrapping;
use log::trace;
use tokio::time::Instant;

/// The command currently in flight.
#[derive(Debug)]
struct Pending {
    seq: u8,
    command: Command,
    deadline: Instant,
}

/// Pending-command slot and sequence allocator.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    pending: Option<Pending>,
    next_seq: Wrapping<u8>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            pending: None,
            next_seq: Wrapping(1),
        }
    }

    /// Allocates the next sequence number.
    ///
    /// Also used by the driver for probe frames, so probe responses can never
    /// collide with a pending command's correlation id.
    pub fn allocate_seq(&mut self) -> u8 {
        let seq = self.next_seq.0;

        self.next_seq += 1;

        seq
    }

    /// Validates a command against the current state and, if accepted,
    /// occupies the pending slot and returns the encoded frame to transmit.
    ///
    /// Rejection order: the arm interlock is checked first so that firing
    /// while disarmed is reported as such regardless of connection state.
    pub fn submit(
        &mut self,
        command: Command,
        connection: ConnectionState,
        armed: ArmState,
        deadline: Instant,
    ) -> Result<(CorrelationId, [u8; FRAME_LEN]), Failure> {
        match command {
            Command::Fire(_) if armed == ArmState::Disarmed => return Err(Failure::Disarmed),
            Command::Arm if armed == ArmState::Armed => return Err(Failure::Redundant),
            Command::Disarm if armed == ArmState::Disarmed => return Err(Failure::Redundant),
            _ => {}
        }

        if connection != ConnectionState::Alive {
            return Err(Failure::NotConnected);
        }

        if self.pending.is_some() {
            return Err(Failure::Busy);
        }

        let seq = self.allocate_seq();
        let frame = RequestFrame::from_command(seq, command);

        trace!("Dispatching {command} as #{seq}");

        self.pending = Some(Pending {
            seq,
            command,
            deadline,
        });

        Ok((CorrelationId(seq), frame.encode()))
    }

    /// Resolves the pending command if the acknowledged sequence matches.
    ///
    /// Non-matching sequences are stale echoes (or probe acknowledgments)
    /// and leave the slot untouched.
    pub fn resolve_ack(&mut self, seq: u8) -> Option<Command> {
        self.take_matching(seq)
    }

    /// Resolves the pending command as failed if the sequence matches.
    pub fn resolve_error(&mut self, seq: u8) -> Option<Command> {
        self.take_matching(seq)
    }

    /// Resolves the pending command as timed out once its deadline passed.
    pub fn expire(&mut self, now: Instant) -> Option<Command> {
        if self.pending.as_ref()?.deadline > now {
            return None;
        }

        self.pending.take().map(|pending| pending.command)
    }

    /// Force-fails the pending command, releasing the slot unconditionally.
    pub fn abort(&mut self) -> Option<Command> {
        self.pending.take().map(|pending| pending.command)
    }

    /// Returns the deadline of the pending command, if one is in flight.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }

    fn take_matching(&mut self, seq: u8) -> Option<Command> {
        if self.pending.as_ref()?.seq != seq {
            return None;
        }

        self.pending.take().map(|pending| pending.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::GroupId;
    use tokio::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn alive() -> (ConnectionState, ArmState) {
        (ConnectionState::Alive, ArmState::Disarmed)
    }

    #[test]
    fn accepts_and_occupies_slot() {
        let (connection, armed) = alive();
        let mut dispatcher = Dispatcher::new();
        let deadline = Instant::now() + TIMEOUT;

        let (id, bytes) = dispatcher
            .submit(Command::Arm, connection, armed, deadline)
            .expect("arm should be accepted");

        assert_eq!(
            bytes,
            RequestFrame::from_command(id.value(), Command::Arm).encode(),
            "encoded frame should carry the correlation id"
        );
        assert_eq!(
            dispatcher.deadline(),
            Some(deadline),
            "deadline should be the submitted one"
        );
    }

    #[test]
    fn rejects_second_submission_as_busy() {
        let (connection, armed) = alive();
        let mut dispatcher = Dispatcher::new();
        let deadline = Instant::now() + TIMEOUT;

        let (first, _) = dispatcher
            .submit(Command::Arm, connection, armed, deadline)
            .expect("first submission should be accepted");

        assert_eq!(
            dispatcher.submit(Command::Arm, connection, armed, deadline),
            Err(Failure::Busy),
            "second submission should be rejected"
        );
        assert_eq!(
            dispatcher.resolve_ack(first.value()),
            Some(Command::Arm),
            "first command should be unaffected by the rejection"
        );
    }

    #[test]
    fn rejects_fire_while_disarmed() {
        let mut dispatcher = Dispatcher::new();
        let deadline = Instant::now() + TIMEOUT;
        let fire = Command::Fire(GroupId(3));

        // The interlock outranks the connection check
        for connection in [
            ConnectionState::Offline,
            ConnectionState::Connecting,
            ConnectionState::Alive,
        ] {
            assert_eq!(
                dispatcher.submit(fire, connection, ArmState::Disarmed, deadline),
                Err(Failure::Disarmed),
                "fire should be rejected while disarmed ({connection})"
            );
        }
    }

    #[test]
    fn rejects_redundant_arm_requests() {
        let (connection, _) = alive();
        let mut dispatcher = Dispatcher::new();
        let deadline = Instant::now() + TIMEOUT;

        assert_eq!(
            dispatcher.submit(Command::Arm, connection, ArmState::Armed, deadline),
            Err(Failure::Redundant),
            "arming twice should be rejected"
        );
        assert_eq!(
            dispatcher.submit(Command::Disarm, connection, ArmState::Disarmed, deadline),
            Err(Failure::Redundant),
            "disarming twice should be rejected"
        );
    }

    #[test]
    fn rejects_when_not_alive() {
        let mut dispatcher = Dispatcher::new();
        let deadline = Instant::now() + TIMEOUT;

        assert_eq!(
            dispatcher.submit(
                Command::Arm,
                ConnectionState::Connecting,
                ArmState::Disarmed,
                deadline,
            ),
            Err(Failure::NotConnected),
            "submission should be rejected while connecting"
        );
    }

    #[test]
    fn discards_stale_sequences() {
        let (connection, armed) = alive();
        let mut dispatcher = Dispatcher::new();
        let deadline = Instant::now() + TIMEOUT;

        let (id, _) = dispatcher
            .submit(Command::Arm, connection, armed, deadline)
            .expect("arm should be accepted");

        assert_eq!(
            dispatcher.resolve_ack(id.value().wrapping_add(1)),
            None,
            "non-matching ack should be discarded"
        );
        assert_eq!(
            dispatcher.resolve_error(id.value().wrapping_add(1)),
            None,
            "non-matching error should be discarded"
        );
        assert_eq!(
            dispatcher.resolve_ack(id.value()),
            Some(Command::Arm),
            "matching ack should resolve the command"
        );
    }

    #[test]
    fn expires_only_after_deadline() {
        let (connection, armed) = alive();
        let mut dispatcher = Dispatcher::new();
        let now = Instant::now();

        dispatcher
            .submit(Command::Disarm, connection, ArmState::Armed, now + TIMEOUT)
            .expect("disarm should be accepted");

        assert_eq!(
            dispatcher.expire(now),
            None,
            "command should not expire before the deadline"
        );
        assert_eq!(
            dispatcher.expire(now + TIMEOUT),
            Some(Command::Disarm),
            "command should expire at the deadline"
        );
        assert_eq!(dispatcher.deadline(), None, "slot should be released");

        // Slot is free again
        dispatcher
            .submit(Command::Arm, connection, armed, now + TIMEOUT)
            .expect("next submission should be accepted");
    }

    #[test]
    fn abort_releases_slot() {
        let (connection, armed) = alive();
        let mut dispatcher = Dispatcher::new();
        let deadline = Instant::now() + TIMEOUT;

        dispatcher
            .submit(Command::Arm, connection, armed, deadline)
            .expect("arm should be accepted");

        assert_eq!(
            dispatcher.abort(),
            Some(Command::Arm),
            "abort should fail the pending command"
        );
        assert_eq!(dispatcher.abort(), None, "abort should be idempotent");
    }
}
