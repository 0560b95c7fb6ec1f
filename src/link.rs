//! The serial adapter orchestrator.
//!
//! [`Link`] composes the frame codec, command dispatcher and connection
//! monitor behind the small surface the UI layer consumes: three command
//! methods, two status getters and the four [`Observer`] callbacks.

use crate::{
    action::ActionGroup,
    command::{ArmState, Command, CorrelationId, Failure},
    dispatch::Dispatcher,
    driver,
    frame::{FRAME_LEN, ResponseFrame},
    monitor::ConnectionState,
    Connect,
};
use log::{debug, trace, warn};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
    time::{Duration, Instant},
};

/// Default deadline for a response to a transmitted command.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default interval between liveness probes.
const PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Default silence after which an open transport is declared dead.
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay between transport connection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(4);

/// Timing configuration of a [`Link`].
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Deadline for a response to a transmitted command.
    ///
    /// Must be comfortably larger than the device round-trip latency, but
    /// short enough that the UI is not left hanging on a dead link.
    pub response_timeout: Duration,
    /// Interval between liveness probes.
    pub probe_interval: Duration,
    /// Silence after which an open transport is declared dead.
    pub liveness_timeout: Duration,
    /// Delay between transport connection attempts.
    pub reconnect_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            response_timeout: RESPONSE_TIMEOUT,
            probe_interval: PROBE_INTERVAL,
            liveness_timeout: LIVENESS_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Immutable state snapshot passed to every [`Observer`] callback.
///
/// Carrying the state in the notification (instead of having the observer
/// read it back through the getters) removes the staleness hazard of
/// ambient re-reads.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Snapshot {
    /// Whether the device is currently answering.
    pub connected: bool,
    /// Whether the safety interlock is engaged.
    pub armed: bool,
}

/// Notifications consumed by the UI layer.
///
/// Each callback is invoked at most once per event, never while internal
/// state is mid-mutation, and always with the [`Snapshot`] taken at the
/// moment of the event. All methods default to no-ops so observers only
/// implement what they need.
pub trait Observer: Send + Sync {
    /// The connection state changed.
    fn connection_changed(&self, snapshot: Snapshot) {
        let _ = snapshot;
    }

    /// The device acknowledged a command.
    fn command_acknowledged(&self, command: Command, snapshot: Snapshot) {
        let _ = (command, snapshot);
    }

    /// A command was rejected or resolved unsuccessfully.
    fn command_failed(&self, command: Command, failure: Failure, snapshot: Snapshot) {
        let _ = (command, failure, snapshot);
    }

    /// The arm state changed.
    fn arm_status_changed(&self, snapshot: Snapshot) {
        let _ = snapshot;
    }
}

/// State mutated only under the [`Shared`] lock.
#[derive(Debug)]
struct State {
    connection: ConnectionState,
    armed: ArmState,
    dispatcher: Dispatcher,
}

/// State shared between the [`Link`] handle and its driver task.
pub(crate) struct Shared {
    state: Mutex<State>,
    observer: Box<dyn Observer>,
    anomalies: AtomicU64,
    pub(crate) config: LinkConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(state: &State) -> Snapshot {
        Snapshot {
            connected: state.connection == ConnectionState::Alive,
            armed: state.armed == ArmState::Armed,
        }
    }

    /// Marks the start of a connection attempt.
    pub(crate) fn set_connecting(&self) {
        let mut state = self.lock();

        if state.connection == ConnectionState::Connecting {
            return;
        }

        state.connection = ConnectionState::Connecting;

        let snapshot = Self::snapshot(&state);

        drop(state);
        debug!("Connection state: connecting");
        self.observer.connection_changed(snapshot);
    }

    /// Marks the transport as answering.
    ///
    /// The device's arm state is unknown after a (re)connection, so the
    /// interlock is pessimistically reset to disarmed.
    pub(crate) fn mark_alive(&self) {
        let mut state = self.lock();

        if state.connection == ConnectionState::Alive {
            return;
        }

        state.connection = ConnectionState::Alive;

        let was_armed = state.armed == ArmState::Armed;

        state.armed = ArmState::Disarmed;

        let snapshot = Self::snapshot(&state);

        drop(state);
        debug!("Connection state: alive");
        self.observer.connection_changed(snapshot);

        if was_armed {
            self.observer.arm_status_changed(snapshot);
        }
    }

    /// Marks the transport as lost.
    ///
    /// Fails the pending command immediately (instead of waiting for its
    /// timeout) and forces the interlock to disarmed.
    pub(crate) fn go_offline(&self) {
        let mut state = self.lock();
        let connection_changed = state.connection != ConnectionState::Offline;

        state.connection = ConnectionState::Offline;

        let failed = state.dispatcher.abort();
        let was_armed = state.armed == ArmState::Armed;

        state.armed = ArmState::Disarmed;

        let snapshot = Self::snapshot(&state);

        drop(state);

        if let Some(command) = failed {
            warn!("Connection lost, failing pending {command}");
            self.observer
                .command_failed(command, Failure::Disconnected, snapshot);
        }

        if connection_changed {
            debug!("Connection state: offline");
            self.observer.connection_changed(snapshot);
        }

        if was_armed {
            self.observer.arm_status_changed(snapshot);
        }
    }

    /// Handles one decoded response frame.
    pub(crate) fn handle_frame(&self, frame: ResponseFrame) {
        match frame {
            ResponseFrame::Ack { seq } => {
                let mut state = self.lock();

                let Some(command) = state.dispatcher.resolve_ack(seq) else {
                    drop(state);
                    trace!("Discarding unmatched ack #{seq}");
                    return;
                };

                // The acknowledgment is the only mutation path of the
                // interlock besides the forced disarm on connection loss.
                let target = match command {
                    Command::Arm => Some(ArmState::Armed),
                    Command::Disarm => Some(ArmState::Disarmed),
                    Command::Fire(_) => None,
                };
                let arm_changed = match target {
                    Some(armed) if state.armed != armed => {
                        state.armed = armed;
                        true
                    }
                    _ => false,
                };

                let snapshot = Self::snapshot(&state);

                drop(state);
                debug!("Command {command} acknowledged (#{seq})");
                self.observer.command_acknowledged(command, snapshot);

                if arm_changed {
                    self.observer.arm_status_changed(snapshot);
                }
            }
            ResponseFrame::Error { seq, reason } => {
                let mut state = self.lock();

                let Some(command) = state.dispatcher.resolve_error(seq) else {
                    drop(state);
                    trace!("Discarding unmatched error #{seq}");
                    return;
                };

                let snapshot = Self::snapshot(&state);

                drop(state);
                warn!("Device rejected {command}: {reason}");
                self.observer
                    .command_failed(command, Failure::Device(reason), snapshot);
            }
            ResponseFrame::Unsolicited { status } => {
                trace!("Unsolicited device status {status:#06x}");
            }
        }
    }

    /// Fails the pending command with a timeout if its deadline passed.
    pub(crate) fn expire_pending(&self) {
        let mut state = self.lock();

        let Some(command) = state.dispatcher.expire(Instant::now()) else {
            return;
        };

        let snapshot = Self::snapshot(&state);

        drop(state);
        warn!("Command {command} timed out");
        self.observer
            .command_failed(command, Failure::Timeout, snapshot);
    }

    /// Returns the deadline of the pending command, if any.
    pub(crate) fn pending_deadline(&self) -> Option<Instant> {
        self.lock().dispatcher.deadline()
    }

    /// Allocates a sequence number for a probe frame.
    pub(crate) fn allocate_seq(&self) -> u8 {
        self.lock().dispatcher.allocate_seq()
    }

    /// Adds newly observed decode anomalies to the running counter.
    pub(crate) fn add_anomalies(&self, count: u64) {
        if count > 0 {
            self.anomalies.fetch_add(count, Ordering::Relaxed);
        }
    }
}

/// Serial communication adapter for a remote firing box.
///
/// Owns the connection lifecycle through a background driver task and
/// exposes the command methods, status getters and [`Observer`] callbacks
/// consumed by the UI. Explicitly constructed: any number of links against
/// distinct (possibly simulated) devices can coexist.
///
/// Must be opened from within a Tokio runtime. Dropping the link stops the
/// driver task.
pub struct Link {
    shared: Arc<Shared>,
    frame_tx: UnboundedSender<[u8; FRAME_LEN]>,
    driver: JoinHandle<()>,
}

impl Link {
    /// Opens a link, spawning its driver task.
    ///
    /// The connector is invoked for the initial connection and again after
    /// every transport loss.
    pub fn open<C, O>(connector: C, observer: O, config: LinkConfig) -> Self
    where
        C: Connect,
        O: Observer + 'static,
    {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                connection: ConnectionState::Offline,
                armed: ArmState::Disarmed,
                dispatcher: Dispatcher::new(),
            }),
            observer: Box::new(observer),
            anomalies: AtomicU64::new(0),
            config,
        });
        let driver = tokio::spawn(driver::run(connector, Arc::clone(&shared), frame_rx));

        Self {
            shared,
            frame_tx,
            driver,
        }
    }

    /// Requests the device to engage the safety interlock.
    ///
    /// The interlock is considered engaged only once the device acknowledges;
    /// rejections and failures surface through
    /// [`Observer::command_failed`].
    pub fn arm(&self) -> Result<CorrelationId, Failure> {
        self.submit(Command::Arm)
    }

    /// Requests the device to release the safety interlock.
    pub fn disarm(&self) -> Result<CorrelationId, Failure> {
        self.submit(Command::Disarm)
    }

    /// Fires an action group.
    ///
    /// Rejected with [`Failure::Disarmed`] unless the interlock is engaged;
    /// the adapter enforces this itself rather than trusting the UI to gate
    /// the button.
    pub fn fire_action_group(&self, group: &ActionGroup) -> Result<CorrelationId, Failure> {
        self.submit(Command::Fire(group.id))
    }

    /// Returns whether the device is currently answering.
    #[must_use]
    pub fn connection_status(&self) -> bool {
        self.connection_state() == ConnectionState::Alive
    }

    /// Returns the full connection state classification.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection
    }

    /// Returns whether the safety interlock is engaged, as last acknowledged
    /// by the device.
    #[must_use]
    pub fn armed_status(&self) -> bool {
        self.shared.lock().armed == ArmState::Armed
    }

    /// Returns the number of decode anomalies observed since the link was
    /// opened.
    #[must_use]
    pub fn decode_anomalies(&self) -> u64 {
        self.shared.anomalies.load(Ordering::Relaxed)
    }

    fn submit(&self, command: Command) -> Result<CorrelationId, Failure> {
        let mut state = self.shared.lock();
        let connection = state.connection;
        let armed = state.armed;
        let deadline = Instant::now() + self.shared.config.response_timeout;

        match state.dispatcher.submit(command, connection, armed, deadline) {
            Ok((id, bytes)) => {
                drop(state);

                if self.frame_tx.send(bytes).is_err() {
                    // Driver task is gone, roll the slot back
                    let mut state = self.shared.lock();

                    state.dispatcher.abort();

                    let snapshot = Shared::snapshot(&state);

                    drop(state);
                    self.shared
                        .observer
                        .command_failed(command, Failure::NotConnected, snapshot);

                    return Err(Failure::NotConnected);
                }

                trace!("Submitted {command} as {id}");

                Ok(id)
            }
            Err(failure) => {
                let snapshot = Shared::snapshot(&state);

                drop(state);
                debug!("Rejected {command}: {failure}");
                self.shared.observer.command_failed(command, failure, snapshot);

                Err(failure)
            }
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl core::fmt::Debug for Link {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.shared.lock();

        f.debug_struct("Link")
            .field("connection", &state.connection)
            .field("armed", &state.armed)
            .finish_non_exhaustive()
    }
}
