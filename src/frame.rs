//! Wire format of the firing box uplink.
//!
//! Both directions use fixed six-byte frames:
//!
//! ```text
//! [0xa5][seq][code][param lo][param hi][checksum]
//! ```
//!
//! The checksum is the wrapping sum of the first five bytes. Host-to-device
//! frames carry an [`Opcode`], device-to-host frames a status code that maps
//! onto [`ResponseFrame`]. The sequence number correlates a response with the
//! request that caused it.
//!
//! Decoding is stream-oriented: a [`Decoder`] consumes only complete frames,
//! buffers a partial trailing frame for the next call and resynchronizes on
//! the start byte after garbled input. Discarded byte runs are counted as
//! decode anomalies, never propagated as errors.

use crate::{action::GroupId, command::Command};
use core::{marker::PhantomData, num::Wrapping};
use log::debug;
use strum::FromRepr;

/// Length of every frame on the wire, in bytes.
pub const FRAME_LEN: usize = 6;

/// Start-of-frame marker.
const FRAME_START: u8 = 0xa5;

/// Request code understood by the firing box firmware.
#[derive(FromRepr, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum Opcode {
    /// Engage the safety interlock.
    Arm = 0x41,
    /// Release the safety interlock.
    Disarm = 0x44,
    /// Fire the action group given by the parameter.
    Fire = 0x46,
    /// Liveness probe, acknowledged but otherwise ignored by the firmware.
    Probe = 0x50,
}

/// Response code sent by the firing box firmware.
#[derive(FromRepr, Debug)]
#[repr(u8)]
enum Status {
    Ack = 0x00,
    Error = 0x01,
    Unsolicited = 0x02,
}

/// Reason carried by an error frame.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(FromRepr, strum::Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "title_case")]
#[repr(u8)]
pub enum DeviceReason {
    /// The firmware reported no specific reason.
    Unspecified = 0x00,
    /// An actuation command was received while the device was disarmed.
    NotArmed = 0x01,
    /// The requested action group is not provisioned in the firmware.
    UnknownGroup = 0x02,
    /// An output channel of the group reported a fault.
    ChannelFault = 0x03,
    /// A continuity check failed before actuation.
    ContinuityFault = 0x04,
    /// Supply voltage too low to fire safely.
    LowBattery = 0x05,
}

/// Mapping between a frame type and the shared six-byte wire layout.
pub trait Wire: Sized {
    /// Reconstructs a frame from its decoded fields.
    ///
    /// Returns [`None`] if the code is not recognized.
    fn from_wire(seq: u8, code: u8, param: u16) -> Option<Self>;

    /// Deconstructs a frame into `(seq, code, param)`.
    fn to_wire(&self) -> (u8, u8, u16);
}

/// Host-to-device frame.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct RequestFrame {
    /// Sequence number echoed by the response.
    pub seq: u8,
    /// Request code.
    pub opcode: Opcode,
    /// Opcode-specific parameter (group id for [`Opcode::Fire`], zero otherwise).
    pub param: u16,
}

impl RequestFrame {
    /// Builds the frame transmitting the given command.
    #[must_use]
    pub fn from_command(seq: u8, command: Command) -> Self {
        match command {
            Command::Arm => Self {
                seq,
                opcode: Opcode::Arm,
                param: 0,
            },
            Command::Disarm => Self {
                seq,
                opcode: Opcode::Disarm,
                param: 0,
            },
            Command::Fire(group) => Self {
                seq,
                opcode: Opcode::Fire,
                param: group.0,
            },
        }
    }

    /// Returns the command this frame transmits, if any.
    ///
    /// Probes are internal to the connection monitor and map to no command.
    #[must_use]
    pub fn command(&self) -> Option<Command> {
        match self.opcode {
            Opcode::Arm => Some(Command::Arm),
            Opcode::Disarm => Some(Command::Disarm),
            Opcode::Fire => Some(Command::Fire(GroupId(self.param))),
            Opcode::Probe => None,
        }
    }

    /// Encodes the frame into its wire representation.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        encode_wire(self)
    }
}

impl Wire for RequestFrame {
    fn from_wire(seq: u8, code: u8, param: u16) -> Option<Self> {
        Some(Self {
            seq,
            opcode: Opcode::from_repr(code)?,
            param,
        })
    }

    fn to_wire(&self) -> (u8, u8, u16) {
        (self.seq, self.opcode as u8, self.param)
    }
}

/// Device-to-host frame.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ResponseFrame {
    /// The request with the given sequence number succeeded.
    Ack {
        /// Sequence number of the acknowledged request.
        seq: u8,
    },
    /// The request with the given sequence number failed.
    Error {
        /// Sequence number of the failed request.
        seq: u8,
        /// Firmware-reported reason.
        reason: DeviceReason,
    },
    /// Device-initiated status word not tied to any request.
    Unsolicited {
        /// Firmware-defined status bits.
        status: u16,
    },
}

impl ResponseFrame {
    /// Encodes the frame into its wire representation.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        encode_wire(self)
    }
}

impl Wire for ResponseFrame {
    fn from_wire(seq: u8, code: u8, param: u16) -> Option<Self> {
        match Status::from_repr(code)? {
            Status::Ack => Some(Self::Ack { seq }),
            Status::Error => Some(Self::Error {
                seq,
                reason: DeviceReason::from_repr(param.to_le_bytes()[0])
                    .unwrap_or(DeviceReason::Unspecified),
            }),
            Status::Unsolicited => Some(Self::Unsolicited { status: param }),
        }
    }

    fn to_wire(&self) -> (u8, u8, u16) {
        match *self {
            Self::Ack { seq } => (seq, Status::Ack as u8, 0),
            Self::Error { seq, reason } => (seq, Status::Error as u8, u16::from(reason as u8)),
            Self::Unsolicited { status } => (0, Status::Unsolicited as u8, status),
        }
    }
}

fn compute_checksum(data: &[u8]) -> u8 {
    data.iter().map(|&x| Wrapping(x)).sum::<Wrapping<_>>().0
}

fn encode_wire<F: Wire>(frame: &F) -> [u8; FRAME_LEN] {
    let (seq, code, param) = frame.to_wire();
    let mut buf = [0x00; FRAME_LEN];

    buf[0] = FRAME_START;
    buf[1] = seq;
    buf[2] = code;
    buf[3..5].copy_from_slice(&param.to_le_bytes());
    buf[5] = compute_checksum(&buf[..FRAME_LEN - 1]);

    buf
}

fn parse_wire<F: Wire>(raw: &[u8; FRAME_LEN]) -> Option<F> {
    if raw[FRAME_LEN - 1] != compute_checksum(&raw[..FRAME_LEN - 1]) {
        return None;
    }

    let param = u16::from_le_bytes([raw[3], raw[4]]);

    F::from_wire(raw[1], raw[2], param)
}

/// Streaming frame decoder.
///
/// Instantiated as [`ResponseDecoder`] on the host side and as
/// [`RequestDecoder`] by device simulators.
pub struct Decoder<F> {
    buf: Vec<u8>,
    anomalies: u64,
    marker: PhantomData<fn() -> F>,
}

/// Decoder for frames received from the device.
pub type ResponseDecoder = Decoder<ResponseFrame>;

/// Decoder for frames received by the device (or a simulator of it).
pub type RequestDecoder = Decoder<RequestFrame>;

impl<F> Default for Decoder<F> {
    fn default() -> Self {
        Self {
            buf: Vec::new(),
            anomalies: 0,
            marker: PhantomData,
        }
    }
}

impl<F> core::fmt::Debug for Decoder<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Decoder")
            .field("buffered", &self.buf.len())
            .field("anomalies", &self.anomalies)
            .finish()
    }
}

impl<F: Wire> Decoder<F> {
    /// Constructs a new decoder with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds received bytes into the decoder and returns all frames completed
    /// by them.
    ///
    /// Partial trailing bytes are buffered for the next call. Byte runs that
    /// cannot be part of a valid frame are discarded, each run counted as one
    /// decode anomaly.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<F> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();

        loop {
            // Resynchronize on the start marker
            match self.buf.iter().position(|&byte| byte == FRAME_START) {
                Some(0) => {}
                Some(pos) => {
                    debug!("Discarding {pos} bytes before frame start");
                    self.buf.drain(..pos);
                    self.anomalies += 1;
                }
                None => {
                    if !self.buf.is_empty() {
                        debug!("Discarding {} bytes without frame start", self.buf.len());
                        self.buf.clear();
                        self.anomalies += 1;
                    }

                    break;
                }
            }

            let Some(raw) = self.buf.first_chunk::<FRAME_LEN>() else {
                // Partial frame, wait for more bytes
                break;
            };

            if let Some(frame) = parse_wire(raw) {
                frames.push(frame);
                self.buf.drain(..FRAME_LEN);
            } else {
                // False start marker or corrupted frame, skip one byte
                debug!("Discarding malformed frame candidate");
                self.buf.drain(..1);
                self.anomalies += 1;
            }
        }

        frames
    }

    /// Returns the number of decode anomalies observed so far.
    #[must_use]
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::max())
            .is_test(true)
            .try_init();
    }

    #[test]
    fn encode_arm() {
        init_logger();

        let frame = RequestFrame::from_command(0x01, Command::Arm);

        assert_eq!(
            frame.encode(),
            [0xa5, 0x01, 0x41, 0x00, 0x00, 0xe7],
            "frame bytes should be correct"
        );
    }

    #[test]
    fn encode_disarm() {
        init_logger();

        let frame = RequestFrame::from_command(0x02, Command::Disarm);

        assert_eq!(
            frame.encode(),
            [0xa5, 0x02, 0x44, 0x00, 0x00, 0xeb],
            "frame bytes should be correct"
        );
    }

    #[test]
    fn encode_fire() {
        init_logger();

        let frame = RequestFrame::from_command(0x03, Command::Fire(GroupId(0x0102)));

        assert_eq!(
            frame.encode(),
            [0xa5, 0x03, 0x46, 0x02, 0x01, 0xf1],
            "frame bytes should be correct"
        );
    }

    #[test]
    fn encode_ack() {
        init_logger();

        let frame = ResponseFrame::Ack { seq: 0x05 };

        assert_eq!(
            frame.encode(),
            [0xa5, 0x05, 0x00, 0x00, 0x00, 0xaa],
            "frame bytes should be correct"
        );
    }

    #[test]
    fn encode_error() {
        init_logger();

        let frame = ResponseFrame::Error {
            seq: 0x05,
            reason: DeviceReason::ChannelFault,
        };

        assert_eq!(
            frame.encode(),
            [0xa5, 0x05, 0x01, 0x03, 0x00, 0xae],
            "frame bytes should be correct"
        );
    }

    #[test]
    fn command_round_trip() {
        init_logger();

        let commands = [
            Command::Arm,
            Command::Disarm,
            Command::Fire(GroupId(0xbeef)),
        ];
        let mut decoder = RequestDecoder::new();

        for (seq, command) in (0..).zip(commands) {
            let encoded = RequestFrame::from_command(seq, command).encode();
            let frames = decoder.feed(&encoded);

            assert_eq!(frames.len(), 1, "one frame should be decoded");
            assert_eq!(frames[0].seq, seq, "sequence number should survive");
            assert_eq!(
                frames[0].command(),
                Some(command),
                "command should survive the round trip"
            );
        }

        assert_eq!(decoder.anomalies(), 0, "no anomalies should be counted");
    }

    #[test]
    fn decode_split_delivery() {
        init_logger();

        let encoded = ResponseFrame::Ack { seq: 0x07 }.encode();
        let mut decoder = ResponseDecoder::new();

        assert!(
            decoder.feed(&encoded[..4]).is_empty(),
            "partial frame should produce nothing"
        );

        let frames = decoder.feed(&encoded[4..]);

        assert_eq!(
            frames,
            [ResponseFrame::Ack { seq: 0x07 }],
            "completed frame should be decoded"
        );
        assert_eq!(decoder.anomalies(), 0, "no anomalies should be counted");
    }

    #[test]
    fn decode_resynchronizes_after_garbage() {
        init_logger();

        let mut bytes = vec![0x00, 0xff, 0x13];
        bytes.extend_from_slice(&ResponseFrame::Ack { seq: 0x01 }.encode());

        let mut decoder = ResponseDecoder::new();
        let frames = decoder.feed(&bytes);

        assert_eq!(
            frames,
            [ResponseFrame::Ack { seq: 0x01 }],
            "frame after garbage should be decoded"
        );
        assert_eq!(decoder.anomalies(), 1, "garbage run should be counted once");
    }

    #[test]
    fn decode_skips_corrupted_frame() {
        init_logger();

        let mut corrupted = ResponseFrame::Ack { seq: 0x01 }.encode();
        corrupted[5] ^= 0xff;

        let mut bytes = corrupted.to_vec();
        bytes.extend_from_slice(&ResponseFrame::Ack { seq: 0x02 }.encode());

        let mut decoder = ResponseDecoder::new();
        let frames = decoder.feed(&bytes);

        assert_eq!(
            frames,
            [ResponseFrame::Ack { seq: 0x02 }],
            "frame after the corrupted one should be decoded"
        );
        assert!(decoder.anomalies() > 0, "corruption should be counted");
    }

    #[test]
    fn decode_unknown_error_reason() {
        init_logger();

        // Error frame with a reason code this crate does not know yet
        let mut raw = [0xa5, 0x09, 0x01, 0x7f, 0x00, 0x00];
        raw[5] = raw[..5].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));

        let mut decoder = ResponseDecoder::new();
        let frames = decoder.feed(&raw);

        assert_eq!(
            frames,
            [ResponseFrame::Error {
                seq: 0x09,
                reason: DeviceReason::Unspecified,
            }],
            "unknown reason should fall back to unspecified"
        );
    }

    #[test]
    fn decode_unsolicited() {
        init_logger();

        let encoded = ResponseFrame::Unsolicited { status: 0xbeef }.encode();

        assert_eq!(
            encoded,
            [0xa5, 0x00, 0x02, 0xef, 0xbe, 0x54],
            "frame bytes should be correct"
        );

        let mut decoder = ResponseDecoder::new();

        assert_eq!(
            decoder.feed(&encoded),
            [ResponseFrame::Unsolicited { status: 0xbeef }],
            "status word should survive the round trip"
        );
    }
}
