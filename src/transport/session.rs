//! Transport session bookkeeping.
//!
//! A [`TransportSession`] owns the state of one transfer and knows how to react
//! to each protocol input. Every reaction returns a [`Step`]: frames to put on
//! the bus and, once the session is over, its outcome. Deciding which session
//! an input belongs to is left to the protocol engine.

use std::fmt;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::control::{AbortReason, TpCmControl, TpCmFrame, TP_PRIORITY};
use super::data::{packet_count, reassemble, segment, TpDtFrame, MAX_MESSAGE_SIZE};
use super::TransportConfig;
use crate::error::{J1939Error, Result};
use crate::network::{J1939Frame, GLOBAL_ADDRESS};
use crate::types::{CanFrame, CAN_MAX_DLC};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Sending,
    Receiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionMode {
    /// BAM: no flow control, destination is global
    Broadcast,
    /// RTS/CTS: flow-controlled, destination specific
    Connection,
}

/// Identifies a session. At most one session exists per peer, direction and mode.
///
/// The data PGN is not part of the key: TP.DT packets carry only the source
/// and destination addresses, so two concurrent transfers with the same peer
/// in the same direction could not be told apart. The PGN is instead checked
/// against the open session when TP.CM frames arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey {
    /// Remote node; `GLOBAL_ADDRESS` for outgoing broadcasts
    pub peer: u8,
    pub direction: Direction,
    pub mode: SessionMode,
}

impl SessionKey {
    pub fn new(peer: u8, direction: Direction, mode: SessionMode) -> Self {
        Self {
            peer,
            direction,
            mode,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            Direction::Sending => "outbound",
            Direction::Receiving => "inbound",
        };
        let mode = match self.mode {
            SessionMode::Broadcast => "broadcast",
            SessionMode::Connection => "connection",
        };
        write!(f, "{} {} session with {:#04X}", direction, mode, self.peer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Sender emitting BAM data packets
    Broadcasting,
    WaitingForCts,
    /// Sender paused by CTS(0)
    Holding,
    WaitingForAck,
    /// Receiver expecting data packets
    Receiving,
    Complete,
    Aborted(AbortReason),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Broadcasting => write!(f, "broadcasting"),
            SessionState::WaitingForCts => write!(f, "waiting for CTS"),
            SessionState::Holding => write!(f, "holding"),
            SessionState::WaitingForAck => write!(f, "waiting for EndOfMsgACK"),
            SessionState::Receiving => write!(f, "receiving"),
            SessionState::Complete => write!(f, "complete"),
            SessionState::Aborted(reason) => write!(f, "aborted ({})", reason),
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Outcome {
    Received(Vec<u8>),
    Completed,
    Failed(J1939Error),
}

#[derive(Debug, Default)]
pub(crate) struct Step {
    pub(crate) transmit: Vec<CanFrame>,
    pub(crate) outcome: Option<Outcome>,
}

impl Step {
    fn send(frame: CanFrame) -> Self {
        Self {
            transmit: vec![frame],
            outcome: None,
        }
    }

    fn finish(transmit: Vec<CanFrame>, outcome: Outcome) -> Self {
        Self {
            transmit,
            outcome: Some(outcome),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TransportSession {
    key: SessionKey,
    local: u8,
    data_pgn: u32,
    priority: u8,
    total_size: usize,
    total_packets: usize,
    max_burst: usize,
    /// Sequence number of the next packet to send or expect
    next_packet: usize,
    /// Last sequence number granted by the current CTS
    burst_end: usize,
    packets: Vec<TpDtFrame>,
    deadline: Instant,
    state: SessionState,
    closed: bool,
}

impl TransportSession {
    /// Opens a sending session and returns it with its RTS or BAM announcement
    pub(crate) fn outgoing(
        key: SessionKey,
        local: u8,
        data_pgn: u32,
        priority: u8,
        payload: &[u8],
        config: &TransportConfig,
        now: Instant,
    ) -> Result<(Self, CanFrame)> {
        if payload.len() <= CAN_MAX_DLC {
            return Err(J1939Error::Validation(format!(
                "{} bytes fit in a single frame",
                payload.len()
            )));
        }
        let mut packets = segment(payload)?;
        for packet in packets.iter_mut() {
            packet.address(local, key.peer)?;
            packet.set_priority(priority as u32)?;
        }

        let total_size = payload.len();
        let total_packets = packets.len();
        let (state, wait, control) = match key.mode {
            SessionMode::Broadcast => (
                SessionState::Broadcasting,
                config.bam_packet_spacing,
                TpCmControl::Bam {
                    total_size: total_size as u16,
                    total_packets: total_packets as u8,
                },
            ),
            SessionMode::Connection => (
                SessionState::WaitingForCts,
                config.t3,
                TpCmControl::Rts {
                    total_size: total_size as u16,
                    total_packets: total_packets as u8,
                    max_packets: config.max_packets_per_burst,
                },
            ),
        };

        let session = Self {
            key,
            local,
            data_pgn,
            priority,
            total_size,
            total_packets,
            max_burst: config.max_packets_per_burst as usize,
            next_packet: 1,
            burst_end: 0,
            packets,
            deadline: now + wait,
            state,
            closed: false,
        };
        let announcement = session.control_frame(control)?;
        Ok((session, announcement))
    }

    /// Opens a receiving session for an announced transfer
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn incoming(
        key: SessionKey,
        local: u8,
        data_pgn: u32,
        total_size: u16,
        total_packets: u8,
        max_packets: u8,
        config: &TransportConfig,
        now: Instant,
    ) -> Result<Self> {
        let size = total_size as usize;
        if size <= CAN_MAX_DLC || size > MAX_MESSAGE_SIZE {
            return Err(J1939Error::Decode(format!(
                "announced size {} outside 9..={}",
                size, MAX_MESSAGE_SIZE
            )));
        }
        if packet_count(size) != total_packets as usize {
            return Err(J1939Error::Decode(format!(
                "{} bytes announced in {} packets",
                size, total_packets
            )));
        }
        if max_packets == 0 {
            return Err(J1939Error::Decode("RTS allows 0 packets per CTS".into()));
        }

        let wait = match key.mode {
            SessionMode::Broadcast => config.t1,
            SessionMode::Connection => config.t2,
        };
        Ok(Self {
            key,
            local,
            data_pgn,
            priority: TP_PRIORITY,
            total_size: size,
            total_packets: total_packets as usize,
            max_burst: max_packets.min(config.cts_packets) as usize,
            next_packet: 1,
            burst_end: 0,
            packets: Vec::with_capacity(total_packets as usize),
            deadline: now + wait,
            state: SessionState::Receiving,
            closed: false,
        })
    }

    pub(crate) fn key(&self) -> SessionKey {
        self.key
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn data_pgn(&self) -> u32 {
        self.data_pgn
    }

    /// Destination address of the transported message
    pub(crate) fn destination(&self) -> u8 {
        match (self.key.mode, self.key.direction) {
            (SessionMode::Broadcast, _) => GLOBAL_ADDRESS,
            (SessionMode::Connection, Direction::Receiving) => self.local,
            (SessionMode::Connection, Direction::Sending) => self.key.peer,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    /// Issues the next CTS of a receiving connection-mode session
    pub(crate) fn grant(&mut self, now: Instant, config: &TransportConfig) -> Result<CanFrame> {
        let remaining = self.total_packets - self.next_packet + 1;
        let packets = remaining.min(self.max_burst);
        self.burst_end = self.next_packet + packets - 1;
        self.deadline = now + config.t2;
        self.control_frame(TpCmControl::Cts {
            packets_to_send: packets as u8,
            next_packet: self.next_packet as u8,
        })
    }

    pub(crate) fn on_cts(
        &mut self,
        packets_to_send: u8,
        next_packet: u8,
        data_pgn: u32,
        now: Instant,
        config: &TransportConfig,
    ) -> Result<Step> {
        if data_pgn != self.data_pgn {
            warn!(session = %self.key, pgn = data_pgn, "ignoring CTS for another PGN");
            return Ok(Step::default());
        }
        if !matches!(
            self.state,
            SessionState::WaitingForCts | SessionState::Holding | SessionState::WaitingForAck
        ) {
            return Ok(Step::default());
        }
        if packets_to_send == 0 {
            trace!(session = %self.key, "peer requested hold");
            self.state = SessionState::Holding;
            self.deadline = now + config.t4;
            return Ok(Step::default());
        }

        let next = next_packet as usize;
        if next == 0 || next > self.total_packets {
            warn!(session = %self.key, next, "CTS requests a packet outside the message");
            return self.abort(AbortReason::AnyOther);
        }
        let count = (packets_to_send as usize)
            .min(self.max_burst)
            .min(self.total_packets - next + 1);
        let transmit = (next..next + count)
            .map(|sequence| self.data_frame(sequence))
            .collect::<Result<Vec<_>>>()?;

        self.next_packet = next + count;
        self.state = if self.next_packet > self.total_packets {
            SessionState::WaitingForAck
        } else {
            SessionState::WaitingForCts
        };
        self.deadline = now + config.t3;
        Ok(Step {
            transmit,
            outcome: None,
        })
    }

    pub(crate) fn on_ack(&mut self, data_pgn: u32) -> Step {
        if data_pgn != self.data_pgn {
            warn!(session = %self.key, pgn = data_pgn, "ignoring EndOfMsgACK for another PGN");
            return Step::default();
        }
        if self.state != SessionState::WaitingForAck {
            warn!(session = %self.key, state = %self.state, "unexpected EndOfMsgACK");
            return Step::default();
        }
        self.state = SessionState::Complete;
        debug!(session = %self.key, "transfer acknowledged");
        Step::finish(Vec::new(), Outcome::Completed)
    }

    pub(crate) fn on_data(
        &mut self,
        packet: &TpDtFrame,
        now: Instant,
        config: &TransportConfig,
    ) -> Result<Step> {
        let sequence = packet.sequence() as usize;
        if sequence != self.next_packet {
            if self.key.mode == SessionMode::Broadcast {
                trace!(session = %self.key, sequence, "dropping out of sequence packet");
                return Ok(Step::default());
            }
            let reason = if sequence < self.next_packet {
                AbortReason::DuplicateSequenceNumber
            } else {
                AbortReason::BadSequenceNumber
            };
            warn!(
                session = %self.key,
                expected = self.next_packet,
                received = sequence,
                "sequence error"
            );
            let abort = self.control_frame(TpCmControl::Abort { reason })?;
            self.state = SessionState::Aborted(reason);
            return Ok(Step::finish(
                vec![abort],
                Outcome::Failed(J1939Error::SessionSequence {
                    expected: self.next_packet as u8,
                    received: sequence as u8,
                }),
            ));
        }

        trace!(session = %self.key, sequence, "received data packet");
        self.packets.push(packet.clone());
        self.next_packet += 1;

        if self.next_packet > self.total_packets {
            let data = reassemble(&self.packets, self.total_size)?;
            let mut transmit = Vec::new();
            if self.key.mode == SessionMode::Connection {
                transmit.push(self.control_frame(TpCmControl::EndOfMsgAck {
                    total_size: self.total_size as u16,
                    total_packets: self.total_packets as u8,
                })?);
            }
            self.state = SessionState::Complete;
            debug!(session = %self.key, size = data.len(), "message reassembled");
            return Ok(Step::finish(transmit, Outcome::Received(data)));
        }

        if self.key.mode == SessionMode::Connection && self.next_packet > self.burst_end {
            return Ok(Step::send(self.grant(now, config)?));
        }
        self.deadline = now + config.t1;
        Ok(Step::default())
    }

    /// Sends due BAM packets, or fails the session once its deadline passed
    pub(crate) fn on_timer(&mut self, now: Instant, config: &TransportConfig) -> Result<Step> {
        if now < self.deadline {
            return Ok(Step::default());
        }

        if self.state == SessionState::Broadcasting {
            let mut transmit = Vec::new();
            while self.deadline <= now && self.next_packet <= self.total_packets {
                transmit.push(self.data_frame(self.next_packet)?);
                self.next_packet += 1;
                self.deadline += config.bam_packet_spacing;
            }
            if self.next_packet > self.total_packets {
                self.state = SessionState::Complete;
                debug!(session = %self.key, "broadcast finished");
                return Ok(Step::finish(transmit, Outcome::Completed));
            }
            return Ok(Step {
                transmit,
                outcome: None,
            });
        }

        warn!(session = %self.key, state = %self.state, "transport session timed out");
        let error = J1939Error::SessionTimeout(format!("{} while {}", self.key, self.state));
        let mut transmit = Vec::new();
        if self.key.mode == SessionMode::Connection {
            transmit.push(self.control_frame(TpCmControl::Abort {
                reason: AbortReason::Timeout,
            })?);
        }
        self.state = SessionState::Aborted(AbortReason::Timeout);
        Ok(Step::finish(transmit, Outcome::Failed(error)))
    }

    /// Cancels the session locally, notifying the peer in connection mode
    pub(crate) fn abort(&mut self, reason: AbortReason) -> Result<Step> {
        let mut transmit = Vec::new();
        if self.key.mode == SessionMode::Connection {
            transmit.push(self.control_frame(TpCmControl::Abort { reason })?);
        }
        warn!(session = %self.key, %reason, "aborting transport session");
        self.state = SessionState::Aborted(reason);
        Ok(Step::finish(
            transmit,
            Outcome::Failed(J1939Error::SessionAborted(reason)),
        ))
    }

    /// Handles a Conn_Abort from the peer
    pub(crate) fn on_abort(&mut self, reason: AbortReason, data_pgn: u32) -> Step {
        if data_pgn != self.data_pgn {
            return Step::default();
        }
        warn!(session = %self.key, %reason, "peer aborted transport session");
        self.state = SessionState::Aborted(reason);
        Step::finish(
            Vec::new(),
            Outcome::Failed(J1939Error::SessionAborted(reason)),
        )
    }

    fn control_frame(&self, control: TpCmControl) -> Result<CanFrame> {
        let mut frame = TpCmFrame::with_control(control, self.data_pgn, self.local, self.key.peer)?;
        frame.set_priority(self.priority as u32)?;
        frame.to_can_frame()
    }

    fn data_frame(&self, sequence: usize) -> Result<CanFrame> {
        let packet = self.packets.get(sequence - 1).ok_or_else(|| {
            J1939Error::Encode(format!("no data packet with sequence {}", sequence))
        })?;
        trace!(session = %self.key, sequence, "sending data packet");
        packet.to_can_frame()
    }
}
