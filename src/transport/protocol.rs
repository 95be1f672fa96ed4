use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::control::{AbortReason, TpCmControl, TpCmFrame, PGN_TP_CM, TP_PRIORITY};
use super::data::{TpDtFrame, MAX_MESSAGE_SIZE, PGN_TP_DT};
use super::session::{Outcome, Step, TransportSession};
use super::{
    Direction, FrameResolver, ReceivedMessage, SessionKey, SessionMode, SessionState,
    TransportConfig, TransportEvent,
};
use crate::error::{J1939Error, Result};
use crate::network::{
    build_identifier, is_pdu1, normalize_pgn, parse_identifier, Frame, J1939Frame,
    DEFAULT_PRIORITY, GLOBAL_ADDRESS,
};
use crate::types::{fits_mask, CanFrame, Config, PGN_MASK, PRIORITY_MASK};

type SessionSlot = Arc<Mutex<TransportSession>>;

/// Event-driven J1939 transport protocol engine.
///
/// The engine never touches the bus and never sleeps: callers feed it received
/// frames through [`handle_frame`](Self::handle_frame) and the current time
/// through [`poll`](Self::poll), and transmit whatever
/// [`TransportEvent::Transmit`] frames come back.
///
/// Each session sits behind its own mutex; the session map lock is only held to
/// look up, insert or remove entries. A session lock may be held while taking
/// the map lock, never the reverse.
pub struct TransportProtocol {
    config: TransportConfig,
    resolver: Option<Arc<dyn FrameResolver>>,
    sessions: RwLock<HashMap<SessionKey, SessionSlot>>,
}

impl TransportProtocol {
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            resolver: None,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Engine that decodes reassembled messages through `resolver`
    pub fn with_registry(config: TransportConfig, resolver: Arc<dyn FrameResolver>) -> Result<Self> {
        let mut protocol = Self::new(config)?;
        protocol.resolver = Some(resolver);
        Ok(protocol)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Starts transferring `payload` to `destination`, returning the RTS or BAM
    /// frame to transmit. A global destination selects BAM.
    pub fn send(
        &self,
        destination: u8,
        data_pgn: u32,
        priority: u8,
        payload: &[u8],
        now: Instant,
    ) -> Result<Vec<CanFrame>> {
        if !fits_mask(priority, PRIORITY_MASK) {
            return Err(J1939Error::Validation(format!(
                "priority {} out of range",
                priority
            )));
        }
        if !fits_mask(data_pgn, PGN_MASK) {
            return Err(J1939Error::Validation(format!(
                "PGN {:#X} exceeds 18 bits",
                data_pgn
            )));
        }

        let mode = if destination == GLOBAL_ADDRESS {
            SessionMode::Broadcast
        } else {
            SessionMode::Connection
        };
        let key = SessionKey::new(destination, Direction::Sending, mode);
        let (session, announcement) = TransportSession::outgoing(
            key,
            self.config.source_address,
            data_pgn,
            priority,
            payload,
            &self.config,
            now,
        )?;

        let mut sessions = self.sessions.write();
        if sessions.contains_key(&key) {
            return Err(J1939Error::SessionExists);
        }
        sessions.insert(key, Arc::new(Mutex::new(session)));
        debug!(session = %key, pgn = data_pgn, size = payload.len(), "opened transport session");
        Ok(vec![announcement])
    }

    /// Feeds one received frame to the engine. Frames other than TP.CM and
    /// TP.DT, and frames addressed to other nodes, are ignored.
    pub fn handle_frame(&self, frame: &CanFrame, now: Instant) -> Result<Vec<TransportEvent>> {
        if !frame.is_extended {
            return Ok(Vec::new());
        }
        let (_, pgn, _) = parse_identifier(frame.id);
        match normalize_pgn(pgn) {
            PGN_TP_CM => {
                let mut control = TpCmFrame::new();
                control.decode(frame.id, &frame.data)?;
                if !self.addressed_to_us(control.destination_address()) {
                    return Ok(Vec::new());
                }
                Ok(self.handle_control(&control, now))
            }
            PGN_TP_DT => {
                let mut packet = TpDtFrame::new();
                packet.decode(frame.id, &frame.data)?;
                if !self.addressed_to_us(packet.destination_address()) {
                    return Ok(Vec::new());
                }
                Ok(self.handle_data(&packet, now))
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Drives timers: emits due BAM packets and fails expired sessions
    pub fn poll(&self, now: Instant) -> Vec<TransportEvent> {
        let slots: Vec<(SessionKey, SessionSlot)> = self
            .sessions
            .read()
            .iter()
            .map(|(key, slot)| (*key, slot.clone()))
            .collect();

        let config = &self.config;
        slots
            .into_iter()
            .flat_map(|(key, slot)| self.drive(key, &slot, |session| session.on_timer(now, config)))
            .collect()
    }

    /// Cancels a session. Returns `None` when no such session is open.
    pub fn abort(&self, key: &SessionKey, reason: AbortReason) -> Option<Vec<TransportEvent>> {
        let slot = self.sessions.read().get(key).cloned()?;
        if slot.lock().is_closed() {
            return None;
        }
        Some(self.drive(*key, &slot, |session| session.abort(reason)))
    }

    pub fn session_state(&self, key: &SessionKey) -> Option<SessionState> {
        let slot = self.sessions.read().get(key).cloned()?;
        let session = slot.lock();
        Some(session.state())
    }

    pub fn active_sessions(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.sessions.read().keys().copied().collect();
        keys.sort();
        keys
    }

    fn addressed_to_us(&self, destination: u8) -> bool {
        destination == GLOBAL_ADDRESS || destination == self.config.source_address
    }

    fn handle_control(&self, frame: &TpCmFrame, now: Instant) -> Vec<TransportEvent> {
        let Some(control) = frame.control().copied() else {
            return Vec::new();
        };
        let peer = frame.source_address();
        let data_pgn = frame.data_pgn();
        let config = &self.config;

        match control {
            TpCmControl::Rts {
                total_size,
                total_packets,
                max_packets,
            } => {
                if frame.destination_address() == GLOBAL_ADDRESS {
                    trace!(peer, "ignoring RTS sent to the global address");
                    return Vec::new();
                }
                self.open_connection(peer, data_pgn, total_size, total_packets, max_packets, now)
            }
            TpCmControl::Bam {
                total_size,
                total_packets,
            } => {
                if frame.destination_address() != GLOBAL_ADDRESS {
                    trace!(peer, "ignoring BAM sent to a specific address");
                    return Vec::new();
                }
                self.open_broadcast(peer, data_pgn, total_size, total_packets, now);
                Vec::new()
            }
            TpCmControl::Cts {
                packets_to_send,
                next_packet,
            } => {
                let key = SessionKey::new(peer, Direction::Sending, SessionMode::Connection);
                self.dispatch(key, |session| {
                    session.on_cts(packets_to_send, next_packet, data_pgn, now, config)
                })
            }
            TpCmControl::EndOfMsgAck { .. } => {
                let key = SessionKey::new(peer, Direction::Sending, SessionMode::Connection);
                self.dispatch(key, |session| Ok(session.on_ack(data_pgn)))
            }
            TpCmControl::Abort { reason } => [Direction::Sending, Direction::Receiving]
                .into_iter()
                .flat_map(|direction| {
                    let key = SessionKey::new(peer, direction, SessionMode::Connection);
                    self.dispatch(key, |session| Ok(session.on_abort(reason, data_pgn)))
                })
                .collect(),
        }
    }

    fn handle_data(&self, packet: &TpDtFrame, now: Instant) -> Vec<TransportEvent> {
        let mode = if packet.destination_address() == GLOBAL_ADDRESS {
            SessionMode::Broadcast
        } else {
            SessionMode::Connection
        };
        let key = SessionKey::new(packet.source_address(), Direction::Receiving, mode);
        let config = &self.config;
        self.dispatch(key, |session| session.on_data(packet, now, config))
    }

    fn open_connection(
        &self,
        peer: u8,
        data_pgn: u32,
        total_size: u16,
        total_packets: u8,
        max_packets: u8,
        now: Instant,
    ) -> Vec<TransportEvent> {
        let key = SessionKey::new(peer, Direction::Receiving, SessionMode::Connection);
        let opened = TransportSession::incoming(
            key,
            self.config.source_address,
            data_pgn,
            total_size,
            total_packets,
            max_packets,
            &self.config,
            now,
        );
        let mut session = match opened {
            Ok(session) => session,
            Err(e) => {
                warn!(peer, error = %e, "rejecting RTS");
                let reason = if total_size as usize > MAX_MESSAGE_SIZE {
                    AbortReason::MessageTooLarge
                } else {
                    AbortReason::AnyOther
                };
                return self.abort_frame(peer, data_pgn, reason);
            }
        };

        let cts = match session.grant(now, &self.config) {
            Ok(cts) => cts,
            Err(e) => {
                warn!(peer, error = %e, "cannot answer RTS");
                return Vec::new();
            }
        };

        let mut sessions = self.sessions.write();
        if sessions.contains_key(&key) {
            drop(sessions);
            warn!(peer, "RTS while a connection session is open");
            return self.abort_frame(peer, data_pgn, AbortReason::AlreadyInSession);
        }
        sessions.insert(key, Arc::new(Mutex::new(session)));
        debug!(session = %key, pgn = data_pgn, size = total_size, "opened transport session");
        vec![TransportEvent::Transmit(cts)]
    }

    fn open_broadcast(
        &self,
        peer: u8,
        data_pgn: u32,
        total_size: u16,
        total_packets: u8,
        now: Instant,
    ) {
        let key = SessionKey::new(peer, Direction::Receiving, SessionMode::Broadcast);
        let session = match TransportSession::incoming(
            key,
            self.config.source_address,
            data_pgn,
            total_size,
            total_packets,
            0xFF,
            &self.config,
            now,
        ) {
            Ok(session) => session,
            Err(e) => {
                warn!(peer, error = %e, "ignoring BAM");
                return;
            }
        };

        let previous = self
            .sessions
            .write()
            .insert(key, Arc::new(Mutex::new(session)));
        if let Some(previous) = previous {
            previous.lock().close();
            debug!(peer, "new BAM replaces unfinished broadcast");
        }
        debug!(session = %key, pgn = data_pgn, size = total_size, "opened transport session");
    }

    fn abort_frame(&self, peer: u8, data_pgn: u32, reason: AbortReason) -> Vec<TransportEvent> {
        let frame = TpCmFrame::with_control(
            TpCmControl::Abort { reason },
            data_pgn,
            self.config.source_address,
            peer,
        )
        .and_then(|mut frame| {
            frame.set_priority(TP_PRIORITY as u32)?;
            frame.to_can_frame()
        });
        match frame {
            Ok(frame) => vec![TransportEvent::Transmit(frame)],
            Err(e) => {
                warn!(peer, error = %e, "cannot build Conn_Abort");
                Vec::new()
            }
        }
    }

    fn dispatch<F>(&self, key: SessionKey, action: F) -> Vec<TransportEvent>
    where
        F: FnOnce(&mut TransportSession) -> Result<Step>,
    {
        let slot = self.sessions.read().get(&key).cloned();
        match slot {
            Some(slot) => self.drive(key, &slot, action),
            None => {
                trace!(session = %key, "no session for frame");
                Vec::new()
            }
        }
    }

    /// Runs `action` on an open session and turns its step into events. A
    /// finished or failing session is closed and removed.
    fn drive<F>(&self, key: SessionKey, slot: &SessionSlot, action: F) -> Vec<TransportEvent>
    where
        F: FnOnce(&mut TransportSession) -> Result<Step>,
    {
        let mut session = slot.lock();
        if session.is_closed() {
            return Vec::new();
        }

        let step = action(&mut *session).unwrap_or_else(|e| {
            warn!(session = %key, error = %e, "transport session failed");
            Step {
                transmit: Vec::new(),
                outcome: Some(Outcome::Failed(e)),
            }
        });

        let mut events: Vec<TransportEvent> = step
            .transmit
            .into_iter()
            .map(TransportEvent::Transmit)
            .collect();

        if let Some(outcome) = step.outcome {
            events.push(match outcome {
                Outcome::Received(data) => {
                    TransportEvent::MessageReceived(self.message(&session, data))
                }
                Outcome::Completed => TransportEvent::TransferComplete(key),
                Outcome::Failed(error) => TransportEvent::Failed { key, error },
            });
            session.close();
            let mut sessions = self.sessions.write();
            if sessions
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, slot))
            {
                sessions.remove(&key);
            }
            debug!(session = %key, "closed transport session");
        }
        events
    }

    fn message(&self, session: &TransportSession, data: Vec<u8>) -> ReceivedMessage {
        let source = session.key().peer;
        let destination = session.destination();
        let pgn = normalize_pgn(session.data_pgn());
        let frame = self.resolve(pgn, source, destination, &data);
        ReceivedMessage {
            source,
            destination,
            pgn,
            data,
            frame,
        }
    }

    fn resolve(&self, pgn: u32, source: u8, destination: u8, data: &[u8]) -> Option<Frame> {
        let mut frame = self.resolver.as_ref()?.resolve(pgn)?;
        let wire_pgn = if is_pdu1(pgn) {
            pgn | destination as u32
        } else {
            pgn
        };
        let id = build_identifier(DEFAULT_PRIORITY, wire_pgn, source);
        match frame.decode(id, data) {
            Ok(()) => Some(frame),
            Err(e) => {
                debug!(pgn, error = %e, "reassembled message does not fit its frame");
                None
            }
        }
    }
}
