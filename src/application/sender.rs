use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::registry::SharedRegistry;
use crate::error::{J1939Error, Result};
use crate::network::spn::Spn;
use crate::network::{normalize_pgn, parse_identifier, Frame, J1939Frame, GLOBAL_ADDRESS};
use crate::physical::can::CanConfig;
use crate::physical::{CanHelper, CanSender};
use crate::transport::control::PGN_TP_CM;
use crate::transport::data::PGN_TP_DT;
use crate::transport::{
    AbortReason, Direction, SessionKey, SessionMode, TransportConfig, TransportEvent,
    TransportProtocol,
};
use crate::types::{CanFrame, Config, CAN_MAX_DLC};

/// How [`FrameSender::create_frame`] picks the prototype
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSelector {
    Pgn(u32),
    Title(String),
}

/// Snapshot of one working frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub name: String,
    pub id: u32,
    /// Encoded data field, `None` while the frame cannot be encoded
    pub data: Option<Vec<u8>>,
    pub period_ms: Option<u32>,
    pub interfaces: Vec<String>,
}

/// Interface state: the backend sender and the transport engine bound to it
struct Channel {
    sender: Box<dyn CanSender>,
    transport: TransportProtocol,
}

/// Owns named working frames and puts them on the bus.
///
/// Frames are cloned from the shared registry under a caller-chosen name, edited
/// in place, then handed to a backend sender for periodic transmission.
/// Payloads longer than one CAN frame go through the transport protocol.
pub struct FrameSender {
    registry: SharedRegistry,
    config: TransportConfig,
    helpers: Vec<Box<dyn CanHelper>>,
    channels: HashMap<String, Channel>,
    frames: BTreeMap<String, Frame>,
    periods: HashMap<String, u32>,
    /// Interfaces each frame is periodically sent on
    sending: HashMap<String, BTreeSet<String>>,
    /// Transport sessions each frame opened, per interface
    transfers: HashMap<String, BTreeMap<String, SessionKey>>,
}

impl FrameSender {
    pub fn new(
        registry: SharedRegistry,
        helpers: Vec<Box<dyn CanHelper>>,
        config: TransportConfig,
    ) -> Result<Self> {
        config.validate()?;
        for helper in &helpers {
            debug!(backend = helper.backend(), "CAN backend available");
        }
        Ok(Self {
            registry,
            config,
            helpers,
            channels: HashMap::new(),
            frames: BTreeMap::new(),
            periods: HashMap::new(),
            sending: HashMap::new(),
            transfers: HashMap::new(),
        })
    }

    /// Clones a registered prototype into a new working frame called `name`
    pub fn create_frame(&mut self, name: &str, selector: FrameSelector) -> Result<&mut Frame> {
        if self.frames.contains_key(name) {
            return Err(J1939Error::NameInUse(name.to_string()));
        }
        let frame = {
            let registry = self.registry.read();
            match selector {
                FrameSelector::Pgn(pgn) => registry.get_frame(pgn).ok_or(J1939Error::UnknownPgn(pgn)),
                FrameSelector::Title(title) => registry
                    .get_frame_by_title(&title)
                    .ok_or(J1939Error::UnknownTitle(title)),
            }?
        };
        debug!(frame = name, pgn = frame.pgn(), "created frame");
        Ok(self.frames.entry(name.to_string()).or_insert(frame))
    }

    pub fn frame(&self, name: &str) -> Option<&Frame> {
        self.frames.get(name)
    }

    /// Direct access to a working frame. Changes made here reach the bus on the
    /// next setter call or [`send`](Self::send).
    pub fn frame_mut(&mut self, name: &str) -> Option<&mut Frame> {
        self.frames.get_mut(name)
    }

    pub fn frame_names(&self) -> Vec<&str> {
        self.frames.keys().map(String::as_str).collect()
    }

    pub fn set_priority(&mut self, name: &str, priority: u32) -> Result<()> {
        self.update(name, |frame| frame.set_priority(priority))
    }

    pub fn set_source_address(&mut self, name: &str, address: u32) -> Result<()> {
        self.update(name, |frame| frame.set_source_address(address))
    }

    /// Sets an SPN: numeric SPNs take a physical value, status SPNs a raw code
    pub fn set_spn_value(&mut self, name: &str, number: u32, value: f64) -> Result<()> {
        self.update(name, |frame| {
            let generic = frame.as_generic_mut().ok_or(J1939Error::NotGenericFrame)?;
            let spn = generic.spn_mut(number).ok_or_else(|| {
                J1939Error::Validation(format!("SPN {} not defined in frame", number))
            })?;
            let accepted = match spn {
                Spn::Numeric(numeric) => numeric.set_formatted_value(value),
                Spn::Status(status) => {
                    value.fract() == 0.0
                        && (0.0..=255.0).contains(&value)
                        && status.set_value(value as u8)
                }
            };
            if !accepted {
                return Err(J1939Error::Validation(format!(
                    "value {} rejected by SPN {}",
                    value, number
                )));
            }
            Ok(())
        })
    }

    pub fn set_period(&mut self, name: &str, period_ms: u32) -> Result<()> {
        if !self.frames.contains_key(name) {
            return Err(J1939Error::UnknownFrameName(name.to_string()));
        }
        self.periods.insert(name.to_string(), period_ms);
        self.update(name, |_| Ok(()))
    }

    pub fn encode(&self, name: &str) -> Result<CanFrame> {
        self.frames
            .get(name)
            .ok_or_else(|| J1939Error::UnknownFrameName(name.to_string()))?
            .to_can_frame()
    }

    pub fn list(&self) -> Vec<FrameSummary> {
        self.frames
            .iter()
            .map(|(name, frame)| FrameSummary {
                name: name.clone(),
                id: frame.identifier(),
                data: frame.encode().ok().map(|(_, data)| data),
                period_ms: self.periods.get(name).copied(),
                interfaces: self
                    .sending
                    .get(name)
                    .map(|interfaces| interfaces.iter().cloned().collect())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Interfaces offered by every registered backend
    pub fn interfaces(&self) -> BTreeSet<String> {
        self.helpers
            .iter()
            .flat_map(|helper| helper.interfaces())
            .collect()
    }

    /// Transmits `name` on `interface`. Single-frame payloads are scheduled
    /// with the frame's period; longer ones start a one-shot transport session.
    pub fn send(&mut self, name: &str, interface: &str, now: Instant) -> Result<()> {
        let frame = self
            .frames
            .get(name)
            .ok_or_else(|| J1939Error::UnknownFrameName(name.to_string()))?;
        let (id, data) = frame.encode()?;

        if data.len() > CAN_MAX_DLC {
            let destination = frame.destination_address();
            let pgn = frame.pgn();
            let priority = frame.priority();
            let channel = self.channel(interface)?;
            let announcement = channel.transport.send(destination, pgn, priority, &data, now)?;
            for can_frame in &announcement {
                channel.sender.send_frame(can_frame, 0)?;
            }
            let mode = if destination == GLOBAL_ADDRESS {
                SessionMode::Broadcast
            } else {
                SessionMode::Connection
            };
            let key = SessionKey::new(destination, Direction::Sending, mode);
            for sessions in self.transfers.values_mut() {
                if sessions.get(interface) == Some(&key) {
                    sessions.remove(interface);
                }
            }
            self.transfers
                .entry(name.to_string())
                .or_default()
                .insert(interface.to_string(), key);
            info!(frame = name, interface, size = data.len(), "started transport session");
            return Ok(());
        }

        let period = *self
            .periods
            .get(name)
            .ok_or_else(|| J1939Error::PeriodNotDefined(name.to_string()))?;
        let channel = self.channel(interface)?;
        channel
            .sender
            .send_frame(&CanFrame::extended(id, data), period)?;
        self.sending
            .entry(name.to_string())
            .or_default()
            .insert(interface.to_string());
        info!(frame = name, interface, period, "sending frame");
        Ok(())
    }

    /// Stops periodic transmission of `name` on `interface`, or everywhere,
    /// and aborts any transport session the frame still has open there
    pub fn unsend(&mut self, name: &str, interface: Option<&str>) -> Result<()> {
        let id = self
            .frames
            .get(name)
            .ok_or_else(|| J1939Error::UnknownFrameName(name.to_string()))?
            .identifier();

        if let Some(active) = self.sending.get_mut(name) {
            let stopped: Vec<String> = match interface {
                Some(interface) => active.take(interface).into_iter().collect(),
                None => std::mem::take(active).into_iter().collect(),
            };
            for interface in &stopped {
                if let Some(channel) = self.channels.get_mut(interface) {
                    channel.sender.unsend_frame(id);
                }
                info!(frame = name, interface = %interface, "stopped sending frame");
            }
            if active.is_empty() {
                self.sending.remove(name);
            }
        }

        if let Some(sessions) = self.transfers.get_mut(name) {
            let cancelled: Vec<(String, SessionKey)> = match interface {
                Some(interface) => sessions
                    .remove_entry(interface)
                    .into_iter()
                    .collect(),
                None => std::mem::take(sessions).into_iter().collect(),
            };
            if sessions.is_empty() {
                self.transfers.remove(name);
            }
            for (interface, key) in cancelled {
                let Some(channel) = self.channels.get_mut(&interface) else {
                    continue;
                };
                if let Some(events) = channel.transport.abort(&key, AbortReason::AnyOther) {
                    info!(frame = name, interface = %interface, session = %key, "cancelled transfer");
                    Self::deliver(&interface, channel, events)?;
                }
            }
        }
        Ok(())
    }

    /// Receive path: transport frames feed the engine bound to `interface`,
    /// everything else is decoded through the registry
    pub fn handle_frame(
        &mut self,
        interface: &str,
        frame: &CanFrame,
        now: Instant,
    ) -> Result<Vec<Frame>> {
        if !frame.is_extended {
            return Ok(Vec::new());
        }
        let (_, pgn, _) = parse_identifier(frame.id);
        match normalize_pgn(pgn) {
            PGN_TP_CM | PGN_TP_DT => {
                let channel = self.channel(interface)?;
                let events = channel.transport.handle_frame(frame, now)?;
                Self::deliver(interface, channel, events)
            }
            _ => {
                let decoded = self.registry.read().decode(frame.id, &frame.data)?;
                Ok(vec![decoded])
            }
        }
    }

    /// Drives transport timers on every interface
    pub fn poll(&mut self, now: Instant) -> Result<Vec<Frame>> {
        let mut received = Vec::new();
        for (interface, channel) in self.channels.iter_mut() {
            let events = channel.transport.poll(now);
            received.extend(Self::deliver(interface, channel, events)?);
        }
        Ok(received)
    }

    /// Finalizes every sender and forgets all frames and prototypes
    pub fn shutdown(&mut self) -> Result<()> {
        for (interface, mut channel) in self.channels.drain() {
            channel.sender.finalize()?;
            debug!(interface = %interface, "sender finalized");
        }
        self.frames.clear();
        self.periods.clear();
        self.sending.clear();
        self.transfers.clear();
        self.registry.write().unregister_all();
        Ok(())
    }

    /// Applies `edit` to a frame and refreshes it on every interface sending it
    fn update<F>(&mut self, name: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Frame) -> Result<()>,
    {
        let frame = self
            .frames
            .get_mut(name)
            .ok_or_else(|| J1939Error::UnknownFrameName(name.to_string()))?;
        let previous_id = frame.identifier();
        edit(frame)?;

        let Some(interfaces) = self.sending.get(name) else {
            return Ok(());
        };
        let can_frame = frame.to_can_frame()?;
        let period = self.periods.get(name).copied().unwrap_or_default();
        for interface in interfaces {
            if let Some(channel) = self.channels.get_mut(interface) {
                if previous_id != can_frame.id {
                    channel.sender.unsend_frame(previous_id);
                }
                channel.sender.send_frame(&can_frame, period)?;
            }
        }
        debug!(frame = name, "refreshed frame");
        Ok(())
    }

    /// Returns the channel for `interface`, allocating and initializing its
    /// sender on first use
    fn channel(&mut self, interface: &str) -> Result<&mut Channel> {
        if !self.channels.contains_key(interface) {
            if self.helpers.is_empty() {
                return Err(J1939Error::NoCanSupport(interface.to_string()));
            }
            let helper = self
                .helpers
                .iter()
                .find(|helper| helper.interfaces().contains(interface))
                .ok_or_else(|| J1939Error::UnknownInterface(interface.to_string()))?;

            let mut sender = helper.allocate_sender();
            sender.initialize(interface, &CanConfig::default())?;
            let transport =
                TransportProtocol::with_registry(self.config.clone(), self.registry.clone())?;
            info!(interface, backend = helper.backend(), "sender initialized");
            self.channels
                .insert(interface.to_string(), Channel { sender, transport });
        }
        self.channels
            .get_mut(interface)
            .ok_or_else(|| J1939Error::UnknownInterface(interface.to_string()))
    }

    fn deliver(
        interface: &str,
        channel: &mut Channel,
        events: Vec<TransportEvent>,
    ) -> Result<Vec<Frame>> {
        let mut received = Vec::new();
        for event in events {
            match event {
                TransportEvent::Transmit(frame) => channel.sender.send_frame(&frame, 0)?,
                TransportEvent::MessageReceived(message) => match message.frame {
                    Some(frame) => received.push(frame),
                    None => debug!(
                        interface,
                        pgn = message.pgn,
                        source = message.source,
                        "received message for unregistered PGN"
                    ),
                },
                TransportEvent::TransferComplete(key) => {
                    info!(interface, session = %key, "transfer complete")
                }
                TransportEvent::Failed { key, error } => {
                    warn!(interface, session = %key, error = %error, "transfer failed")
                }
            }
        }
        Ok(received)
    }
}
