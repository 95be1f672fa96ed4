//! J1939 frame identity and codec contract.
//!
//! Every J1939 frame type shares the same identity: a 3-bit priority, an 18-bit
//! Parameter Group Number and an 8-bit source address packed into a 29-bit
//! extended CAN identifier. PDU1 groups (PDU format below 0xF0) additionally
//! carry a destination address in the PDU specific byte.
//!
//! Concrete frame types implement [`J1939Frame`] by exposing their
//! [`FrameHeader`] and their data-field codec; identifier packing,
//! length checks and validation are shared.

pub mod address_claim;
pub mod frame;
pub mod generic;
pub mod request;
pub mod spn;

use std::fmt;

use crate::error::{J1939Error, Result};
use crate::types::{fits_mask, CanFrame, EXTENDED_ID_MASK, PGN_MASK, PRIORITY_MASK, SRC_ADDR_MASK};

pub use address_claim::AddressClaimFrame;
pub use frame::Frame;
pub use generic::GenericFrame;
pub use request::RequestFrame;

pub const PGN_REQUEST: u32 = 0xEA00;
pub const PGN_ADDRESS_CLAIMED: u32 = 0xEE00;

/// Destination address meaning "all nodes"
pub const GLOBAL_ADDRESS: u8 = 0xFF;
/// Source address used by nodes that have not claimed an address
pub const NULL_ADDRESS: u8 = 0xFE;

pub const DEFAULT_PRIORITY: u8 = 6;

/// PDU format values below this carry a destination address
const PDU2_THRESHOLD: u8 = 0xF0;

/// PDU format (PF) byte of a PGN
#[inline]
pub fn pdu_format(pgn: u32) -> u8 {
    ((pgn >> 8) & 0xFF) as u8
}

/// True for destination-specific (PDU1) parameter groups
#[inline]
pub fn is_pdu1(pgn: u32) -> bool {
    pdu_format(pgn) < PDU2_THRESHOLD
}

/// Strips the destination byte from PDU1 PGNs
pub fn normalize_pgn(pgn: u32) -> u32 {
    let pgn = pgn & PGN_MASK;
    if is_pdu1(pgn) {
        pgn & 0x3FF00
    } else {
        pgn
    }
}

/// Packs priority, PGN and source address into a 29-bit identifier
pub fn build_identifier(priority: u8, pgn: u32, source: u8) -> u32 {
    ((priority as u32 & PRIORITY_MASK as u32) << 26) | ((pgn & PGN_MASK) << 8) | source as u32
}

/// Splits a 29-bit identifier into (priority, pgn, source address)
pub fn parse_identifier(id: u32) -> (u8, u32, u8) {
    let priority = ((id >> 26) & PRIORITY_MASK as u32) as u8;
    let pgn = (id >> 8) & PGN_MASK;
    let source = (id & SRC_ADDR_MASK as u32) as u8;
    (priority, pgn, source)
}

/// Identity fields shared by every J1939 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    priority: u8,
    pgn: u32,
    destination: u8,
    source_address: u8,
    name: String,
}

impl FrameHeader {
    /// Builds a header for `pgn`. For PDU1 groups a non-zero low byte is taken
    /// as the destination address; PDU2 PGNs are kept verbatim.
    pub fn new(pgn: u32, name: &str) -> Result<Self> {
        if !fits_mask(pgn, PGN_MASK) {
            return Err(J1939Error::Validation(format!("PGN {:#X} exceeds 18 bits", pgn)));
        }
        let (pgn, destination) = if is_pdu1(pgn) {
            let ps = (pgn & 0xFF) as u8;
            (pgn & 0x3FF00, if ps == 0 { GLOBAL_ADDRESS } else { ps })
        } else {
            (pgn, GLOBAL_ADDRESS)
        };
        Ok(Self {
            priority: DEFAULT_PRIORITY,
            pgn,
            destination,
            source_address: 0,
            name: name.to_string(),
        })
    }

    /// Header for a fixed, known-valid PDU1 group
    pub(crate) fn predefined(pgn: u32, priority: u8, name: &str) -> Self {
        Self {
            priority,
            pgn,
            destination: GLOBAL_ADDRESS,
            source_address: 0,
            name: name.to_string(),
        }
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u32) -> Result<()> {
        if !fits_mask(priority, PRIORITY_MASK as u32) {
            return Err(J1939Error::Validation(format!(
                "priority {} out of range",
                priority
            )));
        }
        self.priority = priority as u8;
        Ok(())
    }

    /// PGN without the destination byte
    pub fn pgn(&self) -> u32 {
        self.pgn
    }

    pub fn source_address(&self) -> u8 {
        self.source_address
    }

    pub fn set_source_address(&mut self, address: u32) -> Result<()> {
        if !fits_mask(address, SRC_ADDR_MASK as u32) {
            return Err(J1939Error::Validation(format!(
                "source address {:#X} out of range",
                address
            )));
        }
        self.source_address = address as u8;
        Ok(())
    }

    /// PDU specific byte for PDU1 groups; always global for PDU2
    pub fn destination_address(&self) -> u8 {
        if is_pdu1(self.pgn) {
            self.destination
        } else {
            GLOBAL_ADDRESS
        }
    }

    pub fn set_destination_address(&mut self, address: u8) -> Result<()> {
        if !is_pdu1(self.pgn) {
            return Err(J1939Error::Validation(format!(
                "PGN {:#X} is broadcast only",
                self.pgn
            )));
        }
        self.destination = address;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn identifier(&self) -> u32 {
        let pgn = if is_pdu1(self.pgn) {
            self.pgn | self.destination as u32
        } else {
            self.pgn
        };
        build_identifier(self.priority, pgn, self.source_address)
    }

    /// Takes priority, destination and source from a received identifier
    fn apply_identifier(&mut self, identifier: u32) -> Result<()> {
        if !fits_mask(identifier, EXTENDED_ID_MASK) {
            return Err(J1939Error::Decode(format!(
                "identifier {:#X} exceeds 29 bits",
                identifier
            )));
        }
        let (priority, pgn, source) = parse_identifier(identifier);
        if normalize_pgn(pgn) != self.pgn {
            return Err(J1939Error::Decode(format!(
                "identifier carries PGN {:#X}, frame expects {:#X}",
                pgn, self.pgn
            )));
        }
        self.priority = priority;
        self.source_address = source;
        if is_pdu1(self.pgn) {
            self.destination = (pgn & 0xFF) as u8;
        }
        Ok(())
    }
}

/// Codec contract implemented by every J1939 frame type
pub trait J1939Frame: fmt::Debug + Send + Sync {
    fn header(&self) -> &FrameHeader;
    fn header_mut(&mut self) -> &mut FrameHeader;

    /// Fixed data-field length in bytes
    fn data_length(&self) -> usize;

    /// Writes the data field. `buffer` is `data_length()` bytes pre-filled with 0xFF.
    fn encode_data(&self, buffer: &mut [u8]) -> Result<()>;

    /// Reads the data field. `buffer` is exactly `data_length()` bytes.
    fn decode_data(&mut self, buffer: &[u8]) -> Result<()>;

    fn priority(&self) -> u8 {
        self.header().priority()
    }

    fn set_priority(&mut self, priority: u32) -> Result<()> {
        self.header_mut().set_priority(priority)
    }

    fn pgn(&self) -> u32 {
        self.header().pgn()
    }

    fn source_address(&self) -> u8 {
        self.header().source_address()
    }

    fn set_source_address(&mut self, address: u32) -> Result<()> {
        self.header_mut().set_source_address(address)
    }

    fn destination_address(&self) -> u8 {
        self.header().destination_address()
    }

    fn name(&self) -> &str {
        self.header().name()
    }

    fn identifier(&self) -> u32 {
        self.header().identifier()
    }

    fn encode(&self) -> Result<(u32, Vec<u8>)> {
        let mut buffer = vec![0xFF; self.data_length()];
        self.encode_data(&mut buffer)?;
        Ok((self.identifier(), buffer))
    }

    /// Decodes identifier and data field. On error the frame is left unchanged.
    fn decode(&mut self, identifier: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.data_length() {
            return Err(J1939Error::Decode(format!(
                "{} expects {} bytes, got {}",
                self.name(),
                self.data_length(),
                bytes.len()
            )));
        }
        let mut header = self.header().clone();
        header.apply_identifier(identifier)?;
        self.decode_data(bytes)?;
        *self.header_mut() = header;
        Ok(())
    }

    fn to_can_frame(&self) -> Result<CanFrame> {
        let (id, data) = self.encode()?;
        Ok(CanFrame::extended(id, data))
    }
}
