use std::collections::BTreeMap;
use std::fmt;

use super::spn::Spn;
use super::{FrameHeader, J1939Frame};
use crate::error::{J1939Error, Result};
use crate::types::CAN_MAX_DLC;

/// Largest payload the transport protocol can carry (255 packets of 7 bytes)
pub const MAX_GENERIC_LENGTH: usize = 1785;

/// Frame whose data field is described entirely by a set of SPNs.
///
/// Used for every parameter group that has no dedicated type, typically the
/// ones loaded from a frame database.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericFrame {
    header: FrameHeader,
    length: usize,
    spns: BTreeMap<u32, Spn>,
}

impl GenericFrame {
    /// Creates a single-frame (8 byte) parameter group
    pub fn new(pgn: u32) -> Result<Self> {
        Self::with_length(pgn, CAN_MAX_DLC)
    }

    pub fn with_length(pgn: u32, length: usize) -> Result<Self> {
        if length == 0 || length > MAX_GENERIC_LENGTH {
            return Err(J1939Error::Validation(format!(
                "data length {} out of range",
                length
            )));
        }
        Ok(Self {
            header: FrameHeader::new(pgn, "")?,
            length,
            spns: BTreeMap::new(),
        })
    }

    pub fn set_name(&mut self, name: &str) {
        self.header.set_name(name);
    }

    /// Adds an SPN. Fails if its number is taken, if it does not fit the data
    /// field or if any of its bits are already owned by another SPN.
    pub fn register_spn(&mut self, spn: Spn) -> Result<&mut Spn> {
        let number = spn.number();
        if self.spns.contains_key(&number) {
            return Err(J1939Error::DuplicateSpn(number));
        }
        let layout = *spn.layout();
        if layout.byte_range().end > self.length {
            return Err(J1939Error::Validation(format!(
                "SPN {} ends at byte {}, frame holds {}",
                number,
                layout.byte_range().end,
                self.length
            )));
        }
        if let Some(existing) = self.spns.values().find(|s| s.layout().overlaps(&layout)) {
            return Err(J1939Error::Overlap {
                number,
                existing: existing.number(),
            });
        }
        Ok(self.spns.entry(number).or_insert(spn))
    }

    /// Removes an SPN, freeing its bits for later registrations
    pub fn delete_spn(&mut self, number: u32) -> Option<Spn> {
        self.spns.remove(&number)
    }

    pub fn has_spn(&self, number: u32) -> bool {
        self.spns.contains_key(&number)
    }

    pub fn spn(&self, number: u32) -> Option<&Spn> {
        self.spns.get(&number)
    }

    pub fn spn_mut(&mut self, number: u32) -> Option<&mut Spn> {
        self.spns.get_mut(&number)
    }

    /// SPN numbers in ascending order
    pub fn spn_numbers(&self) -> Vec<u32> {
        self.spns.keys().copied().collect()
    }

    pub fn spns(&self) -> impl Iterator<Item = &Spn> {
        self.spns.values()
    }
}

impl J1939Frame for GenericFrame {
    fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    fn data_length(&self) -> usize {
        self.length
    }

    fn encode_data(&self, buffer: &mut [u8]) -> Result<()> {
        // Bits not owned by any SPN stay at 0xFF
        buffer.fill(0xFF);
        for spn in self.spns.values() {
            spn.encode(buffer);
        }
        Ok(())
    }

    fn decode_data(&mut self, buffer: &[u8]) -> Result<()> {
        for spn in self.spns.values_mut() {
            spn.decode(buffer);
        }
        Ok(())
    }
}

impl fmt::Display for GenericFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (PGN {:#07X}) priority {} source {:#04X}",
            self.header.name(),
            self.header.pgn(),
            self.header.priority(),
            self.header.source_address()
        )?;
        for spn in self.spns.values() {
            write!(f, "\n  {}", spn)?;
        }
        Ok(())
    }
}
