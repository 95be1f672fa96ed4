//! Suspect Parameter Numbers: typed signals packed into a frame's data field.
//!
//! Two kinds exist. Numeric SPNs are linearly scaled measurements
//! (`physical = raw * scale + offset`); status SPNs are small enumerations
//! restricted to a declared set of codes. Both are addressed the same way, by
//! an [`SpnLayout`] in Intel (little-endian) bit order.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use super::generic::MAX_GENERIC_LENGTH;
use crate::error::{J1939Error, Result};

const MAX_BIT_WIDTH: u8 = 32;

/// Position of an SPN inside the data field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpnLayout {
    byte_offset: usize,
    bit_offset: u8,
    bit_width: u8,
}

impl SpnLayout {
    pub fn new(byte_offset: usize, bit_offset: u8, bit_width: u8) -> Result<Self> {
        if byte_offset >= MAX_GENERIC_LENGTH {
            return Err(J1939Error::Validation(format!(
                "byte offset {} out of range",
                byte_offset
            )));
        }
        if bit_offset > 7 {
            return Err(J1939Error::Validation(format!(
                "bit offset {} out of range",
                bit_offset
            )));
        }
        if bit_width == 0 || bit_width > MAX_BIT_WIDTH {
            return Err(J1939Error::Validation(format!(
                "bit width {} out of range",
                bit_width
            )));
        }
        Ok(Self {
            byte_offset,
            bit_offset,
            bit_width,
        })
    }

    /// Byte-aligned layout spanning `bytes` whole bytes
    pub fn bytes(byte_offset: usize, bytes: u8) -> Result<Self> {
        Self::new(byte_offset, 0, bytes.saturating_mul(8))
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn bit_offset(&self) -> u8 {
        self.bit_offset
    }

    pub fn bit_width(&self) -> u8 {
        self.bit_width
    }

    fn start_bit(&self) -> usize {
        self.byte_offset * 8 + self.bit_offset as usize
    }

    fn end_bit(&self) -> usize {
        self.start_bit() + self.bit_width as usize
    }

    /// Bytes touched by this SPN
    pub fn byte_range(&self) -> Range<usize> {
        self.byte_offset..(self.end_bit() + 7) / 8
    }

    pub fn overlaps(&self, other: &SpnLayout) -> bool {
        self.start_bit() < other.end_bit() && other.start_bit() < self.end_bit()
    }

    pub fn max_raw(&self) -> u32 {
        if self.bit_width >= MAX_BIT_WIDTH {
            u32::MAX
        } else {
            (1u32 << self.bit_width) - 1
        }
    }

    pub(crate) fn write(&self, buffer: &mut [u8], raw: u32) {
        let start = self.start_bit();
        for i in 0..self.bit_width as usize {
            let bit = start + i;
            let mask = 1u8 << (bit % 8);
            if (raw >> i) & 1 == 1 {
                buffer[bit / 8] |= mask;
            } else {
                buffer[bit / 8] &= !mask;
            }
        }
    }

    pub(crate) fn read(&self, buffer: &[u8]) -> u32 {
        let start = self.start_bit();
        (0..self.bit_width as usize).fold(0u32, |raw, i| {
            let bit = start + i;
            raw | ((((buffer[bit / 8] >> (bit % 8)) & 1) as u32) << i)
        })
    }
}

/// SPN kind as named in frame database descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpnKind {
    Numeric,
    Status,
}

impl FromStr for SpnKind {
    type Err = J1939Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "numeric" => Ok(SpnKind::Numeric),
            "status" => Ok(SpnKind::Status),
            _ => Err(J1939Error::UnknownSpnType(s.to_string())),
        }
    }
}

/// Linearly scaled measurement
#[derive(Debug, Clone, PartialEq)]
pub struct SpnNumeric {
    number: u32,
    name: String,
    layout: SpnLayout,
    scale: f64,
    offset: f64,
    units: String,
    raw: u32,
}

impl SpnNumeric {
    pub fn new(
        number: u32,
        name: &str,
        layout: SpnLayout,
        scale: f64,
        offset: f64,
        units: &str,
    ) -> Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(J1939Error::Validation(format!(
                "SPN {} scale must be positive",
                number
            )));
        }
        if !offset.is_finite() {
            return Err(J1939Error::Validation(format!(
                "SPN {} offset must be finite",
                number
            )));
        }
        Ok(Self {
            number,
            name: name.to_string(),
            layout,
            scale,
            offset,
            units: units.to_string(),
            raw: 0,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn raw_value(&self) -> u32 {
        self.raw
    }

    pub fn set_raw_value(&mut self, raw: u32) -> bool {
        if raw > self.layout.max_raw() {
            return false;
        }
        self.raw = raw;
        true
    }

    /// Stores the raw value nearest to `value`. Returns false, leaving the
    /// current value untouched, when that raw value does not fit the width.
    pub fn set_formatted_value(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        let raw = ((value - self.offset) / self.scale).round();
        if raw < 0.0 || raw > self.layout.max_raw() as f64 {
            return false;
        }
        self.raw = raw as u32;
        true
    }

    pub fn formatted_value(&self) -> f64 {
        self.raw as f64 * self.scale + self.offset
    }

    /// Smallest and largest representable physical values
    pub fn range(&self) -> (f64, f64) {
        (
            self.offset,
            self.layout.max_raw() as f64 * self.scale + self.offset,
        )
    }
}

/// Enumerated status code
#[derive(Debug, Clone, PartialEq)]
pub struct SpnStatus {
    number: u32,
    name: String,
    layout: SpnLayout,
    valid_codes: BTreeMap<u8, String>,
    value: u8,
}

impl SpnStatus {
    /// Status SPNs are at most one byte wide. The initial value is all ones
    /// ("not available").
    pub fn new(
        number: u32,
        name: &str,
        layout: SpnLayout,
        valid_codes: BTreeMap<u8, String>,
    ) -> Result<Self> {
        if layout.bit_width() > 8 {
            return Err(J1939Error::Validation(format!(
                "status SPN {} wider than one byte",
                number
            )));
        }
        let max = layout.max_raw();
        if let Some(code) = valid_codes.keys().find(|&&code| code as u32 > max) {
            return Err(J1939Error::Validation(format!(
                "status SPN {} code {} does not fit {} bits",
                number,
                code,
                layout.bit_width()
            )));
        }
        Ok(Self {
            number,
            name: name.to_string(),
            layout,
            valid_codes,
            value: max as u8,
        })
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn set_value(&mut self, value: u8) -> bool {
        if !self.valid_codes.contains_key(&value) {
            return false;
        }
        self.value = value;
        true
    }

    pub fn valid_codes(&self) -> &BTreeMap<u8, String> {
        &self.valid_codes
    }

    pub fn description(&self) -> Option<&str> {
        self.valid_codes.get(&self.value).map(String::as_str)
    }
}

/// A signal owned by a generic frame
#[derive(Debug, Clone, PartialEq)]
pub enum Spn {
    Numeric(SpnNumeric),
    Status(SpnStatus),
}

impl Spn {
    pub fn number(&self) -> u32 {
        match self {
            Spn::Numeric(spn) => spn.number,
            Spn::Status(spn) => spn.number,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Spn::Numeric(spn) => &spn.name,
            Spn::Status(spn) => &spn.name,
        }
    }

    pub fn layout(&self) -> &SpnLayout {
        match self {
            Spn::Numeric(spn) => &spn.layout,
            Spn::Status(spn) => &spn.layout,
        }
    }

    pub fn kind(&self) -> SpnKind {
        match self {
            Spn::Numeric(_) => SpnKind::Numeric,
            Spn::Status(_) => SpnKind::Status,
        }
    }

    pub fn raw_value(&self) -> u32 {
        match self {
            Spn::Numeric(spn) => spn.raw,
            Spn::Status(spn) => spn.value as u32,
        }
    }

    pub fn as_numeric(&self) -> Option<&SpnNumeric> {
        match self {
            Spn::Numeric(spn) => Some(spn),
            Spn::Status(_) => None,
        }
    }

    pub fn as_numeric_mut(&mut self) -> Option<&mut SpnNumeric> {
        match self {
            Spn::Numeric(spn) => Some(spn),
            Spn::Status(_) => None,
        }
    }

    pub fn as_status(&self) -> Option<&SpnStatus> {
        match self {
            Spn::Status(spn) => Some(spn),
            Spn::Numeric(_) => None,
        }
    }

    pub fn as_status_mut(&mut self) -> Option<&mut SpnStatus> {
        match self {
            Spn::Status(spn) => Some(spn),
            Spn::Numeric(_) => None,
        }
    }

    pub(crate) fn encode(&self, buffer: &mut [u8]) {
        self.layout().write(buffer, self.raw_value());
    }

    /// Received values are stored as-is, valid code or not
    pub(crate) fn decode(&mut self, buffer: &[u8]) {
        let raw = self.layout().read(buffer);
        match self {
            Spn::Numeric(spn) => spn.raw = raw,
            Spn::Status(spn) => spn.value = raw as u8,
        }
    }
}

impl From<SpnNumeric> for Spn {
    fn from(spn: SpnNumeric) -> Self {
        Spn::Numeric(spn)
    }
}

impl From<SpnStatus> for Spn {
    fn from(spn: SpnStatus) -> Self {
        Spn::Status(spn)
    }
}

impl fmt::Display for Spn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spn::Numeric(spn) => write!(
                f,
                "SPN {} {}: {} {}",
                spn.number,
                spn.name,
                spn.formatted_value(),
                spn.units
            ),
            Spn::Status(spn) => write!(
                f,
                "SPN {} {}: {} ({})",
                spn.number,
                spn.name,
                spn.value,
                spn.description().unwrap_or("undefined")
            ),
        }
    }
}
