//! Frame database records.
//!
//! A database loader parses the frame database and hands over
//! [`FrameDescriptor`]s; the registry turns each one into a [`GenericFrame`]
//! prototype. Field names follow the database's camelCase spelling.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{J1939Error, Result};
use crate::network::spn::{Spn, SpnKind, SpnLayout, SpnNumeric, SpnStatus};
use crate::network::GenericFrame;
use crate::types::CAN_MAX_DLC;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpnDescriptor {
    pub number: u32,
    #[serde(default)]
    pub name: String,
    pub byte_offset: usize,
    #[serde(default)]
    pub bit_offset: u8,
    pub bit_width: u8,
    /// "numeric" or "status"
    pub kind: String,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub units: Option<String>,
    pub valid_codes: Option<BTreeMap<u8, String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDescriptor {
    pub pgn: u32,
    pub name: String,
    /// Data length in bytes, 8 when absent
    pub length: Option<usize>,
    #[serde(default, alias = "spnDescriptors")]
    pub spns: Vec<SpnDescriptor>,
}

impl TryFrom<&SpnDescriptor> for Spn {
    type Error = J1939Error;

    fn try_from(descriptor: &SpnDescriptor) -> Result<Self> {
        let kind: SpnKind = descriptor.kind.parse()?;
        let layout = SpnLayout::new(
            descriptor.byte_offset,
            descriptor.bit_offset,
            descriptor.bit_width,
        )?;
        let spn = match kind {
            SpnKind::Numeric => Spn::Numeric(SpnNumeric::new(
                descriptor.number,
                &descriptor.name,
                layout,
                descriptor.scale.unwrap_or(1.0),
                descriptor.offset.unwrap_or(0.0),
                descriptor.units.as_deref().unwrap_or_default(),
            )?),
            SpnKind::Status => Spn::Status(SpnStatus::new(
                descriptor.number,
                &descriptor.name,
                layout,
                descriptor.valid_codes.clone().unwrap_or_default(),
            )?),
        };
        Ok(spn)
    }
}

impl TryFrom<&FrameDescriptor> for GenericFrame {
    type Error = J1939Error;

    fn try_from(descriptor: &FrameDescriptor) -> Result<Self> {
        let mut frame =
            GenericFrame::with_length(descriptor.pgn, descriptor.length.unwrap_or(CAN_MAX_DLC))?;
        frame.set_name(&descriptor.name);
        for spn in &descriptor.spns {
            frame.register_spn(Spn::try_from(spn)?)?;
        }
        Ok(frame)
    }
}
