use crate::error::{J1939Error, Result};
use crate::network::{FrameHeader, J1939Frame};

use super::control::TP_PRIORITY;

pub const PGN_TP_DT: u32 = 0x00EB00;

pub const TP_DT_SIZE: usize = 8;
/// Payload bytes carried by one data packet
pub const TP_DT_PAYLOAD: usize = 7;
/// Sequence numbers run from 1 to 255
pub const MAX_PACKETS: usize = 255;
/// Largest message the transport protocol can carry
pub const MAX_MESSAGE_SIZE: usize = MAX_PACKETS * TP_DT_PAYLOAD;

const TP_DT_NAME: &str = "Transport Data Transfer";

/// Number of data packets needed for `size` bytes
pub fn packet_count(size: usize) -> usize {
    (size + TP_DT_PAYLOAD - 1) / TP_DT_PAYLOAD
}

/// TP.DT frame: a sequence number followed by up to 7 payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpDtFrame {
    header: FrameHeader,
    sequence: u8,
    payload: [u8; TP_DT_PAYLOAD],
}

impl TpDtFrame {
    pub fn new() -> Self {
        Self {
            header: FrameHeader::predefined(PGN_TP_DT, TP_PRIORITY, TP_DT_NAME),
            sequence: 0,
            payload: [0xFF; TP_DT_PAYLOAD],
        }
    }

    /// Builds packet `sequence` holding `chunk`; short chunks are padded with 0xFF
    pub fn packet(sequence: u8, chunk: &[u8]) -> Result<Self> {
        if sequence == 0 {
            return Err(J1939Error::Validation("sequence numbers start at 1".into()));
        }
        if chunk.len() > TP_DT_PAYLOAD {
            return Err(J1939Error::Validation(format!(
                "data packet holds {} bytes, got {}",
                TP_DT_PAYLOAD,
                chunk.len()
            )));
        }
        let mut frame = Self::new();
        frame.sequence = sequence;
        frame.payload[..chunk.len()].copy_from_slice(chunk);
        Ok(frame)
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Sets both endpoints; used when a packet is put on the bus
    pub fn address(&mut self, source: u8, destination: u8) -> Result<()> {
        self.header.set_source_address(source as u32)?;
        self.header.set_destination_address(destination)
    }
}

impl Default for TpDtFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl J1939Frame for TpDtFrame {
    fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    fn data_length(&self) -> usize {
        TP_DT_SIZE
    }

    fn encode_data(&self, buffer: &mut [u8]) -> Result<()> {
        if self.sequence == 0 {
            return Err(J1939Error::Encode("TP.DT sequence number not set".into()));
        }
        buffer[0] = self.sequence;
        buffer[1..].copy_from_slice(&self.payload);
        Ok(())
    }

    fn decode_data(&mut self, buffer: &[u8]) -> Result<()> {
        if buffer[0] == 0 {
            return Err(J1939Error::Decode("TP.DT sequence number 0".into()));
        }
        self.sequence = buffer[0];
        self.payload.copy_from_slice(&buffer[1..]);
        Ok(())
    }
}

/// Splits `payload` into numbered data packets
pub fn segment(payload: &[u8]) -> Result<Vec<TpDtFrame>> {
    if payload.is_empty() {
        return Err(J1939Error::Validation("nothing to segment".into()));
    }
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(J1939Error::Validation(format!(
            "message of {} bytes exceeds {}",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }
    payload
        .chunks(TP_DT_PAYLOAD)
        .enumerate()
        .map(|(index, chunk)| TpDtFrame::packet((index + 1) as u8, chunk))
        .collect()
}

/// Rebuilds a `total_size` byte message from packets given in sequence order
pub fn reassemble(packets: &[TpDtFrame], total_size: usize) -> Result<Vec<u8>> {
    if packets.len() != packet_count(total_size) {
        return Err(J1939Error::Decode(format!(
            "{} bytes need {} packets, got {}",
            total_size,
            packet_count(total_size),
            packets.len()
        )));
    }
    let mut data = Vec::with_capacity(total_size);
    for (index, packet) in packets.iter().enumerate() {
        let expected = (index + 1) as u8;
        if packet.sequence() != expected {
            return Err(J1939Error::SessionSequence {
                expected,
                received: packet.sequence(),
            });
        }
        let take = TP_DT_PAYLOAD.min(total_size - data.len());
        data.extend_from_slice(&packet.payload()[..take]);
    }
    Ok(data)
}
