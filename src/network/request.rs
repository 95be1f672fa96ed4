use super::{FrameHeader, J1939Frame, DEFAULT_PRIORITY, PGN_REQUEST};
use crate::error::{J1939Error, Result};
use crate::types::{fits_mask, PGN_MASK};

const REQUEST_NAME: &str = "Request";
const REQUEST_SIZE: usize = 3;

/// Request PGN: asks a node (or all nodes) to transmit a parameter group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    header: FrameHeader,
    requested_pgn: u32,
}

impl RequestFrame {
    pub fn new() -> Self {
        Self {
            header: FrameHeader::predefined(PGN_REQUEST, DEFAULT_PRIORITY, REQUEST_NAME),
            requested_pgn: 0,
        }
    }

    pub fn requested_pgn(&self) -> u32 {
        self.requested_pgn
    }

    pub fn set_requested_pgn(&mut self, pgn: u32) -> Result<()> {
        if !fits_mask(pgn, PGN_MASK) {
            return Err(J1939Error::Validation(format!(
                "requested PGN {:#X} exceeds 18 bits",
                pgn
            )));
        }
        self.requested_pgn = pgn;
        Ok(())
    }
}

impl Default for RequestFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl J1939Frame for RequestFrame {
    fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    fn data_length(&self) -> usize {
        REQUEST_SIZE
    }

    fn encode_data(&self, buffer: &mut [u8]) -> Result<()> {
        buffer.copy_from_slice(&self.requested_pgn.to_le_bytes()[..REQUEST_SIZE]);
        Ok(())
    }

    fn decode_data(&mut self, buffer: &[u8]) -> Result<()> {
        let pgn = buffer[0] as u32 | (buffer[1] as u32) << 8 | (buffer[2] as u32) << 16;
        if !fits_mask(pgn, PGN_MASK) {
            return Err(J1939Error::Decode(format!(
                "requested PGN {:#X} exceeds 18 bits",
                pgn
            )));
        }
        self.requested_pgn = pgn;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_address_claim() {
        let mut request = RequestFrame::new();
        request.set_requested_pgn(0xEE00).unwrap();
        request.set_source_address(0xF9).unwrap();
        request.header_mut().set_destination_address(0x00).unwrap();

        let (id, data) = request.encode().unwrap();
        assert_eq!(id, 0x18EA00F9);
        assert_eq!(data, vec![0x00, 0xEE, 0x00]);

        let mut decoded = RequestFrame::new();
        decoded.decode(id, &data).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn request_rejects_wide_pgn() {
        let mut request = RequestFrame::new();
        assert!(request.set_requested_pgn(0x40000).is_err());
        assert!(request.decode(0x18EAFF00, &[0x00, 0x00, 0x04]).is_err());
        assert_eq!(request.requested_pgn(), 0);
        assert!(request.decode(0x18EAFF00, &[0x00, 0xEE]).is_err());
    }
}
