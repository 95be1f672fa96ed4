//! TP.CM: the connection management frame of the transport protocol.
//!
//! One PGN carries five sub-messages, told apart by the leading control byte.
//! All of them end with the 3-byte PGN of the message being transported and
//! fill unused bytes with 0xFF.

use std::fmt;

use crate::error::{J1939Error, Result};
use crate::network::{FrameHeader, J1939Frame};
use crate::types::{fits_mask, PGN_MASK};

pub const PGN_TP_CM: u32 = 0x00EC00;

// Transport Protocol Control Bytes
pub const TP_CM_RTS: u8 = 0x10; // Request to Send
pub const TP_CM_CTS: u8 = 0x11; // Clear to Send
pub const TP_CM_END_OF_MSG_ACK: u8 = 0x13; // End of Message Acknowledgment
pub const TP_CM_BAM: u8 = 0x20; // Broadcast Announce Message
pub const TP_CM_ABORT: u8 = 0xFF; // Connection Abort

pub const TP_CM_SIZE: usize = 8;
pub const TP_PRIORITY: u8 = 7;

const TP_CM_NAME: &str = "Transport Connection Management";

/// Connection abort reasons (J1939-21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    AlreadyInSession,
    SystemResources,
    Timeout,
    CtsWhileTransferring,
    MaxRetransmit,
    UnexpectedDataTransfer,
    BadSequenceNumber,
    DuplicateSequenceNumber,
    MessageTooLarge,
    AnyOther,
    Other(u8),
}

impl AbortReason {
    pub fn code(&self) -> u8 {
        match self {
            AbortReason::AlreadyInSession => 1,
            AbortReason::SystemResources => 2,
            AbortReason::Timeout => 3,
            AbortReason::CtsWhileTransferring => 4,
            AbortReason::MaxRetransmit => 5,
            AbortReason::UnexpectedDataTransfer => 6,
            AbortReason::BadSequenceNumber => 7,
            AbortReason::DuplicateSequenceNumber => 8,
            AbortReason::MessageTooLarge => 9,
            AbortReason::AnyOther => 250,
            AbortReason::Other(code) => *code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => AbortReason::AlreadyInSession,
            2 => AbortReason::SystemResources,
            3 => AbortReason::Timeout,
            4 => AbortReason::CtsWhileTransferring,
            5 => AbortReason::MaxRetransmit,
            6 => AbortReason::UnexpectedDataTransfer,
            7 => AbortReason::BadSequenceNumber,
            8 => AbortReason::DuplicateSequenceNumber,
            9 => AbortReason::MessageTooLarge,
            250 => AbortReason::AnyOther,
            other => AbortReason::Other(other),
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::AlreadyInSession => write!(f, "already in a connection-managed session"),
            AbortReason::SystemResources => write!(f, "system resources needed elsewhere"),
            AbortReason::Timeout => write!(f, "timeout"),
            AbortReason::CtsWhileTransferring => write!(f, "CTS received during data transfer"),
            AbortReason::MaxRetransmit => write!(f, "maximum retransmit limit reached"),
            AbortReason::UnexpectedDataTransfer => write!(f, "unexpected data transfer packet"),
            AbortReason::BadSequenceNumber => write!(f, "bad sequence number"),
            AbortReason::DuplicateSequenceNumber => write!(f, "duplicate sequence number"),
            AbortReason::MessageTooLarge => write!(f, "message size greater than 1785 bytes"),
            AbortReason::AnyOther => write!(f, "other reason"),
            AbortReason::Other(code) => write!(f, "reason {}", code),
        }
    }
}

/// Control-type specific fields of a TP.CM frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpCmControl {
    Rts {
        total_size: u16,
        total_packets: u8,
        max_packets: u8,
    },
    Cts {
        packets_to_send: u8,
        next_packet: u8,
    },
    EndOfMsgAck {
        total_size: u16,
        total_packets: u8,
    },
    Abort {
        reason: AbortReason,
    },
    Bam {
        total_size: u16,
        total_packets: u8,
    },
}

impl TpCmControl {
    pub fn control_byte(&self) -> u8 {
        match self {
            TpCmControl::Rts { .. } => TP_CM_RTS,
            TpCmControl::Cts { .. } => TP_CM_CTS,
            TpCmControl::EndOfMsgAck { .. } => TP_CM_END_OF_MSG_ACK,
            TpCmControl::Abort { .. } => TP_CM_ABORT,
            TpCmControl::Bam { .. } => TP_CM_BAM,
        }
    }

    fn encode(&self, buffer: &mut [u8]) {
        buffer[0] = self.control_byte();
        match *self {
            TpCmControl::Rts {
                total_size,
                total_packets,
                max_packets,
            } => {
                buffer[1..3].copy_from_slice(&total_size.to_le_bytes());
                buffer[3] = total_packets;
                buffer[4] = max_packets;
            }
            TpCmControl::Cts {
                packets_to_send,
                next_packet,
            } => {
                buffer[1] = packets_to_send;
                buffer[2] = next_packet;
            }
            TpCmControl::EndOfMsgAck {
                total_size,
                total_packets,
            }
            | TpCmControl::Bam {
                total_size,
                total_packets,
            } => {
                buffer[1..3].copy_from_slice(&total_size.to_le_bytes());
                buffer[3] = total_packets;
            }
            TpCmControl::Abort { reason } => {
                buffer[1] = reason.code();
            }
        }
    }

    fn decode(buffer: &[u8]) -> Result<Self> {
        let total_size = u16::from_le_bytes([buffer[1], buffer[2]]);
        match buffer[0] {
            TP_CM_RTS => Ok(TpCmControl::Rts {
                total_size,
                total_packets: buffer[3],
                max_packets: buffer[4],
            }),
            TP_CM_CTS => Ok(TpCmControl::Cts {
                packets_to_send: buffer[1],
                next_packet: buffer[2],
            }),
            TP_CM_END_OF_MSG_ACK => Ok(TpCmControl::EndOfMsgAck {
                total_size,
                total_packets: buffer[3],
            }),
            TP_CM_ABORT => Ok(TpCmControl::Abort {
                reason: AbortReason::from_code(buffer[1]),
            }),
            TP_CM_BAM => Ok(TpCmControl::Bam {
                total_size,
                total_packets: buffer[3],
            }),
            other => Err(J1939Error::Decode(format!(
                "unknown TP.CM control type {:#04X}",
                other
            ))),
        }
    }
}

/// TP.CM frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpCmFrame {
    header: FrameHeader,
    control: Option<TpCmControl>,
    data_pgn: u32,
}

impl TpCmFrame {
    pub fn new() -> Self {
        Self {
            header: FrameHeader::predefined(PGN_TP_CM, TP_PRIORITY, TP_CM_NAME),
            control: None,
            data_pgn: 0,
        }
    }

    /// Builds a frame from `source` to `destination` for the given control message
    pub fn with_control(
        control: TpCmControl,
        data_pgn: u32,
        source: u8,
        destination: u8,
    ) -> Result<Self> {
        let mut frame = Self::new();
        frame.set_control(control);
        frame.set_data_pgn(data_pgn)?;
        frame.header.set_source_address(source as u32)?;
        frame.header.set_destination_address(destination)?;
        Ok(frame)
    }

    pub fn control(&self) -> Option<&TpCmControl> {
        self.control.as_ref()
    }

    pub fn set_control(&mut self, control: TpCmControl) {
        self.control = Some(control);
    }

    pub fn data_pgn(&self) -> u32 {
        self.data_pgn
    }

    pub fn set_data_pgn(&mut self, pgn: u32) -> Result<()> {
        if !fits_mask(pgn, PGN_MASK) {
            return Err(J1939Error::Validation(format!(
                "data PGN {:#X} exceeds 18 bits",
                pgn
            )));
        }
        self.data_pgn = pgn;
        Ok(())
    }

    /// Resets every field but the identity
    pub fn clear(&mut self) {
        self.control = None;
        self.data_pgn = 0;
    }
}

impl Default for TpCmFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl J1939Frame for TpCmFrame {
    fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    fn data_length(&self) -> usize {
        TP_CM_SIZE
    }

    fn encode_data(&self, buffer: &mut [u8]) -> Result<()> {
        let control = self
            .control
            .ok_or_else(|| J1939Error::Encode("TP.CM control type not set".into()))?;

        // Reserved bytes stay at 0xFF
        buffer.fill(0xFF);
        control.encode(buffer);
        buffer[5..8].copy_from_slice(&self.data_pgn.to_le_bytes()[..3]);
        Ok(())
    }

    fn decode_data(&mut self, buffer: &[u8]) -> Result<()> {
        let control = TpCmControl::decode(buffer)?;
        let data_pgn = buffer[5] as u32 | (buffer[6] as u32) << 8 | (buffer[7] as u32) << 16;
        if !fits_mask(data_pgn, PGN_MASK) {
            return Err(J1939Error::Decode(format!(
                "data PGN {:#X} exceeds 18 bits",
                data_pgn
            )));
        }
        self.control = Some(control);
        self.data_pgn = data_pgn;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(control: TpCmControl, data_pgn: u32) -> Vec<u8> {
        let frame = TpCmFrame::with_control(control, data_pgn, 0x00, 0x25).unwrap();
        frame.encode().unwrap().1
    }

    #[test]
    fn rts_layout() {
        let data = encode(
            TpCmControl::Rts {
                total_size: 20,
                total_packets: 3,
                max_packets: 0xFF,
            },
            0x00FECA,
        );
        assert_eq!(data, vec![0x10, 0x14, 0x00, 0x03, 0xFF, 0xCA, 0xFE, 0x00]);
    }

    #[test]
    fn cts_ack_abort_bam_layouts() {
        assert_eq!(
            encode(
                TpCmControl::Cts {
                    packets_to_send: 2,
                    next_packet: 1
                },
                0xFEE3
            ),
            vec![0x11, 0x02, 0x01, 0xFF, 0xFF, 0xE3, 0xFE, 0x00]
        );
        assert_eq!(
            encode(
                TpCmControl::EndOfMsgAck {
                    total_size: 300,
                    total_packets: 43
                },
                0x1FECA
            ),
            vec![0x13, 0x2C, 0x01, 0x2B, 0xFF, 0xCA, 0xFE, 0x01]
        );
        assert_eq!(
            encode(
                TpCmControl::Abort {
                    reason: AbortReason::Timeout
                },
                0xFEE3
            ),
            vec![0xFF, 0x03, 0xFF, 0xFF, 0xFF, 0xE3, 0xFE, 0x00]
        );
        assert_eq!(
            encode(
                TpCmControl::Bam {
                    total_size: 9,
                    total_packets: 2
                },
                0xFECA
            ),
            vec![0x20, 0x09, 0x00, 0x02, 0xFF, 0xCA, 0xFE, 0x00]
        );
    }

    #[test]
    fn identifier_carries_destination() {
        let frame = TpCmFrame::with_control(
            TpCmControl::Abort {
                reason: AbortReason::BadSequenceNumber,
            },
            0xFECA,
            0x80,
            0x25,
        )
        .unwrap();
        assert_eq!(frame.identifier(), 0x1CEC2580);
    }

    #[test]
    fn encode_without_control_fails() {
        let frame = TpCmFrame::new();
        assert!(matches!(frame.encode(), Err(J1939Error::Encode(_))));
    }

    #[test]
    fn decode_round_trip() {
        let sent = TpCmFrame::with_control(
            TpCmControl::Rts {
                total_size: 1785,
                total_packets: 255,
                max_packets: 16,
            },
            0xFEE3,
            0x00,
            0x25,
        )
        .unwrap();
        let (id, data) = sent.encode().unwrap();
        let mut received = TpCmFrame::new();
        received.decode(id, &data).unwrap();
        assert_eq!(received, sent);
        assert_eq!(received.destination_address(), 0x25);
    }

    #[test]
    fn decode_unknown_control_type() {
        let mut frame = TpCmFrame::new();
        let result = frame.decode(0x1CECFF00, &[0x42, 0, 0, 0, 0, 0xCA, 0xFE, 0x00]);
        assert!(matches!(result, Err(J1939Error::Decode(_))));
        assert!(frame.control().is_none());
        assert!(frame.decode(0x1CECFF00, &[0x10, 0x14, 0x00]).is_err());
    }

    #[test]
    fn abort_reason_codes() {
        for code in 0..=255u8 {
            assert_eq!(AbortReason::from_code(code).code(), code);
        }
        assert_eq!(AbortReason::from_code(7), AbortReason::BadSequenceNumber);
        assert_eq!(AbortReason::from_code(42), AbortReason::Other(42));
    }
}
