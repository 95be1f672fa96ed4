//! J1939 transport protocol (TP.CM / TP.DT).
//!
//! Messages longer than one CAN frame are split into numbered 7-byte data
//! packets and reassembled on the other side. Two kinds of sessions exist:
//!
//! 1. Broadcast: a TP.CM_BAM announcement followed by all data packets, with
//!    no flow control.
//! 2. Connection mode: TP.CM_RTS, answered by TP.CM_CTS bursts from the
//!    receiver, closed by TP.CM_EndOfMsgACK. Either side may send
//!    TP.Conn_Abort.
//!
//! [`TransportProtocol`] is an event-driven engine: incoming frames and elapsed
//! time are fed in, frames to transmit and completed messages come out.

pub mod control;
pub mod data;
pub mod protocol;
pub mod session;

use std::time::Duration;

use crate::error::{J1939Error, Result};
use crate::network::{Frame, GLOBAL_ADDRESS, NULL_ADDRESS};
use crate::types::{CanFrame, Config};

pub use control::{AbortReason, TpCmControl, TpCmFrame};
pub use data::{segment, TpDtFrame};
pub use protocol::TransportProtocol;
pub use session::{Direction, SessionKey, SessionMode, SessionState};

// Timeouts (in milliseconds)
const T1_TIMEOUT: u64 = 750; // Time between consecutive received data packets
const T2_TIMEOUT: u64 = 1250; // Time between CTS and first data packet
const T3_TIMEOUT: u64 = 1250; // Time waiting for CTS or EndOfMsgACK after sending
const T4_TIMEOUT: u64 = 1050; // Time waiting after CTS(0) hold

const BAM_PACKET_SPACING: u64 = 50;

/// Transport protocol configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address this node sends from and answers to
    pub source_address: u8,
    /// Burst limit announced in RTS; 0xFF means no limit
    pub max_packets_per_burst: u8,
    /// Packets granted per CTS when receiving; 0xFF means all remaining
    pub cts_packets: u8,
    pub bam_packet_spacing: Duration,
    pub t1: Duration,
    pub t2: Duration,
    pub t3: Duration,
    pub t4: Duration,
}

impl Config for TransportConfig {
    fn validate(&self) -> Result<()> {
        if self.source_address == GLOBAL_ADDRESS || self.source_address == NULL_ADDRESS {
            return Err(J1939Error::Validation(format!(
                "{:#04X} cannot be used as a source address",
                self.source_address
            )));
        }
        if self.max_packets_per_burst == 0 || self.cts_packets == 0 {
            return Err(J1939Error::Validation("burst size must be non-zero".into()));
        }
        if self.t1.is_zero() || self.t2.is_zero() || self.t3.is_zero() || self.t4.is_zero() {
            return Err(J1939Error::Validation("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            source_address: 0x80,
            max_packets_per_burst: 0xFF,
            cts_packets: 0xFF,
            bam_packet_spacing: Duration::from_millis(BAM_PACKET_SPACING),
            t1: Duration::from_millis(T1_TIMEOUT),
            t2: Duration::from_millis(T2_TIMEOUT),
            t3: Duration::from_millis(T3_TIMEOUT),
            t4: Duration::from_millis(T4_TIMEOUT),
        }
    }
}

/// Supplies the frame type a reassembled message is decoded into
pub trait FrameResolver: Send + Sync {
    fn resolve(&self, pgn: u32) -> Option<Frame>;
}

/// A message reassembled from a finished receive session
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub source: u8,
    pub destination: u8,
    pub pgn: u32,
    pub data: Vec<u8>,
    /// The registered frame for `pgn` with `data` decoded into it
    pub frame: Option<Frame>,
}

/// Output of the transport engine
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Frame to put on the bus
    Transmit(CanFrame),
    MessageReceived(ReceivedMessage),
    /// A send session finished (ACK received, or last BAM packet sent)
    TransferComplete(SessionKey),
    Failed { key: SessionKey, error: J1939Error },
}
