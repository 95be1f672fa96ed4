use std::fmt;

use super::{AddressClaimFrame, FrameHeader, GenericFrame, J1939Frame, RequestFrame};
use crate::error::Result;
use crate::transport::control::TpCmFrame;
use crate::transport::data::TpDtFrame;

/// Closed set of frame types the registry hands out.
///
/// Every variant implements [`J1939Frame`]; `Frame` forwards the contract so
/// callers can encode, decode and re-address a frame without knowing its type.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Generic(GenericFrame),
    TransportControl(TpCmFrame),
    TransportData(TpDtFrame),
    Request(RequestFrame),
    AddressClaim(AddressClaimFrame),
}

impl Frame {
    fn inner(&self) -> &dyn J1939Frame {
        match self {
            Frame::Generic(frame) => frame,
            Frame::TransportControl(frame) => frame,
            Frame::TransportData(frame) => frame,
            Frame::Request(frame) => frame,
            Frame::AddressClaim(frame) => frame,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn J1939Frame {
        match self {
            Frame::Generic(frame) => frame,
            Frame::TransportControl(frame) => frame,
            Frame::TransportData(frame) => frame,
            Frame::Request(frame) => frame,
            Frame::AddressClaim(frame) => frame,
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, Frame::Generic(_))
    }

    pub fn as_generic(&self) -> Option<&GenericFrame> {
        match self {
            Frame::Generic(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_generic_mut(&mut self) -> Option<&mut GenericFrame> {
        match self {
            Frame::Generic(frame) => Some(frame),
            _ => None,
        }
    }
}

impl J1939Frame for Frame {
    fn header(&self) -> &FrameHeader {
        self.inner().header()
    }

    fn header_mut(&mut self) -> &mut FrameHeader {
        self.inner_mut().header_mut()
    }

    fn data_length(&self) -> usize {
        self.inner().data_length()
    }

    fn encode_data(&self, buffer: &mut [u8]) -> Result<()> {
        self.inner().encode_data(buffer)
    }

    fn decode_data(&mut self, buffer: &[u8]) -> Result<()> {
        self.inner_mut().decode_data(buffer)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Frame::Generic(frame) = self {
            return fmt::Display::fmt(frame, f);
        }
        write!(
            f,
            "{} (PGN {:#07X}) priority {} source {:#04X}",
            self.name(),
            self.pgn(),
            self.priority(),
            self.source_address()
        )?;
        match self.encode() {
            Ok((_, data)) => {
                for byte in data {
                    write!(f, " {:02X}", byte)?;
                }
                Ok(())
            }
            Err(e) => write!(f, " <{}>", e),
        }
    }
}

impl From<GenericFrame> for Frame {
    fn from(frame: GenericFrame) -> Self {
        Frame::Generic(frame)
    }
}

impl From<TpCmFrame> for Frame {
    fn from(frame: TpCmFrame) -> Self {
        Frame::TransportControl(frame)
    }
}

impl From<TpDtFrame> for Frame {
    fn from(frame: TpDtFrame) -> Self {
        Frame::TransportData(frame)
    }
}

impl From<RequestFrame> for Frame {
    fn from(frame: RequestFrame) -> Self {
        Frame::Request(frame)
    }
}

impl From<AddressClaimFrame> for Frame {
    fn from(frame: AddressClaimFrame) -> Self {
        Frame::AddressClaim(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_through_the_enum() {
        let mut frame = Frame::from(RequestFrame::new());
        frame.set_priority(3).unwrap();
        frame.set_source_address(0x21).unwrap();
        assert_eq!(frame.data_length(), 3);
        assert_eq!(frame.identifier(), 0x0CEAFF21);
        assert!(!frame.is_generic());
        assert!(frame.as_generic().is_none());

        let (id, data) = frame.encode().unwrap();
        let mut other = Frame::from(RequestFrame::new());
        other.decode(id, &data).unwrap();
        assert_eq!(other, frame);
    }

    #[test]
    fn display_lists_bytes() {
        let frame = Frame::from(RequestFrame::new());
        assert_eq!(
            frame.to_string(),
            "Request (PGN 0x0EA00) priority 6 source 0x00 00 00 00"
        );
    }
}
