use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::descriptor::FrameDescriptor;
use crate::error::{J1939Error, Result};
use crate::network::{
    is_pdu1, normalize_pgn, parse_identifier, AddressClaimFrame, Frame, GenericFrame, J1939Frame,
    RequestFrame,
};
use crate::transport::{FrameResolver, TpCmFrame, TpDtFrame};
use crate::types::{fits_mask, EXTENDED_ID_MASK, PGN_MASK};

/// Registry shared between the application and the transport engine
pub type SharedRegistry = Arc<RwLock<FrameRegistry>>;

/// PGN and title indexed frame prototypes.
///
/// Lookups hand out clones, so a caller may mutate what it gets without
/// affecting the prototype or any other clone.
#[derive(Debug, Default)]
pub struct FrameRegistry {
    prototypes: HashMap<u32, Frame>,
    titles: HashMap<String, u32>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Registers `frame` under its PGN and name. A PGN registered before is
    /// replaced.
    pub fn register_frame(&mut self, frame: impl Into<Frame>) {
        let frame = frame.into();
        let pgn = frame.pgn();
        let title = frame.name().to_string();

        if let Some(previous) = self.prototypes.insert(pgn, frame) {
            warn!(pgn, title = previous.name(), "replacing registered frame");
            if self.titles.get(previous.name()) == Some(&pgn) {
                self.titles.remove(previous.name());
            }
        }
        if !title.is_empty() {
            if let Some(other) = self.titles.insert(title.clone(), pgn) {
                if other != pgn {
                    warn!(pgn, other, %title, "title now resolves to a different PGN");
                }
            }
        }
        debug!(pgn, %title, "registered frame");
    }

    /// Builds a generic frame prototype from a database record and registers it
    pub fn register_descriptor(&mut self, descriptor: &FrameDescriptor) -> Result<()> {
        let frame = GenericFrame::try_from(descriptor)?;
        self.register_frame(frame);
        Ok(())
    }

    /// Registers every valid descriptor and returns the PGN and error of each
    /// one that was rejected
    pub fn load_descriptors<'a, I>(&mut self, descriptors: I) -> Vec<(u32, J1939Error)>
    where
        I: IntoIterator<Item = &'a FrameDescriptor>,
    {
        descriptors
            .into_iter()
            .filter_map(|descriptor| match self.register_descriptor(descriptor) {
                Ok(()) => None,
                Err(e) => {
                    warn!(pgn = descriptor.pgn, title = %descriptor.name, error = %e, "skipping frame descriptor");
                    Some((descriptor.pgn, e))
                }
            })
            .collect()
    }

    /// Registers the frame types the library implements itself
    pub fn register_predefined_frames(&mut self) {
        self.register_frame(TpCmFrame::new());
        self.register_frame(TpDtFrame::new());
        self.register_frame(RequestFrame::new());
        self.register_frame(AddressClaimFrame::new());
    }

    /// Returns a clone of the prototype for `pgn`. For PDU1 groups a non-zero
    /// destination byte in `pgn` addresses the clone.
    pub fn get_frame(&self, pgn: u32) -> Option<Frame> {
        if !fits_mask(pgn, PGN_MASK) {
            return None;
        }
        let mut frame = self.prototypes.get(&normalize_pgn(pgn))?.clone();
        let destination = (pgn & 0xFF) as u8;
        if is_pdu1(pgn) && destination != 0 {
            frame.header_mut().set_destination_address(destination).ok()?;
        }
        Some(frame)
    }

    pub fn get_frame_by_title(&self, title: &str) -> Option<Frame> {
        let pgn = *self.titles.get(title)?;
        self.get_frame(pgn)
    }

    /// Classifies a received frame by its PGN and decodes it into a clone of
    /// the matching prototype
    pub fn decode(&self, identifier: u32, bytes: &[u8]) -> Result<Frame> {
        if !fits_mask(identifier, EXTENDED_ID_MASK) {
            return Err(J1939Error::Decode(format!(
                "identifier {:#X} exceeds 29 bits",
                identifier
            )));
        }
        let (_, pgn, _) = parse_identifier(identifier);
        let pgn = normalize_pgn(pgn);
        let mut frame = self.get_frame(pgn).ok_or(J1939Error::UnknownPgn(pgn))?;
        frame.decode(identifier, bytes)?;
        Ok(frame)
    }

    pub fn unregister_all(&mut self) {
        debug!(count = self.prototypes.len(), "unregistering all frames");
        self.prototypes.clear();
        self.titles.clear();
    }

    pub fn titles(&self) -> Vec<&str> {
        let mut titles: Vec<&str> = self.titles.keys().map(String::as_str).collect();
        titles.sort_unstable();
        titles
    }

    pub fn pgns(&self) -> Vec<u32> {
        let mut pgns: Vec<u32> = self.prototypes.keys().copied().collect();
        pgns.sort_unstable();
        pgns
    }

    pub fn contains(&self, pgn: u32) -> bool {
        self.prototypes.contains_key(&normalize_pgn(pgn))
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

impl FrameResolver for RwLock<FrameRegistry> {
    fn resolve(&self, pgn: u32) -> Option<Frame> {
        self.read().get_frame(pgn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_frames() {
        let mut registry = FrameRegistry::new();
        registry.register_predefined_frames();
        assert_eq!(registry.pgns(), vec![0xEA00, 0xEB00, 0xEC00, 0xEE00]);
        assert_eq!(
            registry.titles(),
            vec![
                "Address Claimed",
                "Request",
                "Transport Connection Management",
                "Transport Data Transfer"
            ]
        );
        let frame = registry
            .get_frame_by_title("Transport Connection Management")
            .unwrap();
        assert!(matches!(frame, Frame::TransportControl(_)));
    }

    #[test]
    fn pdu1_lookup_is_addressed() {
        let mut registry = FrameRegistry::new();
        registry.register_predefined_frames();
        let request = registry.get_frame(0xEA25).unwrap();
        assert_eq!(request.pgn(), 0xEA00);
        assert_eq!(request.destination_address(), 0x25);
        assert_eq!(
            registry.get_frame(0xEA00).unwrap().destination_address(),
            0xFF
        );
        assert!(registry.contains(0xEA25));
    }

    #[test]
    fn re_registration_replaces_title() {
        let mut registry = FrameRegistry::new();
        let mut first = GenericFrame::new(0xFECA).unwrap();
        first.set_name("DM1");
        registry.register_frame(first);
        let mut second = GenericFrame::new(0xFECA).unwrap();
        second.set_name("Active Diagnostic Trouble Codes");
        registry.register_frame(second);

        assert_eq!(registry.len(), 1);
        assert!(registry.get_frame_by_title("DM1").is_none());
        assert_eq!(
            registry
                .get_frame_by_title("Active Diagnostic Trouble Codes")
                .unwrap()
                .pgn(),
            0xFECA
        );
    }

    #[test]
    fn decode_classifies_by_pgn() {
        let mut registry = FrameRegistry::new();
        registry.register_predefined_frames();
        let frame = registry.decode(0x18EAFF21, &[0xCA, 0xFE, 0x00]).unwrap();
        match frame {
            Frame::Request(request) => {
                assert_eq!(request.requested_pgn(), 0xFECA);
                assert_eq!(request.source_address(), 0x21);
            }
            other => panic!("unexpected frame {}", other),
        }
        assert_eq!(
            registry.decode(0x18FECA00, &[0; 8]),
            Err(J1939Error::UnknownPgn(0xFECA))
        );
        assert!(registry.decode(0x18EAFF21, &[0xCA]).is_err());
        assert!(registry.decode(0xFFFF_FFFF, &[0; 3]).is_err());
    }

    #[test]
    fn resolver_reads_through_the_lock() {
        let registry = FrameRegistry::shared();
        registry.write().register_predefined_frames();
        let resolver: Arc<dyn FrameResolver> = registry.clone();
        assert!(resolver.resolve(0xEE00).is_some());
        registry.write().unregister_all();
        assert!(resolver.resolve(0xEE00).is_none());
        assert!(registry.read().is_empty());
    }
}
