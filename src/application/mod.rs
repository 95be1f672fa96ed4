//! Application layer: frame database, frame factory and the sender front end.
//!
//! This module ties the lower layers together:
//! - [`descriptor`] - frame database records as handed over by a loader
//! - [`registry`] - PGN and title indexed frame prototypes
//! - [`sender`] - named working frames, periodic transmission and the receive path
//!
//! ## Frame registry
//! - Predefined frame types (transport protocol, Request, Address Claimed)
//! - Generic frames built from database descriptors
//! - Lookup by PGN or title, handing out independent clones
//! - Classification and decoding of received frames
//!
//! ## Frame sender
//! - Creation of working frames from the registry
//! - Priority, source address, SPN and period editing
//! - Periodic transmission through a CAN backend
//! - Transport protocol sessions for payloads above 8 bytes
//!
//! # Examples
//!
//! ```rust,no_run
//! use libj1939::application::{FrameRegistry, FrameSelector, FrameSender};
//! use libj1939::transport::TransportConfig;
//!
//! let registry = FrameRegistry::shared();
//! registry.write().register_predefined_frames();
//!
//! // No backend registered: frames can be built and encoded, not sent
//! let mut sender = FrameSender::new(registry, Vec::new(), TransportConfig::default()).unwrap();
//! sender
//!     .create_frame("req", FrameSelector::Title("Request".into()))
//!     .unwrap();
//! sender.set_source_address("req", 0xF9).unwrap();
//! let frame = sender.encode("req").unwrap();
//! assert_eq!(frame.id, 0x18EAFFF9);
//! ```

pub mod descriptor;
pub mod registry;
pub mod sender;

pub use descriptor::{FrameDescriptor, SpnDescriptor};
pub use registry::{FrameRegistry, SharedRegistry};
pub use sender::{FrameSelector, FrameSender, FrameSummary};

#[cfg(test)]
mod tests;
