//! Physical layer boundary for J1939.
//!
//! The library never drives CAN hardware itself. A platform backend implements
//! [`CanHelper`] to enumerate interfaces and allocate [`CanSender`]s, and each
//! sender takes care of raw transmission and periodic re-sending:
//! - Interface enumeration
//! - Bit timing (J1939 fixes the bitrate at 250 kbit/s)
//! - Periodic re-send scheduling
//!
//! # Examples
//!
//! ```rust,no_run
//! use libj1939::physical::can::CanConfig;
//!
//! // J1939 always runs at 250 kbit/s
//! let config = CanConfig::default();
//! assert_eq!(config.bitrate.bits_per_second(), 250_000);
//! ```

pub mod can;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::{CanFrame, CanId};
use can::CanConfig;

/// Transmits raw frames on one CAN interface.
///
/// `period_ms == 0` requests a single transmission, any other value requests
/// the frame to be re-sent with that period until [`CanSender::unsend_frame`].
/// Sending a frame whose identifier is already scheduled replaces its data.
pub trait CanSender: Send + Sync {
    fn initialize(&mut self, interface: &str, config: &CanConfig) -> Result<()>;
    fn send_frame(&mut self, frame: &CanFrame, period_ms: u32) -> Result<()>;
    fn unsend_frame(&mut self, id: CanId);
    fn is_sent(&self, id: CanId) -> bool;
    fn finalize(&mut self) -> Result<()>;
}

/// Backend discovery: names the backend, lists its interfaces and hands out senders
pub trait CanHelper: Send + Sync {
    fn backend(&self) -> &str;
    fn interfaces(&self) -> BTreeSet<String>;
    fn allocate_sender(&self) -> Box<dyn CanSender>;
}
