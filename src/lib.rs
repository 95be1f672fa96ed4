// Layer modules
pub mod application; // Frame registry and sender
pub mod network; // J1939 frames and SPNs
pub mod physical; // CAN backend boundary
pub mod transport; // TP.CM / TP.DT multi-packet transfer

// Re-exports for convenience
pub use application::{FrameRegistry, FrameSender};
pub use error::{J1939Error, Result};
pub use network::{Frame, GenericFrame, J1939Frame};
pub use transport::{TransportConfig, TransportProtocol};

// Common types and traits
pub mod error;
pub mod types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_valid() {
        assert!(!VERSION.is_empty());
    }
}
