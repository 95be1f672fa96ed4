/// CAN ID type
pub type CanId = u32;

/// Generic frame data type
pub type FrameData = Vec<u8>;

/// Timestamp in milliseconds
pub type Timestamp = u64;

/// Priority occupies the three most significant bits of the identifier
pub const PRIORITY_MASK: u8 = 0x07;

/// Source address mask
pub const SRC_ADDR_MASK: u8 = 0xFF;

/// Parameter Group Number mask (18 bits, including data page and extended data page)
pub const PGN_MASK: u32 = 0x3FFFF;

/// Extended (29-bit) CAN identifier mask
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Maximum data length of a classic CAN frame
pub const CAN_MAX_DLC: usize = 8;

/// Raw CAN frame exchanged with the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: CanId,
    pub data: FrameData,
    pub timestamp: Timestamp,
    pub is_extended: bool,
}

impl CanFrame {
    /// J1939 frames are always sent in extended format
    pub fn extended(id: CanId, data: FrameData) -> Self {
        Self {
            id,
            data,
            timestamp: 0,
            is_extended: true,
        }
    }
}

impl Default for CanFrame {
    fn default() -> Self {
        Self {
            id: 0,
            data: Vec::new(),
            timestamp: 0,
            is_extended: true,
        }
    }
}

/// Configuration trait that must be implemented by all protocol configurations
pub trait Config: Send + Sync {
    fn validate(&self) -> crate::error::Result<()>;
}

/// Returns true when `value` fits entirely inside `mask`
#[inline]
pub fn fits_mask<T>(value: T, mask: T) -> bool
where
    T: Copy + PartialEq + std::ops::BitAnd<Output = T>,
{
    value == (value & mask)
}
