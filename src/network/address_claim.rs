use super::{FrameHeader, J1939Frame, DEFAULT_PRIORITY, PGN_ADDRESS_CLAIMED};
use crate::error::Result;

const ADDRESS_CLAIM_NAME: &str = "Address Claimed";
const ADDRESS_CLAIM_SIZE: usize = 8;

/// Address Claimed: announces the 64-bit NAME of the node owning the source address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressClaimFrame {
    header: FrameHeader,
    device_name: u64,
}

impl AddressClaimFrame {
    pub fn new() -> Self {
        Self {
            header: FrameHeader::predefined(
                PGN_ADDRESS_CLAIMED,
                DEFAULT_PRIORITY,
                ADDRESS_CLAIM_NAME,
            ),
            device_name: 0,
        }
    }

    /// Raw 64-bit NAME
    pub fn device_name(&self) -> u64 {
        self.device_name
    }

    pub fn set_device_name(&mut self, name: u64) {
        self.device_name = name;
    }

    fn field(&self, shift: u32, width: u32) -> u64 {
        (self.device_name >> shift) & ((1u64 << width) - 1)
    }

    pub fn identity_number(&self) -> u32 {
        self.field(0, 21) as u32
    }

    pub fn manufacturer_code(&self) -> u16 {
        self.field(21, 11) as u16
    }

    pub fn ecu_instance(&self) -> u8 {
        self.field(32, 3) as u8
    }

    pub fn function_instance(&self) -> u8 {
        self.field(35, 5) as u8
    }

    pub fn function(&self) -> u8 {
        self.field(40, 8) as u8
    }

    pub fn vehicle_system(&self) -> u8 {
        self.field(49, 7) as u8
    }

    pub fn vehicle_system_instance(&self) -> u8 {
        self.field(56, 4) as u8
    }

    pub fn industry_group(&self) -> u8 {
        self.field(60, 3) as u8
    }

    pub fn arbitrary_address_capable(&self) -> bool {
        self.field(63, 1) == 1
    }
}

impl Default for AddressClaimFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl J1939Frame for AddressClaimFrame {
    fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    fn data_length(&self) -> usize {
        ADDRESS_CLAIM_SIZE
    }

    fn encode_data(&self, buffer: &mut [u8]) -> Result<()> {
        buffer.copy_from_slice(&self.device_name.to_le_bytes());
        Ok(())
    }

    fn decode_data(&mut self, buffer: &[u8]) -> Result<()> {
        let mut bytes = [0u8; ADDRESS_CLAIM_SIZE];
        bytes.copy_from_slice(buffer);
        self.device_name = u64::from_le_bytes(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_fields() {
        let mut claim = AddressClaimFrame::new();
        // Industry group 1, arbitrary address capable, function 0x81, manufacturer 0x123
        let name = (1u64 << 63) | (1u64 << 60) | (0x81u64 << 40) | (0x123u64 << 21) | 0x1ABCD;
        claim.set_device_name(name);
        assert!(claim.arbitrary_address_capable());
        assert_eq!(claim.industry_group(), 1);
        assert_eq!(claim.function(), 0x81);
        assert_eq!(claim.manufacturer_code(), 0x123);
        assert_eq!(claim.identity_number(), 0x1ABCD);
        assert_eq!(claim.ecu_instance(), 0);
    }

    #[test]
    fn name_is_little_endian_on_the_wire() {
        let mut claim = AddressClaimFrame::new();
        claim.set_device_name(0x0102_0304_0506_0708);
        claim.set_source_address(0x80).unwrap();
        let (id, data) = claim.encode().unwrap();
        assert_eq!(id, 0x18EEFF80);
        assert_eq!(data, vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);

        let mut decoded = AddressClaimFrame::new();
        decoded.decode(id, &data).unwrap();
        assert_eq!(decoded.device_name(), 0x0102_0304_0506_0708);
        assert_eq!(decoded.source_address(), 0x80);
    }
}
