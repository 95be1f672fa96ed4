use crate::error::{J1939Error, Result};
use crate::types::Config;
use bitflags::bitflags;

/// Bitrate required by the J1939 physical layer
pub const J1939_BITRATE: u32 = 250_000;

/// CAN configuration handed to a backend when a sender is initialized
#[derive(Debug, Clone)]
pub struct CanConfig {
    pub bitrate: CanBitrate,
    pub options: CanOptions,
}

/// CAN bitrate configurations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanBitrate {
    Rate1M,               // 1Mbit/sec, 75% sample point
    Rate500K,             // 500kbit/sec, 75% sample point
    Rate250K,             // 250kbit/sec, 75% sample point
    Rate125K,             // 125kbit/sec, 75% sample point
    Custom(u32, f32, u8), // Custom bitrate, sample point, and SJW
}

impl CanBitrate {
    pub fn bits_per_second(&self) -> u32 {
        match self {
            CanBitrate::Rate1M => 1_000_000,
            CanBitrate::Rate500K => 500_000,
            CanBitrate::Rate250K => J1939_BITRATE,
            CanBitrate::Rate125K => 125_000,
            CanBitrate::Custom(rate, _, _) => *rate,
        }
    }

    pub fn sample_point(&self) -> f32 {
        match self {
            CanBitrate::Custom(_, sp, _) => *sp,
            _ => 0.75,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CanOptions: u32 {
        const NONE = 0;
        const LOOPBACK = 1;
        const LISTEN_ONLY = 2;
        const TRIPLE_SAMPLING = 4;
        const ONE_SHOT = 8;
        const ERR_REPORTING = 16;
    }
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            bitrate: CanBitrate::Rate250K,
            options: CanOptions::NONE,
        }
    }
}

impl Config for CanConfig {
    fn validate(&self) -> Result<()> {
        if self.bitrate.bits_per_second() != J1939_BITRATE {
            return Err(J1939Error::Validation(format!(
                "J1939 requires {} bit/s, got {}",
                J1939_BITRATE,
                self.bitrate.bits_per_second()
            )));
        }
        let sample_point = self.bitrate.sample_point();
        if sample_point <= 0.0 || sample_point >= 1.0 {
            return Err(J1939Error::Validation("sample point out of range".into()));
        }
        if let CanBitrate::Custom(_, _, 0) = self.bitrate {
            return Err(J1939Error::Validation("SJW must be non-zero".into()));
        }
        if self.options.contains(CanOptions::LISTEN_ONLY) {
            return Err(J1939Error::Validation(
                "a listen-only controller cannot transmit".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_j1939() {
        let config = CanConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bitrate.bits_per_second(), 250_000);
    }

    #[test]
    fn other_bitrates_are_rejected() {
        let config = CanConfig {
            bitrate: CanBitrate::Rate500K,
            options: CanOptions::NONE,
        };
        assert!(matches!(config.validate(), Err(J1939Error::Validation(_))));

        let custom = CanConfig {
            bitrate: CanBitrate::Custom(250_000, 0.875, 0),
            options: CanOptions::NONE,
        };
        assert!(custom.validate().is_err());
    }

    #[test]
    fn listen_only_is_rejected() {
        let config = CanConfig {
            bitrate: CanBitrate::Rate250K,
            options: CanOptions::LISTEN_ONLY | CanOptions::ERR_REPORTING,
        };
        assert!(config.validate().is_err());
    }
}
