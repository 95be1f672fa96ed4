use thiserror::Error;

use crate::transport::control::AbortReason;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum J1939Error {
    // Field validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Codec errors
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Decode error: {0}")]
    Decode(String),

    // SPN registration errors
    #[error("SPN {0} already registered")]
    DuplicateSpn(u32),
    #[error("SPN {number} overlaps SPN {existing}")]
    Overlap { number: u32, existing: u32 },
    #[error("Unknown SPN type: {0}")]
    UnknownSpnType(String),

    // Factory errors
    #[error("Unknown PGN: {0:#07X}")]
    UnknownPgn(u32),
    #[error("Unknown title: {0}")]
    UnknownTitle(String),

    // Transport protocol errors
    #[error("Sequence error: expected packet {expected}, got {received}")]
    SessionSequence { expected: u8, received: u8 },
    #[error("Session timed out: {0}")]
    SessionTimeout(String),
    #[error("Session aborted: {0}")]
    SessionAborted(AbortReason),
    #[error("A transport session is already open with this peer")]
    SessionExists,

    // Sender errors
    #[error("Frame name already in use: {0}")]
    NameInUse(String),
    #[error("Frame not defined: {0}")]
    UnknownFrameName(String),
    #[error("Frame does not carry SPNs")]
    NotGenericFrame,
    #[error("Unknown interface: {0}")]
    UnknownInterface(String),
    #[error("Period not defined for frame {0}")]
    PeriodNotDefined(String),
    #[error("No CAN support for interface {0}")]
    NoCanSupport(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, J1939Error>;
