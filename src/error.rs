//! Error types for packet, section and density decoding.

use thiserror::Error;

/// Decode errors raised by the packet view, the section reader and the
/// density codec. None of them is fatal to an analysis session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TsError {
    /// Buffer does not hold a full 188/204-byte packet.
    #[error("packet too short: {0} bytes")]
    PacketTooShort(usize),

    /// First byte of the packet is not 0x47.
    #[error("invalid sync byte: 0x{0:02X}")]
    InvalidSync(u8),

    /// Adaptation field length runs past the packet end.
    #[error("adaptation field overruns packet (length {0})")]
    AdaptationOverrun(u8),

    /// PCR extension outside 0..300.
    #[error("PCR extension {0} out of range")]
    PcrExtension(u16),

    /// Section header is incomplete.
    #[error("section too short: {0} bytes")]
    SectionTooShort(usize),

    /// `section_length` claims more bytes than were collected.
    #[error("truncated section: expected {expected} bytes, got {actual}")]
    SectionTruncated { expected: usize, actual: usize },

    /// Parser was handed a section of another table.
    #[error("unexpected table id 0x{0:02X}")]
    UnexpectedTable(u8),

    /// Loop inside a table body is cut short.
    #[error("truncated {0} loop")]
    TruncatedLoop(&'static str),

    /// Density buffer ends inside a multi-byte distance.
    #[error("truncated distance: need {needed} bytes, have {available}")]
    DistanceTruncated { needed: usize, available: usize },

    /// Byte cannot start a distance (continuation byte or 0xFE).
    #[error("invalid distance lead byte 0x{0:02X}")]
    DistanceLead(u8),
}
