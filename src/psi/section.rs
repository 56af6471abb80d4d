// psi/section.rs
//! Reassembled section view and generic PSI / SI header reader with
//! CRC-32 (MPEG-2) validation.

use bytes::Bytes;
use crc::{Crc, CRC_32_MPEG_2};

use crate::constants::table_id;
use crate::error::TsError;

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// CRC-32/MPEG-2 over `data`.
pub fn crc32(data: &[u8]) -> u32 {
    CRC_MPEG.checksum(data)
}

/// A complete section as delivered on a section channel.
#[derive(Debug, Clone)]
pub struct Section {
    pub pid: u16,
    pub table_id: u8,
    /// Whole section: 3-byte header, body and CRC when present.
    pub bytes: Bytes,
    /// Position of the packet the section started in.
    pub start_position: u64,
    /// Position of the packet that completed the section.
    pub finish_position: u64,
    /// Stream time of the completing packet.
    pub time_ns: u64,
}

impl Section {
    pub fn new(pid: u16, bytes: Bytes, start_position: u64, finish_position: u64, time_ns: u64) -> Result<Self, TsError> {
        if bytes.len() < 3 {
            return Err(TsError::SectionTooShort(bytes.len()));
        }
        let expected = 3 + section_length(&bytes);
        if bytes.len() < expected {
            return Err(TsError::SectionTruncated { expected, actual: bytes.len() });
        }
        Ok(Self {
            pid,
            table_id: bytes[0],
            bytes: bytes.slice(..expected),
            start_position,
            finish_position,
            time_ns,
        })
    }

    pub fn syntax_indicator(&self) -> bool {
        self.bytes[1] & 0x80 != 0
    }

    /// Long-form sections carry a CRC; TOT carries one despite its short form.
    pub fn has_crc(&self) -> bool {
        (self.syntax_indicator() || self.table_id == table_id::TOT) && self.bytes.len() >= 7
    }

    /// Transmitted CRC field, if the section carries one.
    pub fn checksum(&self) -> Option<u32> {
        if !self.has_crc() {
            return None;
        }
        let n = self.bytes.len();
        Some(u32::from_be_bytes([self.bytes[n - 4], self.bytes[n - 3], self.bytes[n - 2], self.bytes[n - 1]]))
    }

    /// Value used to recognise a repeated section: the transmitted CRC, or a
    /// CRC computed over the whole section for CRC-less tables.
    pub fn identity(&self) -> u32 {
        self.checksum().unwrap_or_else(|| crc32(&self.bytes))
    }

    /// `Some(valid)` for sections carrying a CRC, `None` otherwise.
    pub fn crc_valid(&self) -> Option<bool> {
        if !self.has_crc() {
            return None;
        }
        // running the CRC over data + transmitted CRC yields 0 for a valid section
        Some(crc32(&self.bytes) == 0)
    }

    /// Long header, when the section uses the long form.
    pub fn header(&self) -> Option<TableHeader> {
        SectionReader::new(&self.bytes).ok().map(|r| r.header)
    }

    /// Long-form section with `current_next_indicator` cleared: the table
    /// it announces is not applicable yet.
    pub fn is_next(&self) -> bool {
        self.syntax_indicator() && self.header().is_some_and(|h| !h.current_next)
    }
}

fn section_length(bytes: &[u8]) -> usize {
    (((bytes[1] & 0x0F) as usize) << 8) | bytes[2] as usize
}

/// Fields of the long section header plus CRC verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub table_id: u8,
    pub table_id_extension: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub crc_ok: bool,
}

impl TableHeader {
    pub fn section_count(&self) -> u16 {
        self.last_section_number as u16 + 1
    }
}

/// Returned by [`SectionReader::new`].
pub struct SectionReader<'a> {
    pub header: TableHeader,
    pub body: &'a [u8], // bytes between fixed header & CRC
}

impl<'a> SectionReader<'a> {
    /// Validates length and computes the CRC verdict of a long-form section.
    /// A bad CRC does not fail: the untrusted content stays usable.
    pub fn new(section: &'a [u8]) -> Result<Self, TsError> {
        if section.len() < 12 {
            return Err(TsError::SectionTooShort(section.len()));
        }
        let sec_len = section_length(section);
        if sec_len < 9 {
            return Err(TsError::SectionTooShort(sec_len));
        }
        let end = 3 + sec_len;
        if end > section.len() {
            return Err(TsError::SectionTruncated { expected: end, actual: section.len() });
        }

        let crc_pkt = u32::from_be_bytes([section[end - 4], section[end - 3], section[end - 2], section[end - 1]]);
        let crc_ok = crc32(&section[..end - 4]) == crc_pkt;

        Ok(Self {
            header: TableHeader {
                table_id: section[0],
                table_id_extension: u16::from_be_bytes([section[3], section[4]]),
                version: (section[5] & 0x3E) >> 1,
                current_next: section[5] & 0x01 != 0,
                section_number: section[6],
                last_section_number: section[7],
                crc_ok,
            },
            body: &section[8..end - 4],
        })
    }

    pub fn expect_table(self, ids: &[u8]) -> Result<Self, TsError> {
        if ids.contains(&self.header.table_id) {
            Ok(self)
        } else {
            Err(TsError::UnexpectedTable(self.header.table_id))
        }
    }
}
