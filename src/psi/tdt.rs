// psi/tdt.rs
//! TDT (0x70, no CRC), TOT (0x73, CRC present) and RST (0x71) short sections.

use chrono::{DateTime, NaiveDate, Utc};

use crate::constants::table_id;
use crate::error::TsError;
use super::section::crc32;

#[derive(Debug, Clone)]
pub struct TimeSection {
    pub table_id: u8,
    /// `None` when the MJD/BCD field does not hold a valid date.
    pub utc_time: Option<DateTime<Utc>>,
    /// TOT only.
    pub crc_ok:   Option<bool>,
}

pub fn parse_tdt_tot(section: &[u8]) -> Result<TimeSection, TsError> {
    if section.len() < 8 { return Err(TsError::SectionTooShort(section.len())); }

    let tid      = section[0];
    let sec_len  = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
    let end      = 3 + sec_len;
    if end > section.len() {
        return Err(TsError::SectionTruncated { expected: end, actual: section.len() });
    }

    let crc_ok = match tid {
        table_id::TDT => None,
        table_id::TOT => {
            if end < 12 { return Err(TsError::SectionTooShort(end)); }
            // TOT has CRC-32 at end
            let crc_pkt = u32::from_be_bytes([section[end-4], section[end-3], section[end-2], section[end-1]]);
            Some(crc32(&section[..end - 4]) == crc_pkt)
        }
        other => return Err(TsError::UnexpectedTable(other)),
    };

    Ok(TimeSection { table_id: tid, utc_time: decode_utc(&section[3..8]), crc_ok })
}

/// 16-bit MJD followed by 24-bit BCD hh:mm:ss.
pub fn decode_utc(field: &[u8]) -> Option<DateTime<Utc>> {
    if field.len() < 5 { return None; }
    let mjd = u16::from_be_bytes([field[0], field[1]]) as i64;
    let bcd = |b: u8| -> Option<u32> {
        let (hi, lo) = ((b >> 4) as u32, (b & 0x0F) as u32);
        (hi < 10 && lo < 10).then_some(hi * 10 + lo)
    };
    // MJD 40587 is 1970-01-01
    let date = NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(mjd - 40587))?;
    let time = date.and_hms_opt(bcd(field[2])?, bcd(field[3])?, bcd(field[4])?)?;
    Some(time.and_utc())
}

/// Running Status Table: number of status entries, used for occurrence
/// bookkeeping only.
pub fn parse_rst(section: &[u8]) -> Result<usize, TsError> {
    if section.len() < 3 { return Err(TsError::SectionTooShort(section.len())); }
    if section[0] != table_id::RST { return Err(TsError::UnexpectedTable(section[0])); }
    let sec_len = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
    if 3 + sec_len > section.len() {
        return Err(TsError::SectionTruncated { expected: 3 + sec_len, actual: section.len() });
    }
    Ok(sec_len / 9)
}
