// psi/eit.rs
//! EIT header fields (present/following 0x4E / 0x4F, schedule 0x50–0x6F).

use crate::constants::table_id;
use crate::error::TsError;
use super::section::{SectionReader, TableHeader};

#[derive(Debug, Clone)]
pub struct EitSection {
    pub header:              TableHeader,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
}

impl EitSection {
    pub fn service_id(&self) -> u16 { self.header.table_id_extension }

    pub fn is_present_following(&self) -> bool {
        matches!(self.header.table_id, table_id::EIT_ACTUAL_PF | table_id::EIT_OTHER_PF)
    }
}

pub fn is_eit(tid: u8) -> bool {
    (table_id::EIT_ACTUAL_PF..=table_id::EIT_OTHER_SCHED_LAST).contains(&tid)
}

pub fn parse_eit(section: &[u8]) -> Result<EitSection, TsError> {
    let sec = SectionReader::new(section)?;
    if !is_eit(sec.header.table_id) {
        return Err(TsError::UnexpectedTable(sec.header.table_id));
    }
    let b = sec.body;
    if b.len() < 6 { return Err(TsError::TruncatedLoop("event")); }
    Ok(EitSection {
        header: sec.header,
        transport_stream_id: u16::from_be_bytes([b[0], b[1]]),
        original_network_id: u16::from_be_bytes([b[2], b[3]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::long_section;

    #[test]
    fn reads_scoping_fields() {
        let e = parse_eit(&long_section(0x4E, 0x0101, 0, 1, 1, &[0x00, 0x64, 0x00, 0x01, 0x01, 0x4E])).unwrap();
        assert_eq!(e.service_id(), 0x0101);
        assert_eq!(e.transport_stream_id, 100);
        assert_eq!(e.header.section_number, 1);
        assert!(e.is_present_following());
        assert!(!is_eit(0x70));
    }
}
