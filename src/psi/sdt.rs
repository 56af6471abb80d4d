// psi/sdt.rs
//! Service Description Table (actual 0x42 / other 0x46).
use crate::constants::table_id;
use crate::error::TsError;
use super::section::{SectionReader, TableHeader};

#[derive(Debug, Clone)]
pub struct SdtSection {
    pub header:              TableHeader,
    pub original_network_id: u16,
    pub services:            Vec<Service>,
}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service {
    pub service_id: u16,
    pub free_ca:    bool,
}

impl SdtSection {
    pub fn transport_stream_id(&self) -> u16 { self.header.table_id_extension }
}

pub fn parse_sdt(section: &[u8]) -> Result<SdtSection, TsError> {
    let sec = SectionReader::new(section)?
        .expect_table(&[table_id::SDT_ACTUAL, table_id::SDT_OTHER])?;

    let b = sec.body;
    if b.len() < 3 { return Err(TsError::TruncatedLoop("service")); }
    let original_network_id = u16::from_be_bytes([b[0], b[1]]);

    let mut idx = 3;                              // start of service loop
    let mut services = Vec::new();
    while idx + 5 <= b.len() {
        let service_id = u16::from_be_bytes([b[idx], b[idx + 1]]);
        let free_ca    = b[idx + 3] & 0x10 != 0;
        let desc_len   = (((b[idx + 3] & 0x0F) as usize) << 8) | b[idx + 4] as usize;
        idx += 5 + desc_len;
        if idx > b.len() { break; }               // graceful exit on malformed len
        services.push(Service { service_id, free_ca });
    }

    Ok(SdtSection { header: sec.header, original_network_id, services })
}
