// psi/nit.rs
//! Network Information Table (actual 0x40 / other 0x41) and Bouquet
//! Association Table (0x4A), which shares the NIT layout.
use crate::constants::table_id;
use crate::error::TsError;
use crate::psi::section::{SectionReader, TableHeader};

#[derive(Debug, Clone)]
pub struct NitSection {
    pub header: TableHeader,
    pub transports: Vec<Transport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transport {
    pub ts_id: u16,
    pub orig_net_id: u16,
}

impl NitSection {
    /// network_id for a NIT, bouquet_id for a BAT.
    pub fn network_id(&self) -> u16 { self.header.table_id_extension }
}

pub fn parse_nit(section: &[u8]) -> Result<NitSection, TsError> {
    let sec = SectionReader::new(section)?
        .expect_table(&[table_id::NIT_ACTUAL, table_id::NIT_OTHER, table_id::BAT])?;

    let b = sec.body;
    if b.len() < 2 { return Err(TsError::TruncatedLoop("network descriptors")); }
    let net_desc_len = (((b[0] & 0x0F) as usize) << 8) | b[1] as usize;

    let mut idx = 2 + net_desc_len;   // skip network-descriptors
    if idx + 2 > b.len() { return Err(TsError::TruncatedLoop("network descriptors")); }
    idx += 2;                         // transport_stream_loop_length

    let mut transports = Vec::new();
    while idx + 6 <= b.len() {
        let ts_id       = u16::from_be_bytes([b[idx], b[idx + 1]]);
        let orig_net_id = u16::from_be_bytes([b[idx + 2], b[idx + 3]]);
        let desc_len    = (((b[idx + 4] & 0x0F) as usize) << 8) | b[idx + 5] as usize;
        idx += 6 + desc_len;
        if idx > b.len() { break; }   // graceful exit on malformed len
        transports.push(Transport { ts_id, orig_net_id });
    }

    Ok(NitSection { header: sec.header, transports })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::long_section;

    #[test]
    fn parses_transport_loop() {
        let body = [0xF0, 0x00, 0xF0, 0x0C, 0x00, 0x64, 0x00, 0x01, 0xF0, 0x00, 0x00, 0x65, 0x00, 0x01, 0xF0, 0x00];
        let n = parse_nit(&long_section(0x40, 0x3001, 0, 0, 0, &body)).unwrap();
        assert_eq!(n.network_id(), 0x3001);
        assert_eq!(n.transports, vec![
            Transport { ts_id: 100, orig_net_id: 1 },
            Transport { ts_id: 101, orig_net_id: 1 },
        ]);
    }
}
