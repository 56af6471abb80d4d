// psi/pat.rs
//! Program Association Table (table_id 0x00).
use crate::constants::table_id;
use crate::error::TsError;
use crate::psi::section::{SectionReader, TableHeader};

/// ─────────── PAT ───────────
#[derive(Debug, Clone)]
pub struct PatSection {
    pub header:      TableHeader,
    /// Program number 0 entry, when present.
    pub network_pid: Option<u16>,
    pub programs:    Vec<PatEntry>,
}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid:        u16,
}

impl PatSection {
    pub fn transport_stream_id(&self) -> u16 { self.header.table_id_extension }
}

pub fn parse_pat(section: &[u8]) -> Result<PatSection, TsError> {
    let sec = SectionReader::new(section)?.expect_table(&[table_id::PAT])?;

    let mut network_pid = None;
    let mut programs = Vec::new();
    for entry in sec.body.chunks_exact(4) {
        let pn  = u16::from_be_bytes([entry[0], entry[1]]);
        let pid = (((entry[2] & 0x1F) as u16) << 8) | (entry[3] as u16);
        if pn == 0 { network_pid = Some(pid); } else { programs.push(PatEntry{ program_number:pn, pmt_pid:pid }); }
    }
    Ok(PatSection{ header: sec.header, network_pid, programs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pat;

    #[test]
    fn parses_programs_and_network_pid() {
        let raw = pat(100, 2, &[(0, 0x10), (1, 0x20), (2, 0x30)]);
        let p = parse_pat(&raw).unwrap();
        assert_eq!(p.transport_stream_id(), 100);
        assert_eq!(p.header.version, 2);
        assert_eq!(p.network_pid, Some(0x10));
        assert_eq!(p.programs, vec![
            PatEntry { program_number: 1, pmt_pid: 0x20 },
            PatEntry { program_number: 2, pmt_pid: 0x30 },
        ]);
    }

    #[test]
    fn rejects_other_tables() {
        let raw = crate::test_support::cat(0, &[]);
        assert_eq!(parse_pat(&raw).unwrap_err(), TsError::UnexpectedTable(0x01));
    }
}
