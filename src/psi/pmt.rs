// psi/pmt.rs
//! Program Map Table (table_id 0x02).
use crate::constants::table_id;
use crate::error::TsError;
use crate::psi::descriptor::{ca_descriptors, CaDescriptor};
use crate::psi::section::{SectionReader, TableHeader};

/// ─────────── PMT ───────────
#[derive(Debug, Clone)]
pub struct PmtSection {
    pub header:     TableHeader,
    pub pcr_pid:    u16,
    /// CA descriptors of the program-info loop.
    pub program_ca: Vec<CaDescriptor>,
    pub streams:    Vec<PmtStream>,
}
#[derive(Debug, Clone)]
pub struct PmtStream {
    pub stream_type:    u8,
    pub elementary_pid: u16,
    pub ca:             Vec<CaDescriptor>,
    /// Raw ES-info descriptor loop.
    pub descriptors:    Vec<u8>,
}

impl PmtSection {
    pub fn program_number(&self) -> u16 { self.header.table_id_extension }

    /// False as soon as any CA descriptor appears at program or stream level.
    pub fn free_access(&self) -> bool {
        self.program_ca.is_empty() && self.streams.iter().all(|s| s.ca.is_empty())
    }
}

pub fn parse_pmt(section: &[u8]) -> Result<PmtSection, TsError> {
    let sec = SectionReader::new(section)?.expect_table(&[table_id::PMT])?;
    let b = sec.body;
    if b.len() < 4 { return Err(TsError::TruncatedLoop("program info")); }

    /* ── fixed part of the body ── */
    let pcr_pid       = (((b[0] & 0x1F) as u16) << 8) | (b[1] as u16);
    let prog_info_len = (((b[2] & 0x0F) as usize) << 8) | (b[3] as usize);
    if 4 + prog_info_len > b.len() { return Err(TsError::TruncatedLoop("program info")); }
    let program_ca    = ca_descriptors(&b[4..4 + prog_info_len]);
    let mut idx       = 4 + prog_info_len;

    /* ── ES loop ── */
    let mut streams = Vec::new();
    while idx + 5 <= b.len() {
        let stype = b[idx];
        let pid   = (((b[idx+1] & 0x1F) as u16) << 8) | (b[idx+2] as u16);
        let eslen = (((b[idx+3] & 0x0F) as usize) << 8) | (b[idx+4] as usize);
        let end   = (idx + 5 + eslen).min(b.len());     // a cut ES-info loop keeps what is there
        let descriptors = &b[idx + 5..end];
        streams.push(PmtStream{
            stream_type: stype,
            elementary_pid: pid,
            ca: ca_descriptors(descriptors),
            descriptors: descriptors.to_vec(),
        });
        idx += 5 + eslen;
    }

    Ok(PmtSection{ header: sec.header, pcr_pid, program_ca, streams })
}
