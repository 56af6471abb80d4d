// src/tr101/context.rs
//! Identity of table instances across repetitions.
//!
//! A section is recognised by its checksum: the same checksum again means
//! the same content and only the occurrence bookkeeping moves. A new
//! checksum replaces the instance; contexts of the same table carrying
//! another version are dropped with it.

use std::collections::HashMap;

use crate::constants::table_id;
use crate::psi::{self, Section};

/// Scoping ids of a table beyond its table id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TableScope {
    /// `table_id_extension` (transport stream, program, network or service id).
    pub extension: u16,
    pub transport_stream_id: Option<u16>,
    pub original_network_id: Option<u16>,
}

/// All sections of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableFamily {
    pub table_id: u8,
    pub scope: TableScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub family: TableFamily,
    pub section_number: u8,
}

impl TableKey {
    /// Key of a section; `None` for long-form sections with a broken header.
    pub fn for_section(section: &Section) -> Option<Self> {
        let tid = section.table_id;
        if !section.syntax_indicator() {
            // TDT, TOT, RST and other short-form sections are single instances
            return Some(Self {
                family: TableFamily { table_id: tid, scope: TableScope::default() },
                section_number: 0,
            });
        }
        let header = section.header()?;
        let mut scope = TableScope { extension: header.table_id_extension, ..Default::default() };
        match tid {
            table_id::SDT_ACTUAL | table_id::SDT_OTHER => {
                scope.original_network_id = psi::parse_sdt(&section.bytes).ok().map(|sdt| sdt.original_network_id);
            }
            t if psi::is_eit(t) => {
                if let Ok(eit) = psi::parse_eit(&section.bytes) {
                    scope.transport_stream_id = Some(eit.transport_stream_id);
                    scope.original_network_id = Some(eit.original_network_id);
                }
            }
            _ => {}
        }
        Some(Self { family: TableFamily { table_id: tid, scope }, section_number: header.section_number })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub checksum: u32,
    /// `None` for sections without CRC.
    pub crc_ok: Option<bool>,
    pub version: Option<u8>,
    pub last_time_ns: u64,
    pub last_position: u64,
    pub occurrences: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// First occurrence or replaced content.
    New { crc_ok: Option<bool> },
    /// Same content as last time.
    Repeat,
    /// Same content as last time, which already failed its CRC.
    CachedFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub change: Change,
    /// Stream time of the previous occurrence of this instance.
    pub previous_ns: Option<u64>,
}

/// Contexts grouped by family so a replaced table drops its stale sections
/// without a scan over unrelated tables.
#[derive(Debug, Default)]
pub struct ContextStore {
    families: HashMap<TableFamily, HashMap<u8, Context>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, key: TableKey, section: &Section) -> Observation {
        let checksum = section.identity();
        let version = section.header().map(|h| h.version);
        let family = self.families.entry(key.family).or_default();

        let previous_ns = family.get(&key.section_number).map(|c| c.last_time_ns);
        if let Some(ctx) = family.get_mut(&key.section_number).filter(|c| c.checksum == checksum) {
            ctx.last_time_ns = section.time_ns;
            ctx.last_position = section.start_position;
            ctx.occurrences += 1;
            let change = if ctx.crc_ok == Some(false) { Change::CachedFailure } else { Change::Repeat };
            return Observation { change, previous_ns };
        }

        family.retain(|&n, ctx| n != key.section_number && ctx.version == version);
        let crc_ok = section.crc_valid();
        family.insert(
            key.section_number,
            Context {
                checksum,
                crc_ok,
                version,
                last_time_ns: section.time_ns,
                last_position: section.start_position,
                occurrences: 1,
            },
        );
        Observation { change: Change::New { crc_ok }, previous_ns }
    }

    #[cfg(test)]
    fn family_len(&self, family: &TableFamily) -> usize {
        self.families.get(family).map_or(0, HashMap::len)
    }
}
