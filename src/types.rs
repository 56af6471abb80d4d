use std::collections::BTreeSet;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::psi::StreamCategory;
use crate::tr101::ErrorKind;

/// Structural tables whose presence is tracked per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableKind {
    Pat,
    Cat,
    Pmt,
    Nit,
    Bat,
    Sdt,
    Eit,
    Rst,
    Tdt,
    Tot,
}

impl TableKind {
    pub fn from_table_id(tid: u8) -> Option<Self> {
        use crate::constants::table_id as t;
        Some(match tid {
            t::PAT => Self::Pat,
            t::CAT => Self::Cat,
            t::PMT => Self::Pmt,
            t::NIT_ACTUAL | t::NIT_OTHER => Self::Nit,
            t::BAT => Self::Bat,
            t::SDT_ACTUAL | t::SDT_OTHER => Self::Sdt,
            t::EIT_ACTUAL_PF..=t::EIT_OTHER_SCHED_LAST => Self::Eit,
            t::TDT => Self::Tdt,
            t::RST => Self::Rst,
            t::TOT => Self::Tot,
            _ => return None,
        })
    }
}

/// Incremental mutation of the [`StreamSource`] record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceUpdate {
    TransportStreamId(u16),
    NetworkPid(u16),
    FrameSize(usize),
    Scrambled,
    TableSeen(TableKind),
    /// From the NIT of the actual network.
    NetworkId(u16),
    /// From the SDT of the actual multiplex.
    OriginalNetworkId(u16),
    /// Latest TDT/TOT time.
    UtcTime(DateTime<Utc>),
    Packets(u64),
    Programs(usize),
    Streams(usize),
}

/// One ingested multiplex
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_stream_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_network_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_size: Option<usize>,
    pub scrambled: bool,
    pub tables: BTreeSet<TableKind>,
    pub packets: u64,
    pub programs: usize,
    pub streams: usize,
}

impl StreamSource {
    pub fn apply(&mut self, update: SourceUpdate) {
        match update {
            // assigned once, by the first PAT
            SourceUpdate::TransportStreamId(id) => {
                self.transport_stream_id.get_or_insert(id);
            }
            SourceUpdate::NetworkPid(pid) => self.network_pid = Some(pid),
            SourceUpdate::FrameSize(size) => self.frame_size = Some(size),
            SourceUpdate::Scrambled => self.scrambled = true,
            SourceUpdate::TableSeen(kind) => {
                self.tables.insert(kind);
            }
            SourceUpdate::NetworkId(id) => self.network_id = Some(id),
            SourceUpdate::OriginalNetworkId(id) => self.original_network_id = Some(id),
            SourceUpdate::UtcTime(t) => self.utc_time = Some(t),
            SourceUpdate::Packets(n) => self.packets += n,
            SourceUpdate::Programs(n) => self.programs = n,
            SourceUpdate::Streams(n) => self.streams = n,
        }
    }
}

/// Program announced by the PAT and described by its PMT
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MpegProgram {
    pub program_number: u16,
    pub pmt_pid: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmt_version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcr_pid: Option<u16>,
    /// False when any CA descriptor is attached to the program or its streams
    pub free_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth_bps: Option<f64>,
}

impl MpegProgram {
    pub fn new(program_number: u16, pmt_pid: u16) -> Self {
        Self {
            program_number,
            pmt_pid,
            pmt_version: None,
            pcr_pid: None,
            free_access: true,
            bandwidth_bps: None,
        }
    }
}

/// PID usage registered from a PMT (or the PCR role of a PID)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementaryStream {
    pub pid: u16,
    pub category: StreamCategory,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_number: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaKind {
    Ecm,
    Emm,
}

/// ECM or EMM stream of a conditional-access system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaSystemStream {
    pub pid: u16,
    pub kind: CaKind,
    pub ca_system_id: u16,
    pub vendor: &'static str,
    /// Owning program (ECM only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_number: Option<u16>,
    /// Owning elementary stream for stream-level ECMs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elementary_pid: Option<u16>,
}

/// Raw PCR observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PcrSample {
    pub pid: u16,
    /// 42-bit value in 27 MHz ticks
    pub pcr: u64,
    pub position: u64,
    pub time_ns: u64,
}

/// Result of comparing two consecutive PCRs of a PID
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PcrCheck {
    pub pid: u16,
    pub position: u64,
    pub delta_positions: u64,
    /// Interval according to the PCR values
    pub delta_pcr_ns: u64,
    /// Interval according to the byte clock at the average bitrate
    pub delta_tb_ns: u64,
    pub accuracy_ns: i64,
    pub bitrate_bps: f64,
    pub avg_bitrate_bps: f64,
    pub repetition_error: bool,
    pub discontinuity_error: bool,
    pub accuracy_error: bool,
}

/// Conformance event, immutable once emitted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tr290Event {
    pub timestamp: DateTime<Utc>,
    pub time_ns: u64,
    pub kind: ErrorKind,
    pub message: String,
    pub position: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
}

impl Tr290Event {
    pub fn new(kind: ErrorKind, pid: Option<u16>, position: u64, time_ns: u64, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            time_ns,
            kind,
            message: message.into(),
            position,
            pid,
        }
    }
}

/// Handle of an open density batch in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DensityBatchId(pub u64);

/// Flushed batch of encoded inter-arrival distances of one PID
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamDensityBulk {
    pub pid: u16,
    pub batch: DensityBatchId,
    pub start_position: u64,
    pub count: u32,
    pub overflowed: u32,
    /// min/max/avg cover the distances that did not overflow.
    pub min: u64,
    pub max: u64,
    pub avg: f64,
    #[serde(skip)]
    pub encoded: Bytes,
}
