//! Structural inventory of the multiplex: programs from the PAT, their
//! elementary and ECM streams from the PMTs, EMM streams from the CAT.
//!
//! Every change goes to the sink as soon as it is seen. Sections whose
//! checksum equals the last one seen for the same slot are ignored.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::AnalyzerConfig;
use crate::constants::*;
use crate::packet::TsPacket;
use crate::psi::{self, classify_stream, ca_vendor, CaDescriptor, Section, StreamCategory};
use crate::sink::SharedSink;
use crate::tracer::{ChannelHandle, ChannelRegistrar, FlushSchedule, SessionEvent, Tracer};
use crate::types::{CaKind, CaSystemStream, ElementaryStream, MpegProgram, SourceUpdate, TableKind};

/// Section count of the PAT and version of each of its sections.
#[derive(Debug, Default, PartialEq, Eq)]
struct PatLayout {
    section_count: u16,
    versions: BTreeMap<u8, u8>,
}

struct ProgramEntry {
    program: MpegProgram,
    channel: ChannelHandle,
    pmt_checksum: Option<u32>,
}

pub struct PsiTracker {
    sink: SharedSink,
    flush: FlushSchedule,
    packets: u64,
    frame_size: Option<usize>,

    pat_checksums: HashMap<u8, u32>,
    layout: Option<PatLayout>,
    transport_stream_id: Option<u16>,
    programs: BTreeMap<u16, ProgramEntry>,
    streams: BTreeSet<u16>,
    cat_checksum: Option<u32>,
}

impl PsiTracker {
    pub fn new(config: &AnalyzerConfig, sink: SharedSink) -> Self {
        Self {
            sink,
            flush: FlushSchedule::new(config.flush_every_packets, config.flush_interval_ms * NANOS_PER_MILLI),
            packets: 0,
            frame_size: None,
            pat_checksums: HashMap::new(),
            layout: None,
            transport_stream_id: None,
            programs: BTreeMap::new(),
            streams: BTreeSet::new(),
            cat_checksum: None,
        }
    }

    pub fn programs(&self) -> impl Iterator<Item = &MpegProgram> {
        self.programs.values().map(|e| &e.program)
    }

    fn clear(&mut self) {
        self.packets = 0;
        self.frame_size = None;
        self.pat_checksums.clear();
        self.layout = None;
        self.transport_stream_id = None;
        self.programs.clear();
        self.streams.clear();
        self.cat_checksum = None;
    }

    fn flush_packets(&mut self) {
        if self.packets > 0 {
            self.sink.update_source(SourceUpdate::Packets(self.packets));
            self.packets = 0;
        }
    }

    fn warn_on_bad_crc(section: &Section, what: &str) {
        if section.crc_valid() == Some(false) {
            log::warn!("{what} section on pid 0x{:04X} fails its CRC, using it anyway", section.pid);
        }
    }

    fn on_pat(&mut self, section: &Section, channels: &mut dyn ChannelRegistrar) {
        let Some(header) = section.header() else {
            log::trace!("dropping PAT section with bad header");
            return;
        };
        let checksum = section.identity();
        if self.pat_checksums.get(&header.section_number) == Some(&checksum) {
            return;
        }
        Self::warn_on_bad_crc(section, "PAT");
        let pat = match psi::parse_pat(&section.bytes) {
            Ok(p) => p,
            Err(e) => {
                log::trace!("dropping PAT section: {e}");
                return;
            }
        };

        if self.transport_stream_id.is_none() {
            self.transport_stream_id = Some(pat.transport_stream_id());
            self.sink.update_source(SourceUpdate::TransportStreamId(pat.transport_stream_id()));
            self.sink.update_source(SourceUpdate::TableSeen(TableKind::Pat));
        }

        let section_count = header.section_count();
        let same_layout = self.layout.as_ref().is_some_and(|l| l.section_count == section_count);
        if !same_layout {
            if self.layout.is_some() {
                log::debug!("PAT now has {section_count} sections, replacing all programs");
                self.drop_programs(channels);
            }
            self.pat_checksums.clear();
            self.layout = Some(PatLayout { section_count, versions: BTreeMap::new() });
        }
        if let Some(layout) = self.layout.as_mut() {
            if layout.versions.insert(header.section_number, header.version) != Some(header.version) {
                log::debug!("PAT section {} version {}", header.section_number, header.version);
            }
        }
        self.pat_checksums.insert(header.section_number, checksum);

        if let Some(pid) = pat.network_pid {
            self.sink.update_source(SourceUpdate::NetworkPid(pid));
        }
        for entry in &pat.programs {
            self.register_program(entry.program_number, entry.pmt_pid, channels);
        }
        self.sink.update_source(SourceUpdate::Programs(self.programs.len()));
    }

    fn drop_programs(&mut self, channels: &mut dyn ChannelRegistrar) {
        for (_, entry) in std::mem::take(&mut self.programs) {
            channels.unsubscribe(entry.channel);
        }
        self.streams.clear();
        self.sink.clear_programs();
    }

    /// Idempotent: a known program with the same PMT PID is left alone.
    fn register_program(&mut self, program_number: u16, pmt_pid: u16, channels: &mut dyn ChannelRegistrar) {
        match self.programs.get_mut(&program_number) {
            Some(entry) if entry.program.pmt_pid == pmt_pid => {}
            Some(entry) => {
                log::debug!("program {program_number} PMT moved 0x{:04X} -> 0x{pmt_pid:04X}", entry.program.pmt_pid);
                let old = std::mem::replace(&mut entry.channel, channels.subscribe_section(pmt_pid));
                channels.unsubscribe(old);
                entry.program.pmt_pid = pmt_pid;
                entry.pmt_checksum = None;
                self.sink.update_program(&entry.program);
            }
            None => {
                log::debug!("program {program_number} on PMT pid 0x{pmt_pid:04X}");
                let program = MpegProgram::new(program_number, pmt_pid);
                self.sink.add_program(&program);
                let channel = channels.subscribe_section(pmt_pid);
                self.programs.insert(program_number, ProgramEntry { program, channel, pmt_checksum: None });
            }
        }
    }

    fn on_pmt(&mut self, section: &Section) {
        let Some(header) = section.header() else { return };
        let program_number = header.table_id_extension;
        let Some(entry) = self.programs.get_mut(&program_number).filter(|e| e.program.pmt_pid == section.pid) else {
            log::trace!("dropping PMT of unknown program {program_number} on pid 0x{:04X}", section.pid);
            return;
        };
        let checksum = section.identity();
        if entry.pmt_checksum == Some(checksum) {
            return;
        }
        Self::warn_on_bad_crc(section, "PMT");
        let pmt = match psi::parse_pmt(&section.bytes) {
            Ok(p) => p,
            Err(e) => {
                log::trace!("dropping PMT of program {program_number}: {e}");
                return;
            }
        };
        entry.pmt_checksum = Some(checksum);
        entry.program.pcr_pid = Some(pmt.pcr_pid);
        entry.program.pmt_version = Some(pmt.header.version);
        entry.program.free_access = pmt.free_access();
        self.sink.update_program(&entry.program);
        log::debug!("PMT of program {program_number} version {}: {} streams", pmt.header.version, pmt.streams.len());

        for ca in &pmt.program_ca {
            self.sink.add_ca_stream(&ecm(ca, program_number, None));
        }
        for stream in &pmt.streams {
            let (category, description) = classify_stream(stream.stream_type, &stream.descriptors);
            self.sink.add_stream_usage(&ElementaryStream {
                pid: stream.elementary_pid,
                category,
                description: description.to_string(),
                stream_type: Some(stream.stream_type),
                program_number: Some(program_number),
            });
            self.streams.insert(stream.elementary_pid);
            for ca in &stream.ca {
                self.sink.add_ca_stream(&ecm(ca, program_number, Some(stream.elementary_pid)));
            }
        }

        let carries_pcr = pmt.streams.iter().any(|s| s.elementary_pid == pmt.pcr_pid);
        if pmt.pcr_pid != NULL_PID && !carries_pcr {
            self.sink.add_stream_usage(&ElementaryStream {
                pid: pmt.pcr_pid,
                category: StreamCategory::Pcr,
                description: "PCR".to_string(),
                stream_type: None,
                program_number: Some(program_number),
            });
            self.streams.insert(pmt.pcr_pid);
        }

        self.sink.update_source(SourceUpdate::TableSeen(TableKind::Pmt));
        self.sink.update_source(SourceUpdate::Streams(self.streams.len()));
    }

    fn on_cat(&mut self, section: &Section) {
        let checksum = section.identity();
        if self.cat_checksum == Some(checksum) {
            return;
        }
        Self::warn_on_bad_crc(section, "CAT");
        let cat = match psi::parse_cat(&section.bytes) {
            Ok(c) => c,
            Err(e) => {
                log::trace!("dropping CAT section: {e}");
                return;
            }
        };
        self.cat_checksum = Some(checksum);
        for ca in &cat.ca {
            log::debug!("EMM pid 0x{:04X} ({})", ca.ca_pid, ca_vendor(ca.ca_system_id));
            self.sink.add_ca_stream(&CaSystemStream {
                pid: ca.ca_pid,
                kind: CaKind::Emm,
                ca_system_id: ca.ca_system_id,
                vendor: ca_vendor(ca.ca_system_id),
                program_number: None,
                elementary_pid: None,
            });
        }
        self.sink.update_source(SourceUpdate::TableSeen(TableKind::Cat));
    }
}

fn ecm(ca: &CaDescriptor, program_number: u16, elementary_pid: Option<u16>) -> CaSystemStream {
    CaSystemStream {
        pid: ca.ca_pid,
        kind: CaKind::Ecm,
        ca_system_id: ca.ca_system_id,
        vendor: ca_vendor(ca.ca_system_id),
        program_number: Some(program_number),
        elementary_pid,
    }
}

impl Tracer for PsiTracker {
    fn name(&self) -> &'static str {
        "psi"
    }

    fn configure(&mut self, channels: &mut dyn ChannelRegistrar) {
        let _ = channels.subscribe_section(PAT_PID);
        let _ = channels.subscribe_section(CAT_PID);
    }

    fn on_packet(&mut self, packet: &TsPacket<'_>, _channels: &mut dyn ChannelRegistrar) {
        if self.frame_size.is_none() {
            self.frame_size = Some(packet.frame_size());
            self.sink.update_source(SourceUpdate::FrameSize(packet.frame_size()));
        }
        self.packets += 1;
        if self.flush.tick(packet.time_ns) {
            self.flush_packets();
        }
    }

    fn on_section(&mut self, section: &Section, channels: &mut dyn ChannelRegistrar) {
        if section.is_next() {
            log::trace!("ignoring not-yet-applicable table 0x{:02X} on pid 0x{:04X}", section.table_id, section.pid);
            return;
        }
        match (section.pid, section.table_id) {
            (PAT_PID, table_id::PAT) => self.on_pat(section, channels),
            (CAT_PID, table_id::CAT) => self.on_cat(section),
            (_, table_id::PMT) => self.on_pmt(section),
            _ => {}
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started => {
                self.clear();
                self.flush.reset(0);
            }
            SessionEvent::Stopped { time_ns, .. } => {
                self.flush_packets();
                self.flush.reset(time_ns);
                self.clear();
            }
        }
    }
}
