// src/tr101/tables.rs
//! Table repetition, CRC and cross-reference checks (TR 101 290 1.3, 1.5,
//! 1.6, 2.2, 2.6 and the priority 3 SI indicators).
//!
//! The detector parses PAT, CAT and PMT itself so it does not depend on
//! another tracker having run first.

use std::collections::{BTreeMap, HashMap};

use crate::config::{AnalyzerConfig, TimingPolicy};
use crate::constants::*;
use crate::packet::TsPacket;
use crate::psi::{self, Section};
use crate::sink::SharedSink;
use crate::tr101::context::{Change, ContextStore, Observation, TableKey};
use crate::tr101::{ErrorKind, Latch};
use crate::tracer::{ChannelHandle, ChannelRegistrar, SessionEvent, Tracer};
use crate::types::{SourceUpdate, TableKind, Tr290Event};

/// Entries looked at per sweep, per list.
const SWEEP_BUDGET: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotId {
    Pat,
    Cat,
    Pmt { program: u16 },
    NitActual,
    SdtActual,
    EitPresentFollowing { section: u8 },
    Tdt,
}

/// Maximum-interval bookkeeping of one table.
#[derive(Debug)]
struct TimingSlot {
    id: SlotId,
    pid: u16,
    kind: ErrorKind,
    max_ns: u64,
    /// `None` until the first occurrence; measured from session start then.
    last_ns: Option<u64>,
    active: bool,
    latch: Latch,
}

impl TimingSlot {
    fn new(id: SlotId, pid: u16, kind: ErrorKind, max_ms: u64) -> Self {
        Self { id, pid, kind, max_ns: max_ms * NANOS_PER_MILLI, last_ns: None, active: true, latch: Latch::Armed }
    }

    fn overdue(&self, now: u64, origin: u64) -> Option<u64> {
        let elapsed = now.saturating_sub(self.last_ns.unwrap_or(origin));
        (self.active && elapsed > self.max_ns).then_some(elapsed)
    }
}

struct PmtChannel {
    pid: u16,
    handle: ChannelHandle,
}

fn emit(sink: &SharedSink, kind: ErrorKind, pid: u16, position: u64, time_ns: u64, message: String) {
    log::debug!("{kind:?} pid 0x{pid:04X} at {position}: {message}");
    sink.add_error_event(&Tr290Event::new(kind, Some(pid), position, time_ns, message));
}

pub struct TableTimingDetector {
    sink: SharedSink,
    timing: TimingPolicy,
    dvb_si_checks: bool,
    sweep_every: u64,

    contexts: ContextStore,
    min_latches: HashMap<TableKey, Latch>,
    cached_crc_failures: u64,

    slots: Vec<TimingSlot>,
    slot_cursor: usize,
    since_sweep: u64,
    origin_ns: Option<u64>,

    pat_version: Option<u8>,
    pat_sections: BTreeMap<u8, Vec<psi::PatEntry>>,
    pmt_channels: HashMap<u16, PmtChannel>,
    pmt_pid_refs: Vec<u16>,

    referenced: Vec<bool>,
    first_seen_ns: Vec<Option<u64>>,
    unreferenced: Vec<Latch>,

    es_by_program: HashMap<u16, Vec<u16>>,
    /// Union of `es_by_program`, walked by the sweep.
    mapped_es: Vec<u16>,
    es_cursor: usize,
    last_seen_ns: Vec<Option<u64>>,
    es_missing: Vec<Latch>,

    scrambled: Vec<bool>,
    scramble_latch: Vec<Latch>,
    any_scrambled: bool,
}

impl TableTimingDetector {
    pub fn new(config: &AnalyzerConfig, sink: SharedSink) -> Self {
        Self {
            sink,
            timing: config.timing.clone(),
            dvb_si_checks: config.dvb_si_checks,
            sweep_every: config.sweep_every_packets.max(1),
            contexts: ContextStore::new(),
            min_latches: HashMap::new(),
            cached_crc_failures: 0,
            slots: Vec::new(),
            slot_cursor: 0,
            since_sweep: 0,
            origin_ns: None,
            pat_version: None,
            pat_sections: BTreeMap::new(),
            pmt_channels: HashMap::new(),
            pmt_pid_refs: vec![0; PID_COUNT],
            referenced: vec![false; PID_COUNT],
            first_seen_ns: vec![None; PID_COUNT],
            unreferenced: vec![Latch::Armed; PID_COUNT],
            es_by_program: HashMap::new(),
            mapped_es: Vec::new(),
            es_cursor: 0,
            last_seen_ns: vec![None; PID_COUNT],
            es_missing: vec![Latch::Armed; PID_COUNT],
            scrambled: vec![false; PID_COUNT],
            scramble_latch: vec![Latch::Armed; PID_COUNT],
            any_scrambled: false,
        }
    }

    /// Sections that repeated a content already known to fail its CRC.
    pub fn cached_crc_failures(&self) -> u64 {
        self.cached_crc_failures
    }

    fn reset(&mut self) {
        let fresh = Self::new(
            &AnalyzerConfig {
                timing: self.timing.clone(),
                dvb_si_checks: self.dvb_si_checks,
                sweep_every_packets: self.sweep_every,
                ..AnalyzerConfig::default()
            },
            self.sink.clone(),
        );
        *self = fresh;
    }

    fn is_pmt_pid(&self, pid: u16) -> bool {
        self.pmt_pid_refs[pid as usize] > 0
    }

    fn reference(&mut self, pid: u16) {
        let pid = (pid & 0x1FFF) as usize;
        self.referenced[pid] = true;
        self.unreferenced[pid].disarm();
    }

    fn slot_index(&self, id: SlotId) -> Option<usize> {
        self.slots.iter().position(|s| s.id == id)
    }

    /// Arrival of a table: reports an overrun the sweep has not caught yet.
    fn occurrence(&mut self, id: SlotId, section: &Section) {
        let Some(i) = self.slot_index(id) else { return };
        let now = section.time_ns;
        let origin = self.origin_ns.unwrap_or(now);
        let slot = &mut self.slots[i];
        if let Some(elapsed) = slot.overdue(now, origin) {
            if slot.latch.fire() {
                let message = format!("{:?} interval {} ms exceeds {} ms", slot.id, elapsed / NANOS_PER_MILLI, slot.max_ns / NANOS_PER_MILLI);
                emit(&self.sink, slot.kind, slot.pid, section.start_position, now, message);
            }
        }
        slot.latch.rearm();
        slot.last_ns = Some(now);
    }

    fn check_min_interval(&mut self, key: TableKey, obs: Observation, kind: ErrorKind, section: &Section) {
        let Some(previous) = obs.previous_ns else { return };
        let gap = section.time_ns.saturating_sub(previous);
        let latch = self.min_latches.entry(key).or_default();
        if gap >= self.timing.si_min_ms * NANOS_PER_MILLI {
            latch.rearm();
        } else if latch.fire() {
            let message = format!("table 0x{:02X} section {} repeated after {} us", key.family.table_id, key.section_number, gap / 1_000);
            emit(&self.sink, kind, section.pid, section.start_position, section.time_ns, message);
        }
    }

    /// `_other` tables are only judged when their content changes.
    fn check_other_interval(&self, obs: Observation, kind: ErrorKind, section: &Section) {
        if !matches!(obs.change, Change::New { .. }) {
            return;
        }
        let Some(previous) = obs.previous_ns else { return };
        let gap = section.time_ns.saturating_sub(previous);
        if gap > self.timing.other_max_ms * NANOS_PER_MILLI {
            let message = format!("table 0x{:02X} interval {} ms exceeds {} ms", section.table_id, gap / NANOS_PER_MILLI, self.timing.other_max_ms);
            emit(&self.sink, kind, section.pid, section.start_position, section.time_ns, message);
        }
    }

    fn on_pat(&mut self, section: &Section, channels: &mut dyn ChannelRegistrar) {
        let pat = match psi::parse_pat(&section.bytes) {
            Ok(p) => p,
            Err(e) => {
                log::trace!("dropping PAT section: {e}");
                return;
            }
        };
        if self.pat_version != Some(pat.header.version) {
            self.pat_sections.clear();
            self.pat_version = Some(pat.header.version);
        }
        if let Some(pid) = pat.network_pid {
            self.reference(pid);
        }
        self.pat_sections.insert(pat.header.section_number, pat.programs);
        self.sync_programs(section.time_ns, channels);
    }

    /// Aligns PMT subscriptions and timing slots with the programs of the
    /// current PAT sections.
    fn sync_programs(&mut self, now: u64, channels: &mut dyn ChannelRegistrar) {
        let wanted: HashMap<u16, u16> = self
            .pat_sections
            .values()
            .flatten()
            .map(|e| (e.program_number, e.pmt_pid))
            .collect();

        let stale: Vec<u16> = self
            .pmt_channels
            .iter()
            .filter(|(program, ch)| wanted.get(*program) != Some(&ch.pid))
            .map(|(program, _)| *program)
            .collect();
        for program in stale {
            if let Some(ch) = self.pmt_channels.remove(&program) {
                self.pmt_pid_refs[ch.pid as usize] -= 1;
                channels.unsubscribe(ch.handle);
            }
            self.slots.retain(|s| s.id != SlotId::Pmt { program });
            if self.es_by_program.remove(&program).is_some() {
                self.remap_es();
            }
        }

        for (program, pid) in wanted {
            if self.pmt_channels.contains_key(&program) {
                continue;
            }
            let handle = channels.subscribe_section(pid);
            self.pmt_channels.insert(program, PmtChannel { pid, handle });
            self.pmt_pid_refs[pid as usize] += 1;
            self.reference(pid);
            let mut slot = TimingSlot::new(SlotId::Pmt { program }, pid, ErrorKind::PmtInterval, self.timing.pmt_max_ms);
            slot.last_ns = Some(now);
            self.slots.push(slot);
        }
    }

    fn on_pmt(&mut self, section: &Section, change: Change) {
        let Some(header) = section.header() else { return };
        let program = header.table_id_extension;
        if !self.pmt_channels.get(&program).is_some_and(|ch| ch.pid == section.pid) {
            return;
        }
        self.occurrence(SlotId::Pmt { program }, section);
        if !matches!(change, Change::New { .. }) {
            return;
        }
        let pmt = match psi::parse_pmt(&section.bytes) {
            Ok(p) => p,
            Err(e) => {
                log::trace!("dropping PMT section of program {program}: {e}");
                return;
            }
        };
        self.reference(pmt.pcr_pid);
        for ca in &pmt.program_ca {
            self.reference(ca.ca_pid);
        }
        for stream in &pmt.streams {
            self.reference(stream.elementary_pid);
            for ca in &stream.ca {
                self.reference(ca.ca_pid);
            }
        }
        let pids = pmt.streams.iter().map(|s| s.elementary_pid).collect();
        self.es_by_program.insert(program, pids);
        self.remap_es();
    }

    /// Rebuilds the swept PID list; streams no longer mapped by any PMT
    /// lose their absence state.
    fn remap_es(&mut self) {
        let mut mapped: Vec<u16> = self.es_by_program.values().flatten().copied().collect();
        mapped.sort_unstable();
        mapped.dedup();
        for &pid in &self.mapped_es {
            if mapped.binary_search(&pid).is_err() {
                self.es_missing[pid as usize].arm();
                self.last_seen_ns[pid as usize] = None;
            }
        }
        self.mapped_es = mapped;
        self.es_cursor = 0;
    }

    fn on_cat(&mut self, section: &Section, change: Change) {
        self.occurrence(SlotId::Cat, section);
        if !matches!(change, Change::New { .. }) {
            return;
        }
        match psi::parse_cat(&section.bytes) {
            Ok(cat) => {
                for ca in &cat.ca {
                    self.reference(ca.ca_pid);
                }
            }
            Err(e) => log::trace!("dropping CAT section: {e}"),
        }
    }

    fn on_si(&mut self, section: &Section, key: TableKey, obs: Observation) {
        let tid = section.table_id;
        if let (Change::New { .. }, Some(kind)) = (obs.change, TableKind::from_table_id(tid)) {
            self.sink.update_source(SourceUpdate::TableSeen(kind));
            self.sink.add_private_section(kind, section.pid, section.start_position, &section.bytes);
            self.record_source_facts(section);
        }
        if !self.dvb_si_checks {
            return;
        }

        use crate::constants::table_id as t;
        match tid {
            t::NIT_ACTUAL => {
                self.occurrence(SlotId::NitActual, section);
                self.check_min_interval(key, obs, ErrorKind::NitActualInterval, section);
            }
            t::NIT_OTHER => self.check_other_interval(obs, ErrorKind::NitOtherInterval, section),
            t::SDT_ACTUAL => {
                self.occurrence(SlotId::SdtActual, section);
                self.check_min_interval(key, obs, ErrorKind::SdtActualInterval, section);
            }
            t::SDT_OTHER => self.check_other_interval(obs, ErrorKind::SdtOtherInterval, section),
            t::EIT_ACTUAL_PF => {
                if key.section_number <= 1 {
                    self.occurrence(SlotId::EitPresentFollowing { section: key.section_number }, section);
                }
                self.check_min_interval(key, obs, ErrorKind::EitActualInterval, section);
            }
            t::EIT_ACTUAL_SCHED_FIRST..=t::EIT_ACTUAL_SCHED_LAST => {
                self.check_min_interval(key, obs, ErrorKind::EitActualInterval, section)
            }
            t::EIT_OTHER_PF | t::EIT_OTHER_SCHED_FIRST..=t::EIT_OTHER_SCHED_LAST => {
                self.check_other_interval(obs, ErrorKind::EitOtherInterval, section)
            }
            t::RST => self.check_min_interval(key, obs, ErrorKind::RstInterval, section),
            t::TDT => {
                self.occurrence(SlotId::Tdt, section);
                self.check_min_interval(key, obs, ErrorKind::TdtInterval, section);
            }
            _ => {}
        }
    }

    /// Identity and clock of the multiplex as announced by its own SI.
    fn record_source_facts(&self, section: &Section) {
        use crate::constants::table_id as t;
        let update = match section.table_id {
            t::NIT_ACTUAL => psi::parse_nit(&section.bytes).map(|nit| Some(SourceUpdate::NetworkId(nit.network_id()))),
            t::SDT_ACTUAL => psi::parse_sdt(&section.bytes).map(|sdt| Some(SourceUpdate::OriginalNetworkId(sdt.original_network_id))),
            t::TDT | t::TOT => psi::parse_tdt_tot(&section.bytes).map(|time| time.utc_time.map(SourceUpdate::UtcTime)),
            t::RST => psi::parse_rst(&section.bytes).map(|entries| {
                log::trace!("RST with {entries} status entries");
                None
            }),
            _ => Ok(None),
        };
        match update {
            Ok(Some(update)) => self.sink.update_source(update),
            Ok(None) => {}
            Err(e) => log::trace!("undecodable table 0x{:02X} on pid 0x{:04X}: {e}", section.table_id, section.pid),
        }
    }

    fn track_scrambling(&mut self, packet: &TsPacket<'_>) {
        let pid = packet.pid;
        let scrambled = packet.is_scrambled();
        if self.scrambled[pid as usize] != scrambled {
            self.scrambled[pid as usize] = scrambled;
            self.sink.update_stream_scrambling(pid, scrambled);
        }
        if scrambled && !self.any_scrambled {
            self.any_scrambled = true;
            self.sink.update_source(SourceUpdate::Scrambled);
            if let Some(i) = self.slot_index(SlotId::Cat) {
                let slot = &mut self.slots[i];
                slot.active = true;
                slot.last_ns.get_or_insert(packet.time_ns);
            }
        }

        let kind = if pid == PAT_PID {
            ErrorKind::PatScrambled
        } else if self.is_pmt_pid(pid) {
            ErrorKind::PmtScrambled
        } else {
            return;
        };
        let latch = &mut self.scramble_latch[pid as usize];
        if !scrambled {
            latch.rearm();
        } else if latch.fire() {
            emit(&self.sink, kind, pid, packet.position, packet.time_ns, "table PID carries scrambled packets".to_string());
        }
    }

    fn check_unreferenced(&mut self, packet: &TsPacket<'_>) {
        let pid = packet.pid as usize;
        if packet.pid <= LAST_RESERVED_PID || packet.pid == NULL_PID || self.referenced[pid] || !packet.has_payload() {
            return;
        }
        let first = *self.first_seen_ns[pid].get_or_insert(packet.time_ns);
        if packet.time_ns.saturating_sub(first) > self.timing.unreferenced_pid_ms * NANOS_PER_MILLI && self.unreferenced[pid].fire() {
            let message = format!("no PAT/PMT/CAT reference after {} ms", self.timing.unreferenced_pid_ms);
            emit(&self.sink, ErrorKind::UnreferencedPid, packet.pid, packet.position, packet.time_ns, message);
        }
    }

    /// Absence sweep: a bounded slice of the timing slots and of the mapped
    /// elementary streams, continuing where the previous sweep stopped.
    fn sweep(&mut self, now: u64, position: u64) {
        let origin = self.origin_ns.unwrap_or(now);
        for _ in 0..self.slots.len().min(SWEEP_BUDGET) {
            self.slot_cursor %= self.slots.len();
            let slot = &mut self.slots[self.slot_cursor];
            self.slot_cursor += 1;
            if let Some(elapsed) = slot.overdue(now, origin) {
                if slot.latch.fire() {
                    let message = format!("no {:?} for {} ms", slot.id, elapsed / NANOS_PER_MILLI);
                    emit(&self.sink, slot.kind, slot.pid, position, now, message);
                }
            }
        }

        let es_limit = self.timing.es_missing_ms * NANOS_PER_MILLI;
        for _ in 0..self.mapped_es.len().min(SWEEP_BUDGET) {
            self.es_cursor %= self.mapped_es.len();
            let pid = self.mapped_es[self.es_cursor];
            self.es_cursor += 1;
            let Some(last) = self.last_seen_ns[pid as usize] else { continue };
            let elapsed = now.saturating_sub(last);
            if elapsed > es_limit && self.es_missing[pid as usize].fire() {
                emit(&self.sink, ErrorKind::PidMissing, pid, position, now, format!("elementary stream unseen for {} ms", elapsed / NANOS_PER_MILLI));
            }
        }
    }
}

impl Tracer for TableTimingDetector {
    fn name(&self) -> &'static str {
        "tables"
    }

    fn configure(&mut self, channels: &mut dyn ChannelRegistrar) {
        for pid in [PAT_PID, CAT_PID, NIT_PID, SDT_PID, EIT_PID, RST_PID, TDT_PID] {
            // session-long subscriptions, released by the source on stop
            let _ = channels.subscribe_section(pid);
        }

        let t = &self.timing;
        let mut slots = vec![TimingSlot::new(SlotId::Pat, PAT_PID, ErrorKind::PatInterval, t.pat_max_ms)];
        let mut cat = TimingSlot::new(SlotId::Cat, CAT_PID, ErrorKind::CatInterval, t.cat_max_ms);
        cat.active = false;
        slots.push(cat);
        if self.dvb_si_checks {
            slots.extend([
                TimingSlot::new(SlotId::NitActual, NIT_PID, ErrorKind::NitActualInterval, t.nit_actual_max_ms),
                TimingSlot::new(SlotId::SdtActual, SDT_PID, ErrorKind::SdtActualInterval, t.sdt_actual_max_ms),
                TimingSlot::new(SlotId::EitPresentFollowing { section: 0 }, EIT_PID, ErrorKind::EitActualInterval, t.eit_actual_max_ms),
                TimingSlot::new(SlotId::EitPresentFollowing { section: 1 }, EIT_PID, ErrorKind::EitActualInterval, t.eit_actual_max_ms),
                TimingSlot::new(SlotId::Tdt, TDT_PID, ErrorKind::TdtInterval, t.tdt_max_ms),
            ]);
        }
        self.slots = slots;
    }

    fn on_packet(&mut self, packet: &TsPacket<'_>, _channels: &mut dyn ChannelRegistrar) {
        self.origin_ns.get_or_insert(packet.time_ns);
        if packet.pid != NULL_PID {
            if packet.has_payload() {
                self.track_scrambling(packet);
            }
            self.last_seen_ns[packet.pid as usize] = Some(packet.time_ns);
            self.es_missing[packet.pid as usize].rearm();
            self.check_unreferenced(packet);
        }

        self.since_sweep += 1;
        if self.since_sweep >= self.sweep_every {
            self.since_sweep = 0;
            self.sweep(packet.time_ns, packet.position);
        }
    }

    fn on_section(&mut self, section: &Section, channels: &mut dyn ChannelRegistrar) {
        if section.is_next() {
            return;
        }
        let Some(key) = TableKey::for_section(section) else {
            log::trace!("dropping section 0x{:02X} on pid 0x{:04X}: bad header", section.table_id, section.pid);
            return;
        };
        let obs = self.contexts.observe(key, section);
        match obs.change {
            Change::New { crc_ok: Some(false) } => {
                let message = format!("CRC mismatch in table 0x{:02X} section {}", section.table_id, key.section_number);
                emit(&self.sink, ErrorKind::CrcError, section.pid, section.start_position, section.time_ns, message);
            }
            Change::CachedFailure => self.cached_crc_failures += 1,
            _ => {}
        }

        match (section.pid, section.table_id) {
            (PAT_PID, table_id::PAT) => {
                self.occurrence(SlotId::Pat, section);
                if matches!(obs.change, Change::New { .. }) {
                    self.on_pat(section, channels);
                }
            }
            (CAT_PID, table_id::CAT) => self.on_cat(section, obs.change),
            (pid, table_id::PMT) if self.is_pmt_pid(pid) => self.on_pmt(section, obs.change),
            (NIT_PID..=TDT_PID, _) => self.on_si(section, key, obs),
            _ => {}
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started => self.reset(),
            SessionEvent::Stopped { position, time_ns } => {
                log::debug!("table detector stopped at {position} ({} ms)", time_ns / NANOS_PER_MILLI);
                self.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemorySink;
    use crate::test_support::{as_next, cat, ca_descriptor, long_section, memory_sink, packet, pat, pmt, section};
    use crate::tracer::SectionChannels;
    use std::sync::Arc;

    const MS: u64 = NANOS_PER_MILLI;

    struct Rig {
        mem: Arc<MemorySink>,
        det: TableTimingDetector,
        channels: SectionChannels,
        position: u64,
    }

    impl Rig {
        fn new(dvb_si_checks: bool) -> Self {
            let (mem, sink) = memory_sink();
            let config = AnalyzerConfig { dvb_si_checks, sweep_every_packets: 1, ..AnalyzerConfig::default() };
            let mut det = TableTimingDetector::new(&config, sink);
            let mut channels = SectionChannels::new();
            det.on_session_event(SessionEvent::Started);
            det.configure(&mut channels);
            Self { mem, det, channels, position: 0 }
        }

        fn packet(&mut self, raw: &[u8; TS_PACKET_SIZE], time_ns: u64) {
            let pkt = TsPacket::parse(raw, self.position, time_ns).unwrap();
            self.position += 1;
            self.det.on_packet(&pkt, &mut self.channels);
        }

        fn section(&mut self, pid: u16, raw: &[u8], time_ns: u64) {
            let s = section(pid, raw, self.position, time_ns);
            self.position += 1;
            self.det.on_section(&s, &mut self.channels);
        }

        fn kinds(&self) -> Vec<ErrorKind> {
            self.mem.events().iter().map(|e| e.kind).collect()
        }

        fn count(&self, kind: ErrorKind) -> usize {
            self.mem.events().iter().filter(|e| e.kind == kind).count()
        }
    }

    fn eit_pf(section_number: u8) -> Vec<u8> {
        long_section(0x4E, 0x0101, 0, section_number, 1, &[0x00, 0x64, 0x00, 0x01, 0x01, 0x4E])
    }

    const TDT: [u8; 8] = [0x70, 0x70, 0x05, 0xC0, 0x79, 0x12, 0x45, 0x00];

    #[test]
    fn pat_absence_is_reported_once_per_episode() {
        let mut rig = Rig::new(false);
        rig.packet(&packet(PAT_PID, 0, 0), 0);
        rig.section(PAT_PID, &pat(1, 0, &[]), 0);
        rig.packet(&packet(0x1FFF, 0, 0), 400 * MS);
        assert!(rig.kinds().is_empty());
        rig.packet(&packet(0x1FFF, 0, 0), 600 * MS);
        rig.packet(&packet(0x1FFF, 0, 0), 900 * MS);
        assert_eq!(rig.kinds(), vec![ErrorKind::PatInterval]);

        // late arrival does not repeat the report; the next overrun does
        rig.section(PAT_PID, &pat(1, 0, &[]), 1_000 * MS);
        assert_eq!(rig.kinds().len(), 1);
        rig.packet(&packet(0x1FFF, 0, 0), 1_600 * MS);
        assert_eq!(rig.kinds(), vec![ErrorKind::PatInterval, ErrorKind::PatInterval]);
    }

    #[test]
    fn crc_error_once_per_replacement() {
        let mut rig = Rig::new(false);
        let mut bad = pat(1, 0, &[(1, 0x100)]);
        let n = bad.len();
        bad[n - 1] ^= 0xFF;
        rig.section(PAT_PID, &bad, 0);
        rig.section(PAT_PID, &bad, 100 * MS);
        rig.section(PAT_PID, &bad, 200 * MS);
        assert_eq!(rig.kinds(), vec![ErrorKind::CrcError]);
        assert_eq!(rig.det.cached_crc_failures(), 2);

        let mut bad_v1 = pat(1, 1, &[(1, 0x100)]);
        let n = bad_v1.len();
        bad_v1[n - 2] ^= 0xFF;
        rig.section(PAT_PID, &bad_v1, 300 * MS);
        assert_eq!(rig.kinds(), vec![ErrorKind::CrcError, ErrorKind::CrcError]);
    }

    #[test]
    fn pat_subscribes_pmt_and_times_it() {
        let mut rig = Rig::new(false);
        rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), 0);
        assert!(rig.channels.is_subscribed(0x100));
        rig.section(0x100, &pmt(1, 0, 0x101, &[], &[(0x1B, 0x101, &[])]), 10 * MS);
        rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), 400 * MS);
        rig.packet(&packet(0x1FFF, 0, 0), 600 * MS);
        assert_eq!(rig.kinds(), vec![ErrorKind::PmtInterval]);

        // program moves away: subscription and slot follow
        rig.section(PAT_PID, &pat(1, 1, &[(1, 0x200)]), 700 * MS);
        assert!(!rig.channels.is_subscribed(0x100));
        assert!(rig.channels.is_subscribed(0x200));
    }

    #[test]
    fn next_pat_is_not_applied() {
        let mut rig = Rig::new(false);
        rig.section(PAT_PID, &as_next(pat(1, 0, &[(1, 0x100)])), 0);
        assert!(!rig.channels.is_subscribed(0x100));
        rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), 10 * MS);
        assert!(rig.channels.is_subscribed(0x100));
    }

    #[test]
    fn unreferenced_pid_after_grace_period() {
        let mut rig = Rig::new(false);
        rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), 0);
        rig.section(0x100, &pmt(1, 0, 0x101, &[], &[(0x1B, 0x101, &[])]), 0);
        for t in [0, 300, 600, 900] {
            rig.packet(&packet(0x101, 0, 0), t * MS);
            rig.packet(&packet(0x300, 0, 0), t * MS);
            rig.packet(&packet(0x15, 0, 0), t * MS);
            rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), t * MS);
            rig.section(0x100, &pmt(1, 0, 0x101, &[], &[(0x1B, 0x101, &[])]), t * MS);
        }
        let events = rig.mem.events();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].kind, events[0].pid), (ErrorKind::UnreferencedPid, Some(0x300)));
    }

    #[test]
    fn emm_pid_from_cat_is_referenced() {
        let mut rig = Rig::new(false);
        rig.section(CAT_PID, &cat(0, &ca_descriptor(0x0500, 0x400)), 0);
        rig.packet(&packet(0x400, 0, 0), 0);
        rig.packet(&packet(0x400, 1, 0), 800 * MS);
        assert!(!rig.kinds().contains(&ErrorKind::UnreferencedPid));
    }

    #[test]
    fn scrambled_pmt_pid_and_cat_absence() {
        let mut rig = Rig::new(false);
        rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), 0);
        let mut scrambled = packet(0x100, 0, 0);
        scrambled[3] |= 0x80;
        rig.packet(&scrambled, 10 * MS);
        rig.packet(&scrambled, 20 * MS);
        assert_eq!(rig.kinds(), vec![ErrorKind::PmtScrambled]);
        assert!(rig.mem.source().scrambled);

        rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), 300 * MS);
        rig.section(0x100, &pmt(1, 0, 0x101, &[], &[]), 300 * MS);
        rig.packet(&packet(0x1FFF, 0, 0), 505 * MS);
        assert!(!rig.kinds().contains(&ErrorKind::CatInterval));
        rig.packet(&packet(0x1FFF, 0, 0), 530 * MS);
        assert!(rig.kinds().contains(&ErrorKind::CatInterval));
    }

    #[test]
    fn cat_is_not_expected_in_the_clear() {
        let mut rig = Rig::new(false);
        for t in (0..3000).step_by(200) {
            rig.section(PAT_PID, &pat(1, 0, &[]), t * MS);
            rig.packet(&packet(0x1FFF, 0, 0), t * MS);
        }
        assert!(rig.kinds().is_empty());
    }

    #[test]
    fn sdt_actual_repeated_too_fast() {
        let mut rig = Rig::new(true);
        let sdt = long_section(0x42, 1, 0, 0, 0, &[0x00, 0x01, 0xFF]);
        rig.section(SDT_PID, &sdt, 0);
        rig.section(SDT_PID, &sdt, 10 * MS);
        rig.section(SDT_PID, &sdt, 20 * MS);
        assert_eq!(rig.kinds(), vec![ErrorKind::SdtActualInterval]);
        assert_eq!(rig.mem.private_sections().len(), 1);
    }

    #[test]
    fn actual_si_describes_the_source() {
        let mut rig = Rig::new(true);
        rig.section(NIT_PID, &long_section(0x40, 0x3001, 0, 0, 0, &[0xF0, 0x00, 0xF0, 0x00]), 0);
        rig.section(SDT_PID, &long_section(0x42, 100, 0, 0, 0, &[0x00, 0x01, 0xFF]), 0);
        rig.section(TDT_PID, &[0x70, 0x70, 0x05, 0xC0, 0x79, 0x12, 0x45, 0x00], 0);
        let source = rig.mem.source();
        assert_eq!((source.network_id, source.original_network_id), (Some(0x3001), Some(1)));
        assert_eq!(source.utc_time.map(|t| t.to_rfc3339()), Some("1993-10-13T12:45:00+00:00".to_string()));
    }

    #[test]
    fn eit_present_following_sections_are_timed_separately() {
        let mut rig = Rig::new(true);
        rig.packet(&packet(0x1FFF, 0, 0), 0);
        rig.section(EIT_PID, &eit_pf(0), 0);
        rig.section(EIT_PID, &eit_pf(1), 0);
        rig.section(EIT_PID, &eit_pf(0), 1_500 * MS);
        rig.packet(&packet(0x1FFF, 0, 0), 1_900 * MS);
        assert_eq!(rig.count(ErrorKind::EitActualInterval), 0);

        rig.packet(&packet(0x1FFF, 0, 0), 2_100 * MS);
        let late: Vec<_> = rig.mem.events().into_iter().filter(|e| e.kind == ErrorKind::EitActualInterval).collect();
        assert_eq!(late.len(), 1);
        assert!(late[0].message.contains("section: 1"));

        rig.packet(&packet(0x1FFF, 0, 0), 3_600 * MS);
        assert_eq!(rig.count(ErrorKind::EitActualInterval), 2);
    }

    #[test]
    fn nit_and_tdt_maximum_intervals() {
        let mut rig = Rig::new(true);
        rig.packet(&packet(0x1FFF, 0, 0), 0);
        rig.section(NIT_PID, &long_section(0x40, 1, 0, 0, 0, &[0xF0, 0x00, 0xF0, 0x00]), 0);
        rig.section(TDT_PID, &TDT, 0);

        rig.packet(&packet(0x1FFF, 0, 0), 9_900 * MS);
        assert_eq!(rig.count(ErrorKind::NitActualInterval), 0);
        rig.packet(&packet(0x1FFF, 0, 0), 10_100 * MS);
        assert_eq!(rig.count(ErrorKind::NitActualInterval), 1);

        rig.packet(&packet(0x1FFF, 0, 0), 29_900 * MS);
        assert_eq!(rig.count(ErrorKind::TdtInterval), 0);
        rig.packet(&packet(0x1FFF, 0, 0), 30_100 * MS);
        assert_eq!(rig.count(ErrorKind::TdtInterval), 1);
        assert_eq!(rig.count(ErrorKind::NitActualInterval), 1);
    }

    #[test]
    fn si_tables_repeated_within_25_ms() {
        let mut rig = Rig::new(true);
        let nit = long_section(0x40, 1, 0, 0, 0, &[0xF0, 0x00, 0xF0, 0x00]);
        let rst = [0x71, 0x70, 0x00];
        rig.section(NIT_PID, &nit, 0);
        rig.section(NIT_PID, &nit, 10 * MS);
        rig.section(TDT_PID, &TDT, 20 * MS);
        rig.section(TDT_PID, &TDT, 30 * MS);
        rig.section(RST_PID, &rst, 40 * MS);
        rig.section(RST_PID, &rst, 50 * MS);
        rig.section(EIT_PID, &eit_pf(0), 60 * MS);
        rig.section(EIT_PID, &eit_pf(0), 70 * MS);
        assert_eq!(
            rig.kinds(),
            vec![ErrorKind::NitActualInterval, ErrorKind::TdtInterval, ErrorKind::RstInterval, ErrorKind::EitActualInterval]
        );

        // 25 ms apart is fine
        rig.section(RST_PID, &rst, 75 * MS);
        rig.section(RST_PID, &rst, 100 * MS);
        assert_eq!(rig.count(ErrorKind::RstInterval), 1);
    }

    #[test]
    fn scrambled_pat_once_per_episode() {
        let mut rig = Rig::new(false);
        let mut scrambled = packet(PAT_PID, 0, 0);
        scrambled[3] |= 0xC0;
        rig.packet(&scrambled, 0);
        rig.packet(&scrambled, 10 * MS);
        assert_eq!(rig.kinds(), vec![ErrorKind::PatScrambled]);
        rig.packet(&packet(PAT_PID, 1, 0), 20 * MS);
        rig.packet(&scrambled, 30 * MS);
        assert_eq!(rig.kinds(), vec![ErrorKind::PatScrambled, ErrorKind::PatScrambled]);
        assert!(rig.mem.source().scrambled);
    }

    #[test]
    fn sdt_other_checked_only_on_new_content() {
        let mut rig = Rig::new(true);
        let v0 = long_section(0x46, 2, 0, 0, 0, &[0x00, 0x01, 0xFF]);
        let v1 = long_section(0x46, 2, 1, 0, 0, &[0x00, 0x01, 0xFF]);
        rig.section(SDT_PID, &v0, 0);
        rig.section(SDT_PID, &v0, 11_000 * MS);
        assert!(!rig.kinds().contains(&ErrorKind::SdtOtherInterval));
        rig.section(SDT_PID, &v1, 22_500 * MS);
        assert_eq!(rig.kinds().iter().filter(|k| **k == ErrorKind::SdtOtherInterval).count(), 1);
    }

    #[test]
    fn stream_dropped_by_new_pmt_version_is_not_missing() {
        let mut rig = Rig::new(false);
        rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), 0);
        rig.section(0x100, &pmt(1, 0, 0x101, &[], &[(0x1B, 0x101, &[]), (0x0F, 0x102, &[])]), 0);
        rig.packet(&packet(0x101, 0, 0), 0);
        rig.packet(&packet(0x102, 0, 0), 0);
        rig.section(0x100, &pmt(1, 1, 0x101, &[], &[(0x1B, 0x101, &[])]), 50 * MS);
        for (t, cc) in (100..=7_000).step_by(100).zip(1u8..) {
            rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), t * MS);
            rig.section(0x100, &pmt(1, 1, 0x101, &[], &[(0x1B, 0x101, &[])]), t * MS);
            rig.packet(&packet(0x101, cc, 0), t * MS);
        }
        assert!(rig.kinds().is_empty());
    }

    #[test]
    fn streams_of_a_removed_program_are_not_missing() {
        let mut rig = Rig::new(false);
        rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100), (2, 0x200)]), 0);
        rig.section(0x100, &pmt(1, 0, 0x101, &[], &[(0x1B, 0x101, &[])]), 0);
        rig.section(0x200, &pmt(2, 0, 0x201, &[], &[(0x1B, 0x201, &[])]), 0);
        rig.packet(&packet(0x101, 0, 0), 0);
        rig.packet(&packet(0x201, 0, 0), 0);
        rig.section(PAT_PID, &pat(1, 1, &[(1, 0x100)]), 50 * MS);
        for (t, cc) in (100..=7_000).step_by(100).zip(1u8..) {
            rig.section(PAT_PID, &pat(1, 1, &[(1, 0x100)]), t * MS);
            rig.section(0x100, &pmt(1, 0, 0x101, &[], &[(0x1B, 0x101, &[])]), t * MS);
            rig.packet(&packet(0x101, cc, 0), t * MS);
        }
        assert!(rig.kinds().is_empty());
    }

    #[test]
    fn missing_elementary_stream() {
        let mut rig = Rig::new(false);
        rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), 0);
        rig.section(0x100, &pmt(1, 0, 0x101, &[], &[(0x1B, 0x101, &[])]), 0);
        rig.packet(&packet(0x101, 0, 0), 0);
        for t in (100..=6_000).step_by(100) {
            rig.section(PAT_PID, &pat(1, 0, &[(1, 0x100)]), t * MS);
            rig.section(0x100, &pmt(1, 0, 0x101, &[], &[(0x1B, 0x101, &[])]), t * MS);
            rig.packet(&packet(0x1FFF, 0, 0), t * MS);
        }
        assert_eq!(rig.kinds(), vec![ErrorKind::PidMissing]);
        rig.packet(&packet(0x101, 1, 0), 6_100 * MS);
        rig.packet(&packet(0x1FFF, 0, 0), 11_200 * MS);
        assert_eq!(rig.kinds().iter().filter(|k| **k == ErrorKind::PidMissing).count(), 2);
    }
}
