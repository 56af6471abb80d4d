//! In-memory storage sink and the JSON report built from it.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::sink::StorageSink;
use crate::tr101::Tr101Metrics;
use crate::types::{
    CaKind, CaSystemStream, DensityBatchId, ElementaryStream, MpegProgram, PcrCheck, PcrSample, SourceUpdate,
    StreamDensityBulk, StreamSource, TableKind, Tr290Event,
};

/// Raw SI section kept for later decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateSection {
    pub kind: TableKind,
    pub pid: u16,
    pub position: u64,
    pub bytes: Bytes,
}

#[derive(Default)]
struct State {
    source: StreamSource,
    programs: BTreeMap<u16, MpegProgram>,
    streams: BTreeMap<u16, ElementaryStream>,
    scrambled: BTreeMap<u16, bool>,
    ca_streams: BTreeMap<(u16, CaKind), CaSystemStream>,
    pcr_samples: Vec<PcrSample>,
    pcr_checks: Vec<PcrCheck>,
    events: Vec<Tr290Event>,
    stream_errors: BTreeMap<u16, (u64, u64)>,
    next_batch: u64,
    open_batches: BTreeMap<DensityBatchId, (u16, u64)>,
    density_bulks: Vec<StreamDensityBulk>,
    private_sections: Vec<PrivateSection>,
    calls: HashMap<&'static str, u64>,
}

/// [`StorageSink`] keeping everything in memory behind one mutex.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<State>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(&self, call: &'static str, f: impl FnOnce(&mut State)) {
        let mut state = self.state.lock();
        *state.calls.entry(call).or_default() += 1;
        f(&mut state);
    }

    /// Number of times the named sink operation was invoked.
    pub fn call_count(&self, call: &str) -> u64 {
        self.state.lock().calls.get(call).copied().unwrap_or(0)
    }

    pub fn source(&self) -> StreamSource {
        self.state.lock().source.clone()
    }

    pub fn programs(&self) -> Vec<MpegProgram> {
        self.state.lock().programs.values().cloned().collect()
    }

    pub fn streams(&self) -> Vec<ElementaryStream> {
        self.state.lock().streams.values().cloned().collect()
    }

    pub fn ca_streams(&self) -> Vec<CaSystemStream> {
        self.state.lock().ca_streams.values().cloned().collect()
    }

    pub fn is_scrambled(&self, pid: u16) -> bool {
        self.state.lock().scrambled.get(&pid).copied().unwrap_or(false)
    }

    pub fn events(&self) -> Vec<Tr290Event> {
        self.state.lock().events.clone()
    }

    pub fn pcr_samples(&self) -> Vec<PcrSample> {
        self.state.lock().pcr_samples.clone()
    }

    pub fn pcr_checks(&self) -> Vec<PcrCheck> {
        self.state.lock().pcr_checks.clone()
    }

    /// Accumulated (transport, continuity) error counts of a PID.
    pub fn stream_errors(&self, pid: u16) -> (u64, u64) {
        self.state.lock().stream_errors.get(&pid).copied().unwrap_or((0, 0))
    }

    pub fn density_bulks(&self) -> Vec<StreamDensityBulk> {
        self.state.lock().density_bulks.clone()
    }

    pub fn open_density_batches(&self) -> usize {
        self.state.lock().open_batches.len()
    }

    pub fn private_sections(&self) -> Vec<PrivateSection> {
        self.state.lock().private_sections.clone()
    }

    pub fn report(&self, scope: &ReportScope) -> InspectorReport {
        let state = self.state.lock();
        InspectorReport::build(&state, scope)
    }
}

impl StorageSink for MemorySink {
    fn update_source(&self, update: SourceUpdate) {
        self.with("update_source", |s| s.source.apply(update));
    }

    fn add_program(&self, program: &MpegProgram) {
        self.with("add_program", |s| {
            s.programs.insert(program.program_number, program.clone());
        });
    }

    fn update_program(&self, program: &MpegProgram) {
        self.with("update_program", |s| {
            s.programs.insert(program.program_number, program.clone());
        });
    }

    fn clear_programs(&self) {
        self.with("clear_programs", |s| {
            s.programs.clear();
            s.streams.retain(|_, stream| stream.program_number.is_none());
            s.ca_streams.retain(|(_, kind), _| *kind == CaKind::Emm);
        });
    }

    fn add_stream_usage(&self, stream: &ElementaryStream) {
        self.with("add_stream_usage", |s| {
            s.streams.insert(stream.pid, stream.clone());
        });
    }

    fn update_stream_scrambling(&self, pid: u16, scrambled: bool) {
        self.with("update_stream_scrambling", |s| {
            s.scrambled.insert(pid, scrambled);
        });
    }

    fn add_ca_stream(&self, stream: &CaSystemStream) {
        self.with("add_ca_stream", |s| {
            s.ca_streams.insert((stream.pid, stream.kind), stream.clone());
        });
    }

    fn add_pcr(&self, sample: &PcrSample) {
        self.with("add_pcr", |s| s.pcr_samples.push(*sample));
    }

    fn add_pcr_check(&self, check: &PcrCheck) {
        self.with("add_pcr_check", |s| s.pcr_checks.push(*check));
    }

    fn add_error_event(&self, event: &Tr290Event) {
        self.with("add_error_event", |s| s.events.push(event.clone()));
    }

    fn accumulate_stream_errors(&self, pid: u16, transport_errors: u64, continuity_errors: u64) {
        self.with("accumulate_stream_errors", |s| {
            let entry = s.stream_errors.entry(pid).or_default();
            entry.0 += transport_errors;
            entry.1 += continuity_errors;
        });
    }

    fn add_density_batch(&self, pid: u16, start_position: u64) -> DensityBatchId {
        let mut id = DensityBatchId(0);
        self.with("add_density_batch", |s| {
            id = DensityBatchId(s.next_batch);
            s.next_batch += 1;
            s.open_batches.insert(id, (pid, start_position));
        });
        id
    }

    fn update_density_batch(&self, bulk: &StreamDensityBulk) {
        self.with("update_density_batch", |s| {
            if s.open_batches.remove(&bulk.batch).is_none() {
                log::debug!("density batch {:?} of pid 0x{:04X} was not open", bulk.batch, bulk.pid);
            }
            s.density_bulks.push(bulk.clone());
        });
    }

    fn add_private_section(&self, kind: TableKind, pid: u16, position: u64, bytes: &[u8]) {
        self.with("add_private_section", |s| {
            s.private_sections.push(PrivateSection { kind, pid, position, bytes: Bytes::copy_from_slice(bytes) });
        });
    }
}

/// What goes into a report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportScope {
    /// Highest TR 101 290 priority included (1..=3).
    pub max_priority: u8,
    /// Mux bitrate used when no PCR gave an estimate.
    pub nominal_bitrate_bps: Option<u64>,
}

impl Default for ReportScope {
    fn default() -> Self {
        Self { max_priority: 3, nominal_bitrate_bps: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    #[serde(flatten)]
    pub stream: ElementaryStream,
    pub scrambled: bool,
    pub packets: u64,
    pub transport_errors: u64,
    pub continuity_errors: u64,
}

/// Inter-arrival summary of one PID over all its flushed batches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensitySummary {
    pub pid: u16,
    pub batches: usize,
    pub intervals: u64,
    pub overflowed: u64,
    pub min: u64,
    pub max: u64,
    pub avg: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectorReport {
    pub generated_at: DateTime<Utc>,
    pub source: StreamSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_bps: Option<f64>,
    pub programs: Vec<MpegProgram>,
    pub streams: Vec<StreamReport>,
    pub ca_streams: Vec<CaSystemStream>,
    pub tr101: Tr101Metrics,
    pub priority_totals: [u64; 3],
    pub events: Vec<Tr290Event>,
    pub density: Vec<DensitySummary>,
    pub private_sections: BTreeMap<TableKind, usize>,
}

impl InspectorReport {
    fn build(state: &State, scope: &ReportScope) -> Self {
        let density = summarize_density(&state.density_bulks);
        let packets_of = |pid: u16| -> u64 {
            density.iter().find(|d| d.pid == pid).map_or(0, |d| d.intervals + 1)
        };

        let bitrate_bps = state
            .pcr_checks
            .iter()
            .rev()
            .map(|c| c.avg_bitrate_bps)
            .find(|b| *b > 0.0)
            .or(scope.nominal_bitrate_bps.map(|b| b as f64));

        let total = state.source.packets.max(1) as f64;
        let programs = state
            .programs
            .values()
            .map(|p| {
                let mut program = p.clone();
                if let Some(bitrate) = bitrate_bps {
                    let packets: u64 = state
                        .streams
                        .values()
                        .filter(|s| s.program_number == Some(p.program_number))
                        .map(|s| packets_of(s.pid))
                        .sum::<u64>()
                        + packets_of(p.pmt_pid);
                    program.bandwidth_bps = Some(packets as f64 / total * bitrate);
                }
                program
            })
            .collect();

        let streams = state
            .streams
            .values()
            .map(|s| {
                let (transport_errors, continuity_errors) = state.stream_errors.get(&s.pid).copied().unwrap_or((0, 0));
                StreamReport {
                    stream: s.clone(),
                    scrambled: state.scrambled.get(&s.pid).copied().unwrap_or(false),
                    packets: packets_of(s.pid),
                    transport_errors,
                    continuity_errors,
                }
            })
            .collect();

        let events: Vec<Tr290Event> =
            state.events.iter().filter(|e| e.kind.priority() <= scope.max_priority).cloned().collect();
        let tr101 = Tr101Metrics::from_events(&events);
        let priority_totals = tr101.priority_totals();

        let mut private_sections = BTreeMap::new();
        for s in &state.private_sections {
            *private_sections.entry(s.kind).or_insert(0) += 1;
        }

        Self {
            generated_at: Utc::now(),
            source: state.source.clone(),
            bitrate_bps,
            programs,
            streams,
            ca_streams: state.ca_streams.values().cloned().collect(),
            tr101,
            priority_totals,
            events,
            density,
            private_sections,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn summarize_density(bulks: &[StreamDensityBulk]) -> Vec<DensitySummary> {
    let mut per_pid: BTreeMap<u16, DensitySummary> = BTreeMap::new();
    let mut sums: BTreeMap<u16, f64> = BTreeMap::new();
    for b in bulks {
        let summary = per_pid.entry(b.pid).or_insert(DensitySummary {
            pid: b.pid,
            batches: 0,
            intervals: 0,
            overflowed: 0,
            min: u64::MAX,
            max: 0,
            avg: 0.0,
        });
        summary.batches += 1;
        summary.intervals += b.count as u64;
        summary.overflowed += b.overflowed as u64;
        if b.count > b.overflowed {
            summary.min = summary.min.min(b.min);
            summary.max = summary.max.max(b.max);
            *sums.entry(b.pid).or_default() += b.avg * (b.count - b.overflowed) as f64;
        }
    }
    per_pid
        .into_values()
        .map(|mut s| {
            let measured = s.intervals - s.overflowed;
            if measured == 0 {
                s.min = 0;
            } else {
                s.avg = sums.get(&s.pid).copied().unwrap_or(0.0) / measured as f64;
            }
            s
        })
        .collect()
}
