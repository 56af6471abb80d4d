//! Packet-arrival density per PID.
//!
//! Every packet after the first on a PID contributes the distance (in
//! packets) since the previous one. Distances are varint-encoded into a
//! per-PID batch that is flushed to storage when full, when it has been
//! open for the flush interval, or when the session stops.

pub mod varint;

use bytes::BytesMut;

use crate::config::AnalyzerConfig;
use crate::constants::{NANOS_PER_MILLI, PID_COUNT};
use crate::packet::TsPacket;
use crate::sink::SharedSink;
use crate::tracer::{ChannelRegistrar, SessionEvent, Tracer};
use crate::types::{DensityBatchId, StreamDensityBulk};

struct OpenBatch {
    id: DensityBatchId,
    start_position: u64,
    opened_ns: u64,
}

/// Rolling batch state of one PID
#[derive(Default)]
struct PidDensity {
    last_position: Option<u64>,
    batch: Option<OpenBatch>,
    encoded: BytesMut,
    count: u32,
    overflowed: u32,
    min: u64,
    max: u64,
    sum: u64,
}

impl PidDensity {
    /// Overflowed distances are counted but stay out of min/max/avg.
    fn record(&mut self, distance: u64) {
        varint::encode(distance, &mut self.encoded);
        self.count += 1;
        if distance > varint::MAX_DISTANCE {
            self.overflowed += 1;
            return;
        }
        if self.count - self.overflowed == 1 {
            self.min = distance;
            self.max = distance;
        } else {
            self.min = self.min.min(distance);
            self.max = self.max.max(distance);
        }
        self.sum += distance;
    }

    /// Closes the open batch, if any, and resets the running stats.
    fn take_bulk(&mut self, pid: u16) -> Option<StreamDensityBulk> {
        let batch = self.batch.take()?;
        let bulk = StreamDensityBulk {
            pid,
            batch: batch.id,
            start_position: batch.start_position,
            count: self.count,
            overflowed: self.overflowed,
            min: self.min,
            max: self.max,
            avg: match self.count - self.overflowed {
                0 => 0.0,
                measured => self.sum as f64 / measured as f64,
            },
            encoded: self.encoded.split().freeze(),
        };
        self.count = 0;
        self.overflowed = 0;
        self.min = 0;
        self.max = 0;
        self.sum = 0;
        Some(bulk)
    }
}

/// Open batches checked for age per packet.
const SWEEP_BUDGET: usize = 8;

pub struct DensityRecorder {
    sink: SharedSink,
    batch_len: usize,
    flush_ns: u64,
    pids: Vec<PidDensity>,
    /// PIDs with an open batch, walked round-robin so a PID that went
    /// quiet still gets its batch closed on time.
    open: Vec<u16>,
    cursor: usize,
}

impl DensityRecorder {
    pub fn new(config: &AnalyzerConfig, sink: SharedSink) -> Self {
        Self {
            sink,
            batch_len: config.density_batch_len.max(1),
            flush_ns: config.density_flush_ms * NANOS_PER_MILLI,
            pids: Self::fresh_state(),
            open: Vec::new(),
            cursor: 0,
        }
    }

    fn fresh_state() -> Vec<PidDensity> {
        (0..PID_COUNT).map(|_| PidDensity::default()).collect()
    }

    fn flush(&mut self, pid: u16) {
        if let Some(bulk) = self.pids[pid as usize].take_bulk(pid) {
            log::trace!("density flush pid 0x{pid:04X}: {} distances", bulk.count);
            self.sink.update_density_batch(&bulk);
            if let Some(i) = self.open.iter().position(|&p| p == pid) {
                self.open.swap_remove(i);
            }
        }
    }

    fn flush_all(&mut self) {
        for pid in std::mem::take(&mut self.open) {
            self.flush(pid);
        }
        self.cursor = 0;
    }

    fn record_arrival(&mut self, packet: &TsPacket<'_>) {
        let pid = packet.pid;
        let state = &mut self.pids[pid as usize];
        let Some(last) = state.last_position.replace(packet.position) else {
            return;
        };

        if state.batch.is_none() {
            let id = self.sink.add_density_batch(pid, last);
            state.batch = Some(OpenBatch { id, start_position: last, opened_ns: packet.time_ns });
            state.encoded.reserve(self.batch_len * varint::MAX_ENCODED_LEN);
            self.open.push(pid);
        }
        state.record(packet.position.saturating_sub(last));

        let opened_ns = state.batch.as_ref().map_or(packet.time_ns, |b| b.opened_ns);
        if state.count as usize >= self.batch_len || packet.time_ns.saturating_sub(opened_ns) >= self.flush_ns {
            self.flush(pid);
        }
    }

    /// Closes batches that have been open for the flush interval.
    fn sweep(&mut self, now: u64) {
        for _ in 0..SWEEP_BUDGET {
            if self.open.is_empty() {
                return;
            }
            self.cursor %= self.open.len();
            let pid = self.open[self.cursor];
            let expired = self.pids[pid as usize]
                .batch
                .as_ref()
                .is_some_and(|b| now.saturating_sub(b.opened_ns) >= self.flush_ns);
            if expired {
                // the last entry moves into the cursor slot
                self.flush(pid);
            } else {
                self.cursor += 1;
            }
        }
    }
}

impl Tracer for DensityRecorder {
    fn name(&self) -> &'static str {
        "density"
    }

    fn configure(&mut self, _channels: &mut dyn ChannelRegistrar) {}

    fn on_packet(&mut self, packet: &TsPacket<'_>, _channels: &mut dyn ChannelRegistrar) {
        self.record_arrival(packet);
        self.sweep(packet.time_ns);
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started => {
                self.pids = Self::fresh_state();
                self.open.clear();
                self.cursor = 0;
            }
            SessionEvent::Stopped { .. } => {
                self.flush_all();
                self.pids = Self::fresh_state();
            }
        }
    }
}
