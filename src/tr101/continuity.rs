// src/tr101/continuity.rs
//! Continuity-counter, transport-error and PCR checks (TR 101 290 1.4, 2.1,
//! 2.3 and 2.4), evaluated per packet against per-PID state.

use crate::config::AnalyzerConfig;
use crate::constants::*;
use crate::packet::TsPacket;
use crate::sink::SharedSink;
use crate::tr101::{ErrorKind, Latch};
use crate::tracer::{ChannelRegistrar, FlushSchedule, SessionEvent, Tracer};
use crate::types::{PcrCheck, PcrSample, Tr290Event};

const PACKET_BITS: f64 = (TS_PACKET_SIZE * 8) as f64;

#[derive(Default)]
struct PidContinuity {
    last_cc: Option<u8>,
    duplicates: u8,
    /// Last payload-carrying packet with its PCR bytes zeroed.
    stub: Option<Box<[u8; TS_PACKET_SIZE]>>,
    tei: Latch,
    last_pcr: Option<PcrSample>,
    avg_bitrate: Option<f64>,
    transport_errors: u64,
    continuity_errors: u64,
}

impl PidContinuity {
    fn reset_tracking(&mut self) {
        self.last_cc = None;
        self.duplicates = 0;
        self.stub = None;
        self.last_pcr = None;
        self.avg_bitrate = None;
    }

    fn refresh_stub(&mut self, packet: &TsPacket<'_>) {
        let masked = packet.masked_stub();
        match self.stub.as_deref_mut() {
            Some(stub) => *stub = masked,
            None => self.stub = Some(Box::new(masked)),
        }
    }

    fn stub_matches(&self, packet: &TsPacket<'_>) -> bool {
        self.stub.as_deref().is_some_and(|s| *s == packet.masked_stub())
    }
}

pub struct ContinuityDetector {
    sink: SharedSink,
    repetition_ns: u64,
    discontinuity_ns: u64,
    accuracy_ns: u64,
    flush: FlushSchedule,
    pids: Vec<PidContinuity>,
}

impl ContinuityDetector {
    pub fn new(config: &AnalyzerConfig, sink: SharedSink) -> Self {
        Self {
            sink,
            repetition_ns: config.timing.pcr_repetition_ms * NANOS_PER_MILLI,
            discontinuity_ns: config.timing.pcr_discontinuity_ms * NANOS_PER_MILLI,
            accuracy_ns: config.timing.pcr_accuracy_ns,
            flush: FlushSchedule::new(config.flush_every_packets, config.flush_interval_ms * NANOS_PER_MILLI),
            pids: Self::fresh_state(),
        }
    }

    fn fresh_state() -> Vec<PidContinuity> {
        (0..PID_COUNT).map(|_| PidContinuity::default()).collect()
    }

    fn emit(&self, kind: ErrorKind, packet: &TsPacket<'_>, message: String) {
        log::debug!("{kind:?} pid 0x{:04X} at {}: {message}", packet.pid, packet.position);
        self.sink.add_error_event(&Tr290Event::new(kind, Some(packet.pid), packet.position, packet.time_ns, message));
    }

    /// Pushes the error counters accumulated since the previous flush.
    fn flush_counters(&mut self) {
        for (pid, state) in self.pids.iter_mut().enumerate() {
            if state.transport_errors == 0 && state.continuity_errors == 0 {
                continue;
            }
            self.sink.accumulate_stream_errors(pid as u16, state.transport_errors, state.continuity_errors);
            state.transport_errors = 0;
            state.continuity_errors = 0;
        }
    }

    /// Returns false when the packet broke the counter sequence.
    fn check_continuity(&mut self, packet: &TsPacket<'_>, discontinuity: bool) -> bool {
        let cc = packet.continuity_counter;
        let state = &mut self.pids[packet.pid as usize];
        let last_cc = state.last_cc;
        let error = match last_cc {
            None => None,
            Some(_) if discontinuity => None,
            Some(prev) if !packet.has_payload() => (cc != prev).then(|| format!("counter changed from {prev} to {cc} without payload")),
            Some(prev) if cc == (prev + 1) & 0x0F => None,
            Some(prev) if cc == prev && state.duplicates == 0 && state.stub_matches(packet) => {
                state.duplicates = 1;
                state.last_cc = Some(cc);
                return true;
            }
            Some(prev) if cc == prev && state.duplicates > 0 => Some(format!("counter {cc} repeated twice")),
            Some(prev) => Some(format!("expected counter {}, got {cc}", (prev + 1) & 0x0F)),
        };

        if packet.has_payload() {
            state.refresh_stub(packet);
        }
        match error {
            None => {
                state.last_cc = Some(cc);
                state.duplicates = 0;
                true
            }
            Some(message) => {
                state.last_cc = None;
                state.duplicates = 0;
                state.continuity_errors += 1;
                self.emit(ErrorKind::ContinuityCount, packet, message);
                false
            }
        }
    }

    fn check_pcr(&mut self, packet: &TsPacket<'_>, pcr: u64, discontinuity: bool) {
        let sample = PcrSample { pid: packet.pid, pcr, position: packet.position, time_ns: packet.time_ns };
        self.sink.add_pcr(&sample);

        let state = &mut self.pids[packet.pid as usize];
        let previous = state.last_pcr.replace(sample);
        if discontinuity {
            return;
        }
        let Some(prev) = previous else { return };

        let delta_ticks = (pcr + PCR_WRAP - prev.pcr) % PCR_WRAP;
        let delta_positions = packet.position.saturating_sub(prev.position);
        if delta_ticks == 0 || delta_positions == 0 {
            return;
        }
        let delta_pcr_ns = delta_ticks * 1_000 / (PCR_CLOCK_HZ / 1_000_000);
        let bitrate = delta_positions as f64 * PACKET_BITS * NANOS_PER_SEC as f64 / delta_pcr_ns as f64;

        // the first interval only calibrates the average bitrate
        let (avg, calibrating) = match state.avg_bitrate {
            None => (bitrate, true),
            Some(avg) => (avg * PCR_SMOOTHING + bitrate * (1.0 - PCR_SMOOTHING), false),
        };
        state.avg_bitrate = Some(avg);

        let delta_tb_ns = if calibrating {
            delta_pcr_ns
        } else {
            (delta_positions as f64 * PACKET_BITS * NANOS_PER_SEC as f64 / avg).round() as u64
        };
        let accuracy_ns = delta_tb_ns as i64 - delta_pcr_ns as i64;

        let check = PcrCheck {
            pid: packet.pid,
            position: packet.position,
            delta_positions,
            delta_pcr_ns,
            delta_tb_ns,
            accuracy_ns,
            bitrate_bps: bitrate,
            avg_bitrate_bps: avg,
            repetition_error: !calibrating && delta_tb_ns > self.repetition_ns,
            discontinuity_error: !calibrating && delta_pcr_ns > self.discontinuity_ns,
            accuracy_error: !calibrating && accuracy_ns.unsigned_abs() > self.accuracy_ns,
        };
        self.sink.add_pcr_check(&check);

        if check.repetition_error {
            self.emit(ErrorKind::PcrRepetition, packet, format!("PCR interval {} ms by byte clock", delta_tb_ns / NANOS_PER_MILLI));
        }
        if check.discontinuity_error {
            self.emit(ErrorKind::PcrDiscontinuity, packet, format!("PCR jumped {} ms", delta_pcr_ns / NANOS_PER_MILLI));
        }
        if check.accuracy_error {
            self.emit(ErrorKind::PcrAccuracy, packet, format!("PCR accuracy {accuracy_ns} ns"));
        }
    }
}

impl Tracer for ContinuityDetector {
    fn name(&self) -> &'static str {
        "continuity"
    }

    fn configure(&mut self, _channels: &mut dyn ChannelRegistrar) {}

    fn on_packet(&mut self, packet: &TsPacket<'_>, _channels: &mut dyn ChannelRegistrar) {
        if self.flush.tick(packet.time_ns) {
            self.flush_counters();
        }
        if packet.pid == NULL_PID {
            return;
        }

        let state = &mut self.pids[packet.pid as usize];
        if packet.transport_error {
            state.transport_errors += 1;
            state.reset_tracking();
            if state.tei.fire() {
                self.emit(ErrorKind::TransportError, packet, "transport error indicator set".to_string());
            }
            return;
        }
        state.tei.rearm();

        // a malformed adaptation field counts as "no adaptation data"
        let af = packet.adaptation_field().ok().flatten();
        let discontinuity = af.is_some_and(|a| a.discontinuity);

        if !self.check_continuity(packet, discontinuity) {
            return;
        }
        if let Some(pcr) = af.and_then(|a| a.pcr) {
            self.check_pcr(packet, pcr, discontinuity);
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started => {
                self.pids = Self::fresh_state();
                self.flush.reset(0);
            }
            SessionEvent::Stopped { time_ns, .. } => {
                self.flush_counters();
                self.flush.reset(time_ns);
                self.pids = Self::fresh_state();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemorySink;
    use crate::test_support::{memory_sink, packet, pcr_packet};
    use crate::tracer::SectionChannels;
    use std::sync::Arc;

    struct Rig {
        mem: Arc<MemorySink>,
        det: ContinuityDetector,
        position: u64,
    }

    impl Rig {
        fn new() -> Self {
            let (mem, sink) = memory_sink();
            Self { mem, det: ContinuityDetector::new(&AnalyzerConfig::default(), sink), position: 0 }
        }

        fn push(&mut self, raw: &[u8; TS_PACKET_SIZE]) {
            self.push_at(raw, self.position, self.position * 10_000);
        }

        fn push_at(&mut self, raw: &[u8; TS_PACKET_SIZE], position: u64, time_ns: u64) {
            let pkt = TsPacket::parse(raw, position, time_ns).unwrap();
            self.det.on_packet(&pkt, &mut SectionChannels::new());
            self.position = position + 1;
        }

        fn kinds(&self) -> Vec<ErrorKind> {
            self.mem.events().iter().map(|e| e.kind).collect()
        }
    }

    #[test]
    fn wrapping_counter_is_clean() {
        let mut rig = Rig::new();
        for i in 0..40u8 {
            rig.push(&packet(0x100, i % 16, i));
        }
        rig.det.on_session_event(SessionEvent::Stopped { position: 40, time_ns: 0 });
        assert!(rig.kinds().is_empty());
        assert_eq!(rig.mem.stream_errors(0x100), (0, 0));
    }

    #[test]
    fn one_repeat_allowed_second_is_an_error() {
        let mut rig = Rig::new();
        rig.push(&packet(0x100, 0, 1));
        rig.push(&packet(0x100, 1, 2));
        rig.push(&packet(0x100, 1, 2));
        assert!(rig.kinds().is_empty());
        rig.push(&packet(0x100, 1, 2));
        assert_eq!(rig.kinds(), vec![ErrorKind::ContinuityCount]);
        rig.det.on_session_event(SessionEvent::Stopped { position: 4, time_ns: 0 });
        assert_eq!(rig.mem.stream_errors(0x100), (0, 1));
    }

    #[test]
    fn repeat_with_other_content_is_an_error() {
        let mut rig = Rig::new();
        rig.push(&packet(0x100, 5, 1));
        rig.push(&packet(0x100, 5, 9));
        assert_eq!(rig.kinds(), vec![ErrorKind::ContinuityCount]);
        // tracking resumes on the next packet
        rig.push(&packet(0x100, 6, 1));
        rig.push(&packet(0x100, 7, 1));
        assert_eq!(rig.kinds().len(), 1);
    }

    #[test]
    fn adaptation_only_packet_keeps_counter() {
        let mut rig = Rig::new();
        let mut af_only = packet(0x100, 3, 0xFF);
        af_only[3] = 0x20 | 3;
        af_only[4] = 183;
        af_only[5] = 0;
        rig.push(&packet(0x100, 3, 0));
        rig.push(&af_only);
        rig.push(&packet(0x100, 4, 0));
        assert!(rig.kinds().is_empty());

        let mut bumped = af_only;
        bumped[3] = 0x20 | 6;
        rig.push(&bumped);
        assert_eq!(rig.kinds(), vec![ErrorKind::ContinuityCount]);
    }

    #[test]
    fn discontinuity_indicator_accepts_any_counter() {
        let mut rig = Rig::new();
        rig.push(&packet(0x100, 0, 0));
        rig.push(&pcr_packet(0x100, 9, 1_000, true));
        rig.push(&packet(0x100, 10, 0));
        assert!(rig.kinds().is_empty());
    }

    #[test]
    fn transport_error_fires_once_per_episode() {
        let mut rig = Rig::new();
        let mut bad = packet(0x200, 0, 0);
        bad[1] |= 0x80;
        rig.push(&bad);
        rig.push(&bad);
        rig.push(&packet(0x200, 1, 0));
        rig.push(&bad);
        assert_eq!(rig.kinds(), vec![ErrorKind::TransportError, ErrorKind::TransportError]);
        rig.det.on_session_event(SessionEvent::Stopped { position: 4, time_ns: 0 });
        assert_eq!(rig.mem.stream_errors(0x200), (3, 0));
    }

    #[test]
    fn null_packets_are_ignored() {
        let mut rig = Rig::new();
        rig.push(&packet(NULL_PID, 0, 0));
        rig.push(&packet(NULL_PID, 7, 0));
        assert!(rig.kinds().is_empty());
    }

    const TICKS_300_MS: u64 = 27_000_000 * 3 / 10;

    #[test]
    fn pcrs_300_ms_apart_calibrate_without_events() {
        let mut rig = Rig::new();
        rig.push_at(&pcr_packet(0x100, 0, 0, false), 0, 0);
        rig.push_at(&pcr_packet(0x100, 1, TICKS_300_MS, false), 1_000, 300_000_000);

        assert!(rig.kinds().is_empty());
        assert_eq!(rig.mem.pcr_samples().len(), 2);
        let checks = rig.mem.pcr_checks();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].accuracy_ns, 0);
        assert_eq!(checks[0].delta_pcr_ns, 300_000_000);
        assert!(!checks[0].repetition_error && !checks[0].discontinuity_error && !checks[0].accuracy_error);
        // 1000 packets of 1504 bits in 0.3 s
        assert!((checks[0].bitrate_bps - 5_013_333.33).abs() < 1.0);
    }

    #[test]
    fn late_pcr_after_calibration_flags_repetition_and_discontinuity() {
        let mut rig = Rig::new();
        for (i, cc) in (0..3u64).zip(0u8..) {
            rig.push_at(&pcr_packet(0x100, cc, i * TICKS_300_MS, false), i * 1_000, i * 300_000_000);
        }
        assert_eq!(rig.kinds(), vec![ErrorKind::PcrRepetition, ErrorKind::PcrDiscontinuity]);
        let checks = rig.mem.pcr_checks();
        assert_eq!(checks[1].accuracy_ns, 0);
    }

    #[test]
    fn drifting_pcr_flags_accuracy() {
        let mut rig = Rig::new();
        // 20 ms intervals of 100 packets; the third PCR runs 2 us late
        let step = 27_000 * 20;
        rig.push_at(&pcr_packet(0x100, 0, 0, false), 0, 0);
        rig.push_at(&pcr_packet(0x100, 1, step, false), 100, 0);
        rig.push_at(&pcr_packet(0x100, 2, 2 * step + 54, false), 200, 0);
        assert_eq!(rig.kinds(), vec![ErrorKind::PcrAccuracy]);
        let check = rig.mem.pcr_checks()[1];
        assert!(check.accuracy_error && !check.repetition_error);
    }

    #[test]
    fn out_of_range_pcr_extension_is_no_pcr() {
        let mut rig = Rig::new();
        let mut bad = pcr_packet(0x100, 0, PCR_WRAP - 1, false);
        bad[11] = 0xFF; // extension 511
        rig.push_at(&bad, 0, 0);
        rig.push_at(&pcr_packet(0x100, 1, 0, false), 10, 0);
        assert!(rig.kinds().is_empty());
        assert_eq!(rig.mem.pcr_samples().len(), 1);
        assert!(rig.mem.pcr_checks().is_empty());
    }

    #[test]
    fn pcr_wraps_around() {
        let mut rig = Rig::new();
        let step = 27_000 * 10;
        rig.push_at(&pcr_packet(0x100, 0, PCR_WRAP - step / 2, false), 0, 0);
        rig.push_at(&pcr_packet(0x100, 1, step / 2, false), 50, 0);
        assert_eq!(rig.mem.pcr_checks()[0].delta_pcr_ns, 10_000_000);
    }
}
