//! Packet source: assigns positions and stream time, fans packets out to
//! the registered tracers and delivers reassembled sections to the tracers
//! subscribed to their PID.

pub mod reassembly;

use std::time::Instant;

use crate::config::TimeBase;
use crate::constants::*;
use crate::packet::TsPacket;
use crate::psi::Section;
use crate::tracer::{SectionChannels, SessionEvent, Tracer};

use reassembly::SectionAssembler;

struct TracerSlot {
    tracer: Box<dyn Tracer>,
    channels: SectionChannels,
}

pub struct PacketProcessor {
    time_base: TimeBase,
    tracers: Vec<TracerSlot>,
    assemblers: Vec<Option<SectionAssembler>>,
    scratch: Vec<Section>,
    running: bool,
    started_at: Option<Instant>,
    position: u64,
    last_time_ns: u64,
    skipped: u64,
}

impl PacketProcessor {
    pub fn new(time_base: TimeBase) -> Self {
        Self {
            time_base,
            tracers: Vec::new(),
            assemblers: (0..PID_COUNT).map(|_| None).collect(),
            scratch: Vec::new(),
            running: false,
            started_at: None,
            position: 0,
            last_time_ns: 0,
            skipped: 0,
        }
    }

    pub fn register(&mut self, tracer: Box<dyn Tracer>) {
        log::debug!("registered tracer {}", tracer.name());
        self.tracers.push(TracerSlot { tracer, channels: SectionChannels::new() });
    }

    /// Packets accepted in the current session.
    pub fn packets(&self) -> u64 {
        self.position
    }

    /// Frames rejected for a bad sync byte or length.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn start(&mut self) {
        if self.running {
            self.stop();
        }
        self.running = true;
        self.started_at = Some(Instant::now());
        self.position = 0;
        self.last_time_ns = 0;
        self.skipped = 0;
        for slot in &mut self.tracers {
            slot.channels.clear();
            slot.tracer.on_session_event(SessionEvent::Started);
            slot.tracer.configure(&mut slot.channels);
        }
        log::debug!("session started with {} tracers", self.tracers.len());
    }

    /// Ends the session: tracers flush, then all reassembly state and
    /// subscriptions are dropped.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        let event = SessionEvent::Stopped { position: self.position.saturating_sub(1), time_ns: self.last_time_ns };
        for slot in &mut self.tracers {
            slot.tracer.on_session_event(event);
            slot.channels.clear();
        }
        self.assemblers.iter_mut().for_each(|a| *a = None);
        self.running = false;
        log::debug!("session stopped after {} packets ({} skipped)", self.position, self.skipped);
    }

    /// Stream time of the next packet according to the configured time base.
    fn stream_time(&self) -> u64 {
        match self.time_base {
            TimeBase::WallClock => self.started_at.map_or(0, |t| t.elapsed().as_nanos() as u64),
            TimeBase::Bitrate { bits_per_second } if bits_per_second > 0 => {
                let bits = self.position as u128 * (TS_PACKET_SIZE * 8) as u128;
                (bits * NANOS_PER_SEC as u128 / bits_per_second as u128) as u64
            }
            TimeBase::Bitrate { .. } => self.last_time_ns,
        }
    }

    pub fn process_packet(&mut self, raw: &[u8]) {
        let time_ns = self.stream_time();
        self.process_packet_at(raw, time_ns);
    }

    /// Same as [`process_packet`](Self::process_packet) with an explicit
    /// stream time. Times going backwards are clamped.
    pub fn process_packet_at(&mut self, raw: &[u8], time_ns: u64) {
        if !self.running {
            log::trace!("packet outside of a session ignored");
            return;
        }
        let time_ns = time_ns.max(self.last_time_ns);
        let packet = match TsPacket::parse(raw, self.position, time_ns) {
            Ok(p) => p,
            Err(e) => {
                self.skipped += 1;
                log::trace!("skipping frame: {e}");
                return;
            }
        };
        self.position += 1;
        self.last_time_ns = time_ns;

        for slot in &mut self.tracers {
            slot.tracer.on_packet(&packet, &mut slot.channels);
        }

        let pid = packet.pid as usize;
        if !self.tracers.iter().any(|s| s.channels.is_subscribed(packet.pid)) {
            self.assemblers[pid] = None;
            return;
        }
        let mut sections = std::mem::take(&mut self.scratch);
        self.assemblers[pid].get_or_insert_with(SectionAssembler::new).push(&packet, &mut sections);
        for section in sections.drain(..) {
            for slot in &mut self.tracers {
                if slot.channels.is_subscribed(section.pid) {
                    slot.tracer.on_section(&section, &mut slot.channels);
                }
            }
        }
        self.scratch = sections;
    }
}
