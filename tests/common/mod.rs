#![allow(dead_code)]

use std::sync::Arc;

use crc::{Crc, CRC_32_MPEG_2};
use mpegts_tracer::inspector::build_default_tracers;
use mpegts_tracer::processor::PacketProcessor;
use mpegts_tracer::sink::SharedSink;
use mpegts_tracer::tr101::ErrorKind;
use mpegts_tracer::{AnalyzerConfig, MemorySink, TimeBase};

pub const PACKET: usize = 188;
const MPEG2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

fn long_section(tid: u8, ext: u16, version: u8, body: &[u8]) -> Vec<u8> {
    let len = 5 + body.len() + 4;
    let mut v = vec![tid, 0xB0 | ((len >> 8) as u8 & 0x0F), len as u8];
    v.extend_from_slice(&ext.to_be_bytes());
    v.extend_from_slice(&[0xC1 | (version << 1), 0, 0]);
    v.extend_from_slice(body);
    let crc = MPEG2.checksum(&v);
    v.extend_from_slice(&crc.to_be_bytes());
    v
}

pub fn pat(tsid: u16, version: u8, programs: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(pn, pid) in programs {
        body.extend_from_slice(&pn.to_be_bytes());
        body.extend_from_slice(&(0xE000 | pid).to_be_bytes());
    }
    long_section(0x00, tsid, version, &body)
}

/// `streams`: (stream_type, pid)
pub fn pmt(program: u16, version: u8, pcr_pid: u16, streams: &[(u8, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(0xE000 | pcr_pid).to_be_bytes());
    body.extend_from_slice(&[0xF0, 0x00]);
    for &(st, pid) in streams {
        body.push(st);
        body.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        body.extend_from_slice(&[0xF0, 0x00]);
    }
    long_section(0x02, program, version, &body)
}

pub fn packet(pid: u16, cc: u8) -> [u8; PACKET] {
    let mut p = [0xA5; PACKET];
    p[0] = 0x47;
    p[1] = (pid >> 8) as u8 & 0x1F;
    p[2] = pid as u8;
    p[3] = 0x10 | (cc & 0x0F);
    p
}

pub fn null_packet() -> [u8; PACKET] {
    packet(0x1FFF, 0)
}

/// Adaptation field with a PCR in 27 MHz ticks, then payload.
pub fn pcr_packet(pid: u16, cc: u8, pcr: u64) -> [u8; PACKET] {
    let base = pcr / 300;
    let ext = (pcr % 300) as u16;
    let mut p = packet(pid, cc);
    p[3] = 0x30 | (cc & 0x0F);
    p[4] = 7;
    p[5] = 0x10;
    p[6..10].copy_from_slice(&((base >> 1) as u32).to_be_bytes());
    p[10] = (((base & 1) as u8) << 7) | 0x7E | ((ext >> 8) as u8 & 0x01);
    p[11] = ext as u8;
    p
}

/// One section in a single PUSI packet (pointer field 0, 0xFF stuffing).
pub fn section_packet(pid: u16, cc: u8, section: &[u8]) -> [u8; PACKET] {
    assert!(section.len() <= PACKET - 5);
    let mut p = [0xFF; PACKET];
    p[0] = 0x47;
    p[1] = 0x40 | ((pid >> 8) as u8 & 0x1F);
    p[2] = pid as u8;
    p[3] = 0x10 | (cc & 0x0F);
    p[4] = 0;
    p[5..5 + section.len()].copy_from_slice(section);
    p
}

/// Default tracer set on an in-memory sink, 1 ms per packet.
pub struct Harness {
    pub sink: Arc<MemorySink>,
    pub processor: PacketProcessor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AnalyzerConfig::default())
    }

    pub fn with_config(mut config: AnalyzerConfig) -> Self {
        config.time_base = TimeBase::Bitrate { bits_per_second: 1_504_000 };
        let sink = Arc::new(MemorySink::new());
        let shared: SharedSink = sink.clone();
        let mut processor = PacketProcessor::new(config.time_base);
        for tracer in build_default_tracers(&config, shared) {
            processor.register(tracer);
        }
        processor.start();
        Self { sink, processor }
    }

    pub fn push(&mut self, raw: &[u8]) {
        self.processor.process_packet(raw);
    }

    pub fn nulls(&mut self, n: usize) {
        let p = null_packet();
        for _ in 0..n {
            self.push(&p);
        }
    }

    pub fn stop(&mut self) {
        self.processor.stop();
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.sink.events().iter().filter(|e| e.kind == kind).count()
    }
}
