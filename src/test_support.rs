//! Packet and section builders shared by unit tests.

use std::sync::Arc;

use bytes::Bytes;

use crate::constants::{TS_PACKET_SIZE, TS_SYNC_BYTE};
use crate::psi::section::{crc32, Section};
use crate::report::MemorySink;
use crate::sink::SharedSink;

pub fn long_section(tid: u8, ext: u16, version: u8, sec: u8, last: u8, body: &[u8]) -> Vec<u8> {
    let len = 5 + body.len() + 4;
    let mut v = vec![tid, 0xB0 | ((len >> 8) as u8 & 0x0F), len as u8];
    v.extend_from_slice(&ext.to_be_bytes());
    v.push(0xC1 | (version << 1));
    v.push(sec);
    v.push(last);
    v.extend_from_slice(body);
    let crc = crc32(&v);
    v.extend_from_slice(&crc.to_be_bytes());
    v
}

/// Same section with `current_next_indicator` cleared and the CRC redone.
pub fn as_next(mut raw: Vec<u8>) -> Vec<u8> {
    let n = raw.len();
    raw[5] &= !0x01;
    let crc = crc32(&raw[..n - 4]);
    raw[n - 4..].copy_from_slice(&crc.to_be_bytes());
    raw
}

pub fn pat(tsid: u16, version: u8, programs: &[(u16, u16)]) -> Vec<u8> {
    pat_section(tsid, version, 0, 0, programs)
}

pub fn pat_section(tsid: u16, version: u8, sec: u8, last: u8, programs: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(pn, pid) in programs {
        body.extend_from_slice(&pn.to_be_bytes());
        body.push(0xE0 | (pid >> 8) as u8);
        body.push(pid as u8);
    }
    long_section(0x00, tsid, version, sec, last, &body)
}

pub fn ca_descriptor(system_id: u16, pid: u16) -> Vec<u8> {
    let mut d = vec![0x09, 4];
    d.extend_from_slice(&system_id.to_be_bytes());
    d.push(0xE0 | (pid >> 8) as u8);
    d.push(pid as u8);
    d
}

pub fn cat(version: u8, descriptors: &[u8]) -> Vec<u8> {
    long_section(0x01, 0xFFFF, version, 0, 0, descriptors)
}

/// `streams`: (stream_type, pid, ES descriptors)
pub fn pmt(program: u16, version: u8, pcr_pid: u16, program_info: &[u8], streams: &[(u8, u16, &[u8])]) -> Vec<u8> {
    let mut body = vec![0xE0 | (pcr_pid >> 8) as u8, pcr_pid as u8];
    body.push(0xF0 | (program_info.len() >> 8) as u8);
    body.push(program_info.len() as u8);
    body.extend_from_slice(program_info);
    for &(st, pid, desc) in streams {
        body.push(st);
        body.push(0xE0 | (pid >> 8) as u8);
        body.push(pid as u8);
        body.push(0xF0 | (desc.len() >> 8) as u8);
        body.push(desc.len() as u8);
        body.extend_from_slice(desc);
    }
    long_section(0x02, program, version, 0, 0, &body)
}

pub fn section(pid: u16, raw: &[u8], position: u64, time_ns: u64) -> Section {
    Section::new(pid, Bytes::copy_from_slice(raw), position, position, time_ns).unwrap()
}

/// Payload-only packet filled with `fill`.
pub fn packet(pid: u16, cc: u8, fill: u8) -> [u8; TS_PACKET_SIZE] {
    let mut p = [fill; TS_PACKET_SIZE];
    p[0] = TS_SYNC_BYTE;
    p[1] = (pid >> 8) as u8 & 0x1F;
    p[2] = pid as u8;
    p[3] = 0x10 | (cc & 0x0F);
    p
}

/// Packet with an adaptation field carrying `pcr` (27 MHz ticks).
pub fn pcr_packet(pid: u16, cc: u8, pcr: u64, discontinuity: bool) -> [u8; TS_PACKET_SIZE] {
    let base = pcr / 300;
    let ext = (pcr % 300) as u16;
    let mut p = packet(pid, cc, 0xAA);
    p[3] = 0x30 | (cc & 0x0F);
    p[4] = 7;
    p[5] = 0x10 | if discontinuity { 0x80 } else { 0 };
    p[6] = (base >> 25) as u8;
    p[7] = (base >> 17) as u8;
    p[8] = (base >> 9) as u8;
    p[9] = (base >> 1) as u8;
    p[10] = (((base & 1) as u8) << 7) | 0x7E | ((ext >> 8) as u8 & 0x01);
    p[11] = ext as u8;
    p
}

/// Splits a section into PUSI-started packets with a zero pointer field.
pub fn packetize(pid: u16, section: &[u8], first_cc: u8) -> Vec<[u8; TS_PACKET_SIZE]> {
    let mut out = Vec::new();
    let mut data = Vec::with_capacity(section.len() + 1);
    data.push(0u8);
    data.extend_from_slice(section);
    for (i, chunk) in data.chunks(184).enumerate() {
        let mut p = packet(pid, first_cc.wrapping_add(i as u8), 0xFF);
        if i == 0 {
            p[1] |= 0x40;
        }
        p[4..4 + chunk.len()].copy_from_slice(chunk);
        out.push(p);
    }
    out
}

pub fn memory_sink() -> (Arc<MemorySink>, SharedSink) {
    let sink = Arc::new(MemorySink::new());
    let shared: SharedSink = sink.clone();
    (sink, shared)
}
