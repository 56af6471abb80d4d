//! Transport packet view handed to every tracer.
//!
//! A [`TsPacket`] borrows the raw 188 (or 204) bytes delivered by the source
//! and carries the stream position and stream time assigned to it. Header
//! fields are decoded eagerly, the adaptation field on demand.

use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::constants::{TS_PACKET_SIZE, TS_PACKET_SIZE_RS, TS_SYNC_BYTE};
use crate::error::TsError;

/// Offset and length of the PCR inside a packet carrying one.
const PCR_OFFSET: usize = 6;
const PCR_LEN: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct TsPacket<'a> {
    pub raw: &'a [u8],
    /// Monotonic packet counter assigned by the source.
    pub position: u64,
    /// Stream time in nanoseconds since session start.
    pub time_ns: u64,
    pub pid: u16,
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub scrambling_control: u8,
    pub adaptation_field_control: u8,
    pub continuity_counter: u8,
}

/// Decoded subset of the adaptation field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub length: u8,
    pub discontinuity: bool,
    pub random_access: bool,
    /// Full 42-bit PCR in 27 MHz ticks (`base * 300 + extension`).
    pub pcr: Option<u64>,
}

impl<'a> TsPacket<'a> {
    /// Validates frame length and sync byte, then decodes the 4-byte header.
    pub fn parse(raw: &'a [u8], position: u64, time_ns: u64) -> Result<Self, TsError> {
        if raw.len() < TS_PACKET_SIZE {
            return Err(TsError::PacketTooShort(raw.len()));
        }
        if raw[0] != TS_SYNC_BYTE {
            return Err(TsError::InvalidSync(raw[0]));
        }
        // 204-byte frames carry RS parity after the packet; anything else is truncated to 188
        let raw = if raw.len() >= TS_PACKET_SIZE_RS { &raw[..TS_PACKET_SIZE_RS] } else { &raw[..TS_PACKET_SIZE] };

        Ok(Self {
            raw,
            position,
            time_ns,
            pid: (((raw[1] & 0x1F) as u16) << 8) | raw[2] as u16,
            transport_error: raw[1] & 0x80 != 0,
            payload_unit_start: raw[1] & 0x40 != 0,
            scrambling_control: (raw[3] >> 6) & 0x03,
            adaptation_field_control: (raw[3] >> 4) & 0x03,
            continuity_counter: raw[3] & 0x0F,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.raw.len()
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    pub fn is_scrambled(&self) -> bool {
        self.scrambling_control != 0
    }

    /// The 188-byte packet without trailing RS parity.
    pub fn packet_bytes(&self) -> &'a [u8] {
        &self.raw[..TS_PACKET_SIZE]
    }

    /// Decodes the adaptation field. `Ok(None)` when the packet has none.
    pub fn adaptation_field(&self) -> Result<Option<AdaptationField>, TsError> {
        if !self.has_adaptation_field() {
            return Ok(None);
        }
        let length = self.raw[4];
        // 183 is the adaptation-only maximum; with payload the field must leave room for it
        let limit = if self.has_payload() { 182 } else { 183 };
        if length as usize > limit {
            return Err(TsError::AdaptationOverrun(length));
        }
        if length == 0 {
            return Ok(Some(AdaptationField { length, ..Default::default() }));
        }

        let flags = self.raw[5];
        let mut af = AdaptationField {
            length,
            discontinuity: flags & 0x80 != 0,
            random_access: flags & 0x40 != 0,
            pcr: None,
        };
        if flags & 0x10 != 0 {
            if (length as usize) < 1 + PCR_LEN {
                return Err(TsError::AdaptationOverrun(length));
            }
            af.pcr = Some(read_pcr(&self.raw[PCR_OFFSET..PCR_OFFSET + PCR_LEN])?);
        }
        Ok(Some(af))
    }

    /// PCR of this packet, swallowing decode errors.
    pub fn pcr(&self) -> Option<u64> {
        self.adaptation_field().ok().flatten().and_then(|af| af.pcr)
    }

    /// Payload bytes after header and adaptation field; empty when absent.
    pub fn payload(&self) -> &'a [u8] {
        if !self.has_payload() {
            return &[];
        }
        let offset = if self.has_adaptation_field() { 5 + self.raw[4] as usize } else { 4 };
        if offset >= TS_PACKET_SIZE {
            return &[];
        }
        &self.raw[offset..TS_PACKET_SIZE]
    }

    /// Copy of the 188 packet bytes with the PCR field zeroed, used to
    /// recognise duplicate packets that only differ in their PCR.
    pub fn masked_stub(&self) -> [u8; TS_PACKET_SIZE] {
        let mut stub = [0u8; TS_PACKET_SIZE];
        stub.copy_from_slice(self.packet_bytes());
        if let Ok(Some(AdaptationField { pcr: Some(_), .. })) = self.adaptation_field() {
            stub[PCR_OFFSET..PCR_OFFSET + PCR_LEN].fill(0);
        }
        stub
    }
}

/// 33-bit base, 6 reserved bits, 9-bit extension.
fn read_pcr(bytes: &[u8]) -> Result<u64, TsError> {
    let mut br = BitReader::endian(bytes, BigEndian);
    let overrun = |_: std::io::Error| TsError::AdaptationOverrun(bytes.len() as u8);
    let base = br.read::<33, u64>().map_err(overrun)?;
    br.skip(6).map_err(overrun)?;
    let ext = br.read::<9, u16>().map_err(overrun)?;
    if ext >= 300 {
        return Err(TsError::PcrExtension(ext));
    }
    Ok(base * 300 + ext as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_pcr(base: u64, ext: u16) -> [u8; 188] {
        let mut p = [0xFFu8; 188];
        p[0] = TS_SYNC_BYTE;
        p[1] = 0x01;
        p[2] = 0x00;
        p[3] = 0x30; // adaptation + payload
        p[4] = 7;
        p[5] = 0x10;
        p[6] = (base >> 25) as u8;
        p[7] = (base >> 17) as u8;
        p[8] = (base >> 9) as u8;
        p[9] = (base >> 1) as u8;
        p[10] = (((base & 1) as u8) << 7) | 0x7E | ((ext >> 8) as u8 & 0x01);
        p[11] = ext as u8;
        p
    }

    #[test]
    fn parses_header_fields() {
        let mut p = [0u8; 188];
        p[0] = TS_SYNC_BYTE;
        p[1] = 0xC1; // TEI + PUSI + pid high
        p[2] = 0x22;
        p[3] = 0x9A; // scrambled 10, payload only, cc 10
        let pkt = TsPacket::parse(&p, 5, 0).unwrap();
        assert_eq!(pkt.pid, 0x122);
        assert!(pkt.transport_error);
        assert!(pkt.payload_unit_start);
        assert_eq!(pkt.scrambling_control, 2);
        assert!(pkt.has_payload());
        assert!(!pkt.has_adaptation_field());
        assert_eq!(pkt.continuity_counter, 10);
        assert_eq!(pkt.payload().len(), 184);
    }

    #[test]
    fn rejects_bad_sync_and_short_buffers() {
        assert_eq!(TsPacket::parse(&[0u8; 10], 0, 0).unwrap_err(), TsError::PacketTooShort(10));
        assert_eq!(TsPacket::parse(&[0u8; 188], 0, 0).unwrap_err(), TsError::InvalidSync(0));
    }

    #[test]
    fn decodes_pcr() {
        let base = 0x1_2345_6789u64;
        let p = packet_with_pcr(base, 0x123);
        let pkt = TsPacket::parse(&p, 0, 0).unwrap();
        assert_eq!(pkt.pcr(), Some(base * 300 + 0x123));
        assert_eq!(pkt.payload().len(), 188 - 12);
    }

    #[test]
    fn pcr_extension_past_299_is_rejected() {
        let buf = packet_with_pcr((1 << 33) - 1, 511);
        let pkt = TsPacket::parse(&buf, 0, 0).unwrap();
        assert_eq!(pkt.adaptation_field().unwrap_err(), TsError::PcrExtension(511));
        assert_eq!(pkt.pcr(), None);
        let buf = packet_with_pcr((1 << 33) - 1, 299);
        let pkt = TsPacket::parse(&buf, 0, 0).unwrap();
        assert_eq!(pkt.pcr(), Some(crate::constants::PCR_WRAP - 1));
    }

    #[test]
    fn masked_stub_ignores_pcr() {
        let a = TsPacket::parse(&packet_with_pcr(1000, 0), 0, 0).unwrap().masked_stub();
        let b = TsPacket::parse(&packet_with_pcr(2000, 7), 1, 0).unwrap().masked_stub();
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_adaptation_field_is_an_error() {
        let mut p = packet_with_pcr(0, 0);
        p[4] = 190;
        let pkt = TsPacket::parse(&p, 0, 0).unwrap();
        assert!(pkt.adaptation_field().is_err());
        assert_eq!(pkt.pcr(), None);
        assert!(pkt.payload().is_empty());
    }
}
