//! Per-PID section reassembly from packet payloads.

use bytes::BytesMut;

use crate::constants::table_id;
use crate::packet::TsPacket;
use crate::psi::Section;

/// Largest `section_length` of a private section.
const MAX_SECTION_LENGTH: usize = 4093;

/// Collects the payload of one PID into complete sections: pointer field,
/// several sections per packet, sections spanning packets and stuffing.
/// A continuity gap or a transport error discards the partial section.
#[derive(Debug, Default)]
pub struct SectionAssembler {
    buffer: BytesMut,
    /// Position of the packet the buffered section started in.
    start_position: u64,
    last_cc: Option<u8>,
    /// True while `buffer` holds the head of a section.
    collecting: bool,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_cc = None;
        self.collecting = false;
    }

    fn abandon(&mut self) {
        self.buffer.clear();
        self.collecting = false;
    }

    /// Feeds one packet; completed sections are appended to `out`.
    pub fn push(&mut self, packet: &TsPacket<'_>, out: &mut Vec<Section>) {
        if packet.transport_error {
            self.clear();
            return;
        }
        if !packet.has_payload() {
            return;
        }

        let cc = packet.continuity_counter;
        match self.last_cc {
            // duplicate packet, already consumed
            Some(last) if last == cc => return,
            Some(last) if (last + 1) & 0x0F != cc => {
                log::trace!("pid 0x{:04X}: continuity gap {last} -> {cc}, dropping partial section", packet.pid);
                self.abandon();
            }
            _ => {}
        }
        self.last_cc = Some(cc);

        let payload = packet.payload();
        if packet.payload_unit_start {
            let Some((&pointer, rest)) = payload.split_first() else {
                self.abandon();
                return;
            };
            let pointer = pointer as usize;
            if pointer > rest.len() {
                log::trace!("pid 0x{:04X}: pointer field {pointer} past payload end", packet.pid);
                self.abandon();
                return;
            }
            if self.collecting {
                self.buffer.extend_from_slice(&rest[..pointer]);
                self.drain(packet, out);
            }
            self.buffer.clear();
            self.buffer.extend_from_slice(&rest[pointer..]);
            self.start_position = packet.position;
            self.collecting = true;
            self.drain(packet, out);
        } else if self.collecting {
            self.buffer.extend_from_slice(payload);
            self.drain(packet, out);
        }
    }

    fn drain(&mut self, packet: &TsPacket<'_>, out: &mut Vec<Section>) {
        while self.collecting && self.buffer.len() >= 3 {
            if self.buffer[0] == table_id::STUFFING {
                self.abandon();
                return;
            }
            let section_length = (((self.buffer[1] & 0x0F) as usize) << 8) | self.buffer[2] as usize;
            if section_length > MAX_SECTION_LENGTH {
                log::trace!("pid 0x{:04X}: section length {section_length} out of range", packet.pid);
                self.abandon();
                return;
            }
            let total = 3 + section_length;
            if self.buffer.len() < total {
                return;
            }
            let bytes = self.buffer.split_to(total).freeze();
            match Section::new(packet.pid, bytes, self.start_position, packet.position, packet.time_ns) {
                Ok(section) => out.push(section),
                Err(e) => log::trace!("pid 0x{:04X}: {e}", packet.pid),
            }
            // a following section can only start in this same packet
            self.start_position = packet.position;
        }
        if self.buffer.is_empty() {
            self.collecting = false;
        }
    }
}
