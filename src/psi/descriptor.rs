// psi/descriptor.rs
//! Descriptor-loop traversal, CA descriptor decoding and the lookup tables
//! used to label streams and CA systems.

use serde::Serialize;

use crate::constants::descriptor_tag;

/// Walks a descriptor loop yielding `(tag, body)`. A descriptor whose length
/// runs past the loop ends the iteration.
pub struct DescriptorIter<'a> {
    data: &'a [u8],
}

impl<'a> DescriptorIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 2 {
            return None;
        }
        let tag = self.data[0];
        let len = self.data[1] as usize;
        if 2 + len > self.data.len() {
            log::trace!("descriptor 0x{tag:02X} truncated ({len} > {})", self.data.len() - 2);
            self.data = &[];
            return None;
        }
        let body = &self.data[2..2 + len];
        self.data = &self.data[2 + len..];
        Some((tag, body))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaDescriptor {
    pub ca_system_id: u16,
    pub ca_pid: u16,
}

impl CaDescriptor {
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 4 {
            return None;
        }
        Some(Self {
            ca_system_id: u16::from_be_bytes([body[0], body[1]]),
            ca_pid: (((body[2] & 0x1F) as u16) << 8) | body[3] as u16,
        })
    }
}

/// All CA descriptors of a descriptor loop.
pub fn ca_descriptors(data: &[u8]) -> Vec<CaDescriptor> {
    DescriptorIter::new(data)
        .filter(|(tag, _)| *tag == descriptor_tag::CA)
        .filter_map(|(_, body)| CaDescriptor::parse(body))
        .collect()
}

/// Vendor label of a CA system id (ETSI TS 101 162 allocations).
pub fn ca_vendor(ca_system_id: u16) -> &'static str {
    match ca_system_id {
        0x0001..=0x00FF => "Standardized",
        0x0100..=0x01FF => "Mediaguard (Canal+)",
        0x0500..=0x05FF => "Viaccess",
        0x0600..=0x06FF => "Irdeto",
        0x0900..=0x09FF => "Videoguard (NDS)",
        0x0B00..=0x0BFF => "Conax",
        0x0D00..=0x0DFF => "Cryptoworks",
        0x0E00..=0x0EFF => "PowerVu",
        0x1000..=0x10FF => "RAS (Tandberg)",
        0x1700..=0x17FF => "Betacrypt",
        0x1800..=0x18FF => "Nagravision",
        0x2200..=0x22FF => "Codicrypt",
        0x2600..=0x26FF => "BISS",
        0x2700..=0x27FF => "ICE",
        0x4A20..=0x4A2F => "AlphaCrypt",
        0x4AD0..=0x4AD1 => "XCrypt",
        0x4AE0..=0x4AE1 => "DRE-Crypt",
        0x4B00..=0x4B02 => "Tongfang",
        0x5601 => "Verimatrix",
        _ => "Unknown",
    }
}

/// Coarse role of a PID in the multiplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCategory {
    Video,
    Audio,
    Subtitle,
    Teletext,
    Data,
    Pcr,
    Psi,
    Ecm,
    Emm,
    Unknown,
}

/// Category and description of a PMT elementary stream. Private data
/// (0x06) is refined through its DVB descriptors.
pub fn classify_stream(stream_type: u8, es_descriptors: &[u8]) -> (StreamCategory, &'static str) {
    use StreamCategory::*;
    match stream_type {
        0x01 => (Video, "MPEG-1 video"),
        0x02 => (Video, "MPEG-2 video"),
        0x03 => (Audio, "MPEG-1 audio"),
        0x04 => (Audio, "MPEG-2 audio"),
        0x05 => (Data, "Private sections"),
        0x06 => classify_private(es_descriptors),
        0x0B..=0x0D => (Data, "DSM-CC"),
        0x0F => (Audio, "AAC ADTS audio"),
        0x10 => (Video, "MPEG-4 video"),
        0x11 => (Audio, "AAC LATM audio"),
        0x15 => (Data, "Metadata"),
        0x1B => (Video, "H.264 video"),
        0x24 => (Video, "HEVC video"),
        0x33 => (Video, "VVC video"),
        0x42 => (Video, "AVS video"),
        0x81 => (Audio, "AC-3 audio"),
        0x86 => (Data, "SCTE-35 splice info"),
        0x87 => (Audio, "E-AC-3 audio"),
        _ => (Unknown, "Unknown stream type"),
    }
}

fn classify_private(es_descriptors: &[u8]) -> (StreamCategory, &'static str) {
    for (tag, _) in DescriptorIter::new(es_descriptors) {
        match tag {
            descriptor_tag::AC3 => return (StreamCategory::Audio, "AC-3 audio"),
            descriptor_tag::ENHANCED_AC3 => return (StreamCategory::Audio, "E-AC-3 audio"),
            descriptor_tag::DTS => return (StreamCategory::Audio, "DTS audio"),
            descriptor_tag::AAC => return (StreamCategory::Audio, "AAC audio"),
            descriptor_tag::SUBTITLING => return (StreamCategory::Subtitle, "DVB subtitles"),
            descriptor_tag::TELETEXT => return (StreamCategory::Teletext, "Teletext"),
            _ => {}
        }
    }
    (StreamCategory::Data, "Private PES data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_and_stops_on_truncation() {
        let data = [0x09, 4, 0x05, 0x00, 0xE1, 0x00, 0x52, 1, 0x01, 0x0A, 9, 0x00];
        let items: Vec<_> = DescriptorIter::new(&data).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, 0x09);
        assert_eq!(items[1], (0x52, &[0x01][..]));
    }

    #[test]
    fn decodes_ca_descriptors() {
        let data = [0x09, 6, 0x18, 0x02, 0xE1, 0x23, 0xAA, 0xBB, 0x52, 1, 0x01];
        let cas = ca_descriptors(&data);
        assert_eq!(cas, vec![CaDescriptor { ca_system_id: 0x1802, ca_pid: 0x123 }]);
        assert_eq!(ca_vendor(0x1802), "Nagravision");
        assert_eq!(ca_vendor(0xFFFF), "Unknown");
    }

    #[test]
    fn private_data_is_refined_by_descriptors() {
        assert_eq!(classify_stream(0x06, &[0x59, 0]).0, StreamCategory::Subtitle);
        assert_eq!(classify_stream(0x06, &[0x6A, 0]).1, "AC-3 audio");
        assert_eq!(classify_stream(0x06, &[]).0, StreamCategory::Data);
        assert_eq!(classify_stream(0x1B, &[]).0, StreamCategory::Video);
    }
}
