//! Constants for MPEG-TS processing and TR 101 290 compliance

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_PACKET_SIZE_RS: usize = 204; // 188 + 16 Reed-Solomon parity
pub const TS_SYNC_BYTE: u8 = 0x47;

/// PID space
pub const PID_COUNT: usize = 8192;
pub const NULL_PID: u16 = 0x1FFF;

/// Well-known PIDs
pub const PAT_PID: u16 = 0x0000;
pub const CAT_PID: u16 = 0x0001;
pub const NIT_PID: u16 = 0x0010;
pub const SDT_PID: u16 = 0x0011; // SDT, BAT share 0x11
pub const EIT_PID: u16 = 0x0012;
pub const RST_PID: u16 = 0x0013;
pub const TDT_PID: u16 = 0x0014; // TDT, TOT
/// PIDs 0x0000..=0x001F are reserved for PSI/SI and never "unreferenced"
pub const LAST_RESERVED_PID: u16 = 0x001F;

/// Table ids
pub mod table_id {
    pub const PAT: u8 = 0x00;
    pub const CAT: u8 = 0x01;
    pub const PMT: u8 = 0x02;
    pub const NIT_ACTUAL: u8 = 0x40;
    pub const NIT_OTHER: u8 = 0x41;
    pub const SDT_ACTUAL: u8 = 0x42;
    pub const SDT_OTHER: u8 = 0x46;
    pub const BAT: u8 = 0x4A;
    pub const EIT_ACTUAL_PF: u8 = 0x4E;
    pub const EIT_OTHER_PF: u8 = 0x4F;
    pub const EIT_ACTUAL_SCHED_FIRST: u8 = 0x50;
    pub const EIT_ACTUAL_SCHED_LAST: u8 = 0x5F;
    pub const EIT_OTHER_SCHED_FIRST: u8 = 0x60;
    pub const EIT_OTHER_SCHED_LAST: u8 = 0x6F;
    pub const TDT: u8 = 0x70;
    pub const RST: u8 = 0x71;
    pub const TOT: u8 = 0x73;
    pub const STUFFING: u8 = 0xFF;
}

/// Descriptor tags used by the trackers
pub mod descriptor_tag {
    pub const CA: u8 = 0x09;
    pub const REGISTRATION: u8 = 0x05;
    pub const TELETEXT: u8 = 0x56;
    pub const SUBTITLING: u8 = 0x59;
    pub const AC3: u8 = 0x6A;
    pub const ENHANCED_AC3: u8 = 0x7A;
    pub const DTS: u8 = 0x7B;
    pub const AAC: u8 = 0x7C;
}

/// PCR constants
pub const PCR_CLOCK_HZ: u64 = 27_000_000; // 27 MHz
pub const PCR_WRAP: u64 = (1u64 << 33) * 300; // PCR wrap-around point
pub const PCR_SMOOTHING: f64 = 0.5;

/// TR 101 290 interval thresholds (milliseconds)
pub const PAT_MAX_INTERVAL_MS: u64 = 500;
pub const CAT_MAX_INTERVAL_MS: u64 = 500;
pub const PMT_MAX_INTERVAL_MS: u64 = 500;
pub const NIT_ACTUAL_MAX_INTERVAL_MS: u64 = 10_000;
pub const SDT_ACTUAL_MAX_INTERVAL_MS: u64 = 2_000;
pub const EIT_ACTUAL_MAX_INTERVAL_MS: u64 = 2_000;
pub const TDT_MAX_INTERVAL_MS: u64 = 30_000;
pub const OTHER_MAX_INTERVAL_MS: u64 = 10_000;
pub const SI_MIN_INTERVAL_MS: u64 = 25;
pub const UNREFERENCED_PID_MS: u64 = 500;
pub const ES_MISSING_MS: u64 = 5_000;

/// PCR thresholds
pub const PCR_REPETITION_MS: u64 = 40;
pub const PCR_DISCONTINUITY_MS: u64 = 100;
pub const PCR_ACCURACY_NS: u64 = 500;

/// Flush policy
pub const FLUSH_EVERY_PACKETS: u64 = 2000;
pub const FLUSH_INTERVAL_MS: u64 = 1000;
pub const DENSITY_BATCH_LEN: usize = 1000;
pub const DENSITY_FLUSH_MS: u64 = 200;
pub const SWEEP_EVERY_PACKETS: u64 = 64;

pub const NANOS_PER_MILLI: u64 = 1_000_000;
pub const NANOS_PER_SEC: u64 = 1_000_000_000;
