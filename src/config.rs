//! Analyzer configuration. Every field has a default matching the
//! TR 101 290 recommendations, so an empty JSON object is a valid config.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Where the stream time of a packet comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TimeBase {
    /// Wall clock elapsed since the session started (live input).
    #[default]
    WallClock,
    /// Derived from the packet position at a nominal mux bitrate
    /// (deterministic analysis of recorded input).
    Bitrate { bits_per_second: u64 },
}

/// Interval thresholds of the conformance checks, in milliseconds unless
/// the name says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingPolicy {
    pub pat_max_ms: u64,
    pub cat_max_ms: u64,
    pub pmt_max_ms: u64,
    pub nit_actual_max_ms: u64,
    pub sdt_actual_max_ms: u64,
    pub eit_actual_max_ms: u64,
    pub tdt_max_ms: u64,
    pub other_max_ms: u64,
    pub si_min_ms: u64,
    pub unreferenced_pid_ms: u64,
    pub es_missing_ms: u64,
    pub pcr_repetition_ms: u64,
    pub pcr_discontinuity_ms: u64,
    pub pcr_accuracy_ns: u64,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            pat_max_ms: PAT_MAX_INTERVAL_MS,
            cat_max_ms: CAT_MAX_INTERVAL_MS,
            pmt_max_ms: PMT_MAX_INTERVAL_MS,
            nit_actual_max_ms: NIT_ACTUAL_MAX_INTERVAL_MS,
            sdt_actual_max_ms: SDT_ACTUAL_MAX_INTERVAL_MS,
            eit_actual_max_ms: EIT_ACTUAL_MAX_INTERVAL_MS,
            tdt_max_ms: TDT_MAX_INTERVAL_MS,
            other_max_ms: OTHER_MAX_INTERVAL_MS,
            si_min_ms: SI_MIN_INTERVAL_MS,
            unreferenced_pid_ms: UNREFERENCED_PID_MS,
            es_missing_ms: ES_MISSING_MS,
            pcr_repetition_ms: PCR_REPETITION_MS,
            pcr_discontinuity_ms: PCR_DISCONTINUITY_MS,
            pcr_accuracy_ns: PCR_ACCURACY_NS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub time_base: TimeBase,
    pub timing: TimingPolicy,
    /// Counter flush: whichever of packets / stream time comes first.
    pub flush_every_packets: u64,
    pub flush_interval_ms: u64,
    pub density_batch_len: usize,
    pub density_flush_ms: u64,
    /// Stride of the round-robin absence sweep of the table detector.
    pub sweep_every_packets: u64,
    /// Police DVB SI tables (NIT, SDT, EIT, TDT); off for plain MPEG-2 muxes.
    pub dvb_si_checks: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            time_base: TimeBase::default(),
            timing: TimingPolicy::default(),
            flush_every_packets: FLUSH_EVERY_PACKETS,
            flush_interval_ms: FLUSH_INTERVAL_MS,
            density_batch_len: DENSITY_BATCH_LEN,
            density_flush_ms: DENSITY_FLUSH_MS,
            sweep_every_packets: SWEEP_EVERY_PACKETS,
            dvb_si_checks: true,
        }
    }
}

impl AnalyzerConfig {
    /// Loads a JSON config file; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}
