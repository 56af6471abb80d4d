// src/tr101/mod.rs
//! TR 101 290 error kinds, one-shot latches and per-kind counters shared by
//! the continuity and table detectors.

pub mod context;
pub mod continuity;
pub mod tables;

use serde::Serialize;

use crate::types::Tr290Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Priority 1
    PatInterval,
    PatScrambled,
    ContinuityCount,
    PmtInterval,
    PmtScrambled,
    PidMissing,
    // Priority 2
    TransportError,
    CrcError,
    PcrRepetition,
    PcrDiscontinuity,
    PcrAccuracy,
    CatInterval,
    // Priority 3
    NitActualInterval,
    NitOtherInterval,
    UnreferencedPid,
    SdtActualInterval,
    SdtOtherInterval,
    EitActualInterval,
    EitOtherInterval,
    RstInterval,
    TdtInterval,
}

impl ErrorKind {
    pub fn priority(self) -> u8 {
        use ErrorKind::*;
        match self {
            PatInterval | PatScrambled | ContinuityCount | PmtInterval | PmtScrambled | PidMissing => 1,
            TransportError | CrcError | PcrRepetition | PcrDiscontinuity | PcrAccuracy | CatInterval => 2,
            _ => 3,
        }
    }

    /// TR 101 290 indicator number, e.g. `1.3.a`.
    pub fn indicator(self) -> &'static str {
        use ErrorKind::*;
        match self {
            PatInterval | PatScrambled => "1.3.a",
            ContinuityCount => "1.4",
            PmtInterval | PmtScrambled => "1.5.a",
            PidMissing => "1.6",
            TransportError => "2.1",
            CrcError => "2.2",
            PcrRepetition => "2.3.a",
            PcrDiscontinuity => "2.3.b",
            PcrAccuracy => "2.4",
            CatInterval => "2.6",
            NitActualInterval | NitOtherInterval => "3.1.a",
            UnreferencedPid => "3.4.a",
            SdtActualInterval | SdtOtherInterval => "3.5.a",
            EitActualInterval | EitOtherInterval => "3.6.a",
            RstInterval => "3.7",
            TdtInterval => "3.8",
        }
    }
}

/// One-shot fault flag: an armed latch fires once, then stays quiet until
/// the recovery condition re-arms it. A disarmed latch never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Latch {
    Disarmed,
    #[default]
    Armed,
    Fired,
}

impl Latch {
    /// True exactly once per episode.
    pub fn fire(&mut self) -> bool {
        if *self == Latch::Armed {
            *self = Latch::Fired;
            true
        } else {
            false
        }
    }

    /// Recovery: a fired latch may fire again.
    pub fn rearm(&mut self) {
        if *self == Latch::Fired {
            *self = Latch::Armed;
        }
    }

    pub fn arm(&mut self) {
        *self = Latch::Armed;
    }

    pub fn disarm(&mut self) {
        *self = Latch::Disarmed;
    }
}

/// Event counters grouped by TR 101 290 priority.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tr101Metrics {
    // Priority 1
    pub pat_errors: u64,                // 1.3.a
    pub continuity_counter_errors: u64, // 1.4
    pub pmt_errors: u64,                // 1.5.a
    pub pid_errors: u64,                // 1.6

    // Priority 2
    pub transport_errors: u64,          // 2.1
    pub crc_errors: u64,                // 2.2
    pub pcr_repetition_errors: u64,     // 2.3.a
    pub pcr_discontinuity_errors: u64,  // 2.3.b
    pub pcr_accuracy_errors: u64,       // 2.4
    pub cat_errors: u64,                // 2.6

    // Priority 3
    pub nit_errors: u64,                // 3.1.a
    pub unreferenced_pids: u64,         // 3.4.a
    pub sdt_errors: u64,                // 3.5.a
    pub eit_errors: u64,                // 3.6.a
    pub rst_errors: u64,                // 3.7
    pub tdt_errors: u64,                // 3.8
}

impl Tr101Metrics {
    pub fn record(&mut self, kind: ErrorKind) {
        use ErrorKind::*;
        let counter = match kind {
            PatInterval | PatScrambled => &mut self.pat_errors,
            ContinuityCount => &mut self.continuity_counter_errors,
            PmtInterval | PmtScrambled => &mut self.pmt_errors,
            PidMissing => &mut self.pid_errors,
            TransportError => &mut self.transport_errors,
            CrcError => &mut self.crc_errors,
            PcrRepetition => &mut self.pcr_repetition_errors,
            PcrDiscontinuity => &mut self.pcr_discontinuity_errors,
            PcrAccuracy => &mut self.pcr_accuracy_errors,
            CatInterval => &mut self.cat_errors,
            NitActualInterval | NitOtherInterval => &mut self.nit_errors,
            UnreferencedPid => &mut self.unreferenced_pids,
            SdtActualInterval | SdtOtherInterval => &mut self.sdt_errors,
            EitActualInterval | EitOtherInterval => &mut self.eit_errors,
            RstInterval => &mut self.rst_errors,
            TdtInterval => &mut self.tdt_errors,
        };
        *counter += 1;
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Tr290Event>) -> Self {
        let mut m = Self::default();
        for e in events {
            m.record(e.kind);
        }
        m
    }

    pub fn priority_totals(&self) -> [u64; 3] {
        [
            self.pat_errors + self.continuity_counter_errors + self.pmt_errors + self.pid_errors,
            self.transport_errors
                + self.crc_errors
                + self.pcr_repetition_errors
                + self.pcr_discontinuity_errors
                + self.pcr_accuracy_errors
                + self.cat_errors,
            self.nit_errors
                + self.unreferenced_pids
                + self.sdt_errors
                + self.eit_errors
                + self.rst_errors
                + self.tdt_errors,
        ]
    }
}
