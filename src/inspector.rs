//! Host-side wiring: frames a byte stream into packets, runs the default
//! tracer set over it and returns the report.

use std::io::{ErrorKind as IoErrorKind, Read};
use std::sync::Arc;

use bytes::{Buf, BytesMut};

use crate::config::AnalyzerConfig;
use crate::constants::*;
use crate::processor::PacketProcessor;
use crate::psi_tracker::PsiTracker;
use crate::report::{InspectorReport, MemorySink, ReportScope};
use crate::sink::SharedSink;
use crate::stats::DensityRecorder;
use crate::tr101::continuity::ContinuityDetector;
use crate::tr101::tables::TableTimingDetector;
use crate::tracer::Tracer;

const READ_CHUNK: usize = 64 * 1024;
/// Consecutive sync bytes required to lock onto a frame size.
const SYNC_LOCK_FRAMES: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config: AnalyzerConfig,
    pub scope: ReportScope,
}

/// Structural tracker, both conformance detectors and the density recorder.
pub fn build_default_tracers(config: &AnalyzerConfig, sink: SharedSink) -> Vec<Box<dyn Tracer>> {
    vec![
        Box::new(PsiTracker::new(config, sink.clone())),
        Box::new(ContinuityDetector::new(config, sink.clone())),
        Box::new(TableTimingDetector::new(config, sink.clone())),
        Box::new(DensityRecorder::new(config, sink)),
    ]
}

#[derive(Debug, PartialEq, Eq)]
enum SyncState {
    Locked { offset: usize, frame_size: usize },
    /// Nothing found yet; the first `discard` bytes can never start a frame.
    Searching { discard: usize },
}

/// Looks for `SYNC_LOCK_FRAMES` sync bytes spaced by 188 or 204 bytes.
fn find_sync(buf: &[u8]) -> SyncState {
    let span = (SYNC_LOCK_FRAMES - 1) * TS_PACKET_SIZE_RS;
    let mut offset = 0;
    while offset + span < buf.len() {
        if buf[offset] == TS_SYNC_BYTE {
            for frame_size in [TS_PACKET_SIZE, TS_PACKET_SIZE_RS] {
                if (1..SYNC_LOCK_FRAMES).all(|k| buf[offset + k * frame_size] == TS_SYNC_BYTE) {
                    return SyncState::Locked { offset, frame_size };
                }
            }
        }
        offset += 1;
    }
    SyncState::Searching { discard: offset }
}

/// Feeds a [`PacketProcessor`] from an unaligned byte stream, resyncing
/// after garbage.
struct Framer {
    buf: BytesMut,
    frame_size: Option<usize>,
    resyncs: u64,
}

impl Framer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(READ_CHUNK * 2), frame_size: None, resyncs: 0 }
    }

    fn push(&mut self, data: &[u8], processor: &mut PacketProcessor) {
        self.buf.extend_from_slice(data);
        loop {
            let frame_size = match self.frame_size {
                Some(size) => size,
                None => match find_sync(&self.buf) {
                    SyncState::Locked { offset, frame_size } => {
                        if offset > 0 {
                            log::debug!("skipped {offset} bytes before sync");
                        }
                        self.buf.advance(offset);
                        self.frame_size = Some(frame_size);
                        log::debug!("locked on {frame_size}-byte frames");
                        frame_size
                    }
                    SyncState::Searching { discard } => {
                        self.buf.advance(discard);
                        return;
                    }
                },
            };
            if self.buf.len() < frame_size {
                return;
            }
            if self.buf[0] != TS_SYNC_BYTE {
                self.resyncs += 1;
                self.frame_size = None;
                log::debug!("lost sync, searching again");
                continue;
            }
            processor.process_packet(&self.buf[..frame_size]);
            self.buf.advance(frame_size);
        }
    }

    /// Input too short to lock on: take whole 188-byte frames as they are.
    fn finish(&mut self, processor: &mut PacketProcessor) {
        if self.frame_size.is_some() {
            return;
        }
        while self.buf.len() >= TS_PACKET_SIZE {
            processor.process_packet(&self.buf[..TS_PACKET_SIZE]);
            self.buf.advance(TS_PACKET_SIZE);
        }
    }
}

/// Runs a full session over `reader` until end of input.
pub fn analyze<R: Read>(mut reader: R, options: &Options) -> anyhow::Result<InspectorReport> {
    let sink = Arc::new(MemorySink::new());
    let shared: SharedSink = sink.clone();

    let mut processor = PacketProcessor::new(options.config.time_base);
    for tracer in build_default_tracers(&options.config, shared) {
        processor.register(tracer);
    }
    processor.start();

    let mut framer = Framer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        framer.push(&chunk[..n], &mut processor);
    }
    framer.finish(&mut processor);
    processor.stop();

    log::info!(
        "analyzed {} packets ({} frames skipped, {} resyncs)",
        processor.packets(),
        processor.skipped(),
        framer.resyncs
    );
    Ok(sink.report(&options.scope))
}
