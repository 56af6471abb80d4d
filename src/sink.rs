//! Storage Sink contract: everything the trackers persist goes through it.

use std::sync::Arc;

use crate::types::{
    CaSystemStream, DensityBatchId, ElementaryStream, MpegProgram, PcrCheck, PcrSample, SourceUpdate,
    StreamDensityBulk, TableKind, Tr290Event,
};

/// Writes are fire-and-forget from the tracker's side: implementations do
/// their own batching and must not block the caller for long. Records keyed
/// by PID or program number are upserted.
pub trait StorageSink: Send + Sync {
    fn update_source(&self, update: SourceUpdate);

    fn add_program(&self, program: &MpegProgram);
    fn update_program(&self, program: &MpegProgram);
    /// Drops every program and the stream usages registered from PMTs.
    fn clear_programs(&self);

    fn add_stream_usage(&self, stream: &ElementaryStream);
    fn update_stream_scrambling(&self, pid: u16, scrambled: bool);
    fn add_ca_stream(&self, stream: &CaSystemStream);

    fn add_pcr(&self, sample: &PcrSample);
    fn add_pcr_check(&self, check: &PcrCheck);

    fn add_error_event(&self, event: &Tr290Event);
    fn accumulate_stream_errors(&self, pid: u16, transport_errors: u64, continuity_errors: u64);

    /// Opens a batch and returns its handle.
    fn add_density_batch(&self, pid: u16, start_position: u64) -> DensityBatchId;
    /// Stores the flushed content and closes the batch.
    fn update_density_batch(&self, bulk: &StreamDensityBulk);

    fn add_private_section(&self, kind: TableKind, pid: u16, position: u64, bytes: &[u8]);
}

pub type SharedSink = Arc<dyn StorageSink>;
