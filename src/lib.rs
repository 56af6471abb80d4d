//! Structural and TR 101 290 compliance analysis of MPEG-2 transport
//! streams.
//!
//! A [`processor::PacketProcessor`] hands packets and reassembled sections
//! to a fixed set of [`tracer::Tracer`]s, which persist what they find
//! through a [`sink::StorageSink`].

pub mod config;
pub mod constants;
pub mod error;
pub mod inspector;
pub mod packet;
pub mod processor;
pub mod psi;
pub mod psi_tracker;
pub mod report;
pub mod sink;
pub mod stats;
pub mod tr101;
pub mod tracer;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{AnalyzerConfig, TimeBase, TimingPolicy};
pub use error::TsError;
pub use report::{InspectorReport, MemorySink, ReportScope};
pub use tracer::{ChannelRegistrar, SessionEvent, Tracer};
