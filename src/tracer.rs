//! Contract between the packet/section source and the trackers.
//!
//! Each tracker implements [`Tracer`] and is registered explicitly by the
//! host. The source hands every packet to every tracker, and each completed
//! section only to the trackers holding a subscription on its PID.

use crate::constants::PID_COUNT;
use crate::packet::TsPacket;
use crate::psi::Section;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Started,
    /// Last position and stream time seen before the stop.
    Stopped { position: u64, time_ns: u64 },
}

/// Proof of a section subscription; consumed by `unsubscribe`.
#[derive(Debug, PartialEq, Eq)]
pub struct ChannelHandle {
    pid: u16,
}

impl ChannelHandle {
    pub fn pid(&self) -> u16 {
        self.pid
    }
}

pub trait ChannelRegistrar {
    fn subscribe_section(&mut self, pid: u16) -> ChannelHandle;
    fn unsubscribe(&mut self, handle: ChannelHandle);
}

pub trait Tracer: Send {
    fn name(&self) -> &'static str;

    /// Called once at session start, before the first packet.
    fn configure(&mut self, channels: &mut dyn ChannelRegistrar);

    fn on_packet(&mut self, packet: &TsPacket<'_>, channels: &mut dyn ChannelRegistrar);

    fn on_section(&mut self, _section: &Section, _channels: &mut dyn ChannelRegistrar) {}

    /// `Stopped` must flush pending batches and counters, then drop all
    /// per-PID state.
    fn on_session_event(&mut self, event: SessionEvent);
}

/// Per-tracer subscription table, reference counted per PID.
#[derive(Debug, Clone)]
pub struct SectionChannels {
    refs: Vec<u16>,
}

impl SectionChannels {
    pub fn new() -> Self {
        Self { refs: vec![0; PID_COUNT] }
    }

    pub fn is_subscribed(&self, pid: u16) -> bool {
        self.refs.get(pid as usize).is_some_and(|&n| n > 0)
    }

    pub fn clear(&mut self) {
        self.refs.fill(0);
    }
}

impl Default for SectionChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistrar for SectionChannels {
    fn subscribe_section(&mut self, pid: u16) -> ChannelHandle {
        let pid = pid & 0x1FFF;
        self.refs[pid as usize] = self.refs[pid as usize].saturating_add(1);
        ChannelHandle { pid }
    }

    fn unsubscribe(&mut self, handle: ChannelHandle) {
        let n = &mut self.refs[handle.pid as usize];
        *n = n.saturating_sub(1);
    }
}

/// Fires when either a packet budget or a stream-time budget is used up,
/// whichever comes first, so low-rate streams still flush regularly.
#[derive(Debug, Clone)]
pub struct FlushSchedule {
    every_packets: u64,
    interval_ns: u64,
    packets: u64,
    last_ns: Option<u64>,
}

impl FlushSchedule {
    pub fn new(every_packets: u64, interval_ns: u64) -> Self {
        Self { every_packets: every_packets.max(1), interval_ns, packets: 0, last_ns: None }
    }

    /// Counts one packet; true when a flush is due.
    pub fn tick(&mut self, time_ns: u64) -> bool {
        self.packets += 1;
        let last = *self.last_ns.get_or_insert(time_ns);
        if self.packets >= self.every_packets || time_ns.saturating_sub(last) >= self.interval_ns {
            self.reset(time_ns);
            return true;
        }
        false
    }

    pub fn reset(&mut self, time_ns: u64) {
        self.packets = 0;
        self.last_ns = Some(time_ns);
    }
}
