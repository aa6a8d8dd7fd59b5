use crate::frame::{Frame, FrameRange};
use crate::frame_buffer::FrameBuffer;
use crate::sample_table::{Recorded, ShardedTable};
use crate::util::hash_call_trace;

/// One deduplicated call path and how often it was sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallTraceSample {
    pub counter: u64,
    pub frames: FrameRange,
}

/// Fixed-capacity concurrent multiset of call traces. Frames live in the
/// session's [`FrameBuffer`]; the table only keeps their range.
pub struct CallTraceTable {
    table: ShardedTable<FrameRange>,
}

impl CallTraceTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: ShardedTable::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns [`Recorded::Rejected`] when a new trace does not fit in
    /// `frame_buffer`; nothing is stored in that case.
    // async-signal-safe
    pub fn record(&self, frames: &[Frame], frame_buffer: &FrameBuffer) -> Recorded {
        self.table
            .record(hash_call_trace(frames), || frame_buffer.push(frames))
    }

    /// Live traces in slot order.
    pub fn samples(&self) -> Vec<CallTraceSample> {
        self.table
            .slots()
            .into_iter()
            .map(|slot| CallTraceSample {
                counter: slot.counter,
                frames: slot.payload,
            })
            .collect()
    }

    /// Live traces, most frequent first.
    pub fn sorted_samples(&self) -> Vec<CallTraceSample> {
        let mut samples = self.samples();
        samples.sort_by(|a, b| b.counter.cmp(&a.counter));
        samples
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every trace together with the frames they reference.
    pub fn reset(&self, frame_buffer: &FrameBuffer) {
        // Must rewind the buffer first. A record that reserved from the old
        // cursor still holds its shard lock, so the shard reset waits for it
        // and clears its slot.
        frame_buffer.reset();
        self.table.reset();
    }

    #[cfg(test)]
    pub(crate) fn set_counter(&self, frames: &[Frame], counter: u64) {
        let hash = match hash_call_trace(frames) {
            0 => 1,
            hash => hash,
        };
        self.table.set_counter(hash, counter);
    }
}
