use std::fmt;

use crate::profiler::Profiler;
use crate::runtime::FailureKind;
use crate::sampler::SamplerStats;
use crate::util::percentage;

/// Text reports over a snapshot of a profiler's tables. Sampling may go on
/// while a report is written; each counter is read once.
pub struct Reporter<'a> {
    profiler: &'a Profiler,
    stats: SamplerStats,
}

impl<'a> Reporter<'a> {
    pub fn new(profiler: &'a Profiler) -> Self {
        Self {
            profiler,
            stats: profiler.stats(),
        }
    }

    pub fn summary(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let attempts = self.stats.attempts;
        writeln!(out, "--- Execution profile ---")?;
        writeln!(out, "{:<24}{}", "Total samples:", self.stats.samples)?;
        for kind in FailureKind::ALL {
            Self::nonzero_summary(out, kind.label(), self.stats.failure(kind), attempts)?;
        }
        Self::nonzero_summary(out, "Frame buffer full", self.stats.frame_buffer_full, attempts)?;

        if let Some(frame_buffer) = self.profiler.frame_buffer() {
            if frame_buffer.overflowed() {
                writeln!(
                    out,
                    "Frame buffer overflowed with size {}. Consider increasing its size.",
                    frame_buffer.capacity()
                )?;
            }
        }
        writeln!(out)
    }

    fn nonzero_summary(out: &mut impl fmt::Write, title: &str, count: u64, total: u64) -> fmt::Result {
        if count == 0 {
            return Ok(());
        }
        let title = format!("{}:", title);
        writeln!(out, "{:<24}{} ({:.2}%)", title, count, percentage(count, total))
    }

    pub fn dump_traces(&self, out: &mut impl fmt::Write, max_traces: usize) -> fmt::Result {
        let Some(frame_buffer) = self.profiler.frame_buffer() else {
            return Ok(());
        };
        let total = self.stats.samples;
        for trace in self.profiler.traces().sorted_samples().iter().take(max_traces) {
            writeln!(
                out,
                "Samples: {} ({:.2}%)",
                trace.counter,
                percentage(trace.counter, total)
            )?;
            for (i, frame) in frame_buffer.frames(trace.frames).iter().enumerate() {
                writeln!(out, "  [{:>2}] {}", i, self.profiler.symbol_name(frame.symbol))?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    pub fn dump_methods(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let total = self.stats.samples;
        for method in self.profiler.methods().sorted_samples() {
            writeln!(
                out,
                "{:>10} ({:>5.2}%) {}",
                method.counter,
                percentage(method.counter, total),
                self.profiler.symbol_name(method.symbol)
            )?;
        }
        Ok(())
    }

    // root;caller;callee 42
    pub fn dump_raw_traces(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let Some(frame_buffer) = self.profiler.frame_buffer() else {
            return Ok(());
        };
        for trace in self.profiler.traces().samples() {
            let stack: Vec<String> = frame_buffer
                .frames(trace.frames)
                .iter()
                .rev()
                .map(|frame| self.profiler.symbol_name(frame.symbol))
                .collect();
            writeln!(out, "{} {}", stack.join(";"), trace.counter)?;
        }
        Ok(())
    }
}
