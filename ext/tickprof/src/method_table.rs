use crate::frame::Symbol;
use crate::sample_table::{Recorded, ShardedTable};
use crate::util::hash_symbol;

/// One method of the flat profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodSample {
    pub counter: u64,
    pub symbol: Symbol,
}

/// Flat profile: how often each symbol was on top of a sampled stack.
pub struct MethodTable {
    table: ShardedTable<Symbol>,
}

impl MethodTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: ShardedTable::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    // async-signal-safe
    pub fn record(&self, symbol: Symbol) -> Recorded {
        self.table.record(hash_symbol(symbol), || Some(symbol))
    }

    pub fn samples(&self) -> Vec<MethodSample> {
        self.table
            .slots()
            .into_iter()
            .map(|slot| MethodSample {
                counter: slot.counter,
                symbol: slot.payload,
            })
            .collect()
    }

    /// Live methods, most frequent first.
    pub fn sorted_samples(&self) -> Vec<MethodSample> {
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

    pub fn reset(&self) {
        self.table.reset();
    }
}
