use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::CodeCacheError;
use crate::frame::Symbol;

const FREE: u8 = 0;

// Seqlock-protected range. Writers hold the cache's writer lock; a reader
// that observes a concurrent write reports a miss.
#[derive(Debug, Default)]
struct CodeEntry {
    // Odd while a writer updates the entry
    sequence: AtomicU64,
    start: AtomicUsize,
    end: AtomicUsize,
    tag: AtomicU8,
    payload: AtomicU64,
}

impl CodeEntry {
    fn is_live(&self) -> bool {
        self.tag.load(Ordering::Relaxed) != FREE
    }

    fn update(&self, write: impl FnOnce(&Self)) {
        let sequence = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        write(self);
        self.sequence.store(sequence.wrapping_add(2), Ordering::Release);
    }

    fn set(&self, start: usize, end: usize, symbol: Symbol) {
        let (tag, payload) = symbol.encode();
        self.update(|entry| {
            entry.start.store(start, Ordering::Relaxed);
            entry.end.store(end, Ordering::Relaxed);
            entry.payload.store(payload, Ordering::Relaxed);
            entry.tag.store(tag, Ordering::Relaxed);
        });
    }

    fn clear(&self) {
        self.update(|entry| entry.tag.store(FREE, Ordering::Relaxed));
    }

    fn symbol(&self) -> Option<Symbol> {
        Symbol::decode(self.tag.load(Ordering::Relaxed), self.payload.load(Ordering::Relaxed))
    }

    // async-signal-safe
    fn lookup(&self, address: usize) -> Option<Symbol> {
        let before = self.sequence.load(Ordering::Acquire);
        if before % 2 != 0 {
            return None;
        }
        let start = self.start.load(Ordering::Relaxed);
        let end = self.end.load(Ordering::Relaxed);
        let symbol = self.symbol();
        fence(Ordering::Acquire);
        if self.sequence.load(Ordering::Relaxed) != before || address < start || address >= end {
            return None;
        }
        symbol
    }
}

/// Address ranges of one code-owning entity (a native library or the
/// runtime's generated code) mapped to symbols.
///
/// Writers are serialised by an internal mutex and never run in a signal
/// handler. [`CodeCache::find`] is lock-free: a lookup racing a write sees
/// either the old or the new state of an entry, or misses.
#[derive(Debug)]
pub struct CodeCache {
    name: String,
    entries: Box<[CodeEntry]>,
    len: AtomicUsize,
    low: AtomicUsize,
    high: AtomicUsize,
    // Published entries are ordered by start address and never change
    sorted: AtomicBool,
    writer: Mutex<()>,
}

impl CodeCache {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            entries: (0..capacity).map(|_| CodeEntry::default()).collect(),
            len: AtomicUsize::new(0),
            low: AtomicUsize::new(usize::MAX),
            high: AtomicUsize::new(0),
            sorted: AtomicBool::new(false),
            writer: Mutex::new(()),
        }
    }

    /// Builds a read-mostly cache from `(address, size, symbol)` triples.
    /// Empty ranges and ranges overlapping an earlier one are skipped.
    pub fn from_ranges(
        name: impl Into<String>,
        mut ranges: Vec<(usize, usize, Symbol)>,
    ) -> Self {
        ranges.sort_by_key(|(address, _, _)| *address);
        let cache = Self::new(name, ranges.len());
        let mut previous_end = 0;
        let mut len = 0;
        for (address, size, symbol) in ranges {
            if size == 0 || address < previous_end {
                continue;
            }
            let end = address.saturating_add(size);
            cache.entries[len].set(address, end, symbol);
            cache.low.fetch_min(address, Ordering::Relaxed);
            cache.high.fetch_max(end, Ordering::Relaxed);
            previous_end = end;
            len += 1;
        }
        cache.sorted.store(true, Ordering::Relaxed);
        cache.len.store(len, Ordering::Release);
        cache
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.published().iter().filter(|entry| entry.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn published(&self) -> &[CodeEntry] {
        &self.entries[..self.len.load(Ordering::Acquire)]
    }

    /// Maps `[address, address + size)` to `symbol`. Live entries overlapping
    /// the new range are evicted: the runtime only reuses code memory after
    /// the previous occupant is gone.
    pub fn add(&self, address: usize, size: usize, symbol: Symbol) -> Result<(), CodeCacheError> {
        if size == 0 {
            return Err(CodeCacheError::EmptyRange { address });
        }
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let end = address.saturating_add(size);
        let len = self.len.load(Ordering::Relaxed);

        for entry in &self.entries[..len] {
            if entry.is_live()
                && entry.start.load(Ordering::Relaxed) < end
                && address < entry.end.load(Ordering::Relaxed)
            {
                entry.clear();
            }
        }

        let slot = if len < self.capacity() {
            len
        } else {
            self.entries
                .iter()
                .position(|entry| !entry.is_live())
                .ok_or_else(|| CodeCacheError::Full {
                    name: self.name.clone(),
                    capacity: self.capacity(),
                })?
        };

        // Binary search is only valid for caches built by from_ranges
        self.sorted.store(false, Ordering::Relaxed);

        // Widen the prefilter before the entry becomes visible
        self.low.fetch_min(address, Ordering::Relaxed);
        self.high.fetch_max(end, Ordering::Relaxed);
        self.entries[slot].set(address, end, symbol);
        if slot == len {
            self.len.store(len + 1, Ordering::Release);
        }
        Ok(())
    }

    /// Removes the entry starting at `address` if it still maps to `symbol`.
    /// A miss is not an error: unload notifications may overtake the load.
    pub fn remove(&self, address: usize, symbol: Symbol) -> bool {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in self.published() {
            if entry.start.load(Ordering::Relaxed) == address && entry.symbol() == Some(symbol) {
                entry.clear();
                return true;
            }
        }
        false
    }

    // async-signal-safe
    pub fn find(&self, address: usize) -> Option<Symbol> {
        if address < self.low.load(Ordering::Relaxed) || address >= self.high.load(Ordering::Relaxed)
        {
            return None;
        }
        let entries = self.published();
        if self.sorted.load(Ordering::Relaxed) {
            let index = entries.partition_point(|entry| entry.start.load(Ordering::Relaxed) <= address);
            entries.get(index.checked_sub(1)?)?.lookup(address)
        } else {
            entries.iter().find_map(|entry| entry.lookup(address))
        }
    }
}
