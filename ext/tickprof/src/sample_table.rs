use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::spin_lock::SpinLock;

pub const CONCURRENCY_LEVEL: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    Incremented,
    // Every slot of the shard's region is taken by other keys
    TableFull,
    // The payload could not be stored (frame buffer overflow)
    Rejected,
}

// Shard `s` owns the slots `i` with `i % CONCURRENCY_LEVEL == s`. Probing
// starts at `hash % capacity` and advances by `CONCURRENCY_LEVEL`, so a key
// only ever touches slots of its own shard and the shard lock serialises
// every write to them. A slot is published by storing its hash last; hash 0
// marks an empty slot.
pub(crate) struct ShardedTable<P> {
    hashes: Box<[AtomicU64]>,
    counters: Box<[AtomicU64]>,
    payloads: Box<[UnsafeCell<P>]>,
    locks: [SpinLock<()>; CONCURRENCY_LEVEL],
}

unsafe impl<P: Send> Sync for ShardedTable<P> {}
unsafe impl<P: Send> Send for ShardedTable<P> {}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Slot<P> {
    pub hash: u64,
    pub counter: u64,
    pub payload: P,
}

impl<P: Copy + Default> ShardedTable<P> {
    // Rounded up to a multiple of CONCURRENCY_LEVEL
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).div_ceil(CONCURRENCY_LEVEL) * CONCURRENCY_LEVEL;
        Self {
            hashes: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            counters: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            payloads: (0..capacity).map(|_| UnsafeCell::new(P::default())).collect(),
            locks: std::array::from_fn(|_| SpinLock::new(())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.hashes.len()
    }

    // `store` runs at most once, under the shard lock, when the key takes a
    // new slot. It returns None to refuse the insertion.
    // async-signal-safe
    pub fn record<F>(&self, hash: u64, store: F) -> Recorded
    where
        F: FnOnce() -> Option<P>,
    {
        let hash = if hash == 0 { 1 } else { hash };
        let capacity = self.capacity();
        let _guard = self.locks[(hash % CONCURRENCY_LEVEL as u64) as usize].lock();

        let mut slot = (hash % capacity as u64) as usize;
        for _ in 0..capacity / CONCURRENCY_LEVEL {
            match self.hashes[slot].load(Ordering::Relaxed) {
                0 => {
                    let Some(payload) = store() else {
                        return Recorded::Rejected;
                    };
                    unsafe { *self.payloads[slot].get() = payload };
                    self.counters[slot].store(1, Ordering::Relaxed);
                    self.hashes[slot].store(hash, Ordering::Release);
                    return Recorded::Inserted;
                }
                existing if existing == hash => {
                    // Saturates at u64::MAX instead of wrapping
                    let _ = self.counters[slot].fetch_update(
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                        |counter| counter.checked_add(1),
                    );
                    return Recorded::Incremented;
                }
                _ => slot = (slot + CONCURRENCY_LEVEL) % capacity,
            }
        }
        Recorded::TableFull
    }

    // Counters are read once each, without pausing writers
    pub fn slots(&self) -> Vec<Slot<P>> {
        self.hashes
            .iter()
            .enumerate()
            .filter_map(|(i, hash)| {
                let hash = hash.load(Ordering::Acquire);
                if hash == 0 {
                    return None;
                }
                Some(Slot {
                    hash,
                    counter: self.counters[i].load(Ordering::Relaxed),
                    payload: unsafe { *self.payloads[i].get() },
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hashes
            .iter()
            .filter(|hash| hash.load(Ordering::Relaxed) != 0)
            .count()
    }

    pub fn reset(&self) {
        for (shard, lock) in self.locks.iter().enumerate() {
            let _guard = lock.lock();
            for slot in (shard..self.capacity()).step_by(CONCURRENCY_LEVEL) {
                self.hashes[slot].store(0, Ordering::Release);
                self.counters[slot].store(0, Ordering::Relaxed);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_counter(&self, hash: u64, counter: u64) {
        let capacity = self.capacity();
        let mut slot = (hash % capacity as u64) as usize;
        for _ in 0..capacity / CONCURRENCY_LEVEL {
            if self.hashes[slot].load(Ordering::Relaxed) == hash {
                self.counters[slot].store(counter, Ordering::Relaxed);
                return;
            }
            slot = (slot + CONCURRENCY_LEVEL) % capacity;
        }
        panic!("hash {hash:#x} is not in the table");
    }
}
