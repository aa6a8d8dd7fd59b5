use std::time::Duration;

use crate::frame::{Frame, Symbol};

// MurmurHash64A constants
const M: u64 = 0xc6a4a7935bd1e995;
const R: u32 = 47;

fn mix(h: u64, word: u64) -> u64 {
    let mut k = word.wrapping_mul(M);
    k ^= k >> R;
    k = k.wrapping_mul(M);
    (h ^ k).wrapping_mul(M)
}

fn finish(mut h: u64) -> u64 {
    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

fn mix_symbol(h: u64, symbol: Symbol) -> u64 {
    let (tag, payload) = symbol.encode();
    mix(mix(h, u64::from(tag)), payload)
}

/// Hash of a frame sequence, bytecode indices included: a stored trace
/// always matches the frames of every occurrence it counts.
// async-signal-safe
pub fn hash_call_trace(frames: &[Frame]) -> u64 {
    let h = (frames.len() as u64).wrapping_mul(M);
    finish(frames.iter().fold(h, |h, frame| {
        mix(mix_symbol(h, frame.symbol), frame.bci as u32 as u64)
    }))
}

// async-signal-safe
pub fn hash_symbol(symbol: Symbol) -> u64 {
    finish(mix_symbol(M, symbol))
}

pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

pub fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
