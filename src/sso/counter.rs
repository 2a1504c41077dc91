//! Cycling mint counter.
//!
//! Only de-duplicates tickets minted within the same millisecond; it has no
//! security role and restarts from [`COUNTER_FLOOR`] on every boot.

use std::sync::atomic::{AtomicU32, Ordering};

pub const COUNTER_FLOOR: u32 = 1000;
/// First value that is never handed out; reaching it wraps back to the floor.
pub const COUNTER_CEILING: u32 = 10_000;

#[derive(Debug)]
pub struct Counter {
    value: AtomicU32,
}

impl Counter {
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(COUNTER_FLOOR)
    }

    /// Counter whose next value is `start + 1` (wrapping).
    #[must_use]
    pub const fn starting_at(start: u32) -> Self {
        Self {
            value: AtomicU32::new(start),
        }
    }

    /// Increment and return the new value, always four digits.
    pub fn next(&self) -> u32 {
        let previous = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(successor(current))
            })
            .unwrap_or(COUNTER_FLOOR);
        successor(previous)
    }

    #[must_use]
    pub fn current(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

const fn successor(current: u32) -> u32 {
    let next = current + 1;
    if next >= COUNTER_CEILING || next < COUNTER_FLOOR {
        COUNTER_FLOOR
    } else {
        next
    }
}
