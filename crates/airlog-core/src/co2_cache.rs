//! Latest CO₂ reading shared between the poller and the record formatter

use core::sync::atomic::{AtomicU32, Ordering};

/// Marker for "no reading cached". Never produced by the parser, which
/// rejects values that do not fit below it.
const EMPTY: u32 = u32::MAX;

/// Single-slot CO₂ cache.
///
/// Value and availability live in one atomic word, so a reader can never
/// observe a flag without its value. The poller is the only writer; the
/// formatter is the only taker.
pub struct Co2Cache {
    slot: AtomicU32,
}

impl Co2Cache {
    pub const fn new() -> Self {
        Self {
            slot: AtomicU32::new(EMPTY),
        }
    }

    /// Store a fresh reading, replacing any unconsumed one.
    pub fn store(&self, ppm: u32) {
        self.slot.store(ppm.min(EMPTY - 1), Ordering::Release);
    }

    /// Take the cached reading, leaving the cache empty.
    pub fn take(&self) -> Option<u32> {
        match self.slot.swap(EMPTY, Ordering::AcqRel) {
            EMPTY => None,
            ppm => Some(ppm),
        }
    }

    /// Look at the cached reading without consuming it.
    pub fn peek(&self) -> Option<u32> {
        match self.slot.load(Ordering::Acquire) {
            EMPTY => None,
            ppm => Some(ppm),
        }
    }

    pub fn is_available(&self) -> bool {
        self.peek().is_some()
    }
}

impl Default for Co2Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears_cache() {
        let cache = Co2Cache::new();
        assert_eq!(cache.take(), None);

        cache.store(412);
        assert!(cache.is_available());
        assert_eq!(cache.take(), Some(412));
        assert_eq!(cache.take(), None);
    }

    #[test]
    fn test_store_overwrites_stale_value() {
        let cache = Co2Cache::new();
        cache.store(400);
        cache.store(415);
        assert_eq!(cache.peek(), Some(415));
        assert_eq!(cache.take(), Some(415));
    }

    #[test]
    fn test_zero_ppm_is_a_valid_reading() {
        let cache = Co2Cache::new();
        cache.store(0);
        assert_eq!(cache.take(), Some(0));
    }
}
