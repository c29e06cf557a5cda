//! Per-source liveness bitset

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fixed-size bitset of active sources, shared between the writer and the
/// real-time side
///
/// Cloning shares the same bits. The size is fixed at construction and
/// matches the source table; indices past the end read as inactive.
#[derive(Debug, Clone)]
pub struct ActiveMask {
    words: Arc<[AtomicU64]>,
    len: usize,
}

impl ActiveMask {
    /// All `len` sources active
    pub fn new(len: usize) -> Self {
        let words: Vec<AtomicU64> = (0..len.div_ceil(64)).map(|_| AtomicU64::new(0)).collect();
        let mask = Self {
            words: words.into(),
            len,
        };
        mask.set_all(true);
        mask
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_active(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[index / 64].load(Ordering::Relaxed) & (1 << (index % 64)) != 0
    }

    pub fn set(&self, index: usize, active: bool) {
        if index >= self.len {
            return;
        }
        let bit = 1u64 << (index % 64);
        if active {
            self.words[index / 64].fetch_or(bit, Ordering::Relaxed);
        } else {
            self.words[index / 64].fetch_and(!bit, Ordering::Relaxed);
        }
    }

    pub fn set_all(&self, active: bool) {
        for (i, word) in self.words.iter().enumerate() {
            let bits = if active {
                let remaining = self.len - i * 64;
                if remaining >= 64 {
                    u64::MAX
                } else {
                    (1u64 << remaining) - 1
                }
            } else {
                0
            };
            word.store(bits, Ordering::Relaxed);
        }
    }

    pub fn count_active(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}
