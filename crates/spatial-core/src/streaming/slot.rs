//! Chunk buffer slots and their state machine
//!
//! ```text
//!   Empty ──claim──► Loading ──ok──► Ready ──switch──► Playing
//!     ▲                 │              │                  │
//!     └─────failure─────┘              └──evict/reset──┐  │
//!     ▲                                                │  │
//!     └────────────────────────────────────────────────┴──┘ demote/reset
//! ```
//!
//! The state word decides who may touch the samples: the loader writes only
//! a slot it moved to Loading, the real-time side reads only the Playing
//! slot. The sample mutex therefore never sees contention in a valid state
//! sequence, and the real-time side only ever uses `try_lock`.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

use crossbeam::utils::CachePadded;

/// Lifecycle of one chunk slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Free for the loader to claim
    Empty = 0,
    /// Being filled by the loader (or by the fallback path)
    Loading = 1,
    /// Filled and eligible for playback
    Ready = 2,
    /// Selected for playback
    Playing = 3,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SlotState::Loading,
            2 => SlotState::Ready,
            3 => SlotState::Playing,
            _ => SlotState::Empty,
        }
    }
}

/// One fixed-capacity planar chunk buffer
pub(crate) struct ChunkSlot {
    state: CachePadded<AtomicU8>,
    chunk_start: AtomicU64,
    valid_frames: AtomicUsize,
    /// `channels * chunk_frames` samples, channel-major
    samples: Mutex<Box<[f32]>>,
}

impl ChunkSlot {
    pub(crate) fn new(channels: usize, chunk_frames: usize) -> Self {
        Self {
            state: CachePadded::new(AtomicU8::new(SlotState::Empty as u8)),
            chunk_start: AtomicU64::new(0),
            valid_frames: AtomicUsize::new(0),
            samples: Mutex::new(vec![0.0; channels * chunk_frames].into_boxed_slice()),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Chunk start frame; set when the slot is claimed, before the fill
    #[inline]
    pub(crate) fn chunk_start(&self) -> u64 {
        self.chunk_start.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn valid_frames(&self) -> usize {
        self.valid_frames.load(Ordering::Acquire)
    }

    /// True if the slot is in `state` and holds `chunk_start`
    #[inline]
    pub(crate) fn holds(&self, state: SlotState, chunk_start: u64) -> bool {
        self.state() == state && self.chunk_start() == chunk_start
    }

    /// Atomic compare-and-set of the state word
    pub(crate) fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditional state store; only for the owner of the current state
    pub(crate) fn set_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Record what the slot now holds; call before publishing Ready/Playing
    pub(crate) fn set_contents(&self, chunk_start: u64, valid_frames: usize) {
        self.chunk_start.store(chunk_start, Ordering::Release);
        self.valid_frames.store(valid_frames, Ordering::Release);
    }

    /// Blocking lock for the loader and control side
    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<[f32]>> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Non-blocking lock for the real-time side
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, Box<[f32]>>> {
        match self.samples.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// Read access to the samples of one slot
///
/// Holds the slot's sample lock for as long as it lives; drop it before
/// moving to another chunk.
pub struct SlotView<'a> {
    samples: MutexGuard<'a, Box<[f32]>>,
    chunk_start: u64,
    valid_frames: usize,
    chunk_frames: usize,
}

impl<'a> SlotView<'a> {
    pub(crate) fn new(
        samples: MutexGuard<'a, Box<[f32]>>,
        chunk_start: u64,
        valid_frames: usize,
        chunk_frames: usize,
    ) -> Self {
        Self {
            samples,
            chunk_start,
            valid_frames,
            chunk_frames,
        }
    }

    /// First stream frame held by this slot
    pub fn chunk_start(&self) -> u64 {
        self.chunk_start
    }

    /// Frames of real audio; the rest of the chunk is silence
    pub fn valid_frames(&self) -> usize {
        self.valid_frames
    }

    /// Whole chunk of one channel, zero-padded past `valid_frames`
    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.chunk_frames;
        &self.samples[start..start + self.chunk_frames]
    }

    /// `len` frames of one channel starting at chunk-local `offset`
    #[inline]
    pub fn frames(&self, ch: usize, offset: usize, len: usize) -> &[f32] {
        &self.channel(ch)[offset..offset + len]
    }

    /// One sample at chunk-local `offset`
    #[inline]
    pub fn sample(&self, ch: usize, offset: usize) -> f32 {
        if offset >= self.valid_frames {
            return 0.0;
        }
        self.channel(ch)[offset]
    }
}
