//! Two-slot chunk buffer shared by the loader and the real-time callback
//!
//! All slot state transitions live here. The loader side calls
//! [`DoubleBuffer::load_chunk`]; the real-time side calls
//! [`DoubleBuffer::view_for`], which switches to a ready slot or, on a
//! miss, reads the chunk itself into the slot it owns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::resource::{fill_chunk, StreamResource};
use super::slot::{ChunkSlot, SlotState, SlotView};
use super::{StreamError, StreamResult};

/// Counters for stream health, readable from any thread
#[derive(Debug, Default)]
pub struct StreamStats {
    buffer_misses: AtomicU64,
    load_failures: AtomicU64,
    loads_completed: AtomicU64,
}

impl StreamStats {
    /// Blocks that needed a chunk no ready slot held
    pub fn buffer_misses(&self) -> u64 {
        self.buffer_misses.load(Ordering::Relaxed)
    }

    /// Chunk fills that ended in a read error
    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    /// Chunk fills the loader published as Ready
    pub fn loads_completed(&self) -> u64 {
        self.loads_completed.load(Ordering::Relaxed)
    }
}

/// Result of one loader-side chunk load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Slot filled and marked Ready
    Loaded,
    /// A slot already holds or is loading that chunk
    AlreadyPresent,
    /// Chunk starts past the end of the stream
    PastEnd,
    /// No slot was free to claim
    NoFreeSlot,
    /// Filled, but the real-time side read the same chunk itself meanwhile
    Superseded,
    /// Read error; slot returned to Empty
    Failed,
}

/// Two chunk slots over one stream
pub struct DoubleBuffer {
    slots: [ChunkSlot; 2],
    resource: Arc<StreamResource>,
    chunk_frames: usize,
    sub_block_frames: usize,
    stats: StreamStats,
}

impl DoubleBuffer {
    /// Allocate both slots up front (`channels * chunk_frames` each)
    pub fn new(resource: Arc<StreamResource>, chunk_frames: usize, sub_block_frames: usize) -> Self {
        let chunk_frames = chunk_frames.max(1);
        let channels = resource.channels();
        Self {
            slots: [
                ChunkSlot::new(channels, chunk_frames),
                ChunkSlot::new(channels, chunk_frames),
            ],
            resource,
            chunk_frames,
            sub_block_frames: sub_block_frames.max(1),
            stats: StreamStats::default(),
        }
    }

    pub fn resource(&self) -> &Arc<StreamResource> {
        &self.resource
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    pub fn channels(&self) -> usize {
        self.resource.channels()
    }

    pub fn total_frames(&self) -> u64 {
        self.resource.frame_count()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Start frame of the chunk containing `frame`
    #[inline]
    pub fn chunk_start_for(&self, frame: u64) -> u64 {
        frame - frame % self.chunk_frames as u64
    }

    /// State and chunk start of slot `index` (0 or 1)
    pub fn slot_state(&self, index: usize) -> (SlotState, u64) {
        let slot = &self.slots[index];
        (slot.state(), slot.chunk_start())
    }

    /// Index of the Playing slot, if any
    pub fn playing_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.state() == SlotState::Playing)
    }

    /// Chunk start of the Playing slot, if any
    pub fn playing_chunk(&self) -> Option<u64> {
        self.playing_slot().map(|i| self.slots[i].chunk_start())
    }

    /// False when a load of `chunk_start` would be redundant
    ///
    /// Redundant means some slot is already Playing, Ready or Loading with
    /// that exact chunk, or the chunk lies past the end of the stream.
    pub fn needs_load(&self, chunk_start: u64) -> bool {
        if chunk_start >= self.total_frames() {
            return false;
        }
        !self.slots.iter().any(|s| {
            matches!(s.state(), SlotState::Playing | SlotState::Ready | SlotState::Loading)
                && s.chunk_start() == chunk_start
        })
    }

    /// Load `chunk_start` into the non-playing slot (loader thread)
    ///
    /// Blocks on file I/O. A Ready slot holding another chunk is evicted if
    /// no Empty slot exists; the Playing slot is never touched.
    pub fn load_chunk(&self, chunk_start: u64) -> LoadOutcome {
        if chunk_start >= self.total_frames() {
            return LoadOutcome::PastEnd;
        }
        if !self.needs_load(chunk_start) {
            return LoadOutcome::AlreadyPresent;
        }

        let Some(index) = self.claim_for_loading(chunk_start) else {
            return LoadOutcome::NoFreeSlot;
        };
        let slot = &self.slots[index];

        let result = {
            let mut samples = slot.lock();
            fill_chunk(&self.resource, &mut samples, self.chunk_frames, self.sub_block_frames, chunk_start)
        };

        match result {
            Ok(valid) => {
                slot.set_contents(chunk_start, valid);
                let other = &self.slots[1 - index];
                if other.holds(SlotState::Playing, chunk_start) {
                    slot.set_state(SlotState::Empty);
                    log::debug!("Chunk at frame {} already read by fallback, discarding", chunk_start);
                    return LoadOutcome::Superseded;
                }
                slot.set_state(SlotState::Ready);
                self.stats.loads_completed.fetch_add(1, Ordering::Relaxed);
                log::trace!("Chunk at frame {} ready in slot {} ({} frames)", chunk_start, index, valid);
                LoadOutcome::Loaded
            }
            Err(e) => {
                slot.set_state(SlotState::Empty);
                self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Failed to load chunk at frame {}: {}", chunk_start, e);
                LoadOutcome::Failed
            }
        }
    }

    /// Claim a slot for the loader: Empty first, then Ready
    ///
    /// The claimed slot reports `chunk_start` from here on, so requests
    /// racing the fill are compared against the chunk actually loading.
    fn claim_for_loading(&self, chunk_start: u64) -> Option<usize> {
        for from in [SlotState::Empty, SlotState::Ready] {
            for (i, slot) in self.slots.iter().enumerate() {
                if slot.transition(from, SlotState::Loading) {
                    slot.set_contents(chunk_start, 0);
                    return Some(i);
                }
            }
        }
        None
    }

    /// Promote a Ready slot holding `chunk_start` to Playing (real-time)
    ///
    /// The previously playing slot is demoted to Empty first, so at most one
    /// slot is ever Playing. If the loader evicts the Ready slot in between,
    /// nothing plays and the caller falls back to a direct read.
    pub fn try_switch(&self, chunk_start: u64) -> bool {
        let Some(target) = self
            .slots
            .iter()
            .position(|s| s.holds(SlotState::Ready, chunk_start))
        else {
            return false;
        };

        let other = &self.slots[1 - target];
        other.transition(SlotState::Playing, SlotState::Empty);
        self.slots[target].transition(SlotState::Ready, SlotState::Playing)
    }

    /// View of the Playing slot (real-time, never blocks)
    pub fn active_view(&self) -> Option<SlotView<'_>> {
        let index = self.playing_slot()?;
        self.view_of(index)
    }

    /// View of the chunk starting at `chunk_start` for the real-time side
    ///
    /// Tries the Playing slot, then a switch to a Ready slot, then a direct
    /// read. Returns `None` only if the direct read fails; the caller renders
    /// silence for that span.
    pub fn view_for(&self, chunk_start: u64) -> Option<SlotView<'_>> {
        if let Some(index) = self.playing_slot() {
            if self.slots[index].chunk_start() == chunk_start {
                if let Some(view) = self.view_of(index) {
                    return Some(view);
                }
            }
        }
        if self.try_switch(chunk_start) {
            if let Some(view) = self.active_view() {
                return Some(view);
            }
        }
        self.fallback_read(chunk_start)
    }

    /// Read `chunk_start` directly into the slot the real-time side owns
    ///
    /// Counts one buffer miss. Takes the file lock, which is the one
    /// tolerated blocking point on the real-time path. The target is the
    /// Playing slot, else an Empty slot, else a Ready one.
    pub fn fallback_read(&self, chunk_start: u64) -> Option<SlotView<'_>> {
        self.stats.buffer_misses.fetch_add(1, Ordering::Relaxed);

        let index = match self.playing_slot() {
            Some(index) => index,
            None => self.claim_for_playing()?,
        };
        let slot = &self.slots[index];
        let mut samples = slot.try_lock()?;
        slot.set_contents(chunk_start, 0);

        match fill_chunk(&self.resource, &mut samples, self.chunk_frames, self.sub_block_frames, chunk_start) {
            Ok(valid) => {
                slot.set_contents(chunk_start, valid);
                Some(SlotView::new(samples, chunk_start, valid, self.chunk_frames))
            }
            // No logging on this path; the control loop reports the counter
            Err(_) => {
                drop(samples);
                slot.set_state(SlotState::Empty);
                self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn claim_for_playing(&self) -> Option<usize> {
        for from in [SlotState::Empty, SlotState::Ready] {
            for (i, slot) in self.slots.iter().enumerate() {
                if slot.transition(from, SlotState::Playing) {
                    return Some(i);
                }
            }
        }
        None
    }

    fn view_of(&self, index: usize) -> Option<SlotView<'_>> {
        let slot = &self.slots[index];
        let samples = slot.try_lock()?;
        Some(SlotView::new(samples, slot.chunk_start(), slot.valid_frames(), self.chunk_frames))
    }

    /// Load `chunk_start` synchronously and make it the Playing slot
    ///
    /// For the control side before playback starts or after a seek, while
    /// the real-time side isn't reading.
    pub fn prime(&self, chunk_start: u64) -> StreamResult<()> {
        self.reset();
        let index = self
            .slots
            .iter()
            .position(|s| s.transition(SlotState::Empty, SlotState::Loading))
            .ok_or(StreamError::NoFreeSlot)?;
        let slot = &self.slots[index];
        slot.set_contents(chunk_start, 0);

        let result = {
            let mut samples = slot.lock();
            fill_chunk(&self.resource, &mut samples, self.chunk_frames, self.sub_block_frames, chunk_start)
        };
        match result {
            Ok(valid) => {
                slot.set_contents(chunk_start, valid);
                slot.set_state(SlotState::Playing);
                self.stats.loads_completed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                slot.set_state(SlotState::Empty);
                self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    /// Keep only a slot already holding `chunk_start` (seek, restart, loop wrap)
    ///
    /// Playing and Ready slots for any other chunk return to Empty. Only
    /// compare-and-set transitions, so the real-time side may call it.
    pub fn reset_to(&self, chunk_start: u64) {
        for slot in &self.slots {
            if slot.chunk_start() == chunk_start {
                continue;
            }
            slot.transition(SlotState::Playing, SlotState::Empty);
            slot.transition(SlotState::Ready, SlotState::Empty);
        }
    }

    /// Drop every Playing and Ready slot
    ///
    /// Loading slots are left to the loader; they publish as Ready and get
    /// evicted later if nobody wants them.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.transition(SlotState::Playing, SlotState::Empty);
            slot.transition(SlotState::Ready, SlotState::Empty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::resource::test_support::*;
    use super::*;
    use std::io::Cursor;

    fn buffer(frames: u32, chunk: usize) -> DoubleBuffer {
        let resource =
            StreamResource::from_source(Box::new(Cursor::new(indexed_wav(2, frames))), 16).unwrap();
        DoubleBuffer::new(Arc::new(resource), chunk, 16)
    }

    fn playing_count(buf: &DoubleBuffer) -> usize {
        (0..2).filter(|&i| buf.slot_state(i).0 == SlotState::Playing).count()
    }

    #[test]
    fn test_prime_then_preload_then_switch() {
        let buf = buffer(300, 100);
        buf.prime(0).unwrap();
        assert_eq!(buf.playing_chunk(), Some(0));

        assert!(buf.needs_load(100));
        assert_eq!(buf.load_chunk(100), LoadOutcome::Loaded);
        assert!(!buf.needs_load(100));
        assert_eq!(buf.load_chunk(100), LoadOutcome::AlreadyPresent);

        let view = buf.view_for(100).unwrap();
        assert_eq!(view.chunk_start(), 100);
        assert_eq!(view.sample(1, 5), indexed_value(1, 105));
        drop(view);

        assert_eq!(buf.playing_chunk(), Some(100));
        assert_eq!(playing_count(&buf), 1);
        assert_eq!(buf.stats().buffer_misses(), 0);
    }

    #[test]
    fn test_miss_reads_required_chunk() {
        // Three chunks of 100 frames, only chunk 0 resident, playback needs frame 250
        let buf = buffer(300, 100);
        buf.prime(0).unwrap();

        let required = buf.chunk_start_for(250);
        assert_eq!(required, 200);

        let view = buf.view_for(required).unwrap();
        assert_eq!(view.valid_frames(), 100);
        assert_eq!(view.sample(0, 50), indexed_value(0, 250));
        drop(view);

        assert_eq!(buf.stats().buffer_misses(), 1);
        assert_eq!(buf.playing_chunk(), Some(200));
        assert_eq!(playing_count(&buf), 1);

        // Same chunk again is a hit
        assert!(buf.view_for(200).is_some());
        assert_eq!(buf.stats().buffer_misses(), 1);
    }

    #[test]
    fn test_final_short_chunk_ready_and_padded() {
        let buf = buffer(250, 100);
        buf.prime(0).unwrap();
        assert_eq!(buf.load_chunk(200), LoadOutcome::Loaded);

        let ready = (0..2).find(|&i| buf.slot_state(i) == (SlotState::Ready, 200));
        assert!(ready.is_some());

        let view = buf.view_for(200).unwrap();
        assert_eq!(view.valid_frames(), 50);
        assert_eq!(view.channel(0)[49], indexed_value(0, 249));
        assert!(view.channel(1)[50..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_failed_load_leaves_slot_empty() {
        let bytes = indexed_wav(2, 300);
        let len = bytes.len() as u64;
        let resource = StreamResource::from_source(Box::new(FlakySource::new(bytes, len - 400)), 16).unwrap();
        let buf = DoubleBuffer::new(Arc::new(resource), 100, 16);

        buf.prime(0).unwrap();
        assert_eq!(buf.load_chunk(200), LoadOutcome::Failed);
        assert_eq!(buf.stats().load_failures(), 1);
        assert_eq!(buf.stats().loads_completed(), 1);

        let other = 1 - buf.playing_slot().unwrap();
        assert_eq!(buf.slot_state(other).0, SlotState::Empty);
        // No partial chunk became visible
        assert!(buf.needs_load(200));

        // The real-time path degrades to silence instead of stale data
        assert!(buf.view_for(200).is_none());
        assert_eq!(buf.stats().load_failures(), 2);
        assert_eq!(playing_count(&buf), 0);
    }

    #[test]
    fn test_past_end_and_reset() {
        let buf = buffer(300, 100);
        assert_eq!(buf.load_chunk(300), LoadOutcome::PastEnd);
        assert!(!buf.needs_load(300));

        buf.prime(0).unwrap();
        buf.load_chunk(100);
        buf.reset();
        assert_eq!(buf.playing_slot(), None);
        assert!(buf.needs_load(0));
        assert!(buf.needs_load(100));
    }

    #[test]
    fn test_reset_to_keeps_target_chunk() {
        // Looping: chunk 200 plays, chunk 0 is preloaded for the wrap
        let buf = buffer(300, 100);
        buf.prime(200).unwrap();
        assert_eq!(buf.load_chunk(0), LoadOutcome::Loaded);

        buf.reset_to(0);
        assert_eq!(buf.playing_slot(), None);
        assert!(!buf.needs_load(0));

        let view = buf.view_for(0).unwrap();
        assert_eq!(view.sample(0, 3), indexed_value(0, 3));
        drop(view);
        assert_eq!(buf.stats().buffer_misses(), 0);

        // Seek elsewhere drops the playing chunk
        buf.reset_to(100);
        assert_eq!(buf.playing_slot(), None);
        assert!(buf.needs_load(100));
        assert!(buf.needs_load(0));
    }

    #[test]
    fn test_loading_slot_reports_its_target_chunk() {
        let buf = buffer(300, 100);
        buf.prime(0).unwrap();
        assert_eq!(buf.load_chunk(100), LoadOutcome::Loaded);
        drop(buf.view_for(100).unwrap());
        // Slot 0 is Empty but last held chunk 0
        let free = 1 - buf.playing_slot().unwrap();
        assert_eq!(buf.slot_state(free), (SlotState::Empty, 0));

        // The loader takes it for chunk 200 and is mid-fill
        assert_eq!(buf.claim_for_loading(200), Some(free));
        assert_eq!(buf.slot_state(free), (SlotState::Loading, 200));

        // A restart pre-request for chunk 0 still goes through
        assert!(buf.needs_load(0));
        // A duplicate for the chunk being filled is coalesced
        assert!(!buf.needs_load(200));
    }

    #[test]
    fn test_superseded_when_fallback_won() {
        let buf = buffer(300, 100);
        // Fallback reads chunk 100 into a slot and plays it
        assert!(buf.view_for(100).is_some());
        assert_eq!(buf.playing_chunk(), Some(100));
        // A late loader request for the same chunk is redundant
        assert_eq!(buf.load_chunk(100), LoadOutcome::AlreadyPresent);
        assert_eq!(playing_count(&buf), 1);
    }
}
