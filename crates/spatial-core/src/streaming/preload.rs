//! When to ask the loader for the next chunk
//!
//! Driven from the control thread at UI rate, never from the callback.
//! Within each chunk the next chunk is requested once at the early
//! threshold and once more at the late threshold; the second request is
//! dropped as redundant unless the first load failed, which makes it a
//! single retry.

use serde::{Deserialize, Serialize};

use super::double_buffer::DoubleBuffer;
use super::loader::LoadRequester;

/// Preload trigger points as fractions of chunk progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadPolicy {
    pub early_fraction: f32,
    pub late_fraction: f32,
}

impl Default for PreloadPolicy {
    fn default() -> Self {
        Self {
            early_fraction: 0.25,
            late_fraction: 0.5,
        }
    }
}

#[derive(Debug, Default)]
pub struct Prefetcher {
    policy: PreloadPolicy,
    /// Chunk the trigger flags belong to
    current_chunk: Option<u64>,
    current_requested: bool,
    early_fired: bool,
    late_fired: bool,
}

impl Prefetcher {
    pub fn new(policy: PreloadPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Forget trigger state, e.g. after a seek
    pub fn reset(&mut self) {
        self.current_chunk = None;
    }

    /// Issue whatever requests `position` calls for
    ///
    /// Returns the chunk start of each request that was actually queued.
    pub fn tick(
        &mut self,
        position: u64,
        looping: bool,
        buffer: &DoubleBuffer,
        loader: &impl LoadRequester,
    ) -> Vec<u64> {
        let mut queued = Vec::new();
        let total = buffer.total_frames();
        if total == 0 {
            return queued;
        }

        let chunk_frames = buffer.chunk_frames() as u64;
        let chunk = buffer.chunk_start_for(position.min(total - 1));
        if self.current_chunk != Some(chunk) {
            self.current_chunk = Some(chunk);
            self.current_requested = false;
            self.early_fired = false;
            self.late_fired = false;
        }

        // Landed in a chunk nobody loaded (seek); the callback covers the
        // first block with a direct read, this gets it off that path
        if !self.current_requested {
            self.current_requested = true;
            if loader.request_load(chunk) {
                queued.push(chunk);
            }
        }

        let mut next = chunk + chunk_frames;
        if next >= total {
            if !looping {
                return queued;
            }
            next = 0;
        }

        let progress = (position - chunk) as f32 / chunk_frames as f32;
        let due = (!self.early_fired && progress >= self.policy.early_fraction)
            || (!self.late_fired && progress >= self.policy.late_fraction);
        if due {
            if progress >= self.policy.early_fraction {
                self.early_fired = true;
            }
            if progress >= self.policy.late_fraction {
                self.late_fired = true;
            }
            if loader.request_load(next) {
                queued.push(next);
            }
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::super::resource::test_support::indexed_wav;
    use super::super::resource::StreamResource;
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::sync::Arc;

    /// Records requests; treats everything as needing a load
    #[derive(Default)]
    struct Recorder {
        requests: RefCell<Vec<u64>>,
    }

    impl LoadRequester for Recorder {
        fn request_load(&self, chunk_start: u64) -> bool {
            self.requests.borrow_mut().push(chunk_start);
            true
        }
    }

    fn buffer() -> DoubleBuffer {
        let resource =
            StreamResource::from_source(Box::new(Cursor::new(indexed_wav(1, 300))), 16).unwrap();
        DoubleBuffer::new(Arc::new(resource), 100, 16)
    }

    #[test]
    fn test_requests_next_at_early_then_late() {
        let buf = buffer();
        let recorder = Recorder::default();
        let mut prefetch = Prefetcher::new(PreloadPolicy::default());

        assert_eq!(prefetch.tick(10, false, &buf, &recorder), vec![0]);
        assert!(prefetch.tick(20, false, &buf, &recorder).is_empty());
        assert_eq!(prefetch.tick(25, false, &buf, &recorder), vec![100]);
        assert!(prefetch.tick(40, false, &buf, &recorder).is_empty());
        assert_eq!(prefetch.tick(55, false, &buf, &recorder), vec![100]);
        assert!(prefetch.tick(90, false, &buf, &recorder).is_empty());

        assert_eq!(*recorder.requests.borrow(), vec![0, 100, 100]);
    }

    #[test]
    fn test_jump_past_both_thresholds_requests_once() {
        let buf = buffer();
        let recorder = Recorder::default();
        let mut prefetch = Prefetcher::new(PreloadPolicy::default());

        assert_eq!(prefetch.tick(170, false, &buf, &recorder), vec![100, 200]);
        assert!(prefetch.tick(180, false, &buf, &recorder).is_empty());
    }

    #[test]
    fn test_last_chunk_wraps_only_when_looping() {
        let buf = buffer();
        let recorder = Recorder::default();
        let mut prefetch = Prefetcher::new(PreloadPolicy::default());

        assert_eq!(prefetch.tick(260, false, &buf, &recorder), vec![200]);
        prefetch.reset();
        assert_eq!(prefetch.tick(260, true, &buf, &recorder), vec![200, 0]);
    }
}
