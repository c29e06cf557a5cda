//! Shared handle to the open stream file

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::audio_file::{AudioFileResult, ByteSource, ChunkedReader};

/// Open multichannel file shared by the loader and the fallback path
///
/// Access to the reader goes through [`StreamResource::access`], which holds
/// the lock for exactly one closure call. Stream metadata is copied out at
/// open time so callers never lock just to ask for the length.
pub struct StreamResource {
    reader: Mutex<ChunkedReader>,
    channels: usize,
    frame_count: u64,
    sample_rate: u32,
}

impl StreamResource {
    /// Open a file, reading at most `sub_block_frames` per call
    pub fn open<P: AsRef<Path>>(path: P, sub_block_frames: usize) -> AudioFileResult<Self> {
        Ok(Self::from_reader(ChunkedReader::open(path, sub_block_frames)?))
    }

    /// Wrap an arbitrary byte source
    pub fn from_source(source: Box<dyn ByteSource>, sub_block_frames: usize) -> AudioFileResult<Self> {
        Ok(Self::from_reader(ChunkedReader::from_source(source, sub_block_frames)?))
    }

    pub fn from_reader(reader: ChunkedReader) -> Self {
        Self {
            channels: reader.channels(),
            frame_count: reader.frame_count(),
            sample_rate: reader.format().sample_rate,
            reader: Mutex::new(reader),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Run `f` with exclusive access to the reader
    ///
    /// The lock is released when `f` returns or unwinds. A poisoned lock is
    /// recovered: the reader re-seeks before every read, so a panic
    /// mid-read leaves nothing stale behind.
    pub fn access<R>(&self, f: impl FnOnce(&mut ChunkedReader) -> R) -> R {
        let mut guard: MutexGuard<'_, ChunkedReader> =
            self.reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

/// Fill one planar chunk buffer from `chunk_start`
///
/// `dest` holds `channels * chunk_frames` samples. Reads happen in
/// sub-blocks with the file lock taken per sub-block. Frames past the end of
/// the stream are zeroed. Returns the number of valid frames; any read
/// error aborts the whole fill.
pub(crate) fn fill_chunk(
    resource: &StreamResource,
    dest: &mut [f32],
    chunk_frames: usize,
    sub_block_frames: usize,
    chunk_start: u64,
) -> AudioFileResult<usize> {
    let want = (chunk_frames as u64).min(resource.frame_count().saturating_sub(chunk_start)) as usize;
    let sub_block = sub_block_frames.max(1);

    let mut filled = 0;
    while filled < want {
        let frames = sub_block.min(want - filled);
        let n = resource.access(|reader| {
            reader.read_planar(chunk_start + filled as u64, frames, dest, chunk_frames, filled)
        })?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if filled < chunk_frames {
        for ch in 0..resource.channels() {
            let start = ch * chunk_frames;
            dest[start + filled..start + chunk_frames].fill(0.0);
        }
    }
    Ok(filled)
}
