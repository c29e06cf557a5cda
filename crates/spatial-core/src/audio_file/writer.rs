//! Streaming 32-bit float WAV writer with automatic RF64 promotion
//!
//! The header reserves a 28-byte `JUNK` chunk right after `WAVE`. When the
//! finished data no longer fits the 32-bit RIFF size fields, `finalize`
//! turns that chunk into `ds64` and rewrites the header as RF64, so the
//! container choice is made from the real data size.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use super::{
    AudioFileError, AudioFileResult, FORMAT_IEEE_FLOAT, RF64_SIZE_PLACEHOLDER, RIFF_SIZE_LIMIT,
};

/// Size of the ds64 body (riff size, data size, sample count, table length)
const DS64_BODY_BYTES: u32 = 28;

/// Header length: RIFF(12) + JUNK/ds64(8+28) + fmt(8+16) + data header(8)
const HEADER_BYTES: u64 = 12 + 8 + DS64_BODY_BYTES as u64 + 8 + 16 + 8;

/// Byte offset of the JUNK/ds64 chunk id
const DS64_OFFSET: u64 = 12;

/// Byte offset of the data chunk size field
const DATA_SIZE_OFFSET: u64 = HEADER_BYTES - 4;

/// Container selection when finalizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rf64Policy {
    /// RF64 only when the sizes overflow 32 bits
    #[default]
    Auto,
    /// Always write RF64
    Always,
    /// Never write RF64; finalizing oversized data is an error
    Never,
}

/// True when `data_bytes` of sample data can't be described by a plain
/// RIFF header written by [`WavWriter`]
pub fn needs_rf64(data_bytes: u64) -> bool {
    data_bytes > RIFF_SIZE_LIMIT || riff_size(data_bytes) > RIFF_SIZE_LIMIT
}

/// RIFF size field value: everything after the first 8 bytes
fn riff_size(data_bytes: u64) -> u64 {
    HEADER_BYTES - 8 + data_bytes + (data_bytes % 2)
}

/// Interleaved f32 WAV/RF64 writer
pub struct WavWriter<W: Write + Seek> {
    inner: Option<W>,
    channels: u16,
    sample_rate: u32,
    policy: Rf64Policy,
    frames_written: u64,
    byte_scratch: Vec<u8>,
}

impl WavWriter<BufWriter<File>> {
    /// Create a file and write a provisional header
    pub fn create<P: AsRef<Path>>(
        path: P,
        channels: u16,
        sample_rate: u32,
        policy: Rf64Policy,
    ) -> AudioFileResult<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file), channels, sample_rate, policy)
    }
}

impl<W: Write + Seek> WavWriter<W> {
    /// Wrap a seekable sink and write a provisional header
    pub fn new(mut inner: W, channels: u16, sample_rate: u32, policy: Rf64Policy) -> AudioFileResult<Self> {
        if channels == 0 {
            return Err(AudioFileError::InvalidFormat("writer needs at least one channel".into()));
        }
        write_header(&mut inner, channels, sample_rate)?;
        Ok(Self {
            inner: Some(inner),
            channels,
            sample_rate,
            policy,
            frames_written: 0,
            byte_scratch: Vec::new(),
        })
    }

    /// Number of channels per frame
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames written so far
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append interleaved frames
    pub fn write_frames(&mut self, interleaved: &[f32]) -> AudioFileResult<()> {
        if interleaved.len() % self.channels as usize != 0 {
            return Err(AudioFileError::PartialFrame {
                samples: interleaved.len(),
                channels: self.channels,
            });
        }
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| AudioFileError::InvalidFormat("writer already finalized".into()))?;

        self.byte_scratch.clear();
        self.byte_scratch.reserve(interleaved.len() * 4);
        for sample in interleaved {
            self.byte_scratch.extend_from_slice(&sample.to_le_bytes());
        }
        inner.write_all(&self.byte_scratch)?;
        self.frames_written += (interleaved.len() / self.channels as usize) as u64;
        Ok(())
    }

    /// Patch the header with final sizes and hand back the sink
    ///
    /// Returns whether the file ended up as RF64 alongside the sink.
    pub fn finalize(mut self) -> AudioFileResult<(W, bool)> {
        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| AudioFileError::InvalidFormat("writer already finalized".into()))?;
        let rf64 = patch_sizes(&mut inner, self.frames_written, self.channels, self.policy)?;
        log::debug!(
            "Finalized {} file: {} frames x {} ch @ {} Hz",
            if rf64 { "RF64" } else { "RIFF" },
            self.frames_written,
            self.channels,
            self.sample_rate
        );
        Ok((inner, rf64))
    }
}

impl<W: Write + Seek> Drop for WavWriter<W> {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Err(e) = patch_sizes(&mut inner, self.frames_written, self.channels, self.policy) {
                log::warn!("WavWriter dropped without finalize and header patch failed: {}", e);
            }
        }
    }
}

fn write_header<W: Write>(w: &mut W, channels: u16, sample_rate: u32) -> AudioFileResult<()> {
    let block_align = channels as u32 * 4;

    let mut header = Vec::with_capacity(HEADER_BYTES as usize);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(riff_size(0) as u32).to_le_bytes());
    header.extend_from_slice(b"WAVE");

    header.extend_from_slice(b"JUNK");
    header.extend_from_slice(&DS64_BODY_BYTES.to_le_bytes());
    header.extend_from_slice(&[0u8; DS64_BODY_BYTES as usize]);

    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&FORMAT_IEEE_FLOAT.to_le_bytes());
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
    header.extend_from_slice(&(block_align as u16).to_le_bytes());
    header.extend_from_slice(&32u16.to_le_bytes());

    header.extend_from_slice(b"data");
    header.extend_from_slice(&0u32.to_le_bytes());

    debug_assert_eq!(header.len() as u64, HEADER_BYTES);
    w.write_all(&header)?;
    Ok(())
}

/// Rewrite the size fields; returns true if RF64 was written
fn patch_sizes<W: Write + Seek>(
    w: &mut W,
    frames: u64,
    channels: u16,
    policy: Rf64Policy,
) -> AudioFileResult<bool> {
    let data_bytes = frames * channels as u64 * 4;
    let rf64 = match policy {
        Rf64Policy::Always => true,
        Rf64Policy::Auto => needs_rf64(data_bytes),
        Rf64Policy::Never => {
            if needs_rf64(data_bytes) {
                return Err(AudioFileError::TooLargeForRiff(data_bytes));
            }
            false
        }
    };

    let end = w.seek(SeekFrom::End(0))?;
    if data_bytes % 2 != 0 {
        w.write_all(&[0])?;
    }

    if rf64 {
        w.seek(SeekFrom::Start(0))?;
        w.write_all(b"RF64")?;
        w.write_all(&RF64_SIZE_PLACEHOLDER.to_le_bytes())?;

        w.seek(SeekFrom::Start(DS64_OFFSET))?;
        w.write_all(b"ds64")?;
        w.write_all(&DS64_BODY_BYTES.to_le_bytes())?;
        w.write_all(&riff_size(data_bytes).to_le_bytes())?;
        w.write_all(&data_bytes.to_le_bytes())?;
        w.write_all(&frames.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;

        w.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        w.write_all(&RF64_SIZE_PLACEHOLDER.to_le_bytes())?;
    } else {
        w.seek(SeekFrom::Start(4))?;
        w.write_all(&(riff_size(data_bytes) as u32).to_le_bytes())?;

        w.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        w.write_all(&(data_bytes as u32).to_le_bytes())?;
    }

    w.seek(SeekFrom::Start(end))?;
    w.flush()?;
    Ok(rf64)
}
