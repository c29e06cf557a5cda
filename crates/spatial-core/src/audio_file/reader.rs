//! Chunk-granular WAV/RF64 reader
//!
//! The reader parses the RIFF/RF64 header once, then serves planar float
//! reads of at most `max_frames_per_read` frames from any position. All
//! scratch memory is allocated at open time, so a read never allocates.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::{
    AudioFileError, AudioFileResult, AudioFormat, SampleEncoding, FORMAT_EXTENSIBLE,
    RF64_SIZE_PLACEHOLDER,
};

/// Read-ahead buffer for file-backed readers
const FILE_BUFFER_BYTES: usize = 256 * 1024;

/// Any seekable byte stream a reader can decode from
///
/// Files are the normal case; tests substitute in-memory and fault-injecting
/// sources.
pub trait ByteSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ByteSource for T {}

/// Multichannel PCM reader with seek and bounded block reads
pub struct ChunkedReader {
    source: Box<dyn ByteSource>,
    format: AudioFormat,
    encoding: SampleEncoding,
    /// Byte offset of the first sample frame
    data_offset: u64,
    /// Frames actually present (clamped to the bytes on disk)
    frame_count: u64,
    is_rf64: bool,
    /// Frame the underlying source is positioned at
    cursor: u64,
    /// Whether `cursor` reflects the source position
    cursor_valid: bool,
    /// Raw bytes for one read, sized at open
    scratch: Vec<u8>,
    max_frames_per_read: usize,
}

impl std::fmt::Debug for ChunkedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedReader")
            .field("format", &self.format)
            .field("frame_count", &self.frame_count)
            .field("is_rf64", &self.is_rf64)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl ChunkedReader {
    /// Open a WAV or RF64 file
    ///
    /// `max_frames_per_read` bounds every read; it's the sub-block size the
    /// loader uses.
    pub fn open<P: AsRef<Path>>(path: P, max_frames_per_read: usize) -> AudioFileResult<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::with_capacity(FILE_BUFFER_BYTES, file);
        Self::from_source(Box::new(reader), max_frames_per_read)
    }

    /// Parse a stream from any byte source
    pub fn from_source(
        mut source: Box<dyn ByteSource>,
        max_frames_per_read: usize,
    ) -> AudioFileResult<Self> {
        let stream_len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; 12];
        source.read_exact(&mut header)?;

        let is_rf64 = match &header[0..4] {
            b"RIFF" => false,
            b"RF64" => true,
            _ => return Err(AudioFileError::InvalidFormat("Not a RIFF/RF64 file".into())),
        };
        if &header[8..12] != b"WAVE" {
            return Err(AudioFileError::InvalidFormat("Not a WAVE file".into()));
        }

        let mut format: Option<AudioFormat> = None;
        let mut data: Option<(u64, u64)> = None;
        let mut ds64_data_size: Option<u64> = None;

        loop {
            let mut chunk_header = [0u8; 8];
            if source.read_exact(&mut chunk_header).is_err() {
                break;
            }
            let chunk_id = [chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]];
            let chunk_size =
                u32::from_le_bytes([chunk_header[4], chunk_header[5], chunk_header[6], chunk_header[7]]);

            match &chunk_id {
                b"ds64" if is_rf64 => {
                    let body = read_body(&mut source, chunk_size)?;
                    if body.len() < 16 {
                        return Err(AudioFileError::Corrupted("ds64 chunk too small".into()));
                    }
                    let mut size = [0u8; 8];
                    size.copy_from_slice(&body[8..16]);
                    ds64_data_size = Some(u64::from_le_bytes(size));
                }
                b"fmt " => {
                    let body = read_body(&mut source, chunk_size)?;
                    format = Some(parse_fmt(&body)?);
                }
                b"data" => {
                    let offset = source.stream_position()?;
                    let declared = if is_rf64 && chunk_size == RF64_SIZE_PLACEHOLDER {
                        ds64_data_size.ok_or(AudioFileError::MissingChunk("ds64"))?
                    } else {
                        chunk_size as u64
                    };
                    data = Some((offset, declared));
                    if format.is_some() {
                        break;
                    }
                    // fmt after data is legal; keep scanning
                    source.seek(SeekFrom::Current(declared as i64))?;
                    if declared % 2 != 0 {
                        source.seek(SeekFrom::Current(1))?;
                    }
                    continue;
                }
                _ => {
                    source.seek(SeekFrom::Current(chunk_size as i64))?;
                }
            }

            // Pad to word boundary
            if chunk_size % 2 != 0 {
                source.seek(SeekFrom::Current(1))?;
            }
        }

        let format = format.ok_or(AudioFileError::MissingChunk("fmt"))?;
        let (data_offset, declared_size) = data.ok_or(AudioFileError::MissingChunk("data"))?;
        let encoding = format.encoding()?;

        // A truncated file reports only the frames that are really there
        let available = stream_len.saturating_sub(data_offset);
        let data_size = declared_size.min(available);
        if data_size < declared_size {
            log::warn!(
                "Data chunk truncated: header declares {} bytes, {} present",
                declared_size,
                data_size
            );
        }
        let frame_count = data_size / format.block_align as u64;

        let max_frames_per_read = max_frames_per_read.max(1);
        let scratch = vec![0u8; max_frames_per_read * format.block_align as usize];

        log::debug!(
            "Opened {} stream: {} ch, {} Hz, {:?}, {} frames",
            if is_rf64 { "RF64" } else { "RIFF" },
            format.channels,
            format.sample_rate,
            encoding,
            frame_count
        );

        Ok(Self {
            source,
            format,
            encoding,
            data_offset,
            frame_count,
            is_rf64,
            cursor: 0,
            cursor_valid: false,
            scratch,
            max_frames_per_read,
        })
    }

    /// Get the audio format
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Decoded sample encoding
    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Number of interleaved channels
    pub fn channels(&self) -> usize {
        self.format.channels as usize
    }

    /// Number of sample frames in the stream
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frame_count as f64 / self.format.sample_rate as f64
    }

    /// True if the container is RF64
    pub fn is_rf64(&self) -> bool {
        self.is_rf64
    }

    /// Upper bound on frames returned by a single read
    pub fn max_frames_per_read(&self) -> usize {
        self.max_frames_per_read
    }

    /// Current read position in frames
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Move the read position to `frame`
    ///
    /// Seeking at or past the end is allowed; the next read returns 0.
    pub fn seek(&mut self, frame: u64) -> AudioFileResult<()> {
        if self.cursor_valid && frame == self.cursor {
            return Ok(());
        }
        let clamped = frame.min(self.frame_count);
        let byte = self.data_offset + clamped * self.format.block_align as u64;
        match self.source.seek(SeekFrom::Start(byte)) {
            Ok(_) => {
                self.cursor = frame;
                self.cursor_valid = true;
                Ok(())
            }
            Err(e) => {
                self.cursor_valid = false;
                Err(e.into())
            }
        }
    }

    /// Read up to `frames` frames from the current position into planar
    /// storage
    ///
    /// Channel `c` of frame `i` lands at `dest[c * dest_stride + dest_offset + i]`.
    /// Returns the number of frames read, which is less than requested only
    /// at the end of the stream or when `frames` exceeds
    /// [`ChunkedReader::max_frames_per_read`]. Returns `Ok(0)` at end of
    /// stream. Any I/O failure invalidates the position and is returned as an
    /// error; nothing partially decoded is reported as read.
    pub fn read_block(
        &mut self,
        frames: usize,
        dest: &mut [f32],
        dest_stride: usize,
        dest_offset: usize,
    ) -> AudioFileResult<usize> {
        if !self.cursor_valid {
            let cursor = self.cursor;
            self.seek(cursor)?;
        }

        let remaining = self.frame_count.saturating_sub(self.cursor);
        let n = (frames.min(self.max_frames_per_read) as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }

        let channels = self.channels();
        let needed = (channels - 1) * dest_stride + dest_offset + n;
        if dest.len() < needed || dest_offset + n > dest_stride {
            return Err(AudioFileError::BufferTooSmall {
                needed,
                available: dest.len(),
            });
        }

        let block_align = self.format.block_align as usize;
        let bytes = &mut self.scratch[..n * block_align];
        if let Err(e) = self.source.read_exact(bytes) {
            self.cursor_valid = false;
            return Err(e.into());
        }

        let width = self.encoding.bytes_per_sample();
        for (i, frame) in bytes.chunks_exact(block_align).enumerate() {
            for (ch, sample) in frame.chunks_exact(width).enumerate() {
                dest[ch * dest_stride + dest_offset + i] = self.encoding.decode(sample);
            }
        }

        self.cursor += n as u64;
        Ok(n)
    }

    /// Seek to `start_frame` and read one block (see [`ChunkedReader::read_block`])
    pub fn read_planar(
        &mut self,
        start_frame: u64,
        frames: usize,
        dest: &mut [f32],
        dest_stride: usize,
        dest_offset: usize,
    ) -> AudioFileResult<usize> {
        self.seek(start_frame)?;
        self.read_block(frames, dest, dest_stride, dest_offset)
    }
}

/// Read a whole chunk body, bounded to header-sized chunks
fn read_body(source: &mut Box<dyn ByteSource>, size: u32) -> AudioFileResult<Vec<u8>> {
    if size > 64 * 1024 {
        return Err(AudioFileError::Corrupted(format!(
            "header chunk of {} bytes is implausibly large",
            size
        )));
    }
    let mut body = vec![0u8; size as usize];
    source.read_exact(&mut body)?;
    Ok(body)
}

/// Parse a fmt chunk body, resolving WAVE_FORMAT_EXTENSIBLE
fn parse_fmt(body: &[u8]) -> AudioFileResult<AudioFormat> {
    if body.len() < 16 {
        return Err(AudioFileError::Corrupted("fmt chunk too small".into()));
    }

    let mut format_tag = u16::from_le_bytes([body[0], body[1]]);
    let channels = u16::from_le_bytes([body[2], body[3]]);
    let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let block_align = u16::from_le_bytes([body[12], body[13]]);
    let bits_per_sample = u16::from_le_bytes([body[14], body[15]]);

    if format_tag == FORMAT_EXTENSIBLE {
        // cbSize(2) validBits(2) channelMask(4) then the SubFormat GUID,
        // whose first two bytes are the real format tag
        if body.len() < 26 {
            return Err(AudioFileError::Corrupted("extensible fmt chunk too small".into()));
        }
        format_tag = u16::from_le_bytes([body[24], body[25]]);
    }

    Ok(AudioFormat {
        channels,
        sample_rate,
        bits_per_sample,
        block_align,
        format_tag,
    })
}
