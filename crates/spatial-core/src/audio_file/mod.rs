//! RIFF/RF64 audio file handling
//!
//! Multichannel uncompressed PCM streams are read chunk by chunk through
//! [`ChunkedReader`], which never loads more than one sub-block of raw bytes
//! at a time. Files larger than the classic 4 GB RIFF ceiling use the RF64
//! container; [`WavWriter`] picks it automatically when finalizing.

mod reader;
mod writer;

pub use reader::{ByteSource, ChunkedReader};
pub use writer::{needs_rf64, Rf64Policy, WavWriter};

use thiserror::Error;

/// Largest size a 32-bit RIFF size field can describe
pub const RIFF_SIZE_LIMIT: u64 = u32::MAX as u64;

/// Size-field placeholder used by RF64 when the real size lives in ds64
pub(crate) const RF64_SIZE_PLACEHOLDER: u32 = 0xFFFF_FFFF;

/// Format tags from the fmt chunk
pub(crate) const FORMAT_PCM: u16 = 0x0001;
pub(crate) const FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub(crate) const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Audio file errors
#[derive(Error, Debug)]
pub enum AudioFileError {
    /// File not found, unreadable, or failed mid-read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Not a RIFF/RF64 WAVE stream
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Sample encoding the engine doesn't decode
    #[error("Unsupported sample encoding: {bits}-bit, format tag {tag:#06x}")]
    UnsupportedEncoding { bits: u16, tag: u16 },

    /// Missing required chunk
    #[error("Missing required chunk: {0}")]
    MissingChunk(&'static str),

    /// Header fields that contradict each other
    #[error("File corrupted: {0}")]
    Corrupted(String),

    /// Destination region can't hold the requested frames
    #[error("Destination buffer too small: need {needed} samples, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Interleaved input isn't a whole number of frames
    #[error("Sample count {samples} is not a multiple of {channels} channels")]
    PartialFrame { samples: usize, channels: u16 },

    /// Data would overflow a plain RIFF header and RF64 was disallowed
    #[error("Data size {0} bytes exceeds the 32-bit RIFF limit")]
    TooLargeForRiff(u64),
}

/// Result type for audio file operations
pub type AudioFileResult<T> = Result<T, AudioFileError>;

/// Decoded sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl SampleEncoding {
    /// Bytes one sample of this encoding occupies
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleEncoding::Int16 => 2,
            SampleEncoding::Int24 => 3,
            SampleEncoding::Int32 | SampleEncoding::Float32 => 4,
        }
    }

    /// Decode one little-endian sample to f32 in [-1, 1)
    #[inline]
    pub(crate) fn decode(&self, b: &[u8]) -> f32 {
        match self {
            SampleEncoding::Int16 => i16::from_le_bytes([b[0], b[1]]) as f32 * (1.0 / 32768.0),
            SampleEncoding::Int24 => {
                // Place the 24 bits in the top of an i32 so the shift sign-extends
                let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                v as f32 * (1.0 / 8_388_608.0)
            }
            SampleEncoding::Int32 => {
                i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 * (1.0 / 2_147_483_648.0)
            }
            SampleEncoding::Float32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        }
    }
}

/// Audio format information from the fmt chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    /// Number of interleaved channels
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bits per sample (16, 24 or 32)
    pub bits_per_sample: u16,
    /// Bytes per sample frame (channels * bits_per_sample / 8)
    pub block_align: u16,
    /// Effective format tag (1 = PCM, 3 = IEEE float), resolved through
    /// WAVE_FORMAT_EXTENSIBLE when present
    pub format_tag: u16,
}

impl AudioFormat {
    /// Resolve the sample encoding, rejecting anything we can't stream
    pub fn encoding(&self) -> AudioFileResult<SampleEncoding> {
        let encoding = match (self.format_tag, self.bits_per_sample) {
            (FORMAT_PCM, 16) => SampleEncoding::Int16,
            (FORMAT_PCM, 24) => SampleEncoding::Int24,
            (FORMAT_PCM, 32) => SampleEncoding::Int32,
            (FORMAT_IEEE_FLOAT, 32) => SampleEncoding::Float32,
            (tag, bits) => return Err(AudioFileError::UnsupportedEncoding { bits, tag }),
        };

        if self.channels == 0 {
            return Err(AudioFileError::Corrupted("fmt chunk declares zero channels".into()));
        }
        let expected_align = self.channels as usize * encoding.bytes_per_sample();
        if self.block_align as usize != expected_align {
            return Err(AudioFileError::Corrupted(format!(
                "block align {} doesn't match {} channels of {}-bit samples",
                self.block_align, self.channels, self.bits_per_sample
            )));
        }
        Ok(encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(tag: u16, bits: u16, channels: u16) -> AudioFormat {
        AudioFormat {
            channels,
            sample_rate: 48000,
            bits_per_sample: bits,
            block_align: channels * bits / 8,
            format_tag: tag,
        }
    }

    #[test]
    fn test_encoding_resolution() {
        assert_eq!(format(FORMAT_PCM, 16, 2).encoding().unwrap(), SampleEncoding::Int16);
        assert_eq!(format(FORMAT_PCM, 24, 6).encoding().unwrap(), SampleEncoding::Int24);
        assert_eq!(format(FORMAT_IEEE_FLOAT, 32, 64).encoding().unwrap(), SampleEncoding::Float32);

        assert!(matches!(
            format(FORMAT_PCM, 8, 2).encoding(),
            Err(AudioFileError::UnsupportedEncoding { bits: 8, .. })
        ));

        let mut bad_align = format(FORMAT_PCM, 16, 2);
        bad_align.block_align = 6;
        assert!(matches!(bad_align.encoding(), Err(AudioFileError::Corrupted(_))));
    }

    #[test]
    fn test_24bit_sign_extension() {
        let min = SampleEncoding::Int24.decode(&[0x00, 0x00, 0x80]);
        assert_eq!(min, -1.0);

        let minus_one_lsb = SampleEncoding::Int24.decode(&[0xFF, 0xFF, 0xFF]);
        assert!(minus_one_lsb < 0.0 && minus_one_lsb > -1e-6);

        let half = SampleEncoding::Int24.decode(&[0x00, 0x00, 0x40]);
        assert_eq!(half, 0.5);
    }
}
