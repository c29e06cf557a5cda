//! Chunked streaming of one multichannel file
//!
//! ```text
//!  control thread ──tick──► Prefetcher ──request──► BackgroundLoader
//!                                                        │ load_chunk
//!                                                        ▼
//!  StreamResource (file) ◄──sub-block reads── DoubleBuffer [slot 0 | slot 1]
//!                                                        ▲ view_for
//!                                                 real-time callback
//! ```
//!
//! Two fixed slots each hold one chunk of every channel. The loader fills
//! the slot that isn't playing; the callback switches over at chunk
//! boundaries. When the next chunk isn't ready in time the callback reads it
//! directly, counts a buffer miss and keeps going.

mod double_buffer;
mod loader;
mod preload;
mod resource;
mod slot;

pub use double_buffer::{DoubleBuffer, LoadOutcome, StreamStats};
pub use loader::{BackgroundLoader, LoadRequester};
pub use preload::{PreloadPolicy, Prefetcher};
pub use resource::StreamResource;
pub use slot::{SlotState, SlotView};

use thiserror::Error;

use crate::audio_file::AudioFileError;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Audio file error: {0}")]
    File(#[from] AudioFileError),

    #[error("No free slot available")]
    NoFreeSlot,

    #[error("Failed to spawn loader thread: {0}")]
    LoaderSpawn(std::io::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;
