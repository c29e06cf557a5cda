//! Spatial Core - real-time streaming, spatial mixing and output routing
//! for multichannel speaker arrays

pub mod audio;
pub mod audio_file;
pub mod config;
pub mod engine;
pub mod layout;
pub mod routing;
pub mod scene;
pub mod spatial;
pub mod streaming;
pub mod types;

pub use types::*;
