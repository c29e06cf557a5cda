//! Output device backend on CPAL
//!
//! The audio thread owns the [`SpatialEngine`](crate::engine::SpatialEngine)
//! outright. The control thread talks to it only through the engine handle:
//! transport commands over a lock-free queue, parameters through a snapshot,
//! and telemetry back through relaxed atomics.
//!
//! ```ignore
//! let output = negotiate_output(&config.audio, layout.output_channels())?;
//! let channel_map = ChannelMap::load(path, &layout, output.channels())?;
//! let (engine, handle) = SpatialEngine::open(setup)?;
//! let stream = start_output(output, engine)?;
//! ```

mod config;
mod cpal_backend;
mod device;
mod error;

pub use config::{AudioConfig, DeviceId, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use cpal_backend::{negotiate_output, start_output, NegotiatedOutput, OutputStream};
pub use device::{find_output_device, list_output_devices, AudioDevice};
pub use error::{AudioError, AudioResult};
