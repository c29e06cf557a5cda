//! Real-time engine: callback state, control handle and the plumbing
//! between them
//!
//! - `command`: transport commands over a lock-free SPSC queue
//! - `params`: parameter snapshot published as one value
//! - `safety`: CPU safety ladder over quality levels
//! - `telemetry`: atomics the callback writes and the control thread reads
//! - `gc`: deferred deallocation for snapshots dropped on the audio thread
//! - `engine`: [`SpatialEngine`] and [`EngineHandle`]

mod command;
mod engine;
pub mod gc;
mod params;
mod safety;
mod telemetry;

pub use command::{command_channel, EngineCommand, COMMAND_QUEUE_CAPACITY};
pub use engine::{EngineError, EngineHandle, EngineResult, EngineSetup, SpatialEngine, MAX_BLOCK_FRAMES};
pub use params::{param_channel, ParamPublisher, ParamReader, ParameterSnapshot, FOCUS_RANGE, MAX_MASTER_GAIN};
pub use safety::{CpuSafetyManager, SafetyConfig};
pub use telemetry::{EngineTelemetry, TelemetrySnapshot};
