//! Lock-free transport command queue
//!
//! The control thread pushes commands into an `rtrb` ring buffer; the audio
//! callback drains it at the start of every block, so a command never takes
//! effect mid-block.
//!
//! ```ignore
//! let (mut tx, rx) = command_channel();
//! tx.push(EngineCommand::Seek(48_000))?;
//! ```
//!
//! Parameters (gain, focus, ...) don't travel through here; they go through
//! the parameter snapshot.

/// Transport commands sent from the control thread to the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Start or resume; at the end of the stream, start over from frame 0
    Play,
    Pause,
    /// Jump to frame 0, keeping the play state
    Restart,
    /// Jump to a frame, clamped to the stream length
    Seek(u64),
    /// Wrap to frame 0 at the end of the stream instead of stopping
    SetLoop(bool),
}

/// Capacity of the command queue
///
/// Transport commands arrive at human rate; 64 covers a burst of seeks.
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Create a new command channel (producer/consumer pair)
///
/// The producer belongs to the control thread, the consumer to the audio
/// callback.
pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}
