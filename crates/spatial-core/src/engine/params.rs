//! Parameter snapshot shared from the control thread to the callback
//!
//! The control thread publishes a complete [`ParameterSnapshot`] at a time;
//! the callback takes a copy of the latest one at the start of each block.
//! Publishing swaps a `basedrop::SharedCell`, so the reader never waits on
//! the writer and never sees half an update. Replaced snapshots are freed
//! on the GC thread.

use std::sync::Arc;

use basedrop::{Shared, SharedCell};

use super::gc::gc_handle;
use crate::config::MixerSection;
use crate::layout::ElevationMode;
use crate::spatial::QualityLevel;

/// Narrowest and widest DBAP focus accepted
pub const FOCUS_RANGE: (f32, f32) = (0.2, 5.0);

/// Upper bound for master gain
pub const MAX_MASTER_GAIN: f32 = 4.0;

/// Every runtime-adjustable mixer parameter, copied as one value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSnapshot {
    /// Linear gain on the spatialised main bus; LFE never sees it
    pub master_gain: f32,
    pub focus: f32,
    pub elevation_mode: ElevationMode,
    /// Main-bus compensation in dB
    pub compensation_db: f32,
    /// Subwoofer trim in dB
    pub sub_trim_db: f32,
    /// Only this source reaches the main speakers
    pub solo: Option<usize>,
    /// Finest quality level the safety ladder may use
    pub requested_quality: QualityLevel,
    /// Ask the control loop to log counters periodically
    pub debug_counters: bool,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self::from_config(&MixerSection::default())
    }
}

impl ParameterSnapshot {
    /// Initial parameters from the mixer config
    pub fn from_config(mixer: &MixerSection) -> Self {
        Self {
            master_gain: mixer.master_gain,
            focus: mixer.focus,
            elevation_mode: mixer.elevation_mode,
            compensation_db: 0.0,
            sub_trim_db: 0.0,
            solo: None,
            requested_quality: QualityLevel::Full,
            debug_counters: false,
        }
    }

    /// Clamp every value into its legal range; non-finite values fall back
    /// to neutral ones
    pub fn sanitized(mut self) -> Self {
        self.master_gain = finite_or(self.master_gain, 0.0).clamp(0.0, MAX_MASTER_GAIN);
        self.focus = finite_or(self.focus, 1.0).clamp(FOCUS_RANGE.0, FOCUS_RANGE.1);
        self.compensation_db = finite_or(self.compensation_db, 0.0);
        self.sub_trim_db = finite_or(self.sub_trim_db, 0.0);
        self
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Control-side end of the snapshot
pub struct ParamPublisher {
    cell: Arc<SharedCell<ParameterSnapshot>>,
    current: ParameterSnapshot,
}

/// Real-time end of the snapshot
pub struct ParamReader {
    cell: Arc<SharedCell<ParameterSnapshot>>,
}

/// Create a connected publisher/reader pair holding `initial`
pub fn param_channel(initial: ParameterSnapshot) -> (ParamPublisher, ParamReader) {
    let initial = initial.sanitized();
    let cell = Arc::new(SharedCell::new(Shared::new(&gc_handle(), initial)));
    (
        ParamPublisher {
            cell: cell.clone(),
            current: initial,
        },
        ParamReader { cell },
    )
}

impl ParamPublisher {
    /// Last published snapshot
    pub fn current(&self) -> ParameterSnapshot {
        self.current
    }

    /// Replace the visible snapshot; takes effect at the next block
    pub fn publish(&mut self, snapshot: ParameterSnapshot) {
        let snapshot = snapshot.sanitized();
        self.current = snapshot;
        self.cell.set(Shared::new(&gc_handle(), snapshot));
    }

    /// Publish a modified copy of the current snapshot
    pub fn update(&mut self, f: impl FnOnce(&mut ParameterSnapshot)) {
        let mut next = self.current;
        f(&mut next);
        self.publish(next);
    }
}

impl ParamReader {
    /// Copy of the latest complete snapshot; wait-free, no allocation
    #[inline]
    pub fn read(&self) -> ParameterSnapshot {
        *self.cell.get()
    }
}
