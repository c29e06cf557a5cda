//! Lock-free engine telemetry
//!
//! The callback writes these atomics once per block with relaxed stores;
//! any thread reads them. Stream counters live in [`StreamStats`] and are
//! merged in when a [`TelemetrySnapshot`] is taken.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use crate::spatial::QualityLevel;
use crate::streaming::StreamStats;

/// Atomics written by the audio callback
#[derive(Debug, Default)]
pub struct EngineTelemetry {
    /// Playhead in frames
    pub position: AtomicU64,
    pub playing: AtomicBool,
    pub looping: AtomicBool,
    /// [`QualityLevel`] as `u8`
    pub quality: AtomicU8,
    /// Duration of the last callback in nanoseconds
    pub callback_nanos: AtomicU64,
    /// Real-time duration of the last block in nanoseconds
    pub budget_nanos: AtomicU64,
    pub blocks: AtomicU64,
    pub sustained_overruns: AtomicU64,
    pub debug_counters: AtomicBool,
}

impl EngineTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn quality(&self) -> QualityLevel {
        QualityLevel::from_u8(self.quality.load(Ordering::Relaxed))
    }

    /// Store the timing of one finished block
    #[inline]
    pub(crate) fn record_block(&self, elapsed: Duration, budget: Duration, quality: QualityLevel, overruns: u64) {
        self.callback_nanos.store(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.budget_nanos.store(budget.as_nanos() as u64, Ordering::Relaxed);
        self.quality.store(quality as u8, Ordering::Relaxed);
        self.sustained_overruns.store(overruns, Ordering::Relaxed);
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Plain copy of every counter
    pub fn snapshot(&self, stats: &StreamStats) -> TelemetrySnapshot {
        TelemetrySnapshot {
            position: self.position(),
            playing: self.is_playing(),
            looping: self.looping.load(Ordering::Relaxed),
            quality: self.quality(),
            callback: Duration::from_nanos(self.callback_nanos.load(Ordering::Relaxed)),
            budget: Duration::from_nanos(self.budget_nanos.load(Ordering::Relaxed)),
            blocks: self.blocks.load(Ordering::Relaxed),
            sustained_overruns: self.sustained_overruns.load(Ordering::Relaxed),
            debug_counters: self.debug_counters.load(Ordering::Relaxed),
            buffer_misses: stats.buffer_misses(),
            load_failures: stats.load_failures(),
            loads_completed: stats.loads_completed(),
        }
    }
}

/// Telemetry values at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySnapshot {
    pub position: u64,
    pub playing: bool,
    pub looping: bool,
    pub quality: QualityLevel,
    pub callback: Duration,
    pub budget: Duration,
    pub blocks: u64,
    pub sustained_overruns: u64,
    pub debug_counters: bool,
    pub buffer_misses: u64,
    pub load_failures: u64,
    pub loads_completed: u64,
}

impl TelemetrySnapshot {
    /// Last callback duration over its block duration
    pub fn load_ratio(&self) -> f32 {
        if self.budget.is_zero() {
            0.0
        } else {
            self.callback.as_secs_f32() / self.budget.as_secs_f32()
        }
    }

    pub fn position_seconds(&self, sample_rate: u32) -> f64 {
        self.position as f64 / sample_rate.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_block() {
        let telemetry = EngineTelemetry::new();
        telemetry.position.store(96_000, Ordering::Relaxed);
        telemetry.record_block(
            Duration::from_micros(2500),
            Duration::from_micros(10_000),
            QualityLevel::Quarter,
            1,
        );

        let snap = telemetry.snapshot(&StreamStats::default());
        assert_eq!(snap.quality, QualityLevel::Quarter);
        assert_eq!(snap.blocks, 1);
        assert_eq!(snap.sustained_overruns, 1);
        assert!((snap.load_ratio() - 0.25).abs() < 1e-6);
        assert_eq!(snap.position_seconds(48_000), 2.0);
        assert_eq!(snap.buffer_misses, 0);
    }
}
