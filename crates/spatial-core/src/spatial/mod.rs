//! Spatial mixing of point sources onto the main speaker bus
//!
//! Gains follow distance-based amplitude panning (DBAP): each speaker's
//! gain falls off with its distance from the source position, and the gain
//! vector is power-normalized. How often gains are recomputed is set by the
//! current [`QualityLevel`].

mod dbap;

pub use dbap::{dbap_gains, keep_top_k, GainInputs, GainUpdate, SpatialMixer};

use serde::{Deserialize, Serialize};

/// Degradation ladder, finest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum QualityLevel {
    /// Gains every block
    #[default]
    Full = 0,
    /// Gains every 2nd block
    Half = 1,
    /// Gains every 4th block
    Quarter = 2,
    /// Quarter cadence, top-K speakers per source
    ReducedSet = 3,
}

impl QualityLevel {
    /// Blocks between gain recomputes
    pub fn cadence(&self) -> u64 {
        match self {
            QualityLevel::Full => 1,
            QualityLevel::Half => 2,
            QualityLevel::Quarter | QualityLevel::ReducedSet => 4,
        }
    }

    /// One step coarser, if any
    pub fn coarser(&self) -> Option<QualityLevel> {
        match self {
            QualityLevel::Full => Some(QualityLevel::Half),
            QualityLevel::Half => Some(QualityLevel::Quarter),
            QualityLevel::Quarter => Some(QualityLevel::ReducedSet),
            QualityLevel::ReducedSet => None,
        }
    }

    /// One step finer, if any
    pub fn finer(&self) -> Option<QualityLevel> {
        match self {
            QualityLevel::Full => None,
            QualityLevel::Half => Some(QualityLevel::Full),
            QualityLevel::Quarter => Some(QualityLevel::Half),
            QualityLevel::ReducedSet => Some(QualityLevel::Quarter),
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => QualityLevel::Half,
            2 => QualityLevel::Quarter,
            3 => QualityLevel::ReducedSet,
            _ => QualityLevel::Full,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QualityLevel::Full => "full",
            QualityLevel::Half => "half",
            QualityLevel::Quarter => "quarter",
            QualityLevel::ReducedSet => "reduced",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_steps_one_level() {
        assert_eq!(QualityLevel::Full.coarser(), Some(QualityLevel::Half));
        assert_eq!(QualityLevel::ReducedSet.coarser(), None);
        assert_eq!(QualityLevel::Half.finer(), Some(QualityLevel::Full));
        assert!(QualityLevel::Full < QualityLevel::Quarter);
        assert_eq!(QualityLevel::ReducedSet.cadence(), 4);
        assert_eq!(QualityLevel::from_u8(QualityLevel::Quarter as u8), QualityLevel::Quarter);
    }
}
