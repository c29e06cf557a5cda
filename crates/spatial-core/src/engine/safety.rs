//! CPU safety ladder
//!
//! After every block the callback reports how long it took against the
//! block's real-time duration. Sustained overload steps the mixer down one
//! quality level at a time; sustained headroom steps it back up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::spatial::QualityLevel;

/// Thresholds and hysteresis of the quality ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Load ratio above which a block counts as over budget
    pub high_water: f32,
    /// Load ratio below which a block counts as comfortably in budget
    pub low_water: f32,
    /// Consecutive over-budget blocks before stepping down
    pub escalate_after: u32,
    /// Consecutive in-budget blocks before stepping up
    pub deescalate_after: u32,
    /// Allow the ReducedSet level
    pub allow_reduced_set: bool,
    /// Speakers kept per source at ReducedSet
    pub top_k: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            high_water: 0.80,
            low_water: 0.50,
            escalate_after: 3,
            deescalate_after: 200,
            allow_reduced_set: false,
            top_k: 8,
        }
    }
}

impl SafetyConfig {
    /// Coarsest level the ladder may reach
    pub fn floor(&self) -> QualityLevel {
        if self.allow_reduced_set {
            QualityLevel::ReducedSet
        } else {
            QualityLevel::Quarter
        }
    }
}

/// Hysteresis state machine over [`QualityLevel`]
#[derive(Debug, Clone)]
pub struct CpuSafetyManager {
    config: SafetyConfig,
    level: QualityLevel,
    over_budget: u32,
    in_budget: u32,
    sustained_overruns: u64,
    last_ratio: f32,
}

impl CpuSafetyManager {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            level: QualityLevel::Full,
            over_budget: 0,
            in_budget: 0,
            sustained_overruns: 0,
            last_ratio: 0.0,
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Level the next block runs at
    pub fn level(&self) -> QualityLevel {
        self.level
    }

    /// Times the ladder hit the floor and stayed over budget
    pub fn sustained_overruns(&self) -> u64 {
        self.sustained_overruns
    }

    /// Load ratio of the last observed block
    pub fn last_ratio(&self) -> f32 {
        self.last_ratio
    }

    /// Record one block and return the level for the next one
    ///
    /// `ceiling` is the finest level allowed. When the current level is
    /// finer, the ladder steps one level toward it per block regardless of
    /// load.
    pub fn observe(&mut self, elapsed: Duration, budget: Duration, ceiling: QualityLevel) -> QualityLevel {
        let ratio = if budget.is_zero() {
            0.0
        } else {
            elapsed.as_secs_f32() / budget.as_secs_f32()
        };
        self.last_ratio = ratio;

        let floor = self.config.floor();
        let ceiling = ceiling.min(floor);

        if self.level < ceiling {
            if let Some(coarser) = self.level.coarser() {
                self.level = coarser;
            }
            self.over_budget = 0;
            self.in_budget = 0;
            return self.level;
        }

        if ratio > self.config.high_water {
            self.in_budget = 0;
            self.over_budget += 1;
            if self.over_budget >= self.config.escalate_after.max(1) {
                self.over_budget = 0;
                match self.level.coarser().filter(|&next| next <= floor) {
                    Some(next) => self.level = next,
                    None => self.sustained_overruns += 1,
                }
            }
        } else if ratio < self.config.low_water {
            self.over_budget = 0;
            self.in_budget += 1;
            if self.in_budget >= self.config.deescalate_after.max(1) {
                self.in_budget = 0;
                if let Some(next) = self.level.finer().filter(|&next| next >= ceiling) {
                    self.level = next;
                }
            }
        } else {
            self.over_budget = 0;
            self.in_budget = 0;
        }

        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: Duration = Duration::from_millis(10);
    const OVER: Duration = Duration::from_millis(9);
    const UNDER: Duration = Duration::from_millis(2);
    const MIDDLE: Duration = Duration::from_millis(6);

    fn feed(manager: &mut CpuSafetyManager, elapsed: Duration, blocks: usize) -> Vec<QualityLevel> {
        (0..blocks)
            .map(|_| manager.observe(elapsed, BUDGET, QualityLevel::Full))
            .collect()
    }

    #[test]
    fn test_escalates_one_level_at_a_time() {
        let mut manager = CpuSafetyManager::new(SafetyConfig::default());
        let levels = feed(&mut manager, OVER, 12);

        for pair in levels.windows(2) {
            assert!(pair[1] as u8 - pair[0] as u8 <= 1);
        }
        assert_eq!(levels[1], QualityLevel::Full);
        assert_eq!(levels[2], QualityLevel::Half);
        assert_eq!(levels[5], QualityLevel::Quarter);
        // ReducedSet not opted in
        assert_eq!(levels[11], QualityLevel::Quarter);
        assert_eq!(manager.sustained_overruns(), 2);
    }

    #[test]
    fn test_reduced_set_only_when_allowed() {
        let mut manager = CpuSafetyManager::new(SafetyConfig {
            allow_reduced_set: true,
            ..Default::default()
        });
        feed(&mut manager, OVER, 9);
        assert_eq!(manager.level(), QualityLevel::ReducedSet);
        assert_eq!(manager.sustained_overruns(), 0);
    }

    #[test]
    fn test_returns_to_full_after_in_budget_run() {
        let config = SafetyConfig::default();
        let mut manager = CpuSafetyManager::new(config.clone());
        feed(&mut manager, OVER, 3);
        assert_eq!(manager.level(), QualityLevel::Half);

        // One short of the run, then a block in the hysteresis band resets it
        feed(&mut manager, UNDER, config.deescalate_after as usize - 1);
        feed(&mut manager, MIDDLE, 1);
        assert_eq!(manager.level(), QualityLevel::Half);

        feed(&mut manager, UNDER, config.deescalate_after as usize - 1);
        assert_eq!(manager.level(), QualityLevel::Half);
        feed(&mut manager, UNDER, 1);
        assert_eq!(manager.level(), QualityLevel::Full);
    }

    #[test]
    fn test_interrupted_overload_does_not_escalate() {
        let mut manager = CpuSafetyManager::new(SafetyConfig::default());
        for _ in 0..10 {
            feed(&mut manager, OVER, 2);
            feed(&mut manager, MIDDLE, 1);
        }
        assert_eq!(manager.level(), QualityLevel::Full);
    }

    #[test]
    fn test_ceiling_steps_down_and_caps_recovery() {
        let mut manager = CpuSafetyManager::new(SafetyConfig::default());
        assert_eq!(manager.observe(UNDER, BUDGET, QualityLevel::Quarter), QualityLevel::Half);
        assert_eq!(manager.observe(UNDER, BUDGET, QualityLevel::Quarter), QualityLevel::Quarter);

        for _ in 0..1000 {
            manager.observe(UNDER, BUDGET, QualityLevel::Quarter);
        }
        assert_eq!(manager.level(), QualityLevel::Quarter);

        // A ceiling coarser than the floor is held at the floor
        manager.observe(UNDER, BUDGET, QualityLevel::ReducedSet);
        assert_eq!(manager.level(), QualityLevel::Quarter);
    }
}
