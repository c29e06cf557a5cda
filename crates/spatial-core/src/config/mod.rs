//! Engine configuration and YAML persistence
//!
//! Every section uses `#[serde(default)]`, so a config file only needs the
//! keys it changes:
//!
//! ```yaml
//! audio:
//!   device: { name: "hw:MADIface", host: ALSA }
//!   buffer_size: 256
//! mixer:
//!   focus: 1.5
//! safety:
//!   allow_reduced_set: true
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path, APP_DIR};

use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::engine::SafetyConfig;
use crate::layout::ElevationMode;
use crate::streaming::PreloadPolicy;
use crate::types::{DEFAULT_CHUNK_FRAMES, DEFAULT_SUB_BLOCK_FRAMES};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub streaming: StreamingSection,
    pub mixer: MixerSection,
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSection {
    /// Frames per chunk slot
    pub chunk_frames: usize,
    /// Frames per file read inside a chunk load
    pub sub_block_frames: usize,
    pub preload: PreloadPolicy,
}

impl Default for StreamingSection {
    fn default() -> Self {
        Self {
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            sub_block_frames: DEFAULT_SUB_BLOCK_FRAMES,
            preload: PreloadPolicy::default(),
        }
    }
}

/// Initial mixer parameters and fixed routing constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerSection {
    pub focus: f32,
    pub elevation_mode: ElevationMode,
    pub master_gain: f32,
    /// Compensation and sub trim are limited to ±this many dB
    pub compensation_limit_db: f32,
    /// Duration of compensation and sub-trim ramps
    pub compensation_ramp_ms: f32,
    /// Overall LFE level before the split across subwoofers
    pub sub_compensation: f32,
}

impl Default for MixerSection {
    fn default() -> Self {
        Self {
            focus: 1.0,
            elevation_mode: ElevationMode::RescaleAtmosUp,
            master_gain: 0.5,
            compensation_limit_db: 10.0,
            compensation_ramp_ms: 50.0,
            sub_compensation: 0.95,
        }
    }
}

impl MixerSection {
    /// Ramp length in frames at `sample_rate`
    pub fn ramp_frames(&self, sample_rate: u32) -> usize {
        ((self.compensation_ramp_ms.max(0.0) / 1000.0) * sample_rate as f32).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::QualityLevel;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.streaming.chunk_frames, 240_000);
        assert_eq!(config.streaming.sub_block_frames, 4096);
        assert_eq!(config.mixer.master_gain, 0.5);
        assert_eq!(config.mixer.ramp_frames(48000), 2400);
        assert_eq!(config.safety.escalate_after, 3);
        assert!(!config.safety.allow_reduced_set);
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = "mixer:\n  focus: 2.0\n  elevation_mode: clamp\nsafety:\n  allow_reduced_set: true\n  floor_hint: ignored\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mixer.focus, 2.0);
        assert_eq!(config.mixer.elevation_mode, ElevationMode::Clamp);
        assert_eq!(config.mixer.master_gain, 0.5);
        assert!(config.safety.allow_reduced_set);
        assert_eq!(config.safety.floor(), QualityLevel::ReducedSet);
        assert_eq!(config.streaming, StreamingSection::default());
    }
}
