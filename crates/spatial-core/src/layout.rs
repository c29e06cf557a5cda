//! Speaker layout: positions, bus affiliation and output width
//!
//! Layouts are loaded once at startup from YAML:
//!
//! ```yaml
//! speakers:
//!   - { channel: 0, azimuth: -30.0, elevation: 0.0, distance: 2.0 }
//!   - { channel: 1, azimuth: 30.0, elevation: 0.0, distance: 2.0 }
//! subwoofers:
//!   - { channel: 4 }
//! ```
//!
//! Angles are in degrees, azimuth clockwise from front. The layout is
//! immutable after load.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Vec3;

/// Layouts whose elevation span is below this are treated as 2-D
const FLAT_LAYOUT_SPAN: f32 = 3.0 * std::f32::consts::PI / 180.0;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Layout has no main speakers")]
    NoMainSpeakers,

    #[error("Bus channel {0} is assigned to more than one speaker")]
    DuplicateChannel(usize),

    #[error("Speaker on channel {0} has a non-finite position")]
    InvalidPosition(usize),

    #[error("Failed to read layout: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse layout: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub type LayoutResult<T> = Result<T, LayoutError>;

/// Which bus a speaker belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    Main,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speaker {
    /// Internal bus channel
    pub channel: usize,
    pub bus: Bus,
    /// Position in metres; subwoofers carry [`Vec3::ZERO`]
    pub position: Vec3,
}

/// How source elevations are fitted to the layout's vertical span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationMode {
    /// Clip to the span
    Clamp,
    /// Map the upper hemisphere onto the span
    #[default]
    RescaleAtmosUp,
    /// Map the full sphere onto the span
    RescaleFullSphere,
}

impl ElevationMode {
    pub fn name(&self) -> &'static str {
        match self {
            ElevationMode::Clamp => "clamp",
            ElevationMode::RescaleAtmosUp => "atmos",
            ElevationMode::RescaleFullSphere => "sphere",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SpeakerEntry {
    channel: usize,
    #[serde(default)]
    azimuth: f32,
    #[serde(default)]
    elevation: f32,
    #[serde(default = "default_distance")]
    distance: f32,
}

fn default_distance() -> f32 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
struct SubwooferEntry {
    channel: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct LayoutFile {
    speakers: Vec<SpeakerEntry>,
    #[serde(default)]
    subwoofers: Vec<SubwooferEntry>,
}

/// Validated speaker layout with its load-time analysis
#[derive(Debug, Clone)]
pub struct SpeakerLayout {
    main: Vec<Speaker>,
    subs: Vec<Speaker>,
    output_channels: usize,
    radius: f32,
    elevation_min: f32,
    elevation_max: f32,
}

impl SpeakerLayout {
    /// Validate speakers and analyse the geometry
    pub fn new(speakers: Vec<Speaker>) -> LayoutResult<Self> {
        let mut seen = std::collections::HashSet::new();
        for speaker in &speakers {
            if !seen.insert(speaker.channel) {
                return Err(LayoutError::DuplicateChannel(speaker.channel));
            }
            if !speaker.position.is_finite() {
                return Err(LayoutError::InvalidPosition(speaker.channel));
            }
        }

        let (main, subs): (Vec<Speaker>, Vec<Speaker>) =
            speakers.into_iter().partition(|s| s.bus == Bus::Main);
        if main.is_empty() {
            return Err(LayoutError::NoMainSpeakers);
        }

        let output_channels = main.iter().chain(&subs).map(|s| s.channel).max().unwrap_or(0) + 1;

        let mut distances: Vec<f32> = main.iter().map(|s| s.position.length()).collect();
        distances.sort_by(|a, b| a.total_cmp(b));
        let median = distances[distances.len() / 2];
        let radius = if median > 1e-3 { median } else { 1.0 };

        let (elevation_min, elevation_max) = main
            .iter()
            .map(|s| s.position.elevation())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), e| (lo.min(e), hi.max(e)));

        let layout = Self {
            main,
            subs,
            output_channels,
            radius,
            elevation_min,
            elevation_max,
        };
        log::info!(
            "Layout: {} main + {} sub speakers, {} bus channels, radius {:.2} m, elevation [{:.1}°, {:.1}°]{}",
            layout.main.len(),
            layout.subs.len(),
            layout.output_channels,
            layout.radius,
            layout.elevation_min.to_degrees(),
            layout.elevation_max.to_degrees(),
            if layout.is_2d() { " (2-D)" } else { "" }
        );
        Ok(layout)
    }

    pub fn from_yaml_str(yaml: &str) -> LayoutResult<Self> {
        let file: LayoutFile = serde_yaml::from_str(yaml)?;
        let main = file.speakers.into_iter().map(|s| Speaker {
            channel: s.channel,
            bus: Bus::Main,
            position: Vec3::from_spherical(s.azimuth.to_radians(), s.elevation.to_radians(), s.distance),
        });
        let subs = file.subwoofers.into_iter().map(|s| Speaker {
            channel: s.channel,
            bus: Bus::Sub,
            position: Vec3::ZERO,
        });
        Self::new(main.chain(subs).collect())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> LayoutResult<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&yaml)
    }

    pub fn main_speakers(&self) -> &[Speaker] {
        &self.main
    }

    pub fn subwoofers(&self) -> &[Speaker] {
        &self.subs
    }

    /// Bus width: highest speaker channel + 1
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// True if `channel` carries a speaker of either bus
    pub fn has_channel(&self, channel: usize) -> bool {
        self.main.iter().chain(&self.subs).any(|s| s.channel == channel)
    }

    /// Median main-speaker distance
    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn elevation_range(&self) -> (f32, f32) {
        (self.elevation_min, self.elevation_max)
    }

    pub fn is_2d(&self) -> bool {
        self.elevation_max - self.elevation_min < FLAT_LAYOUT_SPAN
    }

    /// Fit a direction to the layout; always returns a finite unit vector
    pub fn sanitize_direction(&self, direction: Vec3, mode: ElevationMode) -> Vec3 {
        let dir = direction.normalized_or_forward();
        if self.is_2d() {
            return Vec3::new(dir.x, dir.y, 0.0).normalized_or_forward();
        }

        let (lo, hi) = (self.elevation_min, self.elevation_max);
        let elevation = dir.elevation();
        let fitted = match mode {
            ElevationMode::Clamp => elevation.clamp(lo, hi),
            ElevationMode::RescaleAtmosUp => {
                let t = (elevation.max(0.0) / std::f32::consts::FRAC_PI_2).min(1.0);
                lo + t * (hi - lo)
            }
            ElevationMode::RescaleFullSphere => {
                let t = ((elevation + std::f32::consts::FRAC_PI_2) / std::f32::consts::PI).clamp(0.0, 1.0);
                lo + t * (hi - lo)
            }
        };
        Vec3::from_spherical(dir.azimuth(), fitted, 1.0).normalized_or_forward()
    }
}
