//! Source table consumed by the mixer
//!
//! A scene is loaded once. Source indices are stable for the whole session:
//! sources that fall silent are masked through [`ActiveMask`], never removed.
//!
//! ```yaml
//! sources:
//!   - name: "1.1"
//!     channel: 0
//!     kind: audio_object
//!     trajectory:
//!       - { time: 0.0, direction: { x: 0.0, y: 1.0, z: 0.0 } }
//!       - { time: 4.0, direction: { x: 1.0, y: 0.0, z: 0.0 } }
//!   - { name: "2.1", channel: 1, kind: direct_speaker, speaker: 3 }
//!   - { name: LFE, channel: 2, kind: lfe }
//! ```

mod mask;
mod pose;

pub use mask::ActiveMask;
pub use pose::{slerp, PoseSampler};

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::{Bus, SpeakerLayout};
use crate::types::Vec3;

#[derive(Error, Debug)]
pub enum SceneError {
    #[error("Source '{source_name}' reads file channel {channel}, stream has {channels}")]
    ChannelOutOfRange {
        source_name: String,
        channel: usize,
        channels: usize,
    },

    #[error("Direct-speaker source '{source_name}' targets bus channel {speaker}, which has no main speaker")]
    UnknownSpeaker { source_name: String, speaker: usize },

    #[error("Active mask has {mask} entries, scene has {sources} sources")]
    MaskMismatch { mask: usize, sources: usize },

    #[error("Failed to read scene: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse scene: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub type SceneResult<T> = Result<T, SceneError>;

/// One point on an object trajectory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Seconds from stream start
    pub time: f64,
    pub direction: Vec3,
}

/// Source category with its category-specific data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// Panned object following a keyframed trajectory
    AudioObject {
        #[serde(default)]
        trajectory: Vec<Keyframe>,
    },
    /// Bed channel fed straight to one main speaker
    DirectSpeaker {
        /// Bus channel of the target speaker
        speaker: usize,
    },
    /// Low-frequency effects, routed to the subwoofers
    Lfe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    /// Channel of the stream file carrying this source
    pub channel: usize,
    #[serde(flatten)]
    pub kind: SourceKind,
}

impl Source {
    pub fn is_lfe(&self) -> bool {
        matches!(self.kind, SourceKind::Lfe)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SceneFile {
    #[serde(default)]
    sources: Vec<Source>,
}

/// Fixed source table
#[derive(Debug, Clone, Default)]
pub struct Scene {
    sources: Vec<Source>,
}

impl Scene {
    /// Build a scene; trajectories are sorted by time
    pub fn new(mut sources: Vec<Source>) -> Self {
        for source in &mut sources {
            if let SourceKind::AudioObject { trajectory } = &mut source.kind {
                trajectory.sort_by(|a, b| a.time.total_cmp(&b.time));
            }
        }
        Self { sources }
    }

    pub fn from_yaml_str(yaml: &str) -> SceneResult<Self> {
        let file: SceneFile = serde_yaml::from_str(yaml)?;
        Ok(Self::new(file.sources))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> SceneResult<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&yaml)
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Index of the source called `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name == name)
    }

    /// Check the table against the stream and layout before playback
    pub fn validate(&self, layout: &SpeakerLayout, stream_channels: usize) -> SceneResult<()> {
        for source in &self.sources {
            if source.channel >= stream_channels {
                return Err(SceneError::ChannelOutOfRange {
                    source_name: source.name.clone(),
                    channel: source.channel,
                    channels: stream_channels,
                });
            }
            if let SourceKind::DirectSpeaker { speaker } = source.kind {
                let known = layout
                    .main_speakers()
                    .iter()
                    .any(|s| s.channel == speaker && s.bus == Bus::Main);
                if !known {
                    return Err(SceneError::UnknownSpeaker {
                        source_name: source.name.clone(),
                        speaker,
                    });
                }
            }
        }

        let objects = self
            .sources
            .iter()
            .filter(|s| matches!(s.kind, SourceKind::AudioObject { .. }))
            .count();
        let lfe = self.sources.iter().filter(|s| s.is_lfe()).count();
        log::info!(
            "Scene: {} sources ({} objects, {} direct, {} LFE)",
            self.sources.len(),
            objects,
            self.sources.len() - objects - lfe,
            lfe
        );
        if lfe > 0 && layout.subwoofers().is_empty() {
            log::warn!("Scene has LFE sources but the layout has no subwoofers; LFE will be silent");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"
sources:
  - name: "1.1"
    channel: 0
    kind: audio_object
    trajectory:
      - { time: 4.0, direction: { x: 1.0, y: 0.0, z: 0.0 } }
      - { time: 0.0, direction: { x: 0.0, y: 1.0, z: 0.0 } }
  - { name: "2.1", channel: 1, kind: direct_speaker, speaker: 1 }
  - { name: LFE, channel: 2, kind: lfe }
"#;

    fn layout() -> SpeakerLayout {
        SpeakerLayout::from_yaml_str(
            "speakers:\n  - { channel: 0, azimuth: -30 }\n  - { channel: 1, azimuth: 30 }\nsubwoofers:\n  - { channel: 2 }\n",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_tagged_kinds() {
        let scene = Scene::from_yaml_str(SCENE).unwrap();
        assert_eq!(scene.len(), 3);
        assert!(scene.sources()[2].is_lfe());
        assert_eq!(scene.sources()[1].kind, SourceKind::DirectSpeaker { speaker: 1 });
        assert_eq!(scene.index_of("LFE"), Some(2));

        match &scene.sources()[0].kind {
            SourceKind::AudioObject { trajectory } => {
                assert_eq!(trajectory[0].time, 0.0);
                assert_eq!(trajectory[1].time, 4.0);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_validate_against_stream_and_layout() {
        let scene = Scene::from_yaml_str(SCENE).unwrap();
        assert!(scene.validate(&layout(), 3).is_ok());
        assert!(matches!(
            scene.validate(&layout(), 2),
            Err(SceneError::ChannelOutOfRange { channel: 2, .. })
        ));

        let bad = Scene::from_yaml_str("sources:\n  - { name: a, channel: 0, kind: direct_speaker, speaker: 2 }\n").unwrap();
        // Channel 2 is a subwoofer, not a main speaker
        assert!(matches!(bad.validate(&layout(), 1), Err(SceneError::UnknownSpeaker { speaker: 2, .. })));
    }
}
