//! DBAP gain computation and per-source summation

use rayon::prelude::*;

use super::QualityLevel;
use crate::layout::{ElevationMode, SpeakerLayout};
use crate::scene::{ActiveMask, Scene, SourceKind};
use crate::types::{BusBuffer, Vec3};

/// Above this many sources, gain rows are computed on the rayon pool
const PARALLEL_SOURCES: usize = 32;

/// Power-normalized DBAP gains for one source position
///
/// `g_i = (1 / (1 + d_i))^focus`, then scaled so `Σ g_i² = 1`. Higher focus
/// sharpens the falloff. `out` has one entry per speaker.
pub fn dbap_gains(source: Vec3, speakers: &[Vec3], focus: f32, out: &mut [f32]) {
    let mut power = 0.0f32;
    for (gain, speaker) in out.iter_mut().zip(speakers) {
        let g = (1.0 / (1.0 + source.distance(speaker))).powf(focus);
        *gain = g;
        power += g * g;
    }

    if !power.is_finite() || power <= f32::MIN_POSITIVE {
        // Only reachable with absurd inputs; spread evenly instead of NaN
        let even = 1.0 / (out.len().max(1) as f32).sqrt();
        out.fill(even);
        return;
    }
    let norm = 1.0 / power.sqrt();
    for gain in out.iter_mut() {
        *gain *= norm;
    }
}

/// Zero all but the `k` largest gains; kept gains are unchanged
///
/// `scratch` must be at least as long as `gains`.
pub fn keep_top_k(gains: &mut [f32], k: usize, scratch: &mut [f32]) {
    if k == 0 {
        gains.fill(0.0);
        return;
    }
    if k >= gains.len() {
        return;
    }

    let scratch = &mut scratch[..gains.len()];
    scratch.copy_from_slice(gains);
    scratch.select_nth_unstable_by(k - 1, |a, b| b.total_cmp(a));
    let threshold = scratch[k - 1];

    let above = gains.iter().filter(|&&g| g > threshold).count();
    let mut ties_left = k - above;
    for gain in gains.iter_mut() {
        if *gain > threshold {
            continue;
        }
        if *gain == threshold && ties_left > 0 {
            ties_left -= 1;
            continue;
        }
        *gain = 0.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    Panned,
    /// Index into the main speaker list
    Speaker(usize),
    Lfe,
}

/// What the gain recompute reads
pub struct GainInputs<'a> {
    /// Sanitized unit direction per source
    pub directions: &'a [Vec3],
    pub mask: &'a ActiveMask,
    pub focus: f32,
    pub solo: Option<usize>,
    pub quality: QualityLevel,
}

/// What the current block has to refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GainUpdate {
    /// Cadence tick: resample poses, then recompute
    pub resample: bool,
    /// Recompute gains from the directions already held
    pub recompute: bool,
}

/// Holds one gain row per source over the main speakers
pub struct SpatialMixer {
    speaker_positions: Vec<Vec3>,
    speaker_channels: Vec<usize>,
    radius: f32,
    targets: Vec<Target>,
    /// `sources * speakers`, row per source
    gains: Vec<f32>,
    scratch: Vec<f32>,
    /// Row reflects the source as active
    row_valid: Vec<bool>,
    top_k: usize,
    block_index: u64,
    last_params: Option<(f32, ElevationMode, Option<usize>)>,
}

impl SpatialMixer {
    pub fn new(scene: &Scene, layout: &SpeakerLayout, top_k: usize) -> Self {
        let speakers = layout.main_speakers();
        let targets = scene
            .sources()
            .iter()
            .map(|source| match source.kind {
                SourceKind::AudioObject { .. } => Target::Panned,
                SourceKind::DirectSpeaker { speaker } => speakers
                    .iter()
                    .position(|s| s.channel == speaker)
                    .map(Target::Speaker)
                    .unwrap_or(Target::Lfe),
                SourceKind::Lfe => Target::Lfe,
            })
            .collect::<Vec<_>>();

        let cells = targets.len() * speakers.len();
        Self {
            speaker_positions: speakers.iter().map(|s| s.position).collect(),
            speaker_channels: speakers.iter().map(|s| s.channel).collect(),
            radius: layout.radius(),
            row_valid: vec![false; targets.len()],
            targets,
            gains: vec![0.0; cells],
            scratch: vec![0.0; cells],
            top_k: top_k.max(1),
            block_index: 0,
            last_params: None,
        }
    }

    pub fn speaker_count(&self) -> usize {
        self.speaker_positions.len()
    }

    /// Bus channel of each main speaker, in gain-row order
    pub fn speaker_channels(&self) -> &[usize] {
        &self.speaker_channels
    }

    /// Gain row of one source
    pub fn gains(&self, source: usize) -> &[f32] {
        let n = self.speaker_count();
        &self.gains[source * n..(source + 1) * n]
    }

    /// Advance the block counter and decide what this block refreshes
    ///
    /// The first block, a cadence tick, or a change of focus, elevation
    /// mode or solo all call for a recompute.
    pub fn begin_block(
        &mut self,
        quality: QualityLevel,
        focus: f32,
        mode: ElevationMode,
        solo: Option<usize>,
    ) -> GainUpdate {
        let params = (focus, mode, solo);
        let changed = self.last_params != Some(params);
        self.last_params = Some(params);

        let tick = self.block_index % quality.cadence() == 0;
        self.block_index = self.block_index.wrapping_add(1);

        GainUpdate {
            resample: tick,
            recompute: tick || changed,
        }
    }

    /// Force the next block to resample and recompute (seek, restart)
    pub fn invalidate(&mut self) {
        self.block_index = 0;
        self.last_params = None;
    }

    /// Recompute every gain row
    pub fn recompute(&mut self, inputs: &GainInputs<'_>) {
        let n = self.speaker_count();
        if n == 0 {
            return;
        }
        let speakers = &self.speaker_positions;
        let targets = &self.targets;
        let radius = self.radius;
        let top_k = self.top_k;

        let fill = |(i, ((row, scratch), valid)): (usize, ((&mut [f32], &mut [f32]), &mut bool))| {
            *valid = fill_row(i, targets[i], inputs, speakers, radius, top_k, row, scratch);
        };

        if targets.len() > PARALLEL_SOURCES {
            self.gains
                .par_chunks_mut(n)
                .zip(self.scratch.par_chunks_mut(n))
                .zip(self.row_valid.par_iter_mut())
                .enumerate()
                .for_each(fill);
        } else {
            self.gains
                .chunks_mut(n)
                .zip(self.scratch.chunks_mut(n))
                .zip(self.row_valid.iter_mut())
                .enumerate()
                .for_each(fill);
        }
    }

    /// Compute rows for sources that became active since the last recompute
    pub fn refresh_activated(&mut self, inputs: &GainInputs<'_>) {
        let n = self.speaker_count();
        if n == 0 {
            return;
        }
        for i in 0..self.targets.len() {
            if self.row_valid[i] || !inputs.mask.is_active(i) {
                continue;
            }
            let row = &mut self.gains[i * n..(i + 1) * n];
            let scratch = &mut self.scratch[i * n..(i + 1) * n];
            self.row_valid[i] = fill_row(
                i,
                self.targets[i],
                inputs,
                &self.speaker_positions,
                self.radius,
                self.top_k,
                row,
                scratch,
            );
        }
    }

    /// Add `input * scale * gain` into each main-speaker channel of `bus`
    ///
    /// Writes `input.len()` frames starting at `offset`. Zero gains are
    /// skipped.
    pub fn mix_source(&self, source: usize, input: &[f32], scale: f32, bus: &mut BusBuffer, offset: usize) {
        for (&gain, &channel) in self.gains(source).iter().zip(&self.speaker_channels) {
            if gain == 0.0 {
                continue;
            }
            let g = gain * scale;
            let out = &mut bus.channel_mut(channel)[offset..offset + input.len()];
            for (o, &s) in out.iter_mut().zip(input) {
                *o += s * g;
            }
        }
    }
}

/// Fill one gain row; returns whether the row reflects an active source
#[allow(clippy::too_many_arguments)]
fn fill_row(
    index: usize,
    target: Target,
    inputs: &GainInputs<'_>,
    speakers: &[Vec3],
    radius: f32,
    top_k: usize,
    row: &mut [f32],
    scratch: &mut [f32],
) -> bool {
    let silenced = inputs.solo.is_some_and(|solo| solo != index);
    if !inputs.mask.is_active(index) || silenced {
        row.fill(0.0);
        // A soloed-out row is still valid; only masked rows need a refresh
        return silenced;
    }

    match target {
        Target::Lfe => row.fill(0.0),
        Target::Speaker(speaker) => {
            row.fill(0.0);
            row[speaker] = 1.0;
        }
        Target::Panned => {
            let direction = inputs
                .directions
                .get(index)
                .copied()
                .unwrap_or(Vec3::FORWARD)
                .normalized_or_forward();
            dbap_gains(direction * radius, speakers, inputs.focus, row);
            if inputs.quality == QualityLevel::ReducedSet {
                keep_top_k(row, top_k, scratch);
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Keyframe, Source};

    fn dome() -> SpeakerLayout {
        SpeakerLayout::from_yaml_str(
            r#"
speakers:
  - { channel: 0, azimuth: 0, elevation: 0, distance: 2.0 }
  - { channel: 1, azimuth: 60, elevation: 0, distance: 2.0 }
  - { channel: 2, azimuth: 120, elevation: 0, distance: 2.0 }
  - { channel: 3, azimuth: 180, elevation: 0, distance: 2.0 }
  - { channel: 4, azimuth: -120, elevation: 0, distance: 2.0 }
  - { channel: 5, azimuth: -60, elevation: 0, distance: 2.0 }
  - { channel: 6, azimuth: 45, elevation: 45, distance: 2.0 }
  - { channel: 7, azimuth: -135, elevation: 45, distance: 2.0 }
subwoofers:
  - { channel: 8 }
"#,
        )
        .unwrap()
    }

    fn positions(layout: &SpeakerLayout) -> Vec<Vec3> {
        layout.main_speakers().iter().map(|s| s.position).collect()
    }

    fn scene() -> Scene {
        Scene::new(vec![
            Source {
                name: "obj".into(),
                channel: 0,
                kind: SourceKind::AudioObject {
                    trajectory: vec![Keyframe {
                        time: 0.0,
                        direction: Vec3::FORWARD,
                    }],
                },
            },
            Source {
                name: "bed".into(),
                channel: 1,
                kind: SourceKind::DirectSpeaker { speaker: 3 },
            },
            Source {
                name: "lfe".into(),
                channel: 2,
                kind: SourceKind::Lfe,
            },
        ])
    }

    #[test]
    fn test_power_is_constant_over_directions() {
        let layout = dome();
        let speakers = positions(&layout);
        let mut gains = vec![0.0; speakers.len()];

        for step in 0..72 {
            for elevation in [-0.3f32, 0.0, 0.4, 1.2] {
                let azimuth = (step as f32 * 5.0).to_radians();
                let dir = Vec3::from_spherical(azimuth, elevation, 1.0);
                dbap_gains(dir * layout.radius(), &speakers, 1.0, &mut gains);
                let power: f32 = gains.iter().map(|g| g * g).sum();
                assert!((power - 1.0).abs() < 1e-4, "power {} at az {}", power, azimuth);
            }
        }
    }

    #[test]
    fn test_focus_sharpens_falloff() {
        let layout = dome();
        let speakers = positions(&layout);
        let mut wide = vec![0.0; speakers.len()];
        let mut sharp = vec![0.0; speakers.len()];
        let source = Vec3::FORWARD * layout.radius();

        dbap_gains(source, &speakers, 0.5, &mut wide);
        dbap_gains(source, &speakers, 4.0, &mut sharp);
        // Front speaker dominates more with higher focus
        assert!(sharp[0] > wide[0]);
        assert!(sharp[3] < wide[3]);
    }

    #[test]
    fn test_zero_direction_never_nan() {
        let layout = dome();
        let scene = scene();
        let mask = ActiveMask::new(scene.len());
        let mut mixer = SpatialMixer::new(&scene, &layout, 8);
        let directions = [Vec3::ZERO, Vec3::ZERO, Vec3::ZERO];

        mixer.recompute(&GainInputs {
            directions: &directions,
            mask: &mask,
            focus: 1.0,
            solo: None,
            quality: QualityLevel::Full,
        });
        assert!(mixer.gains(0).iter().all(|g| g.is_finite()));
        // Sanitized to forward, so the front speaker is loudest
        let loudest = mixer
            .gains(0)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(loudest, Some(0));
    }

    #[test]
    fn test_direct_speaker_one_hot_and_lfe_silent() {
        let layout = dome();
        let scene = scene();
        let mask = ActiveMask::new(scene.len());
        let mut mixer = SpatialMixer::new(&scene, &layout, 8);

        mixer.recompute(&GainInputs {
            directions: &[Vec3::FORWARD; 3],
            mask: &mask,
            focus: 1.0,
            solo: None,
            quality: QualityLevel::Full,
        });
        assert_eq!(mixer.gains(1), &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(mixer.gains(2).iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_cadence_and_forced_recompute() {
        let layout = dome();
        let scene = scene();
        let mut mixer = SpatialMixer::new(&scene, &layout, 8);
        let mode = ElevationMode::RescaleAtmosUp;

        let updates: Vec<GainUpdate> = (0..8)
            .map(|_| mixer.begin_block(QualityLevel::Quarter, 1.0, mode, None))
            .collect();
        let ticks: Vec<bool> = updates.iter().map(|u| u.resample).collect();
        assert_eq!(ticks, vec![true, false, false, false, true, false, false, false]);

        // Block 8 is the next tick
        let update = mixer.begin_block(QualityLevel::Quarter, 1.0, mode, None);
        assert_eq!(update, GainUpdate { resample: true, recompute: true });

        // Focus change between ticks recomputes without resampling
        let update = mixer.begin_block(QualityLevel::Quarter, 2.0, mode, None);
        assert_eq!(update, GainUpdate { resample: false, recompute: true });
        let update = mixer.begin_block(QualityLevel::Quarter, 2.0, mode, None);
        assert_eq!(update, GainUpdate::default());
    }

    #[test]
    fn test_top_k_keeps_largest_unchanged() {
        let mut gains = [0.1, 0.5, 0.3, 0.5, 0.2, 0.05];
        let mut scratch = [0.0; 6];
        keep_top_k(&mut gains, 3, &mut scratch);
        assert_eq!(gains, [0.0, 0.5, 0.3, 0.5, 0.0, 0.0]);

        // Ties at the threshold never push out a larger gain
        let mut tied = [0.2, 0.2, 0.9];
        keep_top_k(&mut tied, 2, &mut scratch);
        assert_eq!(tied, [0.2, 0.0, 0.9]);
    }

    #[test]
    fn test_reduced_set_limits_speakers() {
        let layout = dome();
        let scene = scene();
        let mask = ActiveMask::new(scene.len());
        let mut mixer = SpatialMixer::new(&scene, &layout, 3);

        mixer.recompute(&GainInputs {
            directions: &[Vec3::new(0.3, 1.0, 0.2); 3],
            mask: &mask,
            focus: 1.0,
            solo: None,
            quality: QualityLevel::ReducedSet,
        });
        assert_eq!(mixer.gains(0).iter().filter(|&&g| g > 0.0).count(), 3);
    }

    #[test]
    fn test_masked_source_refreshed_when_activated() {
        let layout = dome();
        let scene = scene();
        let mask = ActiveMask::new(scene.len());
        mask.set(0, false);
        let mut mixer = SpatialMixer::new(&scene, &layout, 8);
        let directions = [Vec3::FORWARD; 3];

        mixer.recompute(&quarter_inputs(&directions, &mask));
        assert!(mixer.gains(0).iter().all(|&g| g == 0.0));

        mask.set(0, true);
        mixer.refresh_activated(&quarter_inputs(&directions, &mask));
        assert!(mixer.gains(0)[0] > 0.0);
    }

    fn quarter_inputs<'a>(directions: &'a [Vec3], mask: &'a ActiveMask) -> GainInputs<'a> {
        GainInputs {
            directions,
            mask,
            focus: 1.0,
            solo: None,
            quality: QualityLevel::Quarter,
        }
    }

    #[test]
    fn test_solo_silences_other_main_sources() {
        let layout = dome();
        let scene = scene();
        let mask = ActiveMask::new(scene.len());
        let mut mixer = SpatialMixer::new(&scene, &layout, 8);

        mixer.recompute(&GainInputs {
            directions: &[Vec3::FORWARD; 3],
            mask: &mask,
            focus: 1.0,
            solo: Some(1),
            quality: QualityLevel::Full,
        });
        assert!(mixer.gains(0).iter().all(|&g| g == 0.0));
        assert_eq!(mixer.gains(1)[3], 1.0);

        let mut bus = BusBuffer::new(layout.output_channels(), 4);
        mixer.mix_source(1, &[1.0, 1.0], 0.5, &mut bus, 2);
        assert_eq!(bus.channel(3), &[0.0, 0.0, 0.5, 0.5]);
    }
}
