//! Per-block source directions from keyframe trajectories

use super::{Keyframe, Scene, SourceKind};
use crate::layout::{ElevationMode, SpeakerLayout};
use crate::types::Vec3;

/// Spherical linear interpolation between two unit directions
///
/// `t` is clamped to [0, 1]. Nearly parallel inputs fall back to a
/// normalized lerp; nearly opposite inputs rotate about a perpendicular
/// axis since the great circle between them is undefined.
pub fn slerp(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    let t = t.clamp(0.0, 1.0);
    let dot = a.dot(&b).clamp(-1.0, 1.0);

    if dot > 0.9995 {
        return (a + (b - a) * t).normalized_or_forward();
    }

    if dot < -0.9995 {
        let helper = if a.x.abs() < 0.9 {
            Vec3::new(1.0, 0.0, 0.0)
        } else {
            Vec3::new(0.0, 1.0, 0.0)
        };
        let perp = a.cross(&helper).normalized_or_forward();
        let theta = std::f32::consts::PI * t;
        return a * theta.cos() + perp * theta.sin();
    }

    let theta = dot.acos();
    let sin_theta = theta.sin();
    a * (((1.0 - t) * theta).sin() / sin_theta) + b * ((t * theta).sin() / sin_theta)
}

#[inline]
fn usable(v: Vec3) -> bool {
    v.is_finite() && v.length_squared() >= 1e-8
}

/// Raw interpolated direction; may be degenerate
fn interpolate(keyframes: &[Keyframe], time: f64) -> Vec3 {
    let (first, last) = match (keyframes.first(), keyframes.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Vec3::ZERO,
    };
    if time <= first.time {
        return first.direction;
    }
    if time >= last.time {
        return last.direction;
    }

    // First keyframe strictly after `time`; both neighbours exist here
    let upper = keyframes.partition_point(|k| k.time <= time);
    let k0 = &keyframes[upper - 1];
    let k1 = &keyframes[upper];
    let span = k1.time - k0.time;
    if span <= 1e-9 {
        return k1.direction;
    }
    let u = ((time - k0.time) / span) as f32;
    if !usable(k0.direction) || !usable(k1.direction) {
        return Vec3::ZERO;
    }
    slerp(k0.direction.normalized_or_forward(), k1.direction.normalized_or_forward(), u)
}

fn nearest_keyframe(keyframes: &[Keyframe], time: f64) -> Option<Vec3> {
    keyframes
        .iter()
        .filter(|k| usable(k.direction))
        .min_by(|a, b| (a.time - time).abs().total_cmp(&(b.time - time).abs()))
        .map(|k| k.direction)
}

/// Samples every source's direction at block rate
///
/// All storage is sized to the scene at construction; sampling never
/// allocates.
#[derive(Debug, Clone)]
pub struct PoseSampler {
    /// Sanitized unit direction per source; LFE entries stay forward
    directions: Vec<Vec3>,
    last_good: Vec<Option<Vec3>>,
}

impl PoseSampler {
    pub fn new(scene: &Scene, layout: &SpeakerLayout) -> Self {
        let directions = scene
            .sources()
            .iter()
            .map(|source| match source.kind {
                SourceKind::DirectSpeaker { speaker } => layout
                    .main_speakers()
                    .iter()
                    .find(|s| s.channel == speaker)
                    .map(|s| s.position.normalized_or_forward())
                    .unwrap_or(Vec3::FORWARD),
                _ => Vec3::FORWARD,
            })
            .collect();
        Self {
            directions,
            last_good: vec![None; scene.len()],
        }
    }

    pub fn directions(&self) -> &[Vec3] {
        &self.directions
    }

    /// Resample object directions at `time` seconds
    pub fn sample(&mut self, scene: &Scene, layout: &SpeakerLayout, mode: ElevationMode, time: f64) {
        for (i, source) in scene.sources().iter().enumerate() {
            let SourceKind::AudioObject { trajectory } = &source.kind else {
                continue;
            };

            let raw = interpolate(trajectory, time);
            let direction = if usable(raw) {
                let unit = raw.normalized_or_forward();
                self.last_good[i] = Some(unit);
                unit
            } else if let Some(good) = self.last_good[i] {
                good
            } else {
                let fallback = nearest_keyframe(trajectory, time)
                    .map(|d| d.normalized_or_forward())
                    .unwrap_or(Vec3::FORWARD);
                self.last_good[i] = Some(fallback);
                fallback
            };

            self.directions[i] = layout.sanitize_direction(direction, mode);
        }
    }
}
