//! Speaker and subwoofer level trims with click-free ramps

use super::db_to_linear;
use crate::layout::SpeakerLayout;
use crate::types::BusBuffer;

/// Linear gain that moves to its target in a straight line over a fixed
/// number of frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainRamp {
    current: f32,
    target: f32,
    /// Per-frame increment of the ramp in progress
    step: f32,
    /// Frames left in the ramp in progress
    remaining: usize,
    ramp_frames: usize,
}

impl GainRamp {
    pub fn new(gain: f32, ramp_frames: usize) -> Self {
        Self {
            current: gain,
            target: gain,
            step: 0.0,
            remaining: 0,
            ramp_frames: ramp_frames.max(1),
        }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Start a new ramp from wherever the gain is now
    pub fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        self.target = target;
        self.step = (target - self.current) / self.ramp_frames as f32;
        self.remaining = self.ramp_frames;
    }

    /// Lands exactly on the target after `ramp_frames` frames, even when
    /// the step is below the precision of `current`
    #[inline]
    fn advance(&mut self) -> f32 {
        self.remaining = self.remaining.saturating_sub(1);
        let next = self.current + self.step;
        let overshoot = (self.step > 0.0 && next >= self.target) || (self.step < 0.0 && next <= self.target);
        self.current = if overshoot || self.remaining == 0 || next == self.current {
            self.target
        } else {
            next
        };
        self.current
    }

    /// Scale `channels` of `bus` by the ramp, advancing it by one block
    pub fn apply(&mut self, bus: &mut BusBuffer, channels: &[usize]) {
        if self.is_settled() {
            if self.current != 1.0 {
                let gain = self.current;
                for &ch in channels {
                    bus.channel_mut(ch).iter_mut().for_each(|s| *s *= gain);
                }
            }
            return;
        }

        let start = *self;
        for &ch in channels {
            *self = start;
            for sample in bus.channel_mut(ch) {
                *sample *= self.advance();
            }
        }
        if channels.is_empty() {
            for _ in 0..bus.frames() {
                self.advance();
            }
        }
    }
}

/// Per-bus trims: compensation on the main speakers, trim on the subs
#[derive(Debug, Clone)]
pub struct SpeakerCompensation {
    main: GainRamp,
    sub: GainRamp,
    main_channels: Vec<usize>,
    sub_channels: Vec<usize>,
    bound_db: f32,
}

impl SpeakerCompensation {
    /// `bound_db` limits both offsets to `±bound_db`
    pub fn new(layout: &SpeakerLayout, ramp_frames: usize, bound_db: f32) -> Self {
        Self {
            main: GainRamp::new(1.0, ramp_frames),
            sub: GainRamp::new(1.0, ramp_frames),
            main_channels: layout.main_speakers().iter().map(|s| s.channel).collect(),
            sub_channels: layout.subwoofers().iter().map(|s| s.channel).collect(),
            bound_db: bound_db.abs(),
        }
    }

    /// Set both offsets in dB; ramps start on the next `process`
    pub fn set_db(&mut self, compensation_db: f32, sub_trim_db: f32) {
        let bound = self.bound_db;
        self.main.set_target(db_to_linear(compensation_db.clamp(-bound, bound)));
        self.sub.set_target(db_to_linear(sub_trim_db.clamp(-bound, bound)));
    }

    pub fn main_gain(&self) -> f32 {
        self.main.current()
    }

    pub fn sub_gain(&self) -> f32 {
        self.sub.current()
    }

    pub fn process(&mut self, bus: &mut BusBuffer) {
        self.main.apply(bus, &self.main_channels);
        self.sub.apply(bus, &self.sub_channels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> SpeakerLayout {
        SpeakerLayout::from_yaml_str(
            "speakers:\n  - { channel: 0, azimuth: -30 }\n  - { channel: 1, azimuth: 30 }\nsubwoofers:\n  - { channel: 2 }\n",
        )
        .unwrap()
    }

    fn ones(channels: usize, frames: usize) -> BusBuffer {
        let mut bus = BusBuffer::new(channels, frames);
        for ch in 0..channels {
            bus.channel_mut(ch).fill(1.0);
        }
        bus
    }

    #[test]
    fn test_ramp_is_linear_and_lands_on_target() {
        let mut ramp = GainRamp::new(1.0, 8);
        ramp.set_target(2.0);

        let mut bus = ones(1, 4);
        ramp.apply(&mut bus, &[0]);
        assert_eq!(bus.channel(0), &[1.125, 1.25, 1.375, 1.5]);

        let mut bus = ones(1, 6);
        ramp.apply(&mut bus, &[0]);
        assert_eq!(bus.channel(0), &[1.625, 1.75, 1.875, 2.0, 2.0, 2.0]);
        assert!(ramp.is_settled());
    }

    #[test]
    fn test_compensation_ramps_main_only() {
        // 0 dB to +5 dB over a 480-frame window
        let mut comp = SpeakerCompensation::new(&layout(), 480, 10.0);
        comp.set_db(5.0, 0.0);
        let target = db_to_linear(5.0);

        let mut bus = ones(3, 240);
        comp.process(&mut bus);
        let halfway = bus.channel(0)[239];
        assert!((halfway - (1.0 + (target - 1.0) * 0.5)).abs() < 1e-4);
        assert_eq!(bus.channel(0), bus.channel(1));
        assert!(bus.channel(2).iter().all(|&s| s == 1.0));

        let mut bus = ones(3, 240);
        comp.process(&mut bus);
        assert!((bus.channel(1)[239] - target).abs() < 1e-4);
        assert!((comp.main_gain() - target).abs() < 1e-4);
        assert!(bus.channel(2).iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_tiny_ramp_still_settles() {
        // Step is far below one ULP of 1.0
        let mut ramp = GainRamp::new(1.0, 4800);
        ramp.set_target(1.0 + f32::EPSILON);
        assert!(!ramp.is_settled());

        let mut bus = ones(1, 256);
        ramp.apply(&mut bus, &[0]);
        assert!(ramp.is_settled());
        assert_eq!(ramp.current(), 1.0 + f32::EPSILON);
    }

    #[test]
    fn test_ramp_settles_after_ramp_frames() {
        let mut ramp = GainRamp::new(0.0, 300);
        ramp.set_target(0.7);
        let mut bus = ones(1, 100);
        for _ in 0..3 {
            assert!(!ramp.is_settled());
            ramp.apply(&mut bus, &[0]);
        }
        assert!(ramp.is_settled());
        assert_eq!(ramp.current(), 0.7);
    }

    #[test]
    fn test_offsets_are_bounded() {
        let mut comp = SpeakerCompensation::new(&layout(), 1, 10.0);
        comp.set_db(40.0, -40.0);
        let mut bus = ones(3, 2);
        comp.process(&mut bus);
        assert!((comp.main_gain() - db_to_linear(10.0)).abs() < 1e-5);
        assert!((comp.sub_gain() - db_to_linear(-10.0)).abs() < 1e-5);
    }
}
