//! Common types for the spatial engine
//!
//! This module contains the small value types shared by the streaming,
//! mixing and routing stages: 3-D vectors and the planar multichannel
//! block buffer the real-time callback renders into.

use serde::{Deserialize, Serialize};

/// Default sample rate (48kHz - standard professional audio rate)
/// The actual rate is negotiated with the output device at runtime.
pub const SAMPLE_RATE: u32 = 48000;

/// Default chunk length for streamed files (5 seconds at 48kHz)
pub const DEFAULT_CHUNK_FRAMES: usize = 48000 * 5;

/// Default sub-block length for chunk reads
///
/// A chunk is read in pieces of this many frames so one slow read never
/// holds the file lock for a whole chunk.
pub const DEFAULT_SUB_BLOCK_FRAMES: usize = 4096;

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// A 3-D vector in the engine's frame: +x right, +y forward, +z up
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    /// Canonical forward direction, used wherever a direction is degenerate
    pub const FORWARD: Vec3 = Vec3 { x: 0.0, y: 1.0, z: 0.0 };

    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Build from azimuth/elevation (radians) and radius
    ///
    /// Azimuth is measured from +y toward +x, elevation up from the
    /// horizontal plane.
    pub fn from_spherical(azimuth: f32, elevation: f32, radius: f32) -> Self {
        let c = elevation.cos();
        Self {
            x: azimuth.sin() * c * radius,
            y: azimuth.cos() * c * radius,
            z: elevation.sin() * radius,
        }
    }

    #[inline]
    pub fn dot(&self, other: &Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    #[inline]
    pub fn length_squared(&self) -> f32 {
        self.dot(self)
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Distance between two points
    #[inline]
    pub fn distance(&self, other: &Vec3) -> f32 {
        (*self - *other).length()
    }

    /// Normalize, falling back to [`Vec3::FORWARD`] for zero, tiny or
    /// non-finite input. Never returns NaN.
    pub fn normalized_or_forward(&self) -> Vec3 {
        let len = self.length();
        if !len.is_finite() || len < 1e-6 {
            return Vec3::FORWARD;
        }
        *self * (1.0 / len)
    }

    /// Azimuth in radians, measured from +y toward +x
    #[inline]
    pub fn azimuth(&self) -> f32 {
        self.x.atan2(self.y)
    }

    /// Elevation in radians above the horizontal plane
    pub fn elevation(&self) -> f32 {
        let len = self.length();
        if len < 1e-9 {
            return 0.0;
        }
        (self.z / len).clamp(-1.0, 1.0).asin()
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;

    #[inline]
    fn mul(self, factor: f32) -> Self {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// Planar multichannel audio block
///
/// One contiguous region per channel, each with room for `capacity` frames.
/// All memory is allocated up front; the real-time path only changes the
/// active frame count with [`BusBuffer::set_frames`].
#[derive(Debug, Clone)]
pub struct BusBuffer {
    samples: Vec<Sample>,
    channels: usize,
    capacity: usize,
    frames: usize,
}

impl BusBuffer {
    /// Create a silent buffer with `channels` planes of `capacity` frames
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            samples: vec![0.0; channels * capacity],
            channels,
            capacity,
            frames: capacity,
        }
    }

    /// Number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of active frames
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Maximum frames per channel
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Set the active frame count (RT-safe, no allocation)
    ///
    /// Clamped to the pre-allocated capacity.
    #[inline]
    pub fn set_frames(&mut self, frames: usize) {
        debug_assert!(frames <= self.capacity, "set_frames called with frames > capacity");
        self.frames = frames.min(self.capacity);
    }

    /// Zero the active frames of every channel
    pub fn fill_silence(&mut self) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Active frames of one channel
    #[inline]
    pub fn channel(&self, ch: usize) -> &[Sample] {
        let start = ch * self.capacity;
        &self.samples[start..start + self.frames]
    }

    /// Active frames of one channel, mutable
    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [Sample] {
        let start = ch * self.capacity;
        &mut self.samples[start..start + self.frames]
    }

    /// Peak absolute sample across the active region
    pub fn peak(&self) -> Sample {
        (0..self.channels)
            .flat_map(|ch| self.channel(ch).iter())
            .fold(0.0, |acc: Sample, s| acc.max(s.abs()))
    }
}
