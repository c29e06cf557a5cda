//! Output device configuration

use serde::{Deserialize, Serialize};

use crate::engine::MAX_BLOCK_FRAMES;
use crate::types::SAMPLE_RATE;

/// Largest fixed buffer size accepted; the engine renders longer callbacks
/// in several passes but the host rarely offers more
pub const MAX_BUFFER_SIZE: u32 = MAX_BLOCK_FRAMES as u32;

/// Smallest fixed buffer size accepted
pub const MIN_BUFFER_SIZE: u32 = 32;

/// Buffer size used when the config doesn't name one
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Audio device identifier
///
/// Carries the host (ALSA, JACK, CoreAudio, ...) as well as the device
/// name, since the same interface often shows up under several hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub name: String,
    /// Host name as shown by [`super::list_output_devices`]; any host if `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// "[host] name", or just the name
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Output stream preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device; the default device of the default host if `None`
    pub device: Option<DeviceId>,
    pub sample_rate: u32,
    /// Fixed buffer size in frames; the host's default if `None`
    pub buffer_size: Option<u32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: SAMPLE_RATE,
            buffer_size: Some(DEFAULT_BUFFER_SIZE),
        }
    }
}

impl AudioConfig {
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = Some(frames);
        self
    }

    /// Requested buffer size clamped to what the engine supports
    pub fn buffer_frames(&self) -> Option<u32> {
        self.buffer_size
            .map(|frames| frames.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE))
    }

    /// Output latency of one buffer in milliseconds, if the size is fixed
    pub fn latency_ms(&self) -> Option<f32> {
        self.buffer_frames()
            .map(|frames| frames as f32 / self.sample_rate.max(1) as f32 * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_frames_clamped() {
        let config = AudioConfig::default().with_buffer_frames(1 << 20);
        assert_eq!(config.buffer_frames(), Some(MAX_BUFFER_SIZE));
        assert_eq!(AudioConfig::default().with_buffer_frames(4).buffer_frames(), Some(MIN_BUFFER_SIZE));
        let latency = AudioConfig::default().latency_ms().unwrap();
        assert!((latency - 512.0 / 48.0).abs() < 1e-4);
    }

    #[test]
    fn test_device_from_yaml() {
        let config: AudioConfig =
            serde_yaml::from_str("device: { name: \"hw:MADIface\", host: ALSA }\nbuffer_size: ~\n").unwrap();
        assert_eq!(config.device, Some(DeviceId::with_host("hw:MADIface", "ALSA")));
        assert_eq!(config.buffer_size, None);
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.device.unwrap().display_label(), "[ALSA] hw:MADIface");
    }
}
