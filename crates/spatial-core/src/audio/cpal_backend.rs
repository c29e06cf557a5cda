//! CPAL output stream for the spatial engine
//!
//! ```text
//! ┌──────────────────┐   EngineHandle    ┌──────────────────────┐
//! │  Control thread  │ ────────────────► │  SPSC commands +     │
//! │  (~60 Hz tick)   │                   │  parameter snapshot  │
//! └──────────────────┘                   └──────────┬───────────┘
//!          ▲                                        │
//!          │ relaxed atomics                        ▼
//! ┌──────────────────┐                   ┌──────────────────────┐
//! │  EngineTelemetry │ ◄──────────────── │  CPAL audio thread   │
//! └──────────────────┘                   │  (owns SpatialEngine)│
//!                                        └──────────────────────┘
//! ```
//!
//! Opening happens in two steps. [`negotiate_output`] picks the device and
//! stream format, which fixes the sample rate and channel count the engine
//! and channel map are built against. [`start_output`] then moves the
//! finished engine into the callback.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};

use super::config::AudioConfig;
use super::device::find_output_device;
use super::error::{AudioError, AudioResult};
use crate::engine::SpatialEngine;

/// Device and stream format chosen for playback, not yet running
pub struct NegotiatedOutput {
    device: cpal::Device,
    device_name: String,
    config: StreamConfig,
}

impl NegotiatedOutput {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Interleaved channels per callback frame
    pub fn channels(&self) -> usize {
        self.config.channels as usize
    }

    /// Fixed buffer size in frames, if one was requested
    pub fn buffer_size(&self) -> Option<u32> {
        match self.config.buffer_size {
            CpalBufferSize::Fixed(frames) => Some(frames),
            CpalBufferSize::Default => None,
        }
    }
}

/// Running output stream; drop it to stop audio
pub struct OutputStream {
    _stream: Stream,
    sample_rate: u32,
    channels: usize,
    buffer_size: Option<u32>,
}

impl OutputStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// One-way output latency in milliseconds, if the buffer size is fixed
    pub fn latency_ms(&self) -> Option<f32> {
        self.buffer_size
            .map(|frames| frames as f32 / self.sample_rate as f32 * 1000.0)
    }
}

/// Pick the device and an f32 stream format with at least `min_channels`
pub fn negotiate_output(config: &AudioConfig, min_channels: usize) -> AudioResult<NegotiatedOutput> {
    let device = find_output_device(config.device.as_ref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();
    let range = choose_config(&supported, config.sample_rate, min_channels)?;

    let rate = config.sample_rate;
    let sample_rate = if (range.min_sample_rate().0..=range.max_sample_rate().0).contains(&rate) {
        cpal::SampleRate(rate)
    } else {
        let fallback = range.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            rate,
            fallback.0
        );
        fallback
    };

    let buffer_size = match config.buffer_frames() {
        Some(frames) => CpalBufferSize::Fixed(frames),
        None => CpalBufferSize::Default,
    };
    let stream_config = StreamConfig {
        channels: range.channels(),
        sample_rate,
        buffer_size,
    };

    log::info!(
        "Audio config: {} channels, {}Hz, buffer {}",
        stream_config.channels,
        sample_rate.0,
        config
            .buffer_frames()
            .map_or_else(|| "host default".to_string(), |f| format!("{} frames", f))
    );

    Ok(NegotiatedOutput {
        device,
        device_name,
        config: stream_config,
    })
}

/// Preferred format first, then any adequate config, then the first one
///
/// Preferred means f32, enough channels and the target rate in range.
/// Among equally good configs the widest wins.
fn choose_config(
    supported: &[SupportedStreamConfigRange],
    sample_rate: u32,
    min_channels: usize,
) -> AudioResult<SupportedStreamConfigRange> {
    let f32_configs: Vec<&SupportedStreamConfigRange> = supported
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();
    if f32_configs.is_empty() {
        return Err(match supported.first() {
            Some(c) => AudioError::UnsupportedFormat(format!("{:?}", c.sample_format())),
            None => AudioError::ConfigError("No supported output configurations".to_string()),
        });
    }

    let wide_enough = |c: &&&SupportedStreamConfigRange| c.channels() as usize >= min_channels;
    let has_rate = |c: &&&SupportedStreamConfigRange| {
        (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&sample_rate)
    };

    let best = f32_configs
        .iter()
        .filter(wide_enough)
        .filter(has_rate)
        .max_by_key(|c| c.channels())
        .or_else(|| f32_configs.iter().filter(wide_enough).max_by_key(|c| c.channels()))
        .or_else(|| f32_configs.first());

    match best {
        Some(c) if c.channels() as usize >= min_channels => Ok((**c).clone()),
        Some(c) => Err(AudioError::NotEnoughChannels {
            required: min_channels,
            available: c.channels() as usize,
        }),
        None => Err(AudioError::ConfigError("No suitable output configuration found".to_string())),
    }
}

/// Move the engine into a new output stream and start it
///
/// The callback owns the engine outright; nothing else touches it once
/// the stream runs. Stream errors are logged from the error callback.
pub fn start_output(output: NegotiatedOutput, mut engine: SpatialEngine) -> AudioResult<OutputStream> {
    let channels = output.channels();
    if !engine.fits_output(channels) {
        return Err(AudioError::NotEnoughChannels {
            required: engine.required_device_channels(),
            available: channels,
        });
    }

    let stream = output
        .device
        .build_output_stream(
            &output.config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                engine.process(data, channels);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("Audio stream started on {}", output.device_name);

    Ok(OutputStream {
        _stream: stream,
        sample_rate: output.sample_rate(),
        channels,
        buffer_size: output.buffer_size(),
    })
}
