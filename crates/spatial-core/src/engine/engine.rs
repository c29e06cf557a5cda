//! Real-time spatial engine and its control-side handle
//!
//! [`SpatialEngine::open`] assembles a session and splits it in two:
//!
//! - [`SpatialEngine`] is moved into the audio callback and owns everything
//!   the callback touches. [`SpatialEngine::process`] never allocates and
//!   never logs.
//! - [`EngineHandle`] stays on the control thread. It sends transport
//!   commands, publishes parameter snapshots, drives preloading and reads
//!   telemetry.
//!
//! Block order inside `process`:
//!
//! ```text
//! commands ─► snapshot ─► poses/gains ─► stream read ─► DBAP mix + LFE
//!          ─► compensation ─► channel map ─► device ─► safety ladder
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::command::{command_channel, EngineCommand};
use super::params::{param_channel, ParamPublisher, ParamReader, ParameterSnapshot};
use super::safety::CpuSafetyManager;
use super::telemetry::{EngineTelemetry, TelemetrySnapshot};
use crate::audio_file::AudioFileError;
use crate::config::EngineConfig;
use crate::layout::{ElevationMode, LayoutError, SpeakerLayout};
use crate::routing::{ChannelMap, ChannelMapError, LfeRouter, SpeakerCompensation};
use crate::scene::{ActiveMask, PoseSampler, Scene, SceneError};
use crate::spatial::{GainInputs, QualityLevel, SpatialMixer};
use crate::streaming::{
    BackgroundLoader, DoubleBuffer, LoadRequester, Prefetcher, StreamError, StreamResource,
};
use crate::types::BusBuffer;

/// Largest block rendered in one pass; longer callbacks are split
///
/// Covers every common host buffer size, so the bus is allocated once.
pub const MAX_BLOCK_FRAMES: usize = 8192;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Audio file error: {0}")]
    File(#[from] AudioFileError),

    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Channel map error: {0}")]
    ChannelMap(#[from] ChannelMapError),

    #[error("Channel map covers {map} bus channels, layout has {layout}")]
    BusWidthMismatch { map: usize, layout: usize },

    #[error("Command queue is full")]
    CommandQueueFull,

    #[error("No source named '{0}'")]
    UnknownSource(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Everything a session is built from
pub struct EngineSetup {
    pub config: EngineConfig,
    pub layout: SpeakerLayout,
    pub scene: Scene,
    pub resource: StreamResource,
    pub channel_map: ChannelMap,
    /// Device sample rate; sets the block budget
    pub sample_rate: u32,
    /// Externally driven activity mask; all sources active if `None`
    pub mask: Option<ActiveMask>,
}

/// State owned by the audio callback
pub struct SpatialEngine {
    buffer: Arc<DoubleBuffer>,
    scene: Arc<Scene>,
    layout: SpeakerLayout,
    mask: ActiveMask,
    /// Stream channel of every source
    source_channels: Vec<usize>,
    /// Sources that go through the mixer, i.e. everything but LFE
    spatial_sources: Vec<usize>,
    sampler: PoseSampler,
    mixer: SpatialMixer,
    lfe: LfeRouter,
    compensation: SpeakerCompensation,
    channel_map: ChannelMap,
    safety: CpuSafetyManager,
    params: ParamReader,
    commands: rtrb::Consumer<EngineCommand>,
    telemetry: Arc<EngineTelemetry>,
    bus: BusBuffer,
    sample_rate: u32,
    stream_rate: u32,
    position: u64,
    playing: bool,
    looping: bool,
    /// Level decided by the ladder after the previous block
    quality: QualityLevel,
    last_elevation: Option<ElevationMode>,
}

impl SpatialEngine {
    /// Validate the inputs, prime chunk 0 and start the loader
    ///
    /// Fails before any audio flows if the scene doesn't fit the stream or
    /// layout, the channel map doesn't cover the layout, or chunk 0 can't
    /// be read.
    pub fn open(setup: EngineSetup) -> EngineResult<(SpatialEngine, EngineHandle)> {
        let EngineSetup {
            config,
            layout,
            scene,
            resource,
            channel_map,
            sample_rate,
            mask,
        } = setup;

        scene.validate(&layout, resource.channels())?;
        if channel_map.bus_channels() != layout.output_channels() {
            return Err(EngineError::BusWidthMismatch {
                map: channel_map.bus_channels(),
                layout: layout.output_channels(),
            });
        }
        let mask = mask.unwrap_or_else(|| ActiveMask::new(scene.len()));
        if mask.len() != scene.len() {
            return Err(SceneError::MaskMismatch {
                mask: mask.len(),
                sources: scene.len(),
            }
            .into());
        }

        let stream_rate = resource.sample_rate();
        if stream_rate != sample_rate {
            log::warn!(
                "Stream is {} Hz, device runs at {} Hz; playback will be pitched",
                stream_rate,
                sample_rate
            );
        }

        let streaming = &config.streaming;
        let buffer = Arc::new(DoubleBuffer::new(
            Arc::new(resource),
            streaming.chunk_frames.max(1),
            streaming.sub_block_frames.max(1),
        ));
        buffer.prime(0)?;
        let loader = BackgroundLoader::spawn(buffer.clone())?;

        let (command_tx, command_rx) = command_channel();
        let (publisher, reader) = param_channel(ParameterSnapshot::from_config(&config.mixer));
        let telemetry = Arc::new(EngineTelemetry::new());

        let mixer_config = &config.mixer;
        let ramp_frames = mixer_config.ramp_frames(sample_rate);
        let scene = Arc::new(scene);

        let engine = SpatialEngine {
            source_channels: scene.sources().iter().map(|s| s.channel).collect(),
            spatial_sources: (0..scene.len()).filter(|&i| !scene.sources()[i].is_lfe()).collect(),
            sampler: PoseSampler::new(&scene, &layout),
            mixer: SpatialMixer::new(&scene, &layout, config.safety.top_k),
            lfe: LfeRouter::new(&scene, &layout, mixer_config.sub_compensation, MAX_BLOCK_FRAMES),
            compensation: SpeakerCompensation::new(&layout, ramp_frames, mixer_config.compensation_limit_db),
            bus: BusBuffer::new(layout.output_channels(), MAX_BLOCK_FRAMES),
            safety: CpuSafetyManager::new(config.safety.clone()),
            buffer: buffer.clone(),
            scene: scene.clone(),
            layout,
            mask: mask.clone(),
            channel_map,
            params: reader,
            commands: command_rx,
            telemetry: telemetry.clone(),
            sample_rate: sample_rate.max(1),
            stream_rate: stream_rate.max(1),
            position: 0,
            playing: false,
            looping: false,
            quality: QualityLevel::Full,
            last_elevation: None,
        };

        log::info!(
            "Engine ready: {} sources, {} bus channels, {} frames per chunk, ramp {} frames",
            engine.scene.len(),
            engine.bus.channels(),
            buffer.chunk_frames(),
            ramp_frames
        );

        let handle = EngineHandle {
            commands: command_tx,
            params: publisher,
            telemetry,
            prefetcher: Prefetcher::new(config.streaming.preload),
            loader,
            mask,
            scene,
            stream_rate: stream_rate.max(1),
        };
        Ok((engine, handle))
    }

    /// Device channels the output stream must carry
    pub fn required_device_channels(&self) -> usize {
        self.channel_map.required_device_channels()
    }

    /// True if a stream of `out_channels` carries every mapped channel
    pub fn fits_output(&self, out_channels: usize) -> bool {
        self.channel_map.fits_output(out_channels)
    }

    /// Render one callback into an interleaved device buffer
    pub fn process(&mut self, out: &mut [f32], out_channels: usize) {
        let started = Instant::now();
        let out_channels = out_channels.max(1);
        let frames = out.len() / out_channels;

        self.drain_commands();
        let params = self.params.read();
        self.compensation.set_db(params.compensation_db, params.sub_trim_db);

        if self.playing {
            self.update_gains(&params, frames);
        }

        for piece in out.chunks_mut(MAX_BLOCK_FRAMES * out_channels) {
            let len = piece.len() / out_channels;
            self.bus.set_frames(len);
            self.bus.fill_silence();
            if self.playing {
                self.render_stream(len, params.master_gain);
            }
            self.compensation.process(&mut self.bus);
            self.channel_map.apply(&self.bus, piece, out_channels);
        }

        self.telemetry.position.store(self.position, Ordering::Relaxed);
        self.telemetry.playing.store(self.playing, Ordering::Relaxed);
        self.telemetry.debug_counters.store(params.debug_counters, Ordering::Relaxed);

        let budget = Duration::from_secs_f64(frames as f64 / self.sample_rate as f64);
        self.quality = self.safety.observe(started.elapsed(), budget, params.requested_quality);
        self.telemetry
            .record_block(started.elapsed(), budget, self.quality, self.safety.sustained_overruns());
    }

    fn drain_commands(&mut self) {
        let total = self.buffer.total_frames();
        while let Ok(command) = self.commands.pop() {
            match command {
                EngineCommand::Play => {
                    if self.position >= total {
                        self.jump_to(0);
                    }
                    self.playing = true;
                }
                EngineCommand::Pause => self.playing = false,
                EngineCommand::Restart => self.jump_to(0),
                EngineCommand::Seek(frame) => self.jump_to(frame.min(total)),
                EngineCommand::SetLoop(looping) => {
                    self.looping = looping;
                    self.telemetry.looping.store(looping, Ordering::Relaxed);
                }
            }
        }
    }

    /// Move the playhead; slots not holding the target chunk are dropped
    fn jump_to(&mut self, frame: u64) {
        self.position = frame;
        self.buffer.reset_to(self.buffer.chunk_start_for(frame));
        self.mixer.invalidate();
    }

    fn update_gains(&mut self, params: &ParameterSnapshot, frames: usize) {
        let update = self
            .mixer
            .begin_block(self.quality, params.focus, params.elevation_mode, params.solo);

        // Elevation mode is folded into the sampled directions
        let elevation_changed = self.last_elevation != Some(params.elevation_mode);
        if update.resample || elevation_changed {
            let centre = self.position + frames as u64 / 2;
            let time = centre as f64 / self.stream_rate as f64;
            self.sampler.sample(&self.scene, &self.layout, params.elevation_mode, time);
            self.last_elevation = Some(params.elevation_mode);
        }

        let inputs = GainInputs {
            directions: self.sampler.directions(),
            mask: &self.mask,
            focus: params.focus,
            solo: params.solo,
            quality: self.quality,
        };
        if update.recompute {
            self.mixer.recompute(&inputs);
        } else {
            self.mixer.refresh_activated(&inputs);
        }
    }

    /// Mix `len` frames from the playhead into the bus
    ///
    /// Spans that cross a chunk boundary are split. At the end of the stream
    /// playback wraps or stops; the rest of the bus stays silent.
    fn render_stream(&mut self, len: usize, master_gain: f32) {
        let total = self.buffer.total_frames();
        let chunk_frames = self.buffer.chunk_frames();
        let mut offset = 0;

        while offset < len {
            if self.position >= total {
                if self.looping && total > 0 {
                    self.jump_to(0);
                    continue;
                }
                self.playing = false;
                break;
            }

            let chunk = self.buffer.chunk_start_for(self.position);
            let local = (self.position - chunk) as usize;
            let n = (len - offset)
                .min(chunk_frames - local)
                .min((total - self.position) as usize);

            // A failed direct read leaves this span silent
            if let Some(view) = self.buffer.view_for(chunk) {
                for &source in &self.spatial_sources {
                    if !self.mask.is_active(source) {
                        continue;
                    }
                    let input = view.frames(self.source_channels[source], local, n);
                    self.mixer.mix_source(source, input, master_gain, &mut self.bus, offset);
                }
                self.lfe.route(&self.mask, &view, local, n, &mut self.bus, offset);
            }

            self.position += n as u64;
            offset += n;
        }
    }
}

/// Control-thread side of a session
pub struct EngineHandle {
    commands: rtrb::Producer<EngineCommand>,
    params: ParamPublisher,
    telemetry: Arc<EngineTelemetry>,
    loader: BackgroundLoader,
    prefetcher: Prefetcher,
    mask: ActiveMask,
    scene: Arc<Scene>,
    stream_rate: u32,
}

impl EngineHandle {
    pub fn send(&mut self, command: EngineCommand) -> EngineResult<()> {
        self.commands.push(command).map_err(|_| EngineError::CommandQueueFull)
    }

    pub fn play(&mut self) -> EngineResult<()> {
        self.send(EngineCommand::Play)
    }

    pub fn pause(&mut self) -> EngineResult<()> {
        self.send(EngineCommand::Pause)
    }

    pub fn restart(&mut self) -> EngineResult<()> {
        self.prepare_jump(0);
        self.send(EngineCommand::Restart)
    }

    pub fn set_loop(&mut self, looping: bool) -> EngineResult<()> {
        self.send(EngineCommand::SetLoop(looping))
    }

    /// Jump to `frame`; the target chunk is queued for loading right away
    pub fn seek(&mut self, frame: u64) -> EngineResult<()> {
        let frame = frame.min(self.total_frames());
        self.prepare_jump(frame);
        self.send(EngineCommand::Seek(frame))
    }

    pub fn seek_seconds(&mut self, seconds: f64) -> EngineResult<()> {
        let frame = (seconds.max(0.0) * self.stream_rate as f64).round() as u64;
        self.seek(frame)
    }

    fn prepare_jump(&mut self, frame: u64) {
        self.prefetcher.reset();
        let buffer = self.loader.buffer();
        self.loader.request_load(buffer.chunk_start_for(frame));
    }

    /// Last published parameters
    pub fn params(&self) -> ParameterSnapshot {
        self.params.current()
    }

    pub fn publish(&mut self, snapshot: ParameterSnapshot) {
        self.params.publish(snapshot);
    }

    /// Publish a modified copy of the current parameters
    pub fn update_params(&mut self, f: impl FnOnce(&mut ParameterSnapshot)) {
        self.params.update(f);
    }

    /// Solo a source by name, or clear solo with `None`
    pub fn solo(&mut self, name: Option<&str>) -> EngineResult<()> {
        let index = match name {
            Some(name) => Some(
                self.scene
                    .index_of(name)
                    .ok_or_else(|| EngineError::UnknownSource(name.to_string()))?,
            ),
            None => None,
        };
        self.params.update(|p| p.solo = index);
        Ok(())
    }

    /// Activity mask shared with the callback
    pub fn mask(&self) -> &ActiveMask {
        &self.mask
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn stream_rate(&self) -> u32 {
        self.stream_rate
    }

    pub fn total_frames(&self) -> u64 {
        self.loader.buffer().total_frames()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot(self.loader.buffer().stats())
    }

    /// Issue preload requests for the current playhead
    ///
    /// Call at control rate. Returns the chunk starts that were queued.
    pub fn tick(&mut self) -> Vec<u64> {
        let position = self.telemetry.position();
        let looping = self.telemetry.looping.load(Ordering::Relaxed);
        self.prefetcher
            .tick(position, looping, self.loader.buffer(), &self.loader)
    }
}
