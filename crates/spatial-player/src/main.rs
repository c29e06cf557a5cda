//! Spatial Player - multichannel DBAP playback for speaker arrays
//!
//! Opens a speaker layout, a source scene and a multichannel WAV/RF64 file,
//! negotiates an output device wide enough for the layout and plays the
//! scene through it. The session is driven by text commands on stdin; see
//! [`control`] for the command list.

mod config;
mod control;

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::TryRecvError;

use config::{Invocation, PlayerArgs, USAGE};
use control::{spawn_stdin_reader, status_line, ControlCommand, TelemetryLogger};
use spatial_core::audio::{list_output_devices, negotiate_output, start_output};
use spatial_core::engine::{EngineSetup, SpatialEngine};
use spatial_core::layout::SpeakerLayout;
use spatial_core::routing::ChannelMap;
use spatial_core::scene::Scene;
use spatial_core::streaming::StreamResource;

/// Control loop period, about 60 Hz
const CONTROL_TICK: Duration = Duration::from_millis(16);

/// Worker threads for per-source mixing on large scenes
const MIX_THREADS: usize = 4;

fn main() -> Result<()> {
    // Set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = match PlayerArgs::parse(std::env::args().skip(1))? {
        Invocation::Play(args) => args,
        Invocation::ListDevices => return list_devices(),
        Invocation::Help => {
            println!("{}", USAGE);
            return Ok(());
        }
    };

    // Build the pool before audio starts so the first parallel mix in the
    // callback doesn't pay for lazy initialization
    rayon::ThreadPoolBuilder::new()
        .num_threads(MIX_THREADS)
        .thread_name(|i| format!("rayon-mix-{}", i))
        .build_global()
        .context("Failed to initialize Rayon thread pool")?;

    run(args)
}

fn list_devices() -> Result<()> {
    let devices = list_output_devices().context("Failed to enumerate output devices")?;
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}

fn run(args: PlayerArgs) -> Result<()> {
    let config = args.load_engine_config();

    let layout = SpeakerLayout::load(&args.layout)
        .with_context(|| format!("Failed to load layout {:?}", args.layout))?;
    let scene = Scene::load(&args.scene)
        .with_context(|| format!("Failed to load scene {:?}", args.scene))?;
    log::info!(
        "Layout: {} speakers, {} subwoofers, {} bus channels; scene: {} sources",
        layout.main_speakers().len(),
        layout.subwoofers().len(),
        layout.output_channels(),
        scene.len()
    );

    let output = negotiate_output(&config.audio, layout.output_channels())
        .context("Failed to open an output device")?;
    let channel_map = match &args.remap {
        Some(path) => ChannelMap::load(path, &layout, output.channels())
            .with_context(|| format!("Failed to load channel map {:?}", path))?,
        None => ChannelMap::identity(layout.output_channels()),
    };

    let resource = StreamResource::open(&args.audio, config.streaming.sub_block_frames)
        .with_context(|| format!("Failed to open {:?}", args.audio))?;

    let (engine, mut handle) = SpatialEngine::open(EngineSetup {
        config,
        layout,
        scene,
        resource,
        channel_map,
        sample_rate: output.sample_rate(),
        mask: None,
    })?;
    let stream = start_output(output, engine)?;
    if let Some(latency) = stream.latency_ms() {
        log::info!("Output latency {:.1} ms", latency);
    }

    handle.set_loop(args.looping)?;
    if !args.paused {
        handle.play()?;
    }

    let commands = spawn_stdin_reader();
    let mut logger = TelemetryLogger::new(handle.telemetry());
    let rate = handle.stream_rate();

    loop {
        handle.tick();

        match commands.try_recv() {
            Ok(line) => match ControlCommand::parse(&line) {
                Ok(ControlCommand::Quit) => break,
                Ok(ControlCommand::Status) => println!("{}", status_line(&handle.telemetry(), rate)),
                Ok(command) => {
                    if let Err(e) = command.apply(&mut handle) {
                        log::warn!("{}: {}", line, e);
                    }
                }
                Err(e) => log::warn!("{:#}", e),
            },
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                log::info!("stdin closed, stopping");
                break;
            }
        }

        logger.observe(handle.telemetry(), rate);
        thread::sleep(CONTROL_TICK);
    }

    handle.pause()?;
    drop(stream);
    log::info!("Stopped at {}", status_line(&handle.telemetry(), rate));
    Ok(())
}
