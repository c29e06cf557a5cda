//! Text command surface read from stdin
//!
//! One command per line:
//!
//! ```text
//! play | pause | restart | seek <sec> | loop on|off
//! gain <linear> | focus <f> | elev clamp|atmos|sphere
//! comp <dB> | sub <dB> | solo <source>|off
//! debug on|off | quality full|half|quarter|reduced
//! status | quit
//! ```

use std::io::BufRead;
use std::thread;

use anyhow::{bail, Context, Result};
use crossbeam::channel::{unbounded, Receiver};
use spatial_core::engine::{EngineHandle, TelemetrySnapshot};
use spatial_core::layout::ElevationMode;
use spatial_core::spatial::QualityLevel;

/// Every log line of debug counters is this many control ticks apart
pub const DEBUG_LOG_INTERVAL_TICKS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Play,
    Pause,
    Restart,
    Seek(f64),
    Loop(bool),
    Gain(f32),
    Focus(f32),
    Elevation(ElevationMode),
    Compensation(f32),
    SubTrim(f32),
    Solo(Option<String>),
    Debug(bool),
    Quality(QualityLevel),
    Status,
    Quit,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().context("Empty command")?;
        let arg = words.next();

        let number = |what: &str| -> Result<f32> {
            let raw = arg.with_context(|| format!("{} needs a number", what))?;
            let value: f32 = raw.parse().with_context(|| format!("'{}' is not a number", raw))?;
            if !value.is_finite() {
                bail!("'{}' is not a finite number", raw);
            }
            Ok(value)
        };
        let switch = |what: &str| -> Result<bool> {
            match arg {
                Some("on") => Ok(true),
                Some("off") => Ok(false),
                _ => bail!("{} takes on or off", what),
            }
        };

        let command = match verb {
            "play" => ControlCommand::Play,
            "pause" => ControlCommand::Pause,
            "restart" => ControlCommand::Restart,
            "seek" => ControlCommand::Seek(number("seek")? as f64),
            "loop" => ControlCommand::Loop(switch("loop")?),
            "gain" => ControlCommand::Gain(number("gain")?),
            "focus" => ControlCommand::Focus(number("focus")?),
            "elev" => ControlCommand::Elevation(match arg {
                Some("clamp") => ElevationMode::Clamp,
                Some("atmos") => ElevationMode::RescaleAtmosUp,
                Some("sphere") => ElevationMode::RescaleFullSphere,
                _ => bail!("elev takes clamp, atmos or sphere"),
            }),
            "comp" => ControlCommand::Compensation(number("comp")?),
            "sub" => ControlCommand::SubTrim(number("sub")?),
            "solo" => ControlCommand::Solo(match arg {
                None => bail!("solo needs a source name or off"),
                Some("off") => None,
                Some(name) => Some(name.to_string()),
            }),
            "debug" => ControlCommand::Debug(switch("debug")?),
            "quality" => ControlCommand::Quality(match arg {
                Some("full") => QualityLevel::Full,
                Some("half") => QualityLevel::Half,
                Some("quarter") => QualityLevel::Quarter,
                Some("reduced") => QualityLevel::ReducedSet,
                _ => bail!("quality takes full, half, quarter or reduced"),
            }),
            "status" => ControlCommand::Status,
            "quit" | "exit" => ControlCommand::Quit,
            other => bail!("Unknown command '{}'", other),
        };
        Ok(command)
    }

    /// Apply to the session; `Status` and `Quit` are left to the caller
    pub fn apply(&self, handle: &mut EngineHandle) -> Result<()> {
        match self {
            ControlCommand::Play => handle.play()?,
            ControlCommand::Pause => handle.pause()?,
            ControlCommand::Restart => handle.restart()?,
            ControlCommand::Seek(seconds) => handle.seek_seconds(*seconds)?,
            ControlCommand::Loop(on) => handle.set_loop(*on)?,
            ControlCommand::Gain(gain) => handle.update_params(|p| p.master_gain = *gain),
            ControlCommand::Focus(focus) => handle.update_params(|p| p.focus = *focus),
            ControlCommand::Elevation(mode) => handle.update_params(|p| p.elevation_mode = *mode),
            ControlCommand::Compensation(db) => handle.update_params(|p| p.compensation_db = *db),
            ControlCommand::SubTrim(db) => handle.update_params(|p| p.sub_trim_db = *db),
            ControlCommand::Solo(name) => handle.solo(name.as_deref())?,
            ControlCommand::Debug(on) => handle.update_params(|p| p.debug_counters = *on),
            ControlCommand::Quality(level) => handle.update_params(|p| p.requested_quality = *level),
            ControlCommand::Status | ControlCommand::Quit => {}
        }
        Ok(())
    }
}

/// Read stdin lines on a background thread
///
/// The channel disconnects when stdin reaches EOF.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("stdin-control".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if tx.send(line.to_string()).is_err() {
                    break;
                }
            }
            log::debug!("stdin closed");
        });
    if let Err(e) = spawned {
        log::error!("Failed to spawn stdin reader: {}", e);
    }
    rx
}

/// Turns telemetry snapshots into log lines
///
/// Warnings fire only when a fault counter advances. Full counters are
/// logged periodically while debug counters are on.
#[derive(Debug, Default)]
pub struct TelemetryLogger {
    last: TelemetrySnapshot,
    ticks: u64,
}

impl TelemetryLogger {
    pub fn new(initial: TelemetrySnapshot) -> Self {
        Self { last: initial, ticks: 0 }
    }

    /// Log what changed since the previous call; returns the warnings issued
    pub fn observe(&mut self, snap: TelemetrySnapshot, sample_rate: u32) -> Vec<String> {
        let mut warnings = Vec::new();
        if snap.buffer_misses > self.last.buffer_misses {
            warnings.push(format!(
                "Buffer miss: {} chunk(s) read on the audio thread ({} total)",
                snap.buffer_misses - self.last.buffer_misses,
                snap.buffer_misses
            ));
        }
        if snap.load_failures > self.last.load_failures {
            warnings.push(format!("Chunk load failed ({} total)", snap.load_failures));
        }
        if snap.sustained_overruns > self.last.sustained_overruns {
            warnings.push(format!(
                "Sustained CPU overrun at {} quality, load {:.0}%",
                snap.quality.name(),
                snap.load_ratio() * 100.0
            ));
        }
        if snap.quality != self.last.quality {
            log::info!("Quality {} -> {}", self.last.quality.name(), snap.quality.name());
        }
        for warning in &warnings {
            log::warn!("{}", warning);
        }

        self.ticks += 1;
        if snap.debug_counters && self.ticks % DEBUG_LOG_INTERVAL_TICKS == 0 {
            log::info!("{}", status_line(&snap, sample_rate));
        }
        self.last = snap;
        warnings
    }
}

pub fn status_line(snap: &TelemetrySnapshot, sample_rate: u32) -> String {
    format!(
        "{} {:.2}s quality={} load={:.0}% blocks={} misses={} failures={} loads={} overruns={}{}",
        if snap.playing { "playing" } else { "paused" },
        snap.position_seconds(sample_rate),
        snap.quality.name(),
        snap.load_ratio() * 100.0,
        snap.blocks,
        snap.buffer_misses,
        snap.load_failures,
        snap.loads_completed,
        snap.sustained_overruns,
        if snap.looping { " loop" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ControlCommand::parse("play").unwrap(), ControlCommand::Play);
        assert_eq!(ControlCommand::parse("  seek 12.5 ").unwrap(), ControlCommand::Seek(12.5));
        assert_eq!(ControlCommand::parse("loop off").unwrap(), ControlCommand::Loop(false));
        assert_eq!(
            ControlCommand::parse("elev sphere").unwrap(),
            ControlCommand::Elevation(ElevationMode::RescaleFullSphere)
        );
        assert_eq!(ControlCommand::parse("comp -3").unwrap(), ControlCommand::Compensation(-3.0));
        assert_eq!(
            ControlCommand::parse("solo vox").unwrap(),
            ControlCommand::Solo(Some("vox".to_string()))
        );
        assert_eq!(ControlCommand::parse("solo off").unwrap(), ControlCommand::Solo(None));
        assert_eq!(
            ControlCommand::parse("quality reduced").unwrap(),
            ControlCommand::Quality(QualityLevel::ReducedSet)
        );
        assert_eq!(ControlCommand::parse("quit").unwrap(), ControlCommand::Quit);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ControlCommand::parse("").is_err());
        assert!(ControlCommand::parse("gain").is_err());
        assert!(ControlCommand::parse("gain loud").is_err());
        assert!(ControlCommand::parse("gain NaN").is_err());
        assert!(ControlCommand::parse("loop maybe").is_err());
        assert!(ControlCommand::parse("elev up").is_err());
        assert!(ControlCommand::parse("solo").is_err());
        assert!(ControlCommand::parse("dance").is_err());
    }

    #[test]
    fn test_logger_warns_only_on_advance() {
        let mut logger = TelemetryLogger::new(TelemetrySnapshot::default());
        let mut snap = TelemetrySnapshot::default();
        assert!(logger.observe(snap, 48_000).is_empty());

        snap.buffer_misses = 1;
        snap.sustained_overruns = 1;
        assert_eq!(logger.observe(snap, 48_000).len(), 2);
        assert!(logger.observe(snap, 48_000).is_empty());

        snap.load_failures = 2;
        let warnings = logger.observe(snap, 48_000);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("2 total"));
    }

    #[test]
    fn test_status_line() {
        let snap = TelemetrySnapshot {
            position: 24_000,
            playing: true,
            looping: true,
            ..Default::default()
        };
        let line = status_line(&snap, 48_000);
        assert!(line.starts_with("playing 0.50s"));
        assert!(line.ends_with(" loop"));
    }
}
