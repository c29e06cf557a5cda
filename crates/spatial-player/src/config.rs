//! Command line and config file for spatial-player
//!
//! The engine config is YAML in the user's config directory, by default
//! `~/.config/spatial-player/config.yaml`. A missing file means defaults.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use spatial_core::config::{default_config_path, load_config, EngineConfig};

pub const CONFIG_FILE: &str = "config.yaml";

pub const USAGE: &str = "\
Usage: spatial-player --layout <yaml> --scene <yaml> --audio <wav|rf64> [options]

Options:
  --remap <csv>     Bus-to-device channel map (identity if omitted)
  --config <yaml>   Engine config (default: ~/.config/spatial-player/config.yaml)
  --loop            Wrap to the start at the end of the stream
  --paused          Open the session without starting playback
  --list-devices    Print output devices and exit
  -h, --help        Show this help";

/// Parsed command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerArgs {
    pub layout: PathBuf,
    pub scene: PathBuf,
    pub audio: PathBuf,
    pub remap: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub looping: bool,
    pub paused: bool,
}

/// What the command line asks for
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Play(PlayerArgs),
    ListDevices,
    Help,
}

impl PlayerArgs {
    /// Parse arguments, not including the program name
    pub fn parse<I>(args: I) -> Result<Invocation>
    where
        I: IntoIterator<Item = String>,
    {
        let mut layout = None;
        let mut scene = None;
        let mut audio = None;
        let mut parsed = PlayerArgs::default();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| -> Result<PathBuf> {
                args.next()
                    .map(PathBuf::from)
                    .with_context(|| format!("{} needs a value", flag))
            };
            match arg.as_str() {
                "--layout" => layout = Some(value("--layout")?),
                "--scene" => scene = Some(value("--scene")?),
                "--audio" => audio = Some(value("--audio")?),
                "--remap" => parsed.remap = Some(value("--remap")?),
                "--config" => parsed.config = Some(value("--config")?),
                "--loop" => parsed.looping = true,
                "--paused" => parsed.paused = true,
                "--list-devices" => return Ok(Invocation::ListDevices),
                "-h" | "--help" => return Ok(Invocation::Help),
                other => bail!("Unknown argument '{}'", other),
            }
        }

        parsed.layout = layout.context("--layout is required")?;
        parsed.scene = scene.context("--scene is required")?;
        parsed.audio = audio.context("--audio is required")?;
        Ok(Invocation::Play(parsed))
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| default_config_path(CONFIG_FILE))
    }

    /// Engine config from `--config` or the default location
    pub fn load_engine_config(&self) -> EngineConfig {
        let path = self.config_path();
        log::info!("Loading config from {:?}", path);
        load_config(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_full_command_line() {
        let parsed = PlayerArgs::parse(args(
            "--layout dome.yaml --scene show.yaml --audio show.rf64 --remap madi.csv --loop",
        ))
        .unwrap();
        let Invocation::Play(parsed) = parsed else {
            panic!("expected a play invocation");
        };
        assert_eq!(parsed.layout, PathBuf::from("dome.yaml"));
        assert_eq!(parsed.audio, PathBuf::from("show.rf64"));
        assert_eq!(parsed.remap, Some(PathBuf::from("madi.csv")));
        assert!(parsed.looping);
        assert!(!parsed.paused);
        assert_eq!(parsed.config_path(), default_config_path(CONFIG_FILE));
    }

    #[test]
    fn test_parse_errors() {
        assert!(PlayerArgs::parse(args("--layout a.yaml --scene b.yaml")).is_err());
        assert!(PlayerArgs::parse(args("--layout")).is_err());
        assert!(PlayerArgs::parse(args("--bogus")).is_err());
        assert_eq!(PlayerArgs::parse(args("--list-devices")).unwrap(), Invocation::ListDevices);
        assert_eq!(PlayerArgs::parse(args("--scene x -h")).unwrap(), Invocation::Help);
    }
}
