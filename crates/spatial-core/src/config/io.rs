//! YAML load/save for any serde configuration type

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load a YAML configuration, falling back to defaults
///
/// A missing file is normal on first run and yields `T::default()`. An
/// unreadable or malformed file is logged and also yields the defaults, so a
/// broken config never keeps the player from starting.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return T::default();
    }

    let parsed = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))
        .and_then(|yaml| serde_yaml::from_str::<T>(&yaml).with_context(|| format!("Failed to parse {:?}", path)));

    match parsed {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("{:#}, using defaults", e);
            T::default()
        }
    }
}

/// Write a configuration as YAML, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Sample {
        focus: f32,
        label: String,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                focus: 1.0,
                label: "default".into(),
            }
        }
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config: Sample = load_config(Path::new("/nonexistent/spatial/config.yaml"));
        assert_eq!(config, Sample::default());
    }

    #[test]
    fn test_save_then_load_in_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = Sample {
            focus: 2.5,
            label: "dome".into(),
        };
        save_config(&config, &path).unwrap();
        assert_eq!(load_config::<Sample>(&path), config);
    }

    #[test]
    fn test_partial_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();

        let partial = dir.path().join("partial.yaml");
        std::fs::write(&partial, "focus: 3.0\n").unwrap();
        let config: Sample = load_config(&partial);
        assert_eq!(config.focus, 3.0);
        assert_eq!(config.label, "default");

        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "focus: [not a number\n").unwrap();
        assert_eq!(load_config::<Sample>(&broken), Sample::default());
    }
}
