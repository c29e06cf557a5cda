//! Standard locations for configuration files

use std::path::PathBuf;

/// Directory name under the platform config dir
pub const APP_DIR: &str = "spatial-player";

/// Platform config directory for the player
///
/// `~/.config/spatial-player` on Linux; falls back to the working directory
/// when the platform has no config dir.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Path of a named file inside [`default_config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
