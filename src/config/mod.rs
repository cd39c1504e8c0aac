//! Configuration loading
//!
//! A single JSON file under the state directory holds every tunable; each
//! subsystem reads its own section through a `build_*_config` function next
//! to the code it configures. A missing file loads as an empty object so
//! every section falls back to defaults.

use serde_json::Value;
use std::env;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to parse JSON at {path}: {message}")]
    ParseError { path: String, message: String },
}

/// Get the state directory.
/// Priority: GUESTPASS_STATE_DIR > ~/.config/guestpass
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = env::var("GUESTPASS_STATE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("guestpass")
}

/// Get the config file path.
/// Priority: GUESTPASS_CONFIG_PATH > <state dir>/guestpass.json
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("GUESTPASS_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    state_dir().join("guestpass.json")
}

/// Load and parse the configuration file.
/// Returns empty object `{}` if the file doesn't exist.
pub fn load_config() -> Result<Value, ConfigError> {
    let path = get_config_path();
    if !path.exists() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
