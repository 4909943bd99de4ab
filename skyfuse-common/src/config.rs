//! Configuration file resolution and loading
//!
//! Config path priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config dir>/skyfuse/<file>`)
//! 4. None: compiled defaults are used
//!
//! A missing config file is never fatal. The service logs a warning and
//! starts on defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SKYFUSE_CONFIG";

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>, file_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let candidate = default_config_dir()?.join(file_name);
    if candidate.exists() {
        Some(candidate)
    } else {
        None
    }
}

/// `~/.config/skyfuse` on Linux, the platform equivalent elsewhere
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("skyfuse"))
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Load `T` from `path`, falling back to `T::default()` when the path is
/// absent or the file does not exist. A file that exists but fails to
/// parse is an error.
pub fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let path = match path {
        Some(path) => path,
        None => {
            info!("No config file found, using built-in defaults");
            return Ok(T::default());
        }
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = parse_toml(&content)?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}
