// Configuration loader
// Loads settings from ~/.mend/config.toml, falling back to defaults

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::settings::Config;

/// Load configuration from the user's config file, or defaults when no
/// file exists. A present-but-broken file is an error, not a silent
/// fallback.
pub fn load_config() -> Result<Config> {
    match config_path() {
        Some(path) if path.exists() => {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        }
        _ => Ok(Config::default()),
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".mend").join("config.toml"))
}
