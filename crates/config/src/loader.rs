use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
pub const CONFIG_FILENAMES: &[&str] = &[
    "chatrelay.toml",
    "chatrelay.yaml",
    "chatrelay.yml",
    "chatrelay.json",
];

/// Load the effective config.
///
/// An explicit `path` must load successfully. Otherwise standard locations
/// are searched and defaults used if nothing is found. Environment overrides
/// are applied last in both cases.
pub fn load(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => discover_and_load(),
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./chatrelay.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/chatrelay/chatrelay.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RelayConfig::default()` if no config file is found or it fails
/// to parse.
pub fn discover_and_load() -> RelayConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return RelayConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            RelayConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    dirs.extend(config_dir());
    find_in(&dirs)
}

fn find_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
        .find(|p| p.exists())
}

/// Returns `~/.config/chatrelay/` on all platforms.
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".config").join("chatrelay"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
