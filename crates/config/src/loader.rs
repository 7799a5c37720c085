use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::{ParleyConfig, TransportProvider},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parley.toml", "parley.yaml", "parley.yml", "parley.json"];

/// Load config from the given path (any supported format).
///
/// `PARLEY_*` environment overrides are applied on top of the file.
pub fn load_config(path: &Path) -> Result<ParleyConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./parley.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/parley/parley.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults (plus env overrides) when no file is found or the
/// file fails to parse.
pub fn discover_and_load() -> ParleyConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = ParleyConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/parley/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "parley").map(|d| d.config_dir().to_path_buf())
}

/// Overlay `PARLEY_*` variables onto a parsed config.
///
/// Secrets are usually injected this way instead of being written to disk.
pub fn apply_env_overrides(config: &mut ParleyConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = get("PARLEY_BIND") {
        config.server.bind = v;
    }
    if let Some(v) = get("PARLEY_PORT") {
        match v.parse() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!(value = %v, "ignoring invalid PARLEY_PORT"),
        }
    }
    if let Some(v) = get("PARLEY_PUBLIC_URL") {
        config.server.public_url = Some(v);
    }
    if let Some(v) = get("PARLEY_DATABASE_URL") {
        config.database.url = v;
    }
    if let Some(v) = get("PARLEY_API_KEY") {
        config.auth.api_key = Some(Secret::new(v));
    }
    if let Some(v) = get("PARLEY_TRANSPORT") {
        match v.as_str() {
            "twilio" => config.transport.provider = TransportProvider::Twilio,
            "dry_run" => config.transport.provider = TransportProvider::DryRun,
            other => warn!(value = other, "ignoring unknown PARLEY_TRANSPORT"),
        }
    }
    if let Some(v) = get("PARLEY_TWILIO_ACCOUNT_SID") {
        config.transport.account_sid = Some(v);
    }
    if let Some(v) = get("PARLEY_TWILIO_AUTH_TOKEN") {
        config.transport.auth_token = Some(Secret::new(v));
    }
    if let Some(v) = get("PARLEY_TWILIO_FROM_NUMBER") {
        config.transport.from_number = Some(v);
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<ParleyConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}
