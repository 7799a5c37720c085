//! Configuration loading, env substitution and validation.
//!
//! Config files: `parley.toml`, `parley.yaml`, or `parley.json`
//! Searched in `./` then `~/.config/parley/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file, plus `PARLEY_*` overrides for secrets applied after parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        AuthConfig, CampaignsConfig, DatabaseConfig, MediaConfig, ParleyConfig, ServerConfig,
        TransportConfig, TransportProvider, WindowConfig,
    },
    validate::{Diagnostic, Severity, validate},
};
