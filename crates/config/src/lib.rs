//! Configuration loading, validation, and env substitution.
//!
//! Config files: `switchboard.toml`, `switchboard.yaml`, or `switchboard.json`
//! Searched in `./` then `~/.config/switchboard/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values, and
//! `SWITCHBOARD_BIND`, `SWITCHBOARD_PORT`, `SWITCHBOARD_DATABASE_URL`
//! overrides applied after the file is parsed.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        AgentConfig, DatabaseConfig, DispatchConfig, MetricsConfig, ServerConfig,
        SwitchboardConfig, TracesConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
