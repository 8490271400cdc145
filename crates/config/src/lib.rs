//! Configuration loading, validation and env substitution.
//!
//! Config files: `backbone.toml`, `backbone.yaml`, `backbone.yml` or
//! `backbone.json`, searched in `./` then `~/.config/backbone/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{BackboneConfig, ConsumerConfig, MetricsConfig, SqliteConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
