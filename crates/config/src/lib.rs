//! Configuration loading, validation and env substitution for pixelgym.
//!
//! Config files: `pixelgym.toml`, `pixelgym.yaml`, `pixelgym.yml` or
//! `pixelgym.json`, searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution anywhere in
//! the file.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, load_config, load_or_discover, to_toml_string},
    schema::{EnvConfig, PixelgymConfig, RunConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
