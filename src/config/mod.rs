// src/config/mod.rs

//! Pipeline file loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a pipeline file from disk (`loader.rs`).
//! - Validate references, names and settings (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    default_config_path, load_and_validate, load_and_validate_with, load_from_path, load_from_str,
};
pub use model::{
    parse_duration, ConfigFile, ConfigSection, FileConfig, RawConfigFile, TransformConfig,
};
pub use validate::validate_config;
