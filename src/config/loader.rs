// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a pipeline file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a pipeline file from path and validate it.
///
/// - `run_name` defaults to the file stem.
/// - A relative `storage_root` resolves against the file's directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    load_and_validate_with(path, |_| {})
}

/// Like [`load_and_validate`], but lets the caller adjust the raw file
/// (e.g. CLI overrides) before it is validated.
pub fn load_and_validate_with(
    path: impl AsRef<Path>,
    adjust: impl FnOnce(&mut RawConfigFile),
) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw = load_from_path(path)?;
    adjust(&mut raw);

    if raw.config.run_name.is_none() {
        raw.config.run_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string());
    }

    let mut config = ConfigFile::try_from(raw)?;
    config.base_dir = Some(config_root_dir(path));
    Ok(config)
}

/// Default pipeline file: `Pipeline.toml` in the current directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipeline.toml")
}

/// Directory a pipeline file's relative paths are taken from.
///
/// A bare file name (parent = "") means the current working directory.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
