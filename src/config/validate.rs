// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::model::{parse_duration, ConfigFile, RawConfigFile};
use crate::digest::{parse_digests, DigestMap};
use crate::errors::{ReprodError, Result};
use crate::exec::ExecTimeouts;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ReprodError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        let timeouts = parse_timeouts(&raw)?;
        let digests = parse_file_digests(&raw)?;
        Ok(ConfigFile::new_unchecked(raw, digests, timeouts))
    }
}

/// Check the structural invariants of a raw pipeline file.
///
/// Cycles are left to the dealiaser, which reports the full path.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_targets(cfg)?;
    validate_global_config(cfg)?;
    validate_names(cfg)?;
    validate_references(cfg)?;
    Ok(())
}

fn ensure_has_targets(cfg: &RawConfigFile) -> Result<()> {
    if cfg.targets.is_empty() {
        return Err(ReprodError::ConfigError(
            "config must list at least one entry in `targets`".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_attempts == 0 {
        return Err(ReprodError::ConfigError(
            "[config].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }

    if let Some(run_name) = &cfg.config.run_name {
        if run_name.is_empty() || run_name.contains(['/', '\\']) || run_name.starts_with('.') {
            return Err(ReprodError::ConfigError(format!(
                "[config].run_name '{run_name}' must be a plain, non-hidden name"
            )));
        }
    }

    parse_timeouts(cfg)?;
    Ok(())
}

fn validate_names(cfg: &RawConfigFile) -> Result<()> {
    for name in cfg.file.keys() {
        if cfg.transform.contains_key(name) {
            return Err(ReprodError::ConfigError(format!(
                "'{name}' is declared both as [file.{name}] and [transform.{name}]"
            )));
        }
    }

    for (name, file) in &cfg.file {
        if file.location.trim().is_empty() {
            return Err(ReprodError::ConfigError(format!(
                "[file.{name}].location must not be empty"
            )));
        }
    }

    for (name, transform) in &cfg.transform {
        if transform.op.trim().is_empty() {
            return Err(ReprodError::ConfigError(format!(
                "[transform.{name}].op must not be empty"
            )));
        }
    }
    Ok(())
}

fn validate_references(cfg: &RawConfigFile) -> Result<()> {
    let known = |name: &str| cfg.file.contains_key(name) || cfg.transform.contains_key(name);

    for (name, transform) in &cfg.transform {
        for (input, node) in &transform.inputs {
            if !known(node) {
                return Err(ReprodError::ConfigError(format!(
                    "transform '{name}' has unknown node '{node}' for input '{input}'"
                )));
            }
        }
    }

    for target in &cfg.targets {
        if !known(target) {
            return Err(ReprodError::ConfigError(format!(
                "unknown target '{target}'"
            )));
        }
    }
    Ok(())
}

fn parse_timeouts(cfg: &RawConfigFile) -> Result<ExecTimeouts> {
    let field = |key: &str, value: &str| {
        parse_duration(value)
            .map_err(|e| ReprodError::ConfigError(format!("[config].{key}: {e}")))
    };

    let timeouts = ExecTimeouts {
        submit: field("submit_timeout", &cfg.config.submit_timeout)?,
        poll: field("poll_timeout", &cfg.config.poll_timeout)?,
        poll_interval: field("poll_interval", &cfg.config.poll_interval)?,
        provision: field("provision_timeout", &cfg.config.provision_timeout)?,
    };

    if timeouts.submit.is_zero() || timeouts.poll.is_zero() || timeouts.provision.is_zero() {
        return Err(ReprodError::ConfigError(
            "[config] timeouts must be greater than zero".to_string(),
        ));
    }
    Ok(timeouts)
}

fn parse_file_digests(cfg: &RawConfigFile) -> Result<BTreeMap<String, DigestMap>> {
    cfg.file
        .iter()
        .map(|(name, file)| {
            let digests = parse_digests(&file.digests)
                .map_err(|e| ReprodError::ConfigError(format!("[file.{name}].digests: {e}")))?;
            Ok((name.clone(), digests))
        })
        .collect()
}
