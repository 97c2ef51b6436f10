// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::model::{ConfigFile, EngineSection, RawConfigFile, SchedulerSection};
use crate::errors::{Result, SchedError};
use crate::types::EngineKind;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SchedError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let mut raw = raw;
        // No `[engine.*]` table at all means "just graphics".
        if raw.engine.is_empty() {
            raw.engine.insert(EngineKind::Gfx, EngineSection::default());
        }
        validate_sections(&raw.scheduler, &raw.engine)?;
        Ok(ConfigFile::new_unchecked(raw.scheduler, raw.engine, raw.simulation))
    }
}

/// Re-check a config after it was modified (e.g. by CLI overrides).
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_sections(&cfg.scheduler, &cfg.engine)
}

fn validate_sections(
    scheduler: &SchedulerSection,
    engines: &BTreeMap<EngineKind, EngineSection>,
) -> Result<()> {
    validate_limits(
        "[scheduler]",
        Some(scheduler.hw_submission_limit),
        Some(scheduler.queue_depth),
    )?;
    for (kind, section) in engines.iter() {
        validate_limits(
            &format!("[engine.{kind}]"),
            section.hw_submission_limit,
            section.queue_depth,
        )?;
    }
    Ok(())
}

fn validate_limits(
    section: &str,
    hw_submission_limit: Option<usize>,
    queue_depth: Option<usize>,
) -> Result<()> {
    if hw_submission_limit == Some(0) {
        return Err(SchedError::ConfigError(format!(
            "{section}.hw_submission_limit must be >= 1 (got 0)"
        )));
    }
    if queue_depth == Some(0) {
        return Err(SchedError::ConfigError(format!(
            "{section}.queue_depth must be >= 1 (got 0)"
        )));
    }
    Ok(())
}
