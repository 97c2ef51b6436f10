#![allow(dead_code)]

use gpusched::config::{ConfigFile, EngineSection, RawConfigFile};
use gpusched::errors::Result;
use gpusched::types::EngineKind;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_engine(self, kind: EngineKind) -> Self {
        self.with_engine_section(kind, EngineSection::default())
    }

    pub fn with_engine_section(mut self, kind: EngineKind, section: EngineSection) -> Self {
        self.config.engine.insert(kind, section);
        self
    }

    pub fn hw_submission_limit(mut self, limit: usize) -> Self {
        self.config.scheduler.hw_submission_limit = limit;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.scheduler.timeout_ms = timeout_ms;
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.scheduler.queue_depth = depth;
        self
    }

    pub fn job_duration_ms(mut self, ms: u64) -> Self {
        self.config.simulation.job_duration_ms = ms;
        self
    }

    pub fn hang_every(mut self, n: u64) -> Self {
        self.config.simulation.hang_every = n;
        self
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
