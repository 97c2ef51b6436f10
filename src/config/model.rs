// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::sched::SchedulerConfig;
use crate::types::EngineKind;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// hw_submission_limit = 2
/// timeout_ms = 10000
/// queue_depth = 32
///
/// [engine.gfx]
/// hw_submission_limit = 4
///
/// [engine.sdma]
///
/// [simulation]
/// job_duration_ms = 2
/// hang_every = 0
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    /// Defaults for every engine from `[scheduler]`.
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Enabled engines from `[engine.<kind>]`, with per-engine overrides.
    #[serde(default)]
    pub engine: BTreeMap<EngineKind, EngineSection>,

    /// Behaviour of the simulated hardware used by the CLI.
    #[serde(default)]
    pub simulation: SimulationSection,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `validate.rs`), so
/// holders can rely on limits being non-zero and at least one engine being
/// enabled.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerSection,
    pub engine: BTreeMap<EngineKind, EngineSection>,
    pub simulation: SimulationSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        scheduler: SchedulerSection,
        engine: BTreeMap<EngineKind, EngineSection>,
        simulation: SimulationSection,
    ) -> Self {
        Self {
            scheduler,
            engine,
            simulation,
        }
    }

    /// Enabled engines, in a stable order.
    pub fn engines(&self) -> impl Iterator<Item = EngineKind> + '_ {
        self.engine.keys().copied()
    }

    /// Scheduler tunables for `engine`, with its overrides applied.
    pub fn scheduler_config(&self, engine: EngineKind) -> SchedulerConfig {
        let overrides = self.engine.get(&engine);
        let limit = overrides
            .and_then(|e| e.hw_submission_limit)
            .unwrap_or(self.scheduler.hw_submission_limit);
        let timeout_ms = overrides
            .and_then(|e| e.timeout_ms)
            .unwrap_or(self.scheduler.timeout_ms);

        SchedulerConfig {
            hw_submission_limit: limit,
            timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }

    /// Entity queue depth for `engine`.
    pub fn queue_depth(&self, engine: EngineKind) -> usize {
        self.engine
            .get(&engine)
            .and_then(|e| e.queue_depth)
            .unwrap_or(self.scheduler.queue_depth)
    }

    /// Apply command-line overrides; they win over every file value.
    pub fn override_tunables(&mut self, hw_submission_limit: Option<usize>, timeout_ms: Option<u64>) {
        if let Some(limit) = hw_submission_limit {
            self.scheduler.hw_submission_limit = limit;
            for section in self.engine.values_mut() {
                section.hw_submission_limit = None;
            }
        }
        if let Some(timeout_ms) = timeout_ms {
            self.scheduler.timeout_ms = timeout_ms;
            for section in self.engine.values_mut() {
                section.timeout_ms = None;
            }
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        let mut engine = BTreeMap::new();
        engine.insert(EngineKind::Gfx, EngineSection::default());
        Self::new_unchecked(
            SchedulerSection::default(),
            engine,
            SimulationSection::default(),
        )
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    /// Maximum number of jobs on the hardware at once, per engine.
    #[serde(default = "default_hw_submission_limit")]
    pub hw_submission_limit: usize,

    /// Per-job watchdog in milliseconds; `0` disables it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How many unfinished jobs one entity may hold.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_hw_submission_limit() -> usize {
    2
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_queue_depth() -> usize {
    32
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            hw_submission_limit: default_hw_submission_limit(),
            timeout_ms: default_timeout_ms(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// `[engine.<kind>]` section. Every field falls back to `[scheduler]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default)]
    pub hw_submission_limit: Option<usize>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub queue_depth: Option<usize>,
}

/// `[simulation]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationSection {
    /// How long the simulated engine takes per job.
    #[serde(default = "default_job_duration_ms")]
    pub job_duration_ms: u64,

    /// Make every Nth submission hang until the engine is reset (`0` = never).
    #[serde(default)]
    pub hang_every: u64,
}

fn default_job_duration_ms() -> u64 {
    2
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            job_duration_ms: default_job_duration_ms(),
            hang_every: 0,
        }
    }
}
