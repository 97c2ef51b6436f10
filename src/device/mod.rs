// src/device/mod.rs

//! A GPU as seen by submitters: one scheduler per hardware engine.
//!
//! - [`Device`] brings up a [`Scheduler`] for every engine enabled in the
//!   configuration, each with its own backend.
//! - [`context`] provides per-client submission contexts that own one entity
//!   per engine.

pub mod context;

pub use context::{ResetStatus, SubmitContext};

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::ConfigFile;
use crate::errors::{Result, SchedError};
use crate::sched::{Backend, Scheduler};
use crate::types::{EngineKind, FenceOwner, Priority};

#[derive(Debug)]
struct Engine {
    scheduler: Scheduler,
    queue_depth: usize,
}

#[derive(Debug)]
pub struct Device {
    name: String,
    engines: BTreeMap<EngineKind, Engine>,
}

impl Device {
    /// Bring up a scheduler for every engine in `cfg`, asking `backend_for`
    /// for the backend of each.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<F>(name: impl Into<String>, cfg: &ConfigFile, mut backend_for: F) -> Self
    where
        F: FnMut(EngineKind) -> Arc<dyn Backend>,
    {
        let name = name.into();
        let mut engines = BTreeMap::new();

        for kind in cfg.engines() {
            let scheduler = Scheduler::new(
                format!("{name}.{kind}"),
                cfg.scheduler_config(kind),
                backend_for(kind),
            );
            engines.insert(
                kind,
                Engine {
                    scheduler,
                    queue_depth: cfg.queue_depth(kind),
                },
            );
        }

        info!(
            device = %name,
            engines = ?engines.keys().collect::<Vec<_>>(),
            "device initialised"
        );

        Self { name, engines }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engines(&self) -> impl Iterator<Item = EngineKind> + '_ {
        self.engines.keys().copied()
    }

    pub fn scheduler(&self, engine: EngineKind) -> Result<&Scheduler> {
        self.engines
            .get(&engine)
            .map(|e| &e.scheduler)
            .ok_or(SchedError::EngineNotEnabled(engine))
    }

    /// Jobs on the hardware across all engines.
    pub fn in_flight(&self) -> usize {
        self.engines.values().map(|e| e.scheduler.in_flight()).sum()
    }

    /// Engine resets across all engines.
    pub fn resets(&self) -> u64 {
        self.engines.values().map(|e| e.scheduler.resets()).sum()
    }

    /// Open a submission context for `owner` with one entity per engine.
    pub fn create_context(&self, owner: FenceOwner, priority: Priority) -> SubmitContext {
        let entities = self
            .engines
            .iter()
            .map(|(kind, engine)| {
                (
                    *kind,
                    engine.scheduler.create_entity(priority, engine.queue_depth),
                )
            })
            .collect();
        SubmitContext::new(owner, priority, entities)
    }

    /// Drain every engine.
    pub async fn shutdown(&self) {
        for (kind, engine) in self.engines.iter() {
            info!(device = %self.name, engine = %kind, "shutting down engine");
            engine.scheduler.shutdown().await;
        }
    }
}
