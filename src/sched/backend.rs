// src/sched/backend.rs

//! Pluggable hardware backend abstraction.
//!
//! The scheduler never touches hardware itself. Each engine supplies a
//! `Backend`, which the dispatch loop calls to:
//! - find out what a job still has to wait for (`dependency`)
//! - hand the job to the hardware queue (`run`)
//! - recover the device after a job overran its deadline (`timed_out`)
//! - free the job once nothing references it anymore (`release`)
//!
//! Production code plugs in a real ring (see [`crate::sim::SimRing`] for the
//! simulated one); tests provide fakes that record calls and complete
//! hardware fences on demand.

use crate::errors::FenceError;
use crate::fence::Fence;
use crate::sched::job::Job;

/// Outcome of device recovery after a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The engine was reset and can execute jobs again; work that was in
    /// flight is replayed.
    Recovered,
    /// The engine is gone; work that was in flight is failed.
    DeviceLost,
}

/// Callbacks supplied by the hardware-specific layer.
///
/// All methods are called from the scheduler's dispatch loop and must not
/// block on other jobs of the same scheduler.
pub trait Backend: Send + Sync {
    /// Return the next fence `job` must wait for, or `None` once it may run.
    ///
    /// Called again after every returned fence signals, until it yields
    /// `None`. May allocate hardware resources as a side effect. An error
    /// fails the job without it ever reaching the hardware.
    fn dependency(&self, job: &mut Job) -> Result<Option<Fence>, FenceError> {
        Ok(job.take_dependency())
    }

    /// Hand `job` to the hardware and return its completion fence.
    ///
    /// Called again for the same job when it is replayed after a reset.
    fn run(&self, job: &mut Job) -> Result<Fence, FenceError>;

    /// `job` overran its deadline; recover the engine.
    fn timed_out(&self, job: &Job) -> Recovery;

    /// `job` is done (finished, failed or cancelled); free its resources.
    fn release(&self, job: Job) {
        drop(job);
    }
}
