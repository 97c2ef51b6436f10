// src/sim/mod.rs

//! Simulated hardware for the `gpusched` binary.
//!
//! - [`ring`]: a [`crate::sched::Backend`] whose jobs complete on tokio timers,
//!   with optional hang injection.
//! - [`workload`]: concurrent producers that push synthetic jobs through a
//!   [`crate::device::Device`].

pub mod ring;
pub mod workload;

pub use ring::{SimRing, SimStats};
pub use workload::{Workload, WorkloadReport, run_workload};
