// src/sched/mod.rs

//! The command-submission scheduler.
//!
//! - [`job`] is the unit of work handed around.
//! - [`entity`] holds the FIFO of one submission context.
//! - [`run_queue`] serves the entities of one priority tier round robin.
//! - [`scheduler`] ties run queues, the in-flight ceiling and the dispatch
//!   loop together; the loop itself lives in [`worker`], its deadlines in
//!   [`watchdog`].
//! - [`backend`] is the contract the hardware-specific layer implements.

pub mod backend;
pub mod entity;
pub mod job;
pub mod run_queue;
pub mod scheduler;
mod watchdog;
mod worker;

pub use backend::{Backend, Recovery};
pub use entity::{Entity, PushRejected};
pub use job::{Job, JobId};
pub use run_queue::RunQueue;
pub use scheduler::{SchedState, Scheduler, SchedulerConfig};
