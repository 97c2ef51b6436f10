// src/sim/ring.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SimulationSection;
use crate::errors::FenceError;
use crate::fence::{Fence, FenceTimeline};
use crate::sched::{Backend, Job, JobId, Recovery};
use crate::types::{EngineKind, FenceOwner};

/// Counters of one simulated ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub submitted: u64,
    pub completed: u64,
    pub hung: u64,
    pub resets: u64,
    pub released: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    hung: AtomicU64,
    resets: AtomicU64,
    released: AtomicU64,
}

/// A hardware ring emulated with tokio timers.
///
/// Every submission completes after `job_duration`, except every
/// `hang_every`-th one, whose fence stays pending until the scheduler's
/// watchdog resets the ring.
#[derive(Debug)]
pub struct SimRing {
    engine: EngineKind,
    timeline: FenceTimeline,
    job_duration: Duration,
    hang_every: u64,
    counters: Arc<Counters>,
    /// Hardware fences of jobs that are stuck on the ring.
    hung: Mutex<HashMap<JobId, Fence>>,
}

impl SimRing {
    pub fn new(engine: EngineKind, job_duration: Duration, hang_every: u64) -> Self {
        Self {
            engine,
            timeline: FenceTimeline::new(FenceOwner::Hardware(engine)),
            job_duration,
            hang_every,
            counters: Arc::new(Counters::default()),
            hung: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(engine: EngineKind, sim: &SimulationSection) -> Self {
        Self::new(
            engine,
            Duration::from_millis(sim.job_duration_ms),
            sim.hang_every,
        )
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn stats(&self) -> SimStats {
        let c = &self.counters;
        SimStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            hung: c.hung.load(Ordering::Relaxed),
            resets: c.resets.load(Ordering::Relaxed),
            released: c.released.load(Ordering::Relaxed),
        }
    }

    fn should_hang(&self, submission: u64) -> bool {
        self.hang_every > 0 && submission % self.hang_every == 0
    }
}

impl Backend for SimRing {
    fn run(&self, job: &mut Job) -> Result<Fence, FenceError> {
        let submission = self.counters.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        let fence = self.timeline.next_fence();

        if self.should_hang(submission) {
            warn!(
                engine = %self.engine,
                job = job.id(),
                hw_seqno = fence.seqno(),
                "simulated ring hang"
            );
            self.counters.hung.fetch_add(1, Ordering::Relaxed);
            self.hung
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(job.id(), fence.clone());
            return Ok(fence);
        }

        let hw_fence = fence.clone();
        let counters = Arc::clone(&self.counters);
        let duration = self.job_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if hw_fence.signal() {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
        });

        Ok(fence)
    }

    fn timed_out(&self, job: &Job) -> Recovery {
        self.counters.resets.fetch_add(1, Ordering::Relaxed);

        // A reset clears the ring: the guilty job's fence is completed with an
        // error, other stuck fences are forgotten and their jobs replayed.
        let stuck: Vec<(JobId, Fence)> = self
            .hung
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, fence) in stuck {
            if id == job.id() {
                fence.signal_error(FenceError::Hardware("ring reset".to_string()));
            }
        }

        debug!(engine = %self.engine, job = job.id(), "simulated ring reset");
        Recovery::Recovered
    }

    fn release(&self, job: Job) {
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        drop(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_after_job_duration() {
        let ring = SimRing::new(EngineKind::Sdma, Duration::from_millis(1), 0);
        let mut job = Job::alloc(8);
        let fence = ring.run(&mut job).unwrap();

        assert_eq!(fence.owner(), FenceOwner::Hardware(EngineKind::Sdma));
        assert_eq!(fence.wait().await, Ok(()));
        assert_eq!(ring.stats().completed, 1);
    }

    #[tokio::test]
    async fn every_nth_submission_hangs_until_reset() {
        let ring = SimRing::new(EngineKind::Gfx, Duration::from_millis(1), 2);
        let mut first = Job::alloc(0);
        let mut second = Job::alloc(0);

        let ok = ring.run(&mut first).unwrap();
        let stuck = ring.run(&mut second).unwrap();
        assert_eq!(ok.wait().await, Ok(()));
        assert!(!stuck.is_signaled());

        assert_eq!(ring.timed_out(&second), Recovery::Recovered);
        assert!(matches!(stuck.status(), Some(Err(FenceError::Hardware(_)))));

        let stats = ring.stats();
        assert_eq!((stats.submitted, stats.hung, stats.resets), (2, 1, 1));
    }
}
