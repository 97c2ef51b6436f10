// src/sched/worker.rs

//! The per-scheduler dispatch loop.
//!
//! Exactly one `Worker` runs per scheduler, as a tokio task. It owns the list
//! of jobs on the hardware and the watchdog heap outright, so neither needs a
//! lock; everything producers touch (entities, run queues, the in-flight
//! counter) lives in [`SchedShared`].
//!
//! The loop sleeps on the scheduler's `Notify` when there is nothing to do or
//! when the in-flight ceiling is reached, and is woken by:
//! - pushes onto any entity,
//! - dependency fences signaling,
//! - hardware completions (delivered through an mpsc channel),
//! - the next watchdog deadline.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{FenceError, FenceResult};
use crate::fence::{Fence, FenceKind};
use crate::sched::backend::Recovery;
use crate::sched::entity::{Entity, Pop};
use crate::sched::job::{Job, JobId};
use crate::sched::scheduler::{SchedShared, SchedState};
use crate::sched::watchdog::{WatchTarget, Watchdog};

/// A hardware fence of a job signaled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Completion {
    job: JobId,
    attempt: u64,
}

/// A job currently owned by the hardware.
#[derive(Debug)]
struct InFlight {
    job: Job,
    hw_fence: Fence,
    /// Bumped on every (re)submission; completions of older attempts are
    /// ignored.
    attempt: u64,
}

pub(crate) struct Worker {
    shared: Arc<SchedShared>,
    completions: mpsc::UnboundedReceiver<Completion>,
    /// In submission order.
    pending: VecDeque<InFlight>,
    watchdog: Watchdog,
    attempts: u64,
}

impl Worker {
    pub fn new(shared: Arc<SchedShared>, completions: mpsc::UnboundedReceiver<Completion>) -> Self {
        Self {
            shared,
            completions,
            pending: VecDeque::new(),
            watchdog: Watchdog::default(),
            attempts: 0,
        }
    }

    pub async fn run(mut self) {
        info!(scheduler = %self.shared.name(), "dispatch loop started");

        loop {
            while let Ok(completion) = self.completions.try_recv() {
                self.complete(completion);
            }
            self.expire_deadlines(Instant::now());

            if self.shared.is_draining() {
                if self.pending.is_empty() {
                    break;
                }
            } else if self.dispatch_one() {
                continue;
            }

            let state = if self.shared.is_draining() {
                SchedState::Draining
            } else if self.shared.is_throttled() {
                SchedState::Throttled
            } else {
                SchedState::Idle
            };
            self.shared.set_state(state);

            let deadline = self.watchdog.next_deadline();
            tokio::select! {
                Some(completion) = self.completions.recv() => self.complete(completion),
                _ = self.shared.notified() => {}
                _ = sleep_until(deadline) => {}
            }
        }

        self.shared.set_state(SchedState::Stopped);
        info!(
            scheduler = %self.shared.name(),
            stale_deadlines = self.watchdog.len(),
            "dispatch loop stopped"
        );
    }

    /// Try to move one job towards the hardware. Returns `false` when there
    /// was nothing to do (throttled or no ready entity).
    fn dispatch_one(&mut self) -> bool {
        if self.shared.is_throttled() {
            return false;
        }
        let Some(entity) = self.shared.select_entity() else {
            return false;
        };
        self.shared.set_state(SchedState::Dispatching);

        match entity.pop_ready() {
            Pop::Ready(job) => self.run_job(job),
            Pop::Failed(job, error) => {
                warn!(
                    scheduler = %self.shared.name(),
                    entity = entity.id(),
                    job = job.id(),
                    seq = job.seq(),
                    %error,
                    "job failed before reaching hardware"
                );
                self.retire(job, Err(error), false);
            }
            Pop::Blocked { fence, seq, since } => self.block_on(&entity, fence, seq, since),
            Pop::Waiting | Pop::Empty => {}
        }
        true
    }

    fn block_on(&mut self, entity: &Entity, fence: Fence, seq: u64, since: Instant) {
        debug!(
            scheduler = %self.shared.name(),
            entity = entity.id(),
            seq,
            dependency_context = fence.context(),
            dependency_seqno = fence.seqno(),
            "entity blocked on dependency"
        );

        let shared: Weak<SchedShared> = Arc::downgrade(&self.shared);
        fence.on_signal(move |_| {
            if let Some(shared) = shared.upgrade() {
                shared.wake();
            }
        });

        // Scheduler fences are covered by their own scheduler's watchdog and
        // report a hang as a failure; only foreign fences can stay pending.
        if !matches!(fence.kind(), FenceKind::Plain) {
            return;
        }
        if let Some(timeout) = self.shared.config().timeout {
            self.watchdog.arm(
                since + timeout,
                WatchTarget::Dependency {
                    entity: Arc::downgrade(entity.shared()),
                    seq,
                },
            );
        }
    }

    fn run_job(&mut self, mut job: Job) {
        if let Some(fences) = job.fences() {
            fences.signal_scheduled();
        }
        let in_flight = self.shared.begin_submission();

        debug!(
            scheduler = %self.shared.name(),
            job = job.id(),
            seq = job.seq(),
            label = job.label().unwrap_or(""),
            in_flight,
            "submitting job to hardware"
        );

        match self.shared.backend().run(&mut job) {
            Ok(hw_fence) => self.track(job, hw_fence),
            Err(error) => {
                warn!(
                    scheduler = %self.shared.name(),
                    job = job.id(),
                    %error,
                    "backend refused job"
                );
                self.retire(job, Err(error), true);
            }
        }
    }

    /// Watch `hw_fence` for completion and arm the job's deadline.
    fn track(&mut self, job: Job, hw_fence: Fence) {
        self.attempts += 1;
        let attempt = self.attempts;
        let id = job.id();

        let tx = self.shared.completion_sender();
        hw_fence.on_signal(move |_| {
            let _ = tx.send(Completion { job: id, attempt });
        });

        if let Some(timeout) = self.shared.config().timeout {
            self.watchdog
                .arm(Instant::now() + timeout, WatchTarget::Job { job: id, attempt });
        }

        self.pending.push_back(InFlight {
            job,
            hw_fence,
            attempt,
        });
    }

    fn complete(&mut self, completion: Completion) {
        let position = self
            .pending
            .iter()
            .position(|p| p.job.id() == completion.job && p.attempt == completion.attempt);
        let Some(entry) = position.and_then(|pos| self.pending.remove(pos)) else {
            debug!(
                scheduler = %self.shared.name(),
                job = completion.job,
                attempt = completion.attempt,
                "ignoring stale completion"
            );
            return;
        };

        let result = entry.hw_fence.status().unwrap_or(Ok(()));
        debug!(
            scheduler = %self.shared.name(),
            job = entry.job.id(),
            seq = entry.job.seq(),
            ok = result.is_ok(),
            "job completed on hardware"
        );
        self.retire(entry.job, result, true);
    }

    /// Release `job` through the backend and signal its finished fence.
    ///
    /// `submitted` says whether the job was counted as in flight.
    fn retire(&mut self, job: Job, result: FenceResult, submitted: bool) {
        let fences = job.fences().cloned();
        let entity = job.entity();

        self.shared.backend().release(job);
        if submitted {
            self.shared.end_submission();
        }
        if let Some(entity) = entity {
            entity.retire_one();
        }
        if let Some(fences) = fences {
            fences.signal_finished(result);
        }
    }

    fn expire_deadlines(&mut self, now: Instant) {
        for target in self.watchdog.pop_expired(now) {
            match target {
                WatchTarget::Job { job, attempt } => {
                    let position = self.pending.iter().position(|p| {
                        p.job.id() == job && p.attempt == attempt && !p.hw_fence.is_signaled()
                    });
                    if let Some(position) = position {
                        self.handle_timeout(position);
                    }
                }
                WatchTarget::Dependency { entity, seq } => {
                    let Some(entity) = entity.upgrade().map(Entity::from_shared) else {
                        continue;
                    };
                    let Some(timeout) = self.shared.config().timeout else {
                        continue;
                    };
                    if let Some(job) = entity.expire_dependency(seq, timeout, now) {
                        warn!(
                            scheduler = %self.shared.name(),
                            entity = entity.id(),
                            job = job.id(),
                            seq,
                            "dependency never signaled; failing job"
                        );
                        self.retire(job, Err(FenceError::DependencyTimeout), false);
                    }
                }
            }
        }
    }

    /// The job at `position` overran its deadline: let the backend recover
    /// the engine, fail the guilty job, then replay or fail the rest.
    fn handle_timeout(&mut self, position: usize) {
        let Some(guilty) = self.pending.remove(position) else {
            return;
        };
        let hangs = guilty.job.entity().map_or(0, |entity| entity.mark_guilty());
        let resets = self.shared.record_reset();

        warn!(
            scheduler = %self.shared.name(),
            job = guilty.job.id(),
            seq = guilty.job.seq(),
            entity_hangs = hangs,
            resets,
            in_flight = self.pending.len() + 1,
            "job timed out; starting recovery"
        );

        let recovery = self.shared.backend().timed_out(&guilty.job);
        self.retire(guilty.job, Err(FenceError::TimedOut), true);

        let survivors: Vec<InFlight> = self.pending.drain(..).collect();
        match recovery {
            Recovery::Recovered => {
                info!(
                    scheduler = %self.shared.name(),
                    replayed = survivors.len(),
                    "engine recovered; replaying in-flight jobs"
                );
                for entry in survivors {
                    self.replay(entry);
                }
            }
            Recovery::DeviceLost => {
                warn!(
                    scheduler = %self.shared.name(),
                    failed = survivors.len(),
                    "device lost; failing in-flight jobs"
                );
                for entry in survivors {
                    self.retire(entry.job, Err(FenceError::DeviceLost), true);
                }
            }
        }
    }

    fn replay(&mut self, entry: InFlight) {
        // Completed before the reset; its completion may still be queued.
        if let Some(result) = entry.hw_fence.status() {
            self.retire(entry.job, result, true);
            return;
        }

        let mut job = entry.job;
        debug!(
            scheduler = %self.shared.name(),
            job = job.id(),
            seq = job.seq(),
            "resubmitting job after reset"
        );
        match self.shared.backend().run(&mut job) {
            Ok(hw_fence) => self.track(job, hw_fence),
            Err(error) => self.retire(job, Err(error), true),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
