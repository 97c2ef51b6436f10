// src/sched/entity.rs

//! Per-submission-context job queues.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::errors::{FenceError, Result, SchedError};
use crate::fence::sched_fence::same_scheduler_shortcut;
use crate::fence::{Fence, FenceContext};
use crate::sched::job::Job;
use crate::sched::scheduler::SchedLease;
use crate::types::Priority;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// The fence an entity is currently blocked on.
#[derive(Debug)]
struct Dependency {
    fence: Fence,
    /// Sequence number of the head job that is waiting.
    seq: u64,
    since: Instant,
}

#[derive(Debug, Default)]
struct EntityState {
    /// Pushed jobs not yet handed to the scheduler, in push order.
    queue: VecDeque<Job>,
    dependency: Option<Dependency>,
    /// Jobs pushed but not yet finished, failed or cancelled.
    outstanding: usize,
    last_seq: u64,
    stopped: bool,
    /// Timeouts caused by this entity's jobs.
    hangs: usize,
}

pub(crate) struct EntityShared {
    id: u64,
    priority: Priority,
    capacity: usize,
    /// First of two contexts: scheduled fences use it, finished fences the
    /// next one.
    fence_context: u64,
    scheduler: Arc<SchedLease>,
    state: Mutex<EntityState>,
    /// Signaled whenever capacity frees up or the entity stops.
    space: Notify,
}

/// A bounded FIFO of jobs belonging to one submission context.
///
/// Cheap to clone; all clones refer to the same queue.
#[derive(Clone)]
pub struct Entity {
    shared: Arc<EntityShared>,
}

/// A push the entity refused. Hands the job back so the caller can retry.
#[derive(Debug, Error)]
#[error("job {} rejected: {error}", .job.id())]
pub struct PushRejected {
    pub job: Job,
    pub error: SchedError,
}

impl From<PushRejected> for SchedError {
    fn from(rejected: PushRejected) -> Self {
        rejected.error
    }
}

/// Result of asking an entity for its next runnable job.
#[derive(Debug)]
pub(crate) enum Pop {
    /// Head job has no unresolved dependency left.
    Ready(Job),
    /// Head job started waiting on `fence`.
    Blocked { fence: Fence, seq: u64, since: Instant },
    /// Still waiting on a dependency that was reported earlier.
    Waiting,
    /// Head job can never run; fail it with `error`.
    Failed(Job, FenceError),
    Empty,
}

enum Resolve {
    Runnable,
    Wait(Fence),
    Fail(FenceError),
}

impl Entity {
    pub(crate) fn new(scheduler: Arc<SchedLease>, priority: Priority, capacity: usize) -> Self {
        let shared = Arc::new(EntityShared {
            id: NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed),
            priority,
            capacity: capacity.max(1),
            fence_context: FenceContext::alloc(2),
            scheduler,
            state: Mutex::new(EntityState::default()),
            space: Notify::new(),
        });
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<EntityShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<EntityShared> {
        &self.shared
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn priority(&self) -> Priority {
        self.shared.priority
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn fence_context(&self) -> u64 {
        self.shared.fence_context
    }

    /// Jobs pushed and not yet finished (queued or on the hardware).
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Jobs still waiting in the queue.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Sequence number of the most recently pushed job (0 before the first).
    pub fn last_seq(&self) -> u64 {
        self.lock().last_seq
    }

    /// Whether one of this entity's jobs has hung the engine.
    pub fn is_guilty(&self) -> bool {
        self.lock().hangs > 0
    }

    pub fn hangs(&self) -> usize {
        self.lock().hangs
    }

    /// Scheduler-wide reset count at the time of the call.
    pub(crate) fn scheduler_resets(&self) -> u64 {
        self.shared.scheduler.resets()
    }

    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Enqueue `job` and return its finished fence.
    ///
    /// Fails with [`SchedError::QueueFull`] while `capacity` jobs of this
    /// entity are unfinished; the job is handed back in that case.
    pub fn push(&self, mut job: Job) -> std::result::Result<Fence, PushRejected> {
        let scheduler = &self.shared.scheduler;

        let (finished, seq) = {
            let mut state = self.lock();

            // Checked under the entity lock so a concurrent shutdown either
            // sees this job in the queue or we see the draining flag.
            let refusal = if scheduler.is_draining() {
                Some(SchedError::Draining(scheduler.name().to_string()))
            } else if state.stopped {
                Some(SchedError::EntityStopped(self.shared.id))
            } else if state.outstanding >= self.shared.capacity {
                Some(SchedError::QueueFull {
                    entity: self.shared.id,
                    capacity: self.shared.capacity,
                })
            } else {
                None
            };
            if let Some(error) = refusal {
                return Err(PushRejected { job, error });
            }

            state.last_seq += 1;
            let seq = state.last_seq;
            let finished = job.attach(
                Arc::downgrade(&self.shared),
                scheduler.id(),
                self.shared.fence_context,
                seq,
            );
            state.outstanding += 1;
            state.queue.push_back(job);
            (finished, seq)
        };

        debug!(
            scheduler = %scheduler.name(),
            entity = self.shared.id,
            seq,
            "job pushed"
        );

        scheduler.run_queue(self.shared.priority).add_entity(self);
        scheduler.wake();
        Ok(finished)
    }

    /// Like [`Entity::push`], but waits for capacity instead of failing with
    /// `QueueFull`.
    pub async fn push_wait(&self, job: Job) -> Result<Fence> {
        let mut job = job;
        loop {
            let space = self.shared.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.push(job) {
                Ok(finished) => return Ok(finished),
                Err(rejected) if rejected.error.is_backpressure() => {
                    job = rejected.job;
                    space.await;
                }
                Err(rejected) => return Err(rejected.error),
            }
        }
    }

    /// Stop the entity and cancel every job that has not reached the
    /// hardware yet. Jobs already submitted run to completion.
    ///
    /// Returns the number of cancelled jobs.
    pub fn destroy(&self) -> usize {
        {
            let mut state = self.lock();
            if state.stopped {
                return 0;
            }
            state.stopped = true;
        }

        let cancelled = self.cancel_queued();
        self.shared
            .scheduler
            .run_queue(self.shared.priority)
            .remove_entity(self);
        self.shared.space.notify_waiters();

        info!(
            scheduler = %self.shared.scheduler.name(),
            entity = self.shared.id,
            cancelled,
            "entity destroyed"
        );
        cancelled
    }

    /// Fail every queued job with `Cancelled` and release it.
    pub(crate) fn cancel_queued(&self) -> usize {
        let jobs: Vec<Job> = {
            let mut state = self.lock();
            state.dependency = None;
            let jobs: Vec<Job> = state.queue.drain(..).collect();
            state.outstanding -= jobs.len();
            jobs
        };

        let count = jobs.len();
        for job in jobs {
            debug!(entity = self.shared.id, seq = job.seq(), "cancelling queued job");
            let fences = job.fences().cloned();
            self.shared.scheduler.backend().release(job);
            if let Some(fences) = fences {
                fences.fail(FenceError::Cancelled);
            }
        }
        if count > 0 {
            self.shared.space.notify_waiters();
        }
        count
    }

    /// Whether the head job may be popped right now.
    pub(crate) fn is_ready(&self) -> bool {
        let state = self.lock();
        !state.stopped
            && !state.queue.is_empty()
            && state
                .dependency
                .as_ref()
                .is_none_or(|dep| dep.fence.is_signaled())
    }

    /// Nothing queued and nothing being waited on.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.dependency.is_none()
    }

    /// Resolve the head job's dependencies and pop it if it may run.
    ///
    /// The backend's `dependency` callback is asked repeatedly until it
    /// returns `None`; already-signaled fences are skipped on the spot.
    pub(crate) fn pop_ready(&self) -> Pop {
        let scheduler = &self.shared.scheduler;
        let mut state = self.lock();
        if state.stopped {
            return Pop::Empty;
        }

        match state.dependency.as_ref().map(|dep| dep.fence.status()) {
            None => {}
            Some(None) => return Pop::Waiting,
            Some(Some(Ok(()))) => state.dependency = None,
            Some(Some(Err(error))) => {
                state.dependency = None;
                return match state.queue.pop_front() {
                    Some(job) => Pop::Failed(job, FenceError::DependencyFailed(Box::new(error))),
                    None => Pop::Empty,
                };
            }
        }

        let (resolve, seq) = {
            let Some(head) = state.queue.front_mut() else {
                return Pop::Empty;
            };
            let resolve = loop {
                match scheduler.backend().dependency(head) {
                    Ok(None) => break Resolve::Runnable,
                    Ok(Some(fence)) => {
                        let fence = same_scheduler_shortcut(&fence, scheduler.id()).unwrap_or(fence);
                        match fence.status() {
                            Some(Ok(())) => continue,
                            Some(Err(error)) => {
                                break Resolve::Fail(FenceError::DependencyFailed(Box::new(error)));
                            }
                            None => break Resolve::Wait(fence),
                        }
                    }
                    Err(error) => break Resolve::Fail(error),
                }
            };
            (resolve, head.seq())
        };

        match resolve {
            Resolve::Runnable => match state.queue.pop_front() {
                Some(job) => Pop::Ready(job),
                None => Pop::Empty,
            },
            Resolve::Fail(error) => match state.queue.pop_front() {
                Some(job) => Pop::Failed(job, error),
                None => Pop::Empty,
            },
            Resolve::Wait(fence) => {
                let since = Instant::now();
                state.dependency = Some(Dependency {
                    fence: fence.clone(),
                    seq,
                    since,
                });
                Pop::Blocked { fence, seq, since }
            }
        }
    }

    /// If head job `seq` has been blocked since `since` on a dependency that
    /// is still pending after `timeout`, pop and return it.
    pub(crate) fn expire_dependency(&self, seq: u64, timeout: Duration, now: Instant) -> Option<Job> {
        let mut state = self.lock();
        let dep = state.dependency.as_ref()?;
        if dep.seq != seq || dep.fence.is_signaled() || dep.since + timeout > now {
            return None;
        }
        state.dependency = None;
        if state.queue.front().map(Job::seq) != Some(seq) {
            return None;
        }
        state.queue.pop_front()
    }

    /// A job of this entity overran its deadline. Returns the new hang count.
    pub(crate) fn mark_guilty(&self) -> usize {
        let mut state = self.lock();
        state.hangs += 1;
        state.hangs
    }

    /// One job of this entity finished, failed or was cancelled.
    pub(crate) fn retire_one(&self) {
        {
            let mut state = self.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
        }
        self.shared.space.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, EntityState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.shared.id)
            .field("priority", &self.shared.priority)
            .field("capacity", &self.shared.capacity)
            .field("fence_context", &self.shared.fence_context)
            .finish_non_exhaustive()
    }
}
