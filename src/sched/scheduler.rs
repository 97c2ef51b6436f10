// src/sched/scheduler.rs

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::sched::backend::Backend;
use crate::sched::entity::{Entity, EntityShared};
use crate::sched::run_queue::RunQueue;
use crate::sched::worker::{Completion, Worker};
use crate::types::Priority;

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// Tunables of one scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of jobs submitted to hardware and not yet finished.
    pub hw_submission_limit: usize,
    /// Per-job deadline; `None` disables the watchdog.
    pub timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hw_submission_limit: 2,
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Observable state of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedState {
    /// No entity has ready work.
    Idle,
    /// Popping and submitting jobs.
    Dispatching,
    /// In-flight ceiling reached; waiting for a completion.
    Throttled,
    /// Shutting down; waiting for in-flight jobs.
    Draining,
    /// Dispatch loop has exited.
    Stopped,
}

impl SchedState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SchedState::Idle,
            1 => SchedState::Dispatching,
            2 => SchedState::Throttled,
            3 => SchedState::Draining,
            _ => SchedState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SchedState::Idle => 0,
            SchedState::Dispatching => 1,
            SchedState::Throttled => 2,
            SchedState::Draining => 3,
            SchedState::Stopped => 4,
        }
    }
}

/// State shared between the scheduler handle, its entities and the
/// dispatch loop.
pub(crate) struct SchedShared {
    id: u64,
    name: String,
    config: SchedulerConfig,
    backend: Arc<dyn Backend>,
    /// One run queue per priority, indexed by `Priority::index`.
    run_queues: [RunQueue; Priority::COUNT],
    in_flight: AtomicUsize,
    state: AtomicU8,
    draining: AtomicBool,
    resets: AtomicU64,
    wake: Notify,
    /// Every entity ever created here; only used to sweep queues on
    /// shutdown, never held while an entity is locked.
    entities: Mutex<Vec<Weak<EntityShared>>>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl SchedShared {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn run_queue(&self, priority: Priority) -> &RunQueue {
        &self.run_queues[priority.index()]
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.wake.notified()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Count a job about to be handed to the hardware; returns the new total.
    pub fn begin_submission(&self) -> usize {
        self.in_flight.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn end_submission(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_throttled(&self) -> bool {
        self.in_flight() >= self.config.hw_submission_limit
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Acquire)
    }

    pub fn record_reset(&self) -> u64 {
        self.resets.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_state(&self, state: SchedState) {
        let previous = self.state.swap(state.as_u8(), Ordering::AcqRel);
        if previous != state.as_u8() {
            debug!(scheduler = %self.name, ?state, "scheduler state change");
        }
    }

    pub fn state(&self) -> SchedState {
        SchedState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn completion_sender(&self) -> mpsc::UnboundedSender<Completion> {
        self.completions.clone()
    }

    /// Highest-priority entity that has a runnable head job.
    pub fn select_entity(&self) -> Option<Entity> {
        Priority::BY_URGENCY
            .into_iter()
            .find_map(|priority| self.run_queue(priority).select_next_ready())
    }

    fn register_entity(&self, entity: &Entity) {
        let mut entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        entities.retain(|e| e.strong_count() > 0);
        entities.push(Arc::downgrade(entity.shared()));
    }

    /// Cancel every job still queued on any entity of this scheduler.
    fn cancel_all_queued(&self) -> usize {
        let entities: Vec<Entity> = {
            let entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
            entities
                .iter()
                .filter_map(Weak::upgrade)
                .map(Entity::from_shared)
                .collect()
        };

        let mut cancelled = 0;
        for entity in entities {
            cancelled += entity.cancel_queued();
            self.run_queue(entity.priority()).remove_entity(&entity);
        }
        cancelled
    }
}

/// Keeps a scheduler's dispatch loop running.
///
/// Every [`Scheduler`] clone and every entity holds one; when the last is
/// dropped the loop drains what is on the hardware and exits, releasing the
/// backend.
pub(crate) struct SchedLease {
    shared: Arc<SchedShared>,
}

impl Deref for SchedLease {
    type Target = SchedShared;

    fn deref(&self) -> &SchedShared {
        &self.shared
    }
}

impl Drop for SchedLease {
    fn drop(&mut self) {
        if !self.shared.draining.swap(true, Ordering::SeqCst) {
            debug!(scheduler = %self.shared.name, "last handle dropped; stopping dispatch loop");
        }
        self.shared.wake();
    }
}

/// One scheduler per hardware engine.
///
/// Owns the run queues and a dispatch loop running as a tokio task. Cheap to
/// clone; every clone drives the same instance. The loop stops on
/// [`Scheduler::shutdown`], or once every clone and every entity created
/// from it is gone.
#[derive(Clone)]
pub struct Scheduler {
    lease: Arc<SchedLease>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Scheduler {
    /// Create a scheduler and start its dispatch loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, config: SchedulerConfig, backend: Arc<dyn Backend>) -> Self {
        let config = SchedulerConfig {
            hw_submission_limit: config.hw_submission_limit.max(1),
            timeout: config.timeout.filter(|t| !t.is_zero()),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SchedShared {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            config,
            backend,
            run_queues: Priority::ALL.map(RunQueue::new),
            in_flight: AtomicUsize::new(0),
            state: AtomicU8::new(SchedState::Idle.as_u8()),
            draining: AtomicBool::new(false),
            resets: AtomicU64::new(0),
            wake: Notify::new(),
            entities: Mutex::new(Vec::new()),
            completions: tx,
        });

        info!(
            scheduler = %shared.name,
            hw_submission_limit = config.hw_submission_limit,
            timeout_ms = config.timeout.map(|t| t.as_millis() as u64),
            "scheduler created"
        );

        let handle = tokio::spawn(Worker::new(Arc::clone(&shared), rx).run());

        Self {
            lease: Arc::new(SchedLease { shared }),
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn id(&self) -> u64 {
        self.lease.id
    }

    pub fn name(&self) -> &str {
        &self.lease.name
    }

    pub fn config(&self) -> SchedulerConfig {
        self.lease.config
    }

    pub fn state(&self) -> SchedState {
        self.lease.state()
    }

    /// Jobs submitted to hardware and not yet released.
    pub fn in_flight(&self) -> usize {
        self.lease.in_flight()
    }

    pub fn is_draining(&self) -> bool {
        self.lease.is_draining()
    }

    /// Number of engine resets triggered by job timeouts.
    pub fn resets(&self) -> u64 {
        self.lease.resets()
    }

    /// Create an entity on the run queue of `priority` holding at most
    /// `queue_depth` unfinished jobs.
    pub fn create_entity(&self, priority: Priority, queue_depth: usize) -> Entity {
        let entity = Entity::new(Arc::clone(&self.lease), priority, queue_depth);
        self.lease.register_entity(&entity);
        debug!(
            scheduler = %self.lease.name,
            entity = entity.id(),
            ?priority,
            queue_depth = entity.capacity(),
            "entity created"
        );
        entity
    }

    /// Number of entities currently linked into the run queue of `priority`.
    pub fn run_queue_len(&self, priority: Priority) -> usize {
        self.lease.run_queue(priority).len()
    }

    /// Stop accepting jobs, cancel everything not yet on the hardware and
    /// wait until the jobs in flight have finished or timed out.
    pub async fn shutdown(&self) {
        if !self.lease.draining.swap(true, Ordering::SeqCst) {
            self.lease.set_state(SchedState::Draining);
            let cancelled = self.lease.cancel_all_queued();
            info!(
                scheduler = %self.lease.name,
                cancelled,
                in_flight = self.lease.in_flight(),
                "scheduler draining"
            );
        }
        self.lease.wake();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.lease.id)
            .field("name", &self.lease.name)
            .field("config", &self.lease.config)
            .field("state", &self.lease.state())
            .field("in_flight", &self.lease.in_flight())
            .finish_non_exhaustive()
    }
}
