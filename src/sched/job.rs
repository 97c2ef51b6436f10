// src/sched/job.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::fence::{Fence, SchedFence};
use crate::sched::entity::{Entity, EntityShared};
use crate::types::FenceOwner;

/// Process-unique job identifier.
pub type JobId = u64;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// One schedulable unit of work.
///
/// A job is created by a producer, pushed onto an [`Entity`] (which assigns
/// its sequence number and fence pair), handed to the backend by the
/// scheduler, and finally given back to the backend for release.
pub struct Job {
    id: JobId,
    /// Per-entity sequence number; 0 until the job is pushed.
    seq: u64,
    label: Option<String>,
    owner: FenceOwner,
    payload: Vec<u8>,
    /// Fences the job has to wait for before it may run.
    dependencies: VecDeque<Fence>,
    entity: Weak<EntityShared>,
    fence_context: u64,
    fences: Option<SchedFence>,
}

impl Job {
    /// Allocate a job with a zeroed payload of `payload_size` bytes.
    pub fn alloc(payload_size: usize) -> Self {
        Self::new(vec![0; payload_size])
    }

    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            seq: 0,
            label: None,
            owner: FenceOwner::Kernel,
            payload,
            dependencies: VecDeque::new(),
            entity: Weak::new(),
            fence_context: 0,
            fences: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_owner(mut self, owner: FenceOwner) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_dependency(mut self, fence: Fence) -> Self {
        self.add_dependency(fence);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn owner(&self) -> FenceOwner {
        self.owner
    }

    pub fn set_owner(&mut self, owner: FenceOwner) {
        self.owner = owner;
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    pub fn add_dependency(&mut self, fence: Fence) {
        self.dependencies.push_back(fence);
    }

    /// Next dependency still worth looking at; fences that already signaled
    /// successfully are dropped on the way.
    pub fn take_dependency(&mut self) -> Option<Fence> {
        while let Some(fence) = self.dependencies.pop_front() {
            if fence.status() != Some(Ok(())) {
                return Some(fence);
            }
        }
        None
    }

    pub fn pending_dependencies(&self) -> usize {
        self.dependencies.len()
    }

    /// First of the two fence contexts of the owning entity (0 until pushed).
    pub fn fence_context(&self) -> u64 {
        self.fence_context
    }

    /// The job's scheduled/finished pair, once it has been pushed.
    pub fn fences(&self) -> Option<&SchedFence> {
        self.fences.as_ref()
    }

    pub fn finished(&self) -> Option<&Fence> {
        self.fences.as_ref().map(|f| &f.finished)
    }

    /// Owning entity, if it still exists.
    pub fn entity(&self) -> Option<Entity> {
        self.entity.upgrade().map(Entity::from_shared)
    }

    pub(crate) fn attach(
        &mut self,
        entity: Weak<EntityShared>,
        scheduler: u64,
        fence_context: u64,
        seq: u64,
    ) -> Fence {
        let fences = SchedFence::new(scheduler, fence_context, seq, self.owner);
        let finished = fences.finished.clone();
        self.entity = entity;
        self.fence_context = fence_context;
        self.seq = seq;
        self.fences = Some(fences);
        finished
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("seq", &self.seq)
            .field("label", &self.label)
            .field("owner", &self.owner)
            .field("payload_len", &self.payload.len())
            .field("dependencies", &self.dependencies.len())
            .finish_non_exhaustive()
    }
}
