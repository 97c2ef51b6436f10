// src/device/context.rs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::errors::{Result, SchedError};
use crate::fence::Fence;
use crate::sched::{Entity, Job};
use crate::types::{EngineKind, FenceOwner, Priority};

/// What a context learns from [`SubmitContext::query_reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStatus {
    /// No engine of this context was reset since the last query.
    NoReset,
    /// An engine was reset because of another context's job.
    Innocent,
    /// An engine was reset and one of this context's jobs had hung it.
    Guilty,
}

/// The context's entity on one engine plus the finished fences of its most
/// recent submissions, keyed by sequence number.
#[derive(Debug)]
struct EngineSlot {
    entity: Entity,
    fences: Mutex<BTreeMap<u64, Fence>>,
}

impl EngineSlot {
    fn fences(&self) -> MutexGuard<'_, BTreeMap<u64, Fence>> {
        self.fences.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep `fence`, dropping those that fell out of the ring window.
    fn remember(&self, fence: &Fence) {
        let window = self.entity.capacity() as u64;
        let seq = fence.seqno();
        let mut fences = self.fences();
        fences.insert(seq, fence.clone());
        if seq > window {
            let oldest = seq - window;
            fences.retain(|kept, _| *kept > oldest);
        }
    }
}

/// A client's handle for submitting work to a device.
///
/// Every job submitted through it is tagged with the context's owner. Closing
/// (or dropping) the context destroys its entities, cancelling jobs that
/// have not reached the hardware yet.
#[derive(Debug)]
pub struct SubmitContext {
    owner: FenceOwner,
    priority: Priority,
    engines: BTreeMap<EngineKind, EngineSlot>,
    /// Reset count of the context's engines as of the last query.
    resets_seen: AtomicU64,
}

impl SubmitContext {
    pub(crate) fn new(
        owner: FenceOwner,
        priority: Priority,
        entities: BTreeMap<EngineKind, Entity>,
    ) -> Self {
        let engines: BTreeMap<EngineKind, EngineSlot> = entities
            .into_iter()
            .map(|(kind, entity)| {
                (
                    kind,
                    EngineSlot {
                        entity,
                        fences: Mutex::new(BTreeMap::new()),
                    },
                )
            })
            .collect();
        let resets = engines.values().map(|s| s.entity.scheduler_resets()).sum();

        Self {
            owner,
            priority,
            engines,
            resets_seen: AtomicU64::new(resets),
        }
    }

    pub fn owner(&self) -> FenceOwner {
        self.owner
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn entity(&self, engine: EngineKind) -> Result<&Entity> {
        self.slot(engine).map(|s| &s.entity)
    }

    /// Push `job` onto the entity of `engine`; fails if its queue is full.
    pub fn submit(&self, engine: EngineKind, mut job: Job) -> Result<Fence> {
        job.set_owner(self.owner);
        let slot = self.slot(engine)?;
        let fence = slot.entity.push(job)?;
        slot.remember(&fence);
        Ok(fence)
    }

    /// Like [`SubmitContext::submit`], waiting for queue space.
    pub async fn submit_wait(&self, engine: EngineKind, mut job: Job) -> Result<Fence> {
        job.set_owner(self.owner);
        let slot = self.slot(engine)?;
        let fence = slot.entity.push_wait(job).await?;
        slot.remember(&fence);
        Ok(fence)
    }

    /// Finished fence of submission `seq` on `engine`.
    ///
    /// Only the last `queue_depth` submissions are kept. `None` means `seq`
    /// has left that window and counts as signaled; a sequence number not
    /// handed out yet is an error.
    pub fn fence(&self, engine: EngineKind, seq: u64) -> Result<Option<Fence>> {
        let slot = self.slot(engine)?;
        let latest = slot.entity.last_seq();
        if seq > latest {
            return Err(SchedError::InvalidSequence {
                engine,
                seq,
                latest,
            });
        }
        Ok(slot.fences().get(&seq).cloned())
    }

    /// Engine resets seen by the schedulers this context submits to.
    pub fn reset_count(&self) -> u64 {
        self.engines
            .values()
            .map(|s| s.entity.scheduler_resets())
            .sum()
    }

    /// Whether a job of this context has ever hung an engine.
    pub fn is_guilty(&self) -> bool {
        self.engines.values().any(|s| s.entity.is_guilty())
    }

    /// Report whether any engine was reset since the previous query (or
    /// since the context was created).
    pub fn query_reset(&self) -> ResetStatus {
        let current = self.reset_count();
        let seen = self.resets_seen.swap(current, Ordering::AcqRel);
        if current == seen {
            return ResetStatus::NoReset;
        }

        let status = if self.is_guilty() {
            ResetStatus::Guilty
        } else {
            ResetStatus::Innocent
        };
        info!(owner = ?self.owner, resets = current - seen, ?status, "context saw engine reset");
        status
    }

    /// Destroy all entities. Returns the number of cancelled jobs.
    pub fn close(&self) -> usize {
        let cancelled = self.engines.values().map(|s| s.entity.destroy()).sum();
        debug!(owner = ?self.owner, cancelled, "submission context closed");
        cancelled
    }

    fn slot(&self, engine: EngineKind) -> Result<&EngineSlot> {
        self.engines
            .get(&engine)
            .ok_or(SchedError::EngineNotEnabled(engine))
    }
}

impl Drop for SubmitContext {
    fn drop(&mut self) {
        self.close();
    }
}
