// src/fence/sched_fence.rs

//! The scheduled/finished fence pair attached to every job.

use crate::errors::{FenceError, FenceResult};
use crate::fence::{Fence, FenceKind};
use crate::types::FenceOwner;

/// Two-stage completion token of one job.
///
/// `scheduled` signals when the job is handed to the hardware, `finished`
/// when the hardware is done with it. Both share the job's sequence number;
/// they live on the two consecutive fence contexts reserved by the entity.
#[derive(Debug, Clone)]
pub struct SchedFence {
    pub scheduled: Fence,
    pub finished: Fence,
}

impl SchedFence {
    /// `context` is the first of the entity's two fence contexts.
    pub fn new(scheduler: u64, context: u64, seqno: u64, owner: FenceOwner) -> Self {
        let scheduled =
            Fence::with_kind(context, seqno, owner, FenceKind::Scheduled { scheduler });
        let finished = Fence::with_kind(
            context + 1,
            seqno,
            owner,
            FenceKind::Finished {
                scheduler,
                scheduled: scheduled.clone(),
            },
        );
        Self {
            scheduled,
            finished,
        }
    }

    pub fn signal_scheduled(&self) -> bool {
        self.scheduled.signal()
    }

    /// Complete the job. A job that never reached the hardware gets its
    /// scheduled fence signaled with the same result first, so nobody waiting
    /// on either half is left hanging.
    pub fn signal_finished(&self, result: FenceResult) -> bool {
        if !self.scheduled.is_signaled() {
            self.scheduled.signal_with(result.clone());
        }
        self.finished.signal_with(result)
    }

    pub fn fail(&self, error: FenceError) -> bool {
        self.signal_finished(Err(error))
    }
}

/// If `fence` is the finished fence of a job on `scheduler`, return that
/// job's scheduled fence instead.
///
/// Jobs on one engine execute in submission order, so waiting for the
/// upstream job to be *scheduled* is enough.
pub fn same_scheduler_shortcut(fence: &Fence, scheduler: u64) -> Option<Fence> {
    match fence.kind() {
        FenceKind::Finished {
            scheduler: owner,
            scheduled,
        } if *owner == scheduler => Some(scheduled.clone()),
        _ => None,
    }
}
