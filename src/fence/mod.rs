// src/fence/mod.rs

//! One-shot, multi-waiter completion signals.
//!
//! A [`Fence`] is either pending or signaled with a [`FenceResult`]. It is a
//! cheap handle around shared state: every clone refers to the same fence, and
//! the state is freed when the last clone drops.
//!
//! - [`sched_fence`] pairs a *scheduled* and a *finished* fence per job.
//! - [`FenceTimeline`] hands out fences on one context with increasing
//!   sequence numbers (used by hardware backends).

pub mod sched_fence;

pub use sched_fence::SchedFence;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::errors::{FenceError, FenceResult};
use crate::types::FenceOwner;

type Callback = Box<dyn FnOnce(&FenceResult) + Send>;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Process-wide allocator of fence context ids.
pub struct FenceContext;

impl FenceContext {
    /// Reserve `count` consecutive context ids and return the first.
    pub fn alloc(count: u64) -> u64 {
        NEXT_CONTEXT.fetch_add(count.max(1), Ordering::Relaxed)
    }
}

/// What produced a fence.
#[derive(Debug, Clone)]
pub enum FenceKind {
    /// Backend or test fence with no scheduler semantics.
    Plain,
    /// Signaled when the job was handed to the hardware.
    Scheduled { scheduler: u64 },
    /// Signaled when the job completed. Keeps its scheduled fence alive.
    Finished { scheduler: u64, scheduled: Fence },
}

enum FenceState {
    Pending {
        callbacks: Vec<Callback>,
        /// Async waiters; dropped ones are pruned whenever a new one arrives.
        waiters: Vec<oneshot::Sender<FenceResult>>,
    },
    Signaled(FenceResult),
}

struct FenceInner {
    context: u64,
    seqno: u64,
    owner: FenceOwner,
    kind: FenceKind,
    state: Mutex<FenceState>,
}

#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    pub fn new(context: u64, seqno: u64, owner: FenceOwner) -> Self {
        Self::with_kind(context, seqno, owner, FenceKind::Plain)
    }

    pub(crate) fn with_kind(context: u64, seqno: u64, owner: FenceOwner, kind: FenceKind) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                context,
                seqno,
                owner,
                kind,
                state: Mutex::new(FenceState::Pending {
                    callbacks: Vec::new(),
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// A fence that is already signaled with `result`.
    pub fn signaled(result: FenceResult) -> Self {
        let fence = Self::new(0, 0, FenceOwner::Kernel);
        fence.signal_with(result);
        fence
    }

    pub fn context(&self) -> u64 {
        self.inner.context
    }

    pub fn seqno(&self) -> u64 {
        self.inner.seqno
    }

    pub fn owner(&self) -> FenceOwner {
        self.inner.owner
    }

    pub fn kind(&self) -> &FenceKind {
        &self.inner.kind
    }

    /// Whether both handles refer to the same fence.
    pub fn ptr_eq(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_signaled(&self) -> bool {
        matches!(*self.lock(), FenceState::Signaled(_))
    }

    /// Result of the fence, or `None` while still pending.
    pub fn status(&self) -> Option<FenceResult> {
        match &*self.lock() {
            FenceState::Pending { .. } => None,
            FenceState::Signaled(result) => Some(result.clone()),
        }
    }

    pub fn signal(&self) -> bool {
        self.signal_with(Ok(()))
    }

    pub fn signal_error(&self, error: FenceError) -> bool {
        self.signal_with(Err(error))
    }

    /// Transition pending -> signaled and run every registered callback.
    ///
    /// Returns `false` (and does nothing) if the fence was already signaled.
    pub fn signal_with(&self, result: FenceResult) -> bool {
        let (callbacks, waiters) = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, FenceState::Signaled(result.clone())) {
                FenceState::Signaled(previous) => {
                    *state = FenceState::Signaled(previous);
                    return false;
                }
                FenceState::Pending { callbacks, waiters } => (callbacks, waiters),
            }
        };

        // Callbacks run without the state lock so they may touch the fence.
        for callback in callbacks {
            callback(&result);
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        true
    }

    /// Run `callback` once the fence signals; immediately if it already has.
    pub fn on_signal<F>(&self, callback: F)
    where
        F: FnOnce(&FenceResult) + Send + 'static,
    {
        let result = {
            let mut state = self.lock();
            match &mut *state {
                FenceState::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                FenceState::Signaled(result) => result.clone(),
            }
        };
        callback(&result);
    }

    /// Wait until the fence signals and return its result.
    ///
    /// Cancel-safe: a dropped wait leaves a closed sender behind, which the
    /// next wait on the same fence prunes.
    pub async fn wait(&self) -> FenceResult {
        let rx = {
            let mut state = self.lock();
            match &mut *state {
                FenceState::Signaled(result) => return result.clone(),
                FenceState::Pending { waiters, .. } => {
                    waiters.retain(|tx| !tx.is_closed());
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };
        // The sender lives in our own waiter list; it only disappears if the
        // fence is torn down while pending, which `&self` rules out.
        rx.await.unwrap_or(Err(FenceError::Cancelled))
    }

    /// Async waiters currently registered, abandoned ones included.
    pub fn waiter_count(&self) -> usize {
        match &*self.lock() {
            FenceState::Pending { waiters, .. } => waiters.len(),
            FenceState::Signaled(_) => 0,
        }
    }

    /// Like [`Fence::wait`], giving up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<FenceResult> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    fn lock(&self) -> MutexGuard<'_, FenceState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner.kind {
            FenceKind::Plain => "plain",
            FenceKind::Scheduled { .. } => "scheduled",
            FenceKind::Finished { .. } => "finished",
        };
        f.debug_struct("Fence")
            .field("context", &self.inner.context)
            .field("seqno", &self.inner.seqno)
            .field("kind", &kind)
            .field("status", &self.status())
            .finish()
    }
}

/// Hands out fences on a single context with strictly increasing seqnos.
#[derive(Debug)]
pub struct FenceTimeline {
    context: u64,
    owner: FenceOwner,
    next_seqno: AtomicU64,
}

impl FenceTimeline {
    pub fn new(owner: FenceOwner) -> Self {
        Self {
            context: FenceContext::alloc(1),
            owner,
            next_seqno: AtomicU64::new(1),
        }
    }

    pub fn context(&self) -> u64 {
        self.context
    }

    pub fn next_fence(&self) -> Fence {
        let seqno = self.next_seqno.fetch_add(1, Ordering::Relaxed);
        Fence::new(self.context, seqno, self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn second_signal_is_a_no_op() {
        let fence = Fence::new(1, 1, FenceOwner::Kernel);
        assert!(fence.signal());
        assert!(!fence.signal_error(FenceError::TimedOut));
        assert_eq!(fence.status(), Some(Ok(())));
    }

    #[test]
    fn callbacks_run_once_each() {
        let fence = Fence::new(1, 1, FenceOwner::Kernel);
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            fence.on_signal(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        fence.signal();
        fence.signal();
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        // Late registration completes immediately.
        let late = Arc::clone(&hits);
        fence.on_signal(move |_| {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn callback_may_inspect_its_own_fence() {
        let fence = Fence::new(1, 1, FenceOwner::Kernel);
        let seen = Arc::new(Mutex::new(None));
        let (probe, out) = (fence.clone(), Arc::clone(&seen));
        fence.on_signal(move |_| {
            *out.lock().unwrap() = Some(probe.is_signaled());
        });
        fence.signal();
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn timeline_seqnos_increase() {
        let timeline = FenceTimeline::new(FenceOwner::Kernel);
        let a = timeline.next_fence();
        let b = timeline.next_fence();
        assert_eq!(a.context(), b.context());
        assert!(b.seqno() > a.seqno());
    }

    #[tokio::test]
    async fn abandoned_waits_do_not_pile_up() {
        let fence = Fence::new(1, 1, FenceOwner::Kernel);
        for _ in 0..50 {
            assert_eq!(fence.wait_timeout(Duration::from_millis(1)).await, None);
        }
        assert!(fence.waiter_count() <= 1, "waiters: {}", fence.waiter_count());

        fence.signal();
        assert_eq!(fence.waiter_count(), 0);
        assert_eq!(fence.wait_timeout(Duration::from_millis(1)).await, Some(Ok(())));
    }

    #[tokio::test]
    async fn wait_returns_error_result() {
        let fence = Fence::new(1, 1, FenceOwner::Kernel);
        let waiter = {
            let fence = fence.clone();
            tokio::spawn(async move { fence.wait().await })
        };
        fence.signal_error(FenceError::Cancelled);
        assert_eq!(waiter.await.unwrap(), Err(FenceError::Cancelled));
        assert_eq!(fence.wait().await, Err(FenceError::Cancelled));
    }
}
