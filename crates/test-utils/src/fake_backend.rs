use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use gpusched::errors::{FenceError, FenceResult};
use gpusched::fence::{Fence, FenceTimeline};
use gpusched::sched::{Backend, Job, JobId, Recovery};
use gpusched::types::FenceOwner;

/// Everything the scheduler asked of the backend, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Dependency(JobId),
    Run(JobId),
    TimedOut(JobId),
    Release(JobId),
}

#[derive(Default)]
struct FakeState {
    events: Vec<BackendEvent>,
    labels: HashMap<JobId, String>,
    /// Hardware fences not completed yet, in submission order.
    running: Vec<(JobId, Fence)>,
    /// Jobs handed to `run` and not released yet.
    on_hw: HashSet<JobId>,
    max_on_hw: usize,
    fail_dependency: HashSet<JobId>,
    fail_run: HashSet<JobId>,
}

/// A fake backend that:
/// - records every callback the scheduler makes
/// - hands out hardware fences the test completes by hand (or immediately
///   with `auto_complete`)
/// - lets tests inject dependency / run failures and choose the outcome of
///   recovery.
pub struct FakeBackend {
    state: Mutex<FakeState>,
    changed: Notify,
    timeline: FenceTimeline,
    auto_complete: bool,
    recovery: Mutex<Recovery>,
}

impl FakeBackend {
    /// Hardware fences stay pending until `complete*` is called.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    /// Hardware fences are signaled as soon as a job is run.
    pub fn auto_complete() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    fn build(auto_complete: bool) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            changed: Notify::new(),
            timeline: FenceTimeline::new(FenceOwner::Kernel),
            auto_complete,
            recovery: Mutex::new(Recovery::Recovered),
        }
    }

    pub fn as_backend(self: &Arc<Self>) -> Arc<dyn Backend> {
        Arc::clone(self) as Arc<dyn Backend>
    }

    pub fn fail_dependency_of(&self, job: JobId) {
        self.state.lock().unwrap().fail_dependency.insert(job);
    }

    pub fn fail_run_of(&self, job: JobId) {
        self.state.lock().unwrap().fail_run.insert(job);
    }

    pub fn set_recovery(&self, recovery: Recovery) {
        *self.recovery.lock().unwrap() = recovery;
    }

    pub fn events(&self) -> Vec<BackendEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Job ids in the order they were handed to `run` (replays included).
    pub fn runs(&self) -> Vec<JobId> {
        self.filter_events(|e| match e {
            BackendEvent::Run(id) => Some(*id),
            _ => None,
        })
    }

    /// Labels of run jobs, in run order; unlabeled jobs are skipped.
    pub fn run_labels(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::Run(id) => state.labels.get(id).cloned(),
                _ => None,
            })
            .collect()
    }

    pub fn timeouts(&self) -> Vec<JobId> {
        self.filter_events(|e| match e {
            BackendEvent::TimedOut(id) => Some(*id),
            _ => None,
        })
    }

    pub fn released(&self) -> Vec<JobId> {
        self.filter_events(|e| match e {
            BackendEvent::Release(id) => Some(*id),
            _ => None,
        })
    }

    /// Highest number of jobs that were on the hardware at the same time.
    pub fn max_on_hw(&self) -> usize {
        self.state.lock().unwrap().max_on_hw
    }

    pub fn on_hw(&self) -> usize {
        self.state.lock().unwrap().on_hw.len()
    }

    /// Job ids whose hardware fence is still pending, oldest first.
    pub fn running(&self) -> Vec<JobId> {
        self.state
            .lock()
            .unwrap()
            .running
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// Signal the hardware fence of `job`. Returns `false` if it is not
    /// running.
    pub fn complete(&self, job: JobId) -> bool {
        self.complete_with(job, Ok(()))
    }

    pub fn complete_with(&self, job: JobId, result: FenceResult) -> bool {
        let fence = {
            let mut state = self.state.lock().unwrap();
            let Some(pos) = state.running.iter().position(|(id, _)| *id == job) else {
                return false;
            };
            state.running.remove(pos).1
        };
        fence.signal_with(result)
    }

    /// Complete the oldest running job and return its id.
    pub fn complete_next(&self) -> Option<JobId> {
        let (id, fence) = {
            let mut state = self.state.lock().unwrap();
            if state.running.is_empty() {
                return None;
            }
            state.running.remove(0)
        };
        fence.signal();
        Some(id)
    }

    /// Wait until `run` has been called at least `n` times in total.
    pub async fn wait_for_runs(&self, n: usize) {
        self.wait_until(|| self.runs().len() >= n).await
    }

    /// Wait until `release` has been called at least `n` times in total.
    pub async fn wait_for_releases(&self, n: usize) {
        self.wait_until(|| self.released().len() >= n).await
    }

    async fn wait_until<F>(&self, cond: F)
    where
        F: Fn() -> bool,
    {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if cond() {
                return;
            }
            changed.await;
        }
    }

    fn filter_events<F>(&self, f: F) -> Vec<JobId>
    where
        F: Fn(&BackendEvent) -> Option<JobId>,
    {
        self.state.lock().unwrap().events.iter().filter_map(f).collect()
    }

    fn record(&self, event: BackendEvent) {
        self.state.lock().unwrap().events.push(event);
        self.changed.notify_waiters();
    }
}

impl Backend for FakeBackend {
    fn dependency(&self, job: &mut Job) -> Result<Option<Fence>, FenceError> {
        self.record(BackendEvent::Dependency(job.id()));
        if self.state.lock().unwrap().fail_dependency.contains(&job.id()) {
            return Err(FenceError::Dependency("injected dependency failure".into()));
        }
        Ok(job.take_dependency())
    }

    fn run(&self, job: &mut Job) -> Result<Fence, FenceError> {
        let id = job.id();
        let fence = self.timeline.next_fence();
        {
            let mut state = self.state.lock().unwrap();
            state.events.push(BackendEvent::Run(id));
            if let Some(label) = job.label() {
                state.labels.insert(id, label.to_string());
            }
            if state.fail_run.contains(&id) {
                drop(state);
                self.changed.notify_waiters();
                return Err(FenceError::Hardware("injected run failure".into()));
            }
            state.on_hw.insert(id);
            state.max_on_hw = state.max_on_hw.max(state.on_hw.len());
            if !self.auto_complete {
                state.running.push((id, fence.clone()));
            }
        }
        self.changed.notify_waiters();

        if self.auto_complete {
            fence.signal();
        }
        Ok(fence)
    }

    fn timed_out(&self, job: &Job) -> Recovery {
        {
            let mut state = self.state.lock().unwrap();
            state.events.push(BackendEvent::TimedOut(job.id()));
            // The reset wipes the ring; whatever survives gets run again.
            state.running.clear();
        }
        self.changed.notify_waiters();
        *self.recovery.lock().unwrap()
    }

    fn release(&self, job: Job) {
        {
            let mut state = self.state.lock().unwrap();
            state.events.push(BackendEvent::Release(job.id()));
            state.on_hw.remove(&job.id());
        }
        self.changed.notify_waiters();
    }
}
