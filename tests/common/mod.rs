#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

pub use gpusched_test_utils::builders::ConfigFileBuilder;
pub use gpusched_test_utils::fake_backend::{BackendEvent, FakeBackend};
pub use gpusched_test_utils::{init_tracing, with_timeout};

use gpusched::fence::Fence;
use gpusched::sched::{Job, Scheduler, SchedulerConfig};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A scheduler named "test" on top of `backend`.
pub fn scheduler(
    backend: &Arc<FakeBackend>,
    hw_submission_limit: usize,
    timeout: Option<Duration>,
) -> Scheduler {
    Scheduler::new(
        "test",
        SchedulerConfig {
            hw_submission_limit,
            timeout,
        },
        backend.as_backend(),
    )
}

pub fn labeled(label: &str) -> Job {
    Job::alloc(0).with_label(label)
}

/// A fence nobody but the test will signal.
pub fn external_fence() -> Fence {
    Fence::new(0, 0, gpusched::types::FenceOwner::Kernel)
}

/// Give the dispatch loop a chance to act on whatever was just pushed.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
