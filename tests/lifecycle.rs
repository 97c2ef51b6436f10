// tests/lifecycle.rs

mod common;
use crate::common::{FakeBackend, TestResult, init_tracing, labeled, scheduler, settle, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use gpusched::errors::{FenceError, SchedError};
use gpusched::fence::FenceKind;
use gpusched::sched::SchedState;
use gpusched::types::Priority;

#[tokio::test]
async fn scheduled_fence_signals_before_finished() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 1, None);
    let entity = sched.create_entity(Priority::Normal, 8);

    let finished = entity.push(labeled("J"))?;
    let FenceKind::Finished { scheduled, scheduler: owner } = finished.kind().clone() else {
        panic!("push must return a finished fence");
    };
    assert_eq!(owner, sched.id());
    assert_eq!(finished.context(), scheduled.context() + 1);
    assert_eq!(finished.seqno(), scheduled.seqno());

    with_timeout(backend.wait_for_runs(1)).await;
    assert_eq!(scheduled.status(), Some(Ok(())));
    assert!(!finished.is_signaled());

    backend.complete_next();
    assert_eq!(with_timeout(finished.wait()).await, Ok(()));
    Ok(())
}

#[tokio::test]
async fn destroying_an_entity_cancels_queued_jobs_only() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 1, None);
    let entity = sched.create_entity(Priority::Normal, 8);

    let running = entity.push(labeled("J1"))?;
    let queued: Vec<_> = (2..=3)
        .map(|n| entity.push(labeled(&format!("J{n}"))))
        .collect::<Result<_, _>>()?;

    with_timeout(backend.wait_for_runs(1)).await;
    assert_eq!(entity.destroy(), 2);
    assert_eq!(entity.destroy(), 0);
    assert!(entity.is_stopped());
    assert_eq!(sched.run_queue_len(Priority::Normal), 0);

    for fence in queued {
        assert_eq!(fence.status(), Some(Err(FenceError::Cancelled)));
    }

    let rejected = entity.push(labeled("late")).unwrap_err();
    assert!(matches!(rejected.error, SchedError::EntityStopped(_)));

    // Work already on the hardware still completes normally.
    backend.complete_next();
    assert_eq!(with_timeout(running.wait()).await, Ok(()));
    assert_eq!(backend.run_labels(), vec!["J1"]);
    assert_eq!(backend.released().len(), 3);
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_queued_work_and_drains_the_hardware() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 1, None);
    let entity = sched.create_entity(Priority::High, 8);

    let running = entity.push(labeled("J1"))?;
    let queued = entity.push(labeled("J2"))?;
    with_timeout(backend.wait_for_runs(1)).await;

    let shutdown = {
        let sched = sched.clone();
        tokio::spawn(async move { sched.shutdown().await })
    };

    assert_eq!(with_timeout(queued.wait()).await, Err(FenceError::Cancelled));
    assert!(sched.is_draining());

    let rejected = entity.push(labeled("late")).unwrap_err();
    assert!(matches!(rejected.error, SchedError::Draining(_)));

    settle().await;
    assert!(!shutdown.is_finished());

    backend.complete_next();
    with_timeout(shutdown).await?;
    assert_eq!(with_timeout(running.wait()).await, Ok(()));
    assert_eq!(sched.state(), SchedState::Stopped);
    assert_eq!(sched.in_flight(), 0);

    // A second shutdown is a no-op.
    with_timeout(sched.shutdown()).await;
    Ok(())
}

#[tokio::test]
async fn idle_scheduler_shuts_down_immediately() -> TestResult {
    init_tracing();

    let backend = FakeBackend::auto_complete();
    let sched = scheduler(&backend, 2, None);
    let entity = sched.create_entity(Priority::Normal, 8);
    with_timeout(entity.push(labeled("J"))?.wait()).await?;

    with_timeout(sched.shutdown()).await;
    assert_eq!(sched.state(), SchedState::Stopped);
    Ok(())
}

#[tokio::test]
async fn dropping_every_handle_stops_the_dispatch_loop() -> TestResult {
    init_tracing();

    let backend = FakeBackend::auto_complete();
    {
        let sched = scheduler(&backend, 2, None);
        let entity = sched.create_entity(Priority::Normal, 8);
        with_timeout(entity.push(labeled("J"))?.wait()).await?;
        assert!(Arc::strong_count(&backend) > 1);
    }

    // The loop exits on its own and drops the scheduler's backend handle.
    with_timeout(async {
        while Arc::strong_count(&backend) > 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(backend.released().len(), 1);
    Ok(())
}

#[tokio::test]
async fn entity_keeps_the_scheduler_running_after_its_handle_is_dropped() -> TestResult {
    init_tracing();

    let backend = FakeBackend::auto_complete();
    let entity = {
        let sched = scheduler(&backend, 2, None);
        sched.create_entity(Priority::Normal, 8)
    };

    settle().await;
    assert_eq!(with_timeout(entity.push(labeled("J"))?.wait()).await, Ok(()));
    assert_eq!(backend.run_labels(), vec!["J"]);

    drop(entity);
    with_timeout(async {
        while Arc::strong_count(&backend) > 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    Ok(())
}
