// tests/backpressure.rs

mod common;
use crate::common::{FakeBackend, TestResult, init_tracing, labeled, scheduler, settle, with_timeout};

use gpusched::errors::SchedError;
use gpusched::types::Priority;

#[tokio::test]
async fn full_entity_rejects_and_returns_the_job() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 1, None);
    let entity = sched.create_entity(Priority::Normal, 2);

    let first = entity.push(labeled("J1"))?;
    let _second = entity.push(labeled("J2"))?;

    let third = labeled("J3");
    let third_id = third.id();
    let rejected = entity.push(third).unwrap_err();
    assert!(matches!(
        rejected.error,
        SchedError::QueueFull { capacity: 2, .. }
    ));
    assert!(rejected.error.is_backpressure());
    assert_eq!(rejected.job.id(), third_id);

    // Finishing one job frees one slot.
    with_timeout(backend.wait_for_runs(1)).await;
    backend.complete_next();
    assert_eq!(with_timeout(first.wait()).await, Ok(()));
    assert_eq!(entity.outstanding(), 1);

    let third = entity.push(rejected.job)?;
    assert!(!third.is_signaled());
    assert_eq!(entity.outstanding(), 2);
    Ok(())
}

#[tokio::test]
async fn push_wait_blocks_until_space_frees_up() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 1, None);
    let entity = sched.create_entity(Priority::Normal, 1);

    let first = entity.push(labeled("J1"))?;

    let waiter = {
        let entity = entity.clone();
        tokio::spawn(async move { entity.push_wait(labeled("J2")).await })
    };

    settle().await;
    assert!(!waiter.is_finished());

    with_timeout(backend.wait_for_runs(1)).await;
    backend.complete_next();
    assert_eq!(with_timeout(first.wait()).await, Ok(()));

    let second = with_timeout(waiter).await??;
    with_timeout(backend.wait_for_runs(2)).await;
    backend.complete_next();
    assert_eq!(with_timeout(second.wait()).await, Ok(()));
    Ok(())
}

#[tokio::test]
async fn push_wait_gives_up_when_the_entity_is_destroyed() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 1, None);
    let entity = sched.create_entity(Priority::Normal, 1);
    let _first = entity.push(labeled("J1"))?;

    let waiter = {
        let entity = entity.clone();
        tokio::spawn(async move { entity.push_wait(labeled("J2")).await })
    };
    settle().await;

    entity.destroy();
    let result = with_timeout(waiter).await?;
    assert!(matches!(result, Err(SchedError::EntityStopped(_))));
    Ok(())
}
