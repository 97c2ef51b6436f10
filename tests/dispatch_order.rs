// tests/dispatch_order.rs

mod common;
use crate::common::{FakeBackend, TestResult, init_tracing, labeled, scheduler, settle, with_timeout};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gpusched::fence::Fence;
use gpusched::sched::SchedState;
use gpusched::types::Priority;

/// Complete hardware jobs one at a time, waiting for each dispatch, and
/// return once `total` jobs have run.
async fn step_through(backend: &FakeBackend, total: usize) {
    for n in 1..=total {
        backend.wait_for_runs(n).await;
        backend.complete_next();
    }
}

#[tokio::test]
async fn jobs_of_one_entity_run_in_push_order() -> TestResult {
    init_tracing();

    let backend = FakeBackend::auto_complete();
    let sched = scheduler(&backend, 2, None);
    let entity = sched.create_entity(Priority::Normal, 32);

    let mut last = None;
    for n in 0..10 {
        last = Some(entity.push(labeled(&format!("J{n}")))?);
    }
    if let Some(last) = last {
        with_timeout(last.wait()).await?;
    }

    let expected: Vec<String> = (0..10).map(|n| format!("J{n}")).collect();
    assert_eq!(backend.run_labels(), expected);
    Ok(())
}

#[tokio::test]
async fn equal_priority_entities_alternate() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 1, None);
    let a = sched.create_entity(Priority::Normal, 8);
    let b = sched.create_entity(Priority::Normal, 8);

    let mut fences = Vec::new();
    for n in 1..=3 {
        fences.push(a.push(labeled(&format!("A{n}")))?);
    }
    for n in 1..=3 {
        fences.push(b.push(labeled(&format!("B{n}")))?);
    }

    with_timeout(step_through(&backend, 6)).await;
    for fence in fences {
        assert_eq!(with_timeout(fence.wait()).await, Ok(()));
    }

    assert_eq!(
        backend.run_labels(),
        vec!["A1", "B1", "A2", "B2", "A3", "B3"]
    );
    Ok(())
}

#[tokio::test]
async fn higher_priority_ready_work_goes_first() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 1, None);
    let low = sched.create_entity(Priority::Normal, 8);
    let high = sched.create_entity(Priority::High, 8);
    let kernel = sched.create_entity(Priority::Kernel, 8);

    // Occupy the single hardware slot so everything else queues up.
    let blocker = low.push(labeled("L0"))?;
    with_timeout(backend.wait_for_runs(1)).await;

    let mut fences = vec![blocker];
    fences.push(low.push(labeled("L1"))?);
    fences.push(high.push(labeled("H1"))?);
    fences.push(low.push(labeled("L2"))?);
    fences.push(kernel.push(labeled("K1"))?);
    fences.push(high.push(labeled("H2"))?);

    with_timeout(step_through(&backend, 6)).await;
    for fence in fences {
        assert_eq!(with_timeout(fence.wait()).await, Ok(()));
    }

    assert_eq!(
        backend.run_labels(),
        vec!["L0", "K1", "H1", "H2", "L1", "L2"]
    );
    Ok(())
}

#[tokio::test]
async fn limit_of_one_serialises_hardware_access() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 1, None);
    let a = sched.create_entity(Priority::Normal, 8);
    let b = sched.create_entity(Priority::Normal, 8);

    let (first, second) = tokio::join!(
        async { a.push(labeled("A")) },
        async { b.push(labeled("B")) }
    );
    let (first, second) = (first?, second?);

    with_timeout(backend.wait_for_runs(1)).await;
    settle().await;
    assert_eq!(backend.runs().len(), 1);
    assert_eq!(sched.in_flight(), 1);
    assert_eq!(sched.state(), SchedState::Throttled);

    let (done, waiting) = if backend.run_labels() == ["A"] {
        (first, second)
    } else {
        (second, first)
    };
    assert!(!waiting.is_signaled());

    backend.complete_next();
    assert_eq!(with_timeout(done.wait()).await, Ok(()));

    with_timeout(backend.wait_for_runs(2)).await;
    backend.complete_next();
    assert_eq!(with_timeout(waiting.wait()).await, Ok(()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_never_exceeds_the_ceiling() -> TestResult {
    init_tracing();

    let backend = FakeBackend::new();
    let sched = scheduler(&backend, 3, None);

    let done = Arc::new(AtomicBool::new(false));
    let completer = {
        let backend = Arc::clone(&backend);
        let sched = sched.clone();
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut max_seen = 0;
            while !done.load(Ordering::SeqCst) {
                max_seen = max_seen.max(sched.in_flight());
                if backend.complete_next().is_none() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            max_seen
        })
    };

    let mut producers = Vec::new();
    for e in 0..4 {
        let entity = sched.create_entity(Priority::Normal, 4);
        producers.push(tokio::spawn(async move {
            let mut fences: Vec<Fence> = Vec::new();
            for n in 0..10 {
                fences.push(entity.push_wait(labeled(&format!("E{e}-{n}"))).await?);
            }
            Ok::<_, gpusched::errors::SchedError>(fences)
        }));
    }

    for producer in producers {
        for fence in with_timeout(producer).await?? {
            assert_eq!(with_timeout(fence.wait()).await, Ok(()));
        }
    }
    done.store(true, Ordering::SeqCst);
    let max_seen = completer.await?;

    assert_eq!(backend.runs().len(), 40);
    assert!(backend.max_on_hw() <= 3, "max on hw: {}", backend.max_on_hw());
    assert!(max_seen <= 3, "max in flight: {max_seen}");
    Ok(())
}
