// tests/fifo_property.rs

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;
use gpusched::sched::{Job, Scheduler, SchedulerConfig};
use gpusched::types::Priority;
use gpusched_test_utils::fake_backend::FakeBackend;

// Each element names the entity (0..3) the next job is pushed onto; labels
// carry the per-entity push index so run order can be checked per entity.
fn push_plan() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1usize..=3, proptest::collection::vec(0usize..3, 1..40))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn per_entity_order_survives_interleaving((limit, plan) in push_plan()) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let labels = rt.block_on(async move {
            let backend = FakeBackend::auto_complete();
            let sched = Scheduler::new(
                "prop",
                SchedulerConfig { hw_submission_limit: limit, timeout: None },
                backend.as_backend(),
            );
            let entities: Vec<_> = (0..3)
                .map(|_| sched.create_entity(Priority::Normal, 64))
                .collect();

            let mut pushed: BTreeMap<usize, usize> = BTreeMap::new();
            let mut fences = Vec::new();
            for e in plan {
                let n = pushed.entry(e).or_insert(0);
                let job = Job::alloc(0).with_label(format!("{e}:{n}"));
                *n += 1;
                fences.push(entities[e].push(job).unwrap());
            }
            for fence in fences {
                tokio::time::timeout(Duration::from_secs(5), fence.wait())
                    .await
                    .unwrap()
                    .unwrap();
            }
            backend.run_labels()
        });

        let mut next: BTreeMap<usize, usize> = BTreeMap::new();
        for label in labels {
            let (e, n) = label.split_once(':').unwrap();
            let e: usize = e.parse().unwrap();
            let n: usize = n.parse().unwrap();
            let expected = next.entry(e).or_insert(0);
            prop_assert_eq!(n, *expected);
            *expected += 1;
        }
    }
}
