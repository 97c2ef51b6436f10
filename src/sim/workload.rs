// src/sim/workload.rs

use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::device::{Device, SubmitContext};
use crate::errors::Result;
use crate::fence::Fence;
use crate::sched::Job;
use crate::types::{EngineKind, FenceOwner, Priority};

/// Shape of the synthetic load the CLI pushes through a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    /// Number of concurrent submitters, one context each.
    pub contexts: usize,
    /// Jobs submitted by every context.
    pub jobs_per_context: usize,
    pub payload_size: usize,
    /// Make every Nth job of a context depend on its predecessor (`0` = never).
    pub chain_every: usize,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            contexts: 4,
            jobs_per_context: 32,
            payload_size: 256,
            chain_every: 4,
        }
    }
}

/// Outcome of [`run_workload`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs the device refused (engine draining or context closed).
    pub rejected: usize,
    pub elapsed: Duration,
}

impl WorkloadReport {
    fn merge(&mut self, other: &WorkloadReport) {
        self.submitted += other.submitted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.rejected += other.rejected;
    }
}

/// Priority of the `index`-th submitter; most are normal, some high, some min.
fn context_priority(index: usize) -> Priority {
    match index % 4 {
        1 => Priority::High,
        3 => Priority::Min,
        _ => Priority::Normal,
    }
}

/// Drive `workload` through `device` and wait for every job to finish.
///
/// Each context runs as its own task, spreading its jobs across the enabled
/// engines round robin and waiting for queue space when an entity is full.
pub async fn run_workload(device: &Device, workload: Workload) -> Result<WorkloadReport> {
    let engines: Vec<EngineKind> = device.engines().collect();
    let started = Instant::now();

    info!(
        contexts = workload.contexts,
        jobs_per_context = workload.jobs_per_context,
        engines = engines.len(),
        "starting workload"
    );

    let mut producers = JoinSet::new();
    for index in 0..workload.contexts {
        let ctx = device.create_context(FenceOwner::Client(index as u64), context_priority(index));
        producers.spawn(produce(ctx, engines.clone(), workload));
    }

    let mut report = WorkloadReport::default();
    while let Some(joined) = producers.join_next().await {
        let partial = joined.map_err(anyhow::Error::from)?;
        report.merge(&partial);
    }
    report.elapsed = started.elapsed();

    info!(
        submitted = report.submitted,
        succeeded = report.succeeded,
        failed = report.failed,
        rejected = report.rejected,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "workload finished"
    );
    Ok(report)
}

async fn produce(ctx: SubmitContext, engines: Vec<EngineKind>, workload: Workload) -> WorkloadReport {
    let mut report = WorkloadReport::default();
    if engines.is_empty() {
        return report;
    }

    let mut fences: Vec<Fence> = Vec::with_capacity(workload.jobs_per_context);
    for n in 0..workload.jobs_per_context {
        let engine = engines[n % engines.len()];
        let mut job = Job::alloc(workload.payload_size).with_label(format!("{:?}#{n}", ctx.owner()));
        if workload.chain_every > 0 && n > 0 && n % workload.chain_every == 0 {
            if let Some(previous) = fences.last() {
                job.add_dependency(previous.clone());
            }
        }

        match ctx.submit_wait(engine, job).await {
            Ok(fence) => {
                report.submitted += 1;
                fences.push(fence);
            }
            Err(error) => {
                warn!(owner = ?ctx.owner(), %engine, %error, "submission refused; stopping producer");
                report.rejected = workload.jobs_per_context - n;
                break;
            }
        }
    }

    for fence in fences {
        match fence.wait().await {
            Ok(()) => report.succeeded += 1,
            Err(error) => {
                debug!(owner = ?ctx.owner(), seqno = fence.seqno(), %error, "job failed");
                report.failed += 1;
            }
        }
    }
    report
}
