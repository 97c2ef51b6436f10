// src/lib.rs

pub mod cli;
pub mod config;
pub mod device;
pub mod errors;
pub mod fence;
pub mod logging;
pub mod sched;
pub mod sim;
pub mod types;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_or_default, validate_config};
use crate::device::Device;
use crate::sched::Backend;
use crate::sim::{SimRing, Workload, WorkloadReport, run_workload};
use crate::types::EngineKind;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - one simulated ring and scheduler per enabled engine
/// - the synthetic workload
/// - Ctrl-C handling and a draining shutdown
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_or_default(args.config.as_deref().map(Path::new))?;
    cfg.override_tunables(args.hw_submission_limit, args.timeout_ms);
    validate_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let mut rings: BTreeMap<EngineKind, Arc<SimRing>> = BTreeMap::new();
    let device = Device::new("sim0", &cfg, |engine| {
        let ring = Arc::new(SimRing::from_config(engine, &cfg.simulation));
        rings.insert(engine, Arc::clone(&ring));
        ring as Arc<dyn Backend>
    });

    let workload = Workload {
        contexts: args.contexts,
        jobs_per_context: args.jobs,
        ..Workload::default()
    };

    let report = tokio::select! {
        report = run_workload(&device, workload) => Some(report),
        interrupted = tokio::signal::ctrl_c() => {
            if let Err(e) = interrupted {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
            info!("interrupted; draining device");
            None
        }
    };

    device.shutdown().await;

    if let Some(report) = report {
        print_summary(&report?, &rings);
    }
    Ok(())
}

/// Simple dry-run output: print the resolved per-engine tunables.
fn print_dry_run(cfg: &ConfigFile) {
    println!("gpusched dry-run");
    println!(
        "  simulation.job_duration_ms = {}",
        cfg.simulation.job_duration_ms
    );
    println!("  simulation.hang_every = {}", cfg.simulation.hang_every);
    println!();

    println!("engines ({}):", cfg.engine.len());
    for engine in cfg.engines() {
        let sched = cfg.scheduler_config(engine);
        println!("  - {engine}");
        println!("      hw_submission_limit: {}", sched.hw_submission_limit);
        match sched.timeout {
            Some(timeout) => println!("      timeout_ms: {}", timeout.as_millis()),
            None => println!("      timeout_ms: disabled"),
        }
        println!("      queue_depth: {}", cfg.queue_depth(engine));
    }

    debug!("dry-run complete (nothing submitted)");
}

fn print_summary(report: &WorkloadReport, rings: &BTreeMap<EngineKind, Arc<SimRing>>) {
    println!(
        "jobs: {} submitted, {} succeeded, {} failed, {} rejected in {:.1?}",
        report.submitted, report.succeeded, report.failed, report.rejected, report.elapsed
    );
    for (engine, ring) in rings.iter() {
        let stats = ring.stats();
        println!(
            "  {engine}: {} hw submissions, {} completed, {} hung, {} resets, {} released",
            stats.submitted, stats.completed, stats.hung, stats.resets, stats.released
        );
    }
}
