// tests/config_loading.rs

mod common;
use crate::common::{ConfigFileBuilder, TestResult};

use std::fs;
use std::time::Duration;

use tempfile::tempdir;

use gpusched::config::{ConfigFile, load_and_validate, load_or_default, validate_config};
use gpusched::errors::SchedError;
use gpusched::types::EngineKind;

#[test]
fn engine_sections_override_scheduler_defaults() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("Gpusched.toml");
    fs::write(
        &path,
        r#"
[scheduler]
hw_submission_limit = 2
timeout_ms = 500
queue_depth = 8

[engine.gfx]
hw_submission_limit = 4

[engine.sdma]
timeout_ms = 0
queue_depth = 2

[simulation]
hang_every = 7
"#,
    )?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(
        cfg.engines().collect::<Vec<_>>(),
        vec![EngineKind::Gfx, EngineKind::Sdma]
    );

    let gfx = cfg.scheduler_config(EngineKind::Gfx);
    assert_eq!(gfx.hw_submission_limit, 4);
    assert_eq!(gfx.timeout, Some(Duration::from_millis(500)));
    assert_eq!(cfg.queue_depth(EngineKind::Gfx), 8);

    let sdma = cfg.scheduler_config(EngineKind::Sdma);
    assert_eq!(sdma.hw_submission_limit, 2);
    assert_eq!(sdma.timeout, None);
    assert_eq!(cfg.queue_depth(EngineKind::Sdma), 2);

    assert_eq!(cfg.simulation.hang_every, 7);
    assert_eq!(cfg.simulation.job_duration_ms, 2);
    Ok(())
}

#[test]
fn empty_file_enables_gfx_with_defaults() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("empty.toml");
    fs::write(&path, "")?;

    let cfg = load_or_default(Some(path.as_path()))?;
    assert_eq!(cfg.engines().collect::<Vec<_>>(), vec![EngineKind::Gfx]);

    let gfx = cfg.scheduler_config(EngineKind::Gfx);
    assert_eq!(gfx.hw_submission_limit, 2);
    assert_eq!(gfx.timeout, Some(Duration::from_secs(10)));
    assert_eq!(cfg.queue_depth(EngineKind::Gfx), 32);
    Ok(())
}

#[test]
fn zero_limits_are_rejected() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[engine.compute]\nqueue_depth = 0\n")?;

    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, SchedError::ConfigError(ref msg) if msg.contains("[engine.compute]")));

    let err = ConfigFileBuilder::new().hw_submission_limit(0).try_build().unwrap_err();
    assert!(matches!(err, SchedError::ConfigError(_)));
    Ok(())
}

#[test]
fn unknown_keys_and_engines_are_toml_errors() -> TestResult {
    let dir = tempdir()?;

    let path = dir.path().join("typo.toml");
    fs::write(&path, "[scheduler]\nhw_submision_limit = 3\n")?;
    assert!(matches!(load_and_validate(&path), Err(SchedError::TomlError(_))));

    let path = dir.path().join("engine.toml");
    fs::write(&path, "[engine.npu]\n")?;
    assert!(matches!(load_and_validate(&path), Err(SchedError::TomlError(_))));
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let err = load_and_validate(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, SchedError::IoError(_)));
}

#[test]
fn command_line_overrides_win_and_are_revalidated() -> TestResult {
    let mut cfg: ConfigFile = ConfigFileBuilder::new()
        .with_engine_section(
            EngineKind::Gfx,
            gpusched::config::EngineSection {
                hw_submission_limit: Some(8),
                timeout_ms: Some(100),
                queue_depth: None,
            },
        )
        .build();

    cfg.override_tunables(Some(1), Some(0));
    validate_config(&cfg)?;
    let gfx = cfg.scheduler_config(EngineKind::Gfx);
    assert_eq!(gfx.hw_submission_limit, 1);
    assert_eq!(gfx.timeout, None);

    cfg.override_tunables(Some(0), None);
    assert!(validate_config(&cfg).is_err());
    Ok(())
}
