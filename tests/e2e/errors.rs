use anyhow::bail;

use bld::work::BuildState;
use bld::{BuildError, FileOpts};

use crate::e2e::*;

#[test]
fn cycle_is_detected_at_resolution() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    engine.file(["cyc-a"], ["cyc-b"], FileOpts::default(), touch_outputs)?;
    engine.file(["cyc-b"], ["cyc-a"], FileOpts::default(), touch_outputs)?;

    let err = engine.build(&["cyc-a"]).unwrap_err();
    match err {
        BuildError::Cycle { path } => {
            assert!(path.contains(&"cyc-a".to_owned()));
            assert!(path.contains(&"cyc-b".to_owned()));
        }
        other => panic!("expected cycle, got {other:?}"),
    }

    // Resolution errors map to exit code 3.
    assert_eq!(engine.main(&argv(&["cyc-a"])), 3);
    Ok(())
}

#[test]
fn lying_action_fails_with_output_missing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    // Claims an output it never creates.
    engine.file(
        [space.path("bad")],
        Vec::<String>::new(),
        FileOpts::default(),
        |_| Ok(()),
    )?;
    engine.file(
        [space.path("good")],
        Vec::<String>::new(),
        FileOpts::default(),
        touch_outputs,
    )?;

    let summary = engine.build(&[&space.path("bad"), &space.path("good")])?;
    assert_eq!(summary.states[&space.path("bad")], BuildState::Failed);
    assert_eq!(summary.states[&space.path("good")], BuildState::Done);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].1.contains("missing"));
    Ok(())
}

#[test]
fn failure_cancels_dependents_but_not_unrelated_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    engine.file(
        [space.path("c")],
        Vec::<String>::new(),
        FileOpts::default(),
        |_| bail!("boom"),
    )?;
    engine.file(
        [space.path("b")],
        [space.path("c")],
        FileOpts::default(),
        touch_outputs,
    )?;
    engine.file(
        [space.path("a")],
        [space.path("b")],
        FileOpts::default(),
        touch_outputs,
    )?;
    engine.file(
        [space.path("x")],
        Vec::<String>::new(),
        FileOpts::default(),
        touch_outputs,
    )?;

    let summary = engine.build(&[&space.path("a"), &space.path("x")])?;
    assert_eq!(summary.states[&space.path("c")], BuildState::Failed);
    assert_eq!(summary.states[&space.path("b")], BuildState::Cancelled);
    assert_eq!(summary.states[&space.path("a")], BuildState::Cancelled);
    assert_eq!(summary.states[&space.path("x")], BuildState::Done);
    assert!(!summary.success());
    Ok(())
}

#[test]
fn failed_action_outputs_are_removed() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    engine.file(
        [space.path("partial")],
        Vec::<String>::new(),
        FileOpts::default(),
        |job| {
            std::fs::write(&job.ts[0], "half-written")?;
            bail!("died after writing");
        },
    )?;

    let summary = engine.build(&[&space.path("partial")])?;
    assert_eq!(summary.states[&space.path("partial")], BuildState::Failed);
    // The half-written file cannot masquerade as fresh next run.
    assert!(!space.exists("partial"));
    Ok(())
}

#[test]
fn missing_input_is_an_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    engine.file(
        [space.path("out")],
        [space.path("never-created")],
        FileOpts::default(),
        touch_outputs,
    )?;

    let err = engine.build(&[&space.path("out")]).unwrap_err();
    assert!(matches!(err, BuildError::MissingInput(_)));
    assert_eq!(engine.main(&argv(&[&space.path("out")])), 3);
    Ok(())
}

#[test]
fn unknown_goal_is_an_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let engine = space.engine();
    let err = engine.build(&["no-such-goal"]).unwrap_err();
    assert!(matches!(err, BuildError::UnknownGoal(_)));
    assert_eq!(engine.main(&argv(&["no-such-goal"])), 3);
    Ok(())
}

#[test]
fn duplicate_registration_is_rejected() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    engine.file(["dup-out"], Vec::<String>::new(), FileOpts::default(), touch_outputs)?;
    let err = engine
        .file(["dup-out"], Vec::<String>::new(), FileOpts::default(), touch_outputs)
        .unwrap_err();
    assert!(matches!(err, BuildError::DuplicateTarget(_)));
    assert_eq!(err.exit_code(), 2);
    Ok(())
}

#[test]
fn bad_flags_exit_with_usage_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    engine.file([space.path("out")], Vec::<String>::new(), FileOpts::default(), touch_outputs)?;
    assert_eq!(engine.main(&argv(&["-j", "0", &space.path("out")])), 2);
    assert_eq!(engine.main(&argv(&["--no-such-flag"])), 2);
    Ok(())
}

#[test]
fn panicking_action_fails_only_its_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    engine.file(
        [space.path("explodes")],
        Vec::<String>::new(),
        FileOpts::default(),
        |_| panic!("action bug"),
    )?;
    engine.file(
        [space.path("steady")],
        Vec::<String>::new(),
        FileOpts::default(),
        touch_outputs,
    )?;

    let summary = engine.build(&[&space.path("explodes"), &space.path("steady")])?;
    assert_eq!(summary.states[&space.path("explodes")], BuildState::Failed);
    assert_eq!(summary.states[&space.path("steady")], BuildState::Done);
    assert!(summary.failures[0].1.contains("panicked"));
    Ok(())
}

#[test]
fn shell_failure_fails_the_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    engine.file(
        [space.path("out")],
        Vec::<String>::new(),
        FileOpts::default(),
        |job| job.sh("exit 7"),
    )?;

    let summary = engine.build(&[&space.path("out")])?;
    assert_eq!(summary.states[&space.path("out")], BuildState::Failed);
    assert!(summary.failures[0].1.contains("exit"));
    Ok(())
}
