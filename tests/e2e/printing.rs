use bld::FileOpts;

use crate::e2e::*;

/// The shape from the seed scenario: all <- a <- b <- {c, d}, d <- e, where
/// c and e already exist on disk.
fn diamondish(space: &TestSpace) -> anyhow::Result<bld::Engine> {
    space.write("c", "")?;
    space.write("e", "")?;
    let mut engine = space.engine();
    engine.file(
        [space.path("a")],
        [space.path("b")],
        FileOpts::default(),
        touch_outputs,
    )?;
    engine.file(
        [space.path("b")],
        [space.path("c"), space.path("d")],
        FileOpts::default(),
        touch_outputs,
    )?;
    engine.file(
        [space.path("d")],
        [space.path("e")],
        FileOpts::default(),
        touch_outputs,
    )?;
    engine.phony("all", [space.path("a")], None)?;
    Ok(engine)
}

#[test]
fn dry_run_prints_the_plan_in_dependency_order() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let engine = diamondish(&space)?;

    let mut out = Vec::new();
    engine.dry_run::<&str, _>(&[], &mut out)?;

    let expected = format!(
        "{d}\n\t{e}\n\n{b}\n\t{c}\n\t{d}\n\n{a}\n\t{b}\n\nall\n\t{a}\n\n",
        a = space.path("a"),
        b = space.path("b"),
        c = space.path("c"),
        d = space.path("d"),
        e = space.path("e"),
    );
    assert_eq!(String::from_utf8(out)?, expected);
    Ok(())
}

#[test]
fn dry_run_has_no_side_effects() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let engine = diamondish(&space)?;

    let before_c = space.mtime("c")?;
    let mut out = Vec::new();
    engine.dry_run::<&str, _>(&[], &mut out)?;

    assert!(!space.exists("a"));
    assert!(!space.exists("b"));
    assert!(!space.exists("d"));
    assert_eq!(space.mtime("c")?, before_c);
    Ok(())
}

#[test]
fn main_dry_run_exits_zero_and_builds_nothing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let engine = diamondish(&space)?;
    assert_eq!(engine.main(&argv(&["-n"])), 0);
    assert!(!space.exists("a"));
    Ok(())
}

#[test]
fn main_listing_modes_exit_zero() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let engine = diamondish(&space)?;
    assert_eq!(engine.main(&argv(&["-t"])), 0);
    assert_eq!(engine.main(&argv(&["-P"])), 0);
    assert_eq!(engine.main(&argv(&["--deps-json"])), 0);
    Ok(())
}

#[test]
fn main_build_exits_zero_then_reports_no_work() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let engine = diamondish(&space)?;
    assert_eq!(engine.main(&argv(&["all"])), 0);
    assert!(space.exists("a"));
    assert_eq!(engine.main(&argv(&["all"])), 0);
    Ok(())
}

#[test]
fn main_build_failure_exits_one() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut engine = space.engine();
    engine.file(
        [space.path("broken")],
        Vec::<String>::new(),
        FileOpts::default(),
        |_| anyhow::bail!("no"),
    )?;
    assert_eq!(engine.main(&argv(&[&space.path("broken")])), 1);
    Ok(())
}
