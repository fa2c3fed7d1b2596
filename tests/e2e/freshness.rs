use bld::{Config, FileOpts};

use crate::e2e::*;

fn hash_config() -> Config {
    Config {
        use_hash: true,
        ..Default::default()
    }
}

#[test]
fn touched_input_with_same_content_does_not_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("t1", "stable content")?;
    let mut engine = space.engine_with(hash_config());
    engine.file(
        [space.path("t1.done")],
        [space.path("t1")],
        FileOpts::default(),
        touch_outputs,
    )?;
    engine.file(
        [space.path("t2.done")],
        [space.path("t1.done")],
        FileOpts::default(),
        touch_outputs,
    )?;

    assert_eq!(engine.build(&[&space.path("t2.done")])?.ran, 2);

    // Mtime bumps, bytes identical: neither t1.done nor downstream runs.
    space.touch_newer("t1", 10)?;
    let second = engine.build(&[&space.path("t2.done")])?;
    assert_eq!(second.ran, 0);
    assert_eq!(second.fresh, 2);
    Ok(())
}

#[test]
fn changed_content_rebuilds_under_hash_policy() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "v1")?;
    let mut engine = space.engine_with(hash_config());
    engine.file(
        [space.path("out")],
        [space.path("in")],
        FileOpts::default(),
        touch_outputs,
    )?;

    assert_eq!(engine.build(&[&space.path("out")])?.ran, 1);
    space.write("in", "v2")?;
    assert_eq!(engine.build(&[&space.path("out")])?.ran, 1);
    Ok(())
}

#[test]
fn per_target_policy_overrides_engine_default() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "same bytes")?;
    // Engine default is hashing, but this target opts into mtimes.
    let mut engine = space.engine_with(hash_config());
    engine.file(
        [space.path("out")],
        [space.path("in")],
        FileOpts {
            use_hash: Some(false),
            ..Default::default()
        },
        touch_outputs,
    )?;

    engine.build(&[&space.path("out")])?;
    space.touch_newer("in", 10)?;
    // Under mtimes the touch alone forces a rebuild.
    assert_eq!(engine.build(&[&space.path("out")])?.ran, 1);
    Ok(())
}

#[test]
fn hash_opt_in_for_one_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "same bytes")?;
    let mut engine = space.engine();
    engine.file(
        [space.path("out")],
        [space.path("in")],
        FileOpts {
            use_hash: Some(true),
            ..Default::default()
        },
        touch_outputs,
    )?;

    engine.build(&[&space.path("out")])?;
    space.touch_newer("in", 10)?;
    assert_eq!(engine.build(&[&space.path("out")])?.ran, 0);
    Ok(())
}

#[test]
fn digest_store_only_materializes_for_hash_builds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let mut engine = space.engine();
    engine.file(
        [space.path("out")],
        [space.path("in")],
        FileOpts::default(),
        touch_outputs,
    )?;
    engine.build(&[&space.path("out")])?;
    assert!(!space.exists(".bld_db"));

    let mut engine = space.engine_with(hash_config());
    engine.file(
        [space.path("out2")],
        [space.path("in")],
        FileOpts::default(),
        touch_outputs,
    )?;
    engine.build(&[&space.path("out2")])?;
    assert!(space.exists(".bld_db"));
    Ok(())
}

#[test]
fn deleted_output_rebuilds_under_both_policies() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    for config in [Config::default(), hash_config()] {
        let mut engine = space.engine_with(config);
        let out = space.path("out");
        engine.file([out.clone()], [space.path("in")], FileOpts::default(), touch_outputs)?;
        engine.build(&[&out])?;
        std::fs::remove_file(space.path("out"))?;
        assert_eq!(engine.build(&[&out])?.ran, 1);
        std::fs::remove_file(space.path("out"))?;
    }
    Ok(())
}
