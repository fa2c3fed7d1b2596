//! Support code for e2e tests, which drive an embedded engine against a
//! scratch directory.

mod errors;
mod freshness;
mod printing;

use std::time::{Duration, SystemTime};

use bld::{Config, Engine, Job};

/// Manages a temporary directory that an engine's targets live in.  Target
/// names are absolute paths into the directory, so concurrently running
/// tests never collide.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        Ok(TestSpace {
            dir: tempfile::tempdir()?,
        })
    }

    /// The absolute target name for `name` inside the space.
    pub fn path(&self, name: &str) -> String {
        self.dir
            .path()
            .join(name)
            .to_str()
            .expect("utf-8 temp path")
            .to_owned()
    }

    pub fn write(&self, name: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.dir.path().join(name), content)
    }

    pub fn read(&self, name: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    pub fn mtime(&self, name: &str) -> std::io::Result<SystemTime> {
        self.dir.path().join(name).metadata()?.modified()
    }

    /// Push a file's mtime into the future, so mtime-based freshness sees a
    /// change even on coarse-grained filesystems.
    pub fn touch_newer(&self, name: &str, secs_ahead: u64) -> anyhow::Result<()> {
        let t = filetime::FileTime::from_system_time(
            SystemTime::now() + Duration::from_secs(secs_ahead),
        );
        filetime::set_file_mtime(self.dir.path().join(name), t)?;
        Ok(())
    }

    /// An engine with default config whose digest store lives in the space.
    pub fn engine(&self) -> Engine {
        self.engine_with(Config::default())
    }

    pub fn engine_with(&self, mut config: Config) -> Engine {
        config.db_path = Some(self.dir.path().join(".bld_db"));
        Engine::new(config)
    }
}

/// A touch-style action: create every declared output.
pub fn touch_outputs(job: &Job) -> anyhow::Result<()> {
    for t in job.ts {
        std::fs::write(t, "")?;
    }
    Ok(())
}

/// Build an argv slice for `Engine::main`.
pub fn argv(args: &[&str]) -> Vec<String> {
    let mut v = vec!["bld".to_owned()];
    v.extend(args.iter().map(|s| s.to_string()));
    v
}
