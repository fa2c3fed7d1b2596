//! The embedding interface: a host program constructs an [`Engine`],
//! registers its rules, and hands the process argv to [`Engine::main`].
//!
//! There is deliberately no global registry; hosts that want several
//! independent graphs in one process just build several engines.

use std::io::Write;
use std::path::PathBuf;

use crate::db::DB_FILENAME;
use crate::error::Result;
use crate::fs::RealFileSystem;
use crate::graph::{FileTarget, Graph, PhonyTarget};
use crate::print;
use crate::progress::ConsoleProgress;
use crate::resolve::resolve;
use crate::run;
use crate::shell::{Job, Shell};
use crate::work::{Options, Summary};

/// Engine-wide defaults, fixed at construction.  The command line can
/// override the scheduling knobs per invocation.
pub struct Config {
    /// Default freshness policy: content hashing instead of mtimes.
    pub use_hash: bool,
    /// Global parallelism bound J.
    pub n_jobs: usize,
    /// Per-serial-class bound S.
    pub n_serial: usize,
    /// Keep building targets unrelated to a failure.
    pub keep_going: bool,
    /// Digest store location; `None` means `.bld_db` in the working
    /// directory.
    pub db_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            use_hash: false,
            n_jobs: 1,
            n_serial: 1,
            keep_going: true,
            db_path: None,
        }
    }
}

/// Serial-class assignment for a file target.  Targets sharing a class never
/// run more than S at a time, without holding back the rest of the build.
#[derive(Default, Clone)]
pub enum Serial {
    #[default]
    Off,
    /// Class named after the target's first output.
    Auto,
    /// Explicit tag, shared across targets.
    Class(String),
}

/// Optional attributes of a file registration.
#[derive(Default)]
pub struct FileOpts {
    pub desc: Option<String>,
    pub serial: Serial,
    /// Explicit freshness policy; `None` inherits the engine default.
    pub use_hash: Option<bool>,
}

pub struct Engine {
    pub(crate) graph: Graph,
    pub config: Config,
    pub(crate) shell: Shell,
}

impl Engine {
    pub fn new(config: Config) -> Engine {
        Engine {
            graph: Graph::new(),
            config,
            shell: Shell::from_env(),
        }
    }

    /// Register a file target producing `ts` from `ds` by running `action`.
    pub fn file<T, D, A>(&mut self, ts: T, ds: D, opts: FileOpts, action: A) -> Result<()>
    where
        T: IntoIterator,
        T::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
        A: Fn(&Job) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let ts: Vec<String> = ts.into_iter().map(Into::into).collect();
        let ds: Vec<String> = ds.into_iter().map(Into::into).collect();
        let serial_class = match opts.serial {
            Serial::Off => None,
            Serial::Auto => ts.first().cloned(),
            Serial::Class(tag) => Some(tag),
        };
        self.graph.add_file(FileTarget {
            ts,
            ds,
            action: Box::new(action),
            desc: opts.desc,
            serial_class,
            use_hash: opts.use_hash,
        })?;
        Ok(())
    }

    /// Register a phony alias over `ds`.
    pub fn phony<D>(&mut self, name: impl Into<String>, ds: D, desc: Option<&str>) -> Result<()>
    where
        D: IntoIterator,
        D::Item: Into<String>,
    {
        self.graph.add_phony(PhonyTarget {
            name: name.into(),
            ds: ds.into_iter().map(Into::into).collect(),
            desc: desc.map(str::to_owned),
        })?;
        Ok(())
    }

    /// Bring `goals` up to date using the engine's configured knobs.
    /// An empty goal list requests the default target `"all"`.
    pub fn build<S: AsRef<str>>(&self, goals: &[S]) -> Result<Summary> {
        run::execute(
            self,
            &own(goals),
            self.default_options(),
            &ConsoleProgress::new(),
        )
    }

    /// Write the deterministic plan for `goals` without executing anything.
    pub fn dry_run<S: AsRef<str>, W: Write>(&self, goals: &[S], w: &mut W) -> Result<()> {
        let fs = RealFileSystem::new();
        let plan = resolve(&self.graph, &fs, &own(goals))?;
        print::dry_run(&self.graph, &plan, w).map_err(|err| run::print_error("plan", err))
    }

    /// Unlink every file output in the resolved subgraph of `goals`,
    /// ignoring absent files.  Source leaves and the digest store are left
    /// alone.
    pub fn clean<S: AsRef<str>>(&self, goals: &[S]) -> Result<()> {
        run::clean(self, &own(goals))
    }

    /// Parse `argv` (including the program name) and run the selected mode.
    /// Returns the process exit code.
    pub fn main(&self, argv: &[String]) -> i32 {
        run::main(self, argv)
    }

    pub(crate) fn db_path(&self) -> PathBuf {
        self.config
            .db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DB_FILENAME))
    }

    pub(crate) fn default_options(&self) -> Options {
        Options {
            parallelism: self.config.n_jobs,
            n_serial: self.config.n_serial,
            keep_going: self.config.keep_going,
            use_hash: self.config.use_hash,
            load_average: f64::INFINITY,
        }
    }
}

fn own<S: AsRef<str>>(goals: &[S]) -> Vec<String> {
    goals.iter().map(|s| s.as_ref().to_owned()).collect()
}

/// Iterate `items` through `f`.  Exists so host programs can compose
/// repeated registrations without ceremony:
///
/// ```no_run
/// # let mut engine = bld::Engine::new(bld::Config::default());
/// bld::each(["alpha", "beta"], |name| {
///     engine
///         .file(
///             [format!("{name}.o")],
///             [format!("{name}.c")],
///             bld::FileOpts::default(),
///             |job| job.sh(&format!("cc -c -o {} {}", job.ts[0], job.ds[0])),
///         )
///         .unwrap();
/// });
/// ```
pub fn each<I, F>(items: I, mut f: F)
where
    I: IntoIterator,
    F: FnMut(I::Item),
{
    for item in items {
        f(item);
    }
}
