//! The driver: flag parsing, mode selection, and wiring of resolver,
//! freshness, and executor.

use argh::FromArgs;
use crate::db::Db;
use crate::engine::Engine;
use crate::error::{BuildError, Result};
use crate::fs::{unlink_if_exists, RealFileSystem};
use crate::graph::Target;
use crate::print;
use crate::progress::{ConsoleProgress, Progress};
use crate::resolve::resolve;
use crate::signal;
use crate::work::{Options, Summary, Work};

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(format!("expected true or false, got {value:?}")),
    }
}

#[derive(argh::FromArgs)]
/// Bring the requested targets up to date.
struct Opts {
    /// global parallelism [default: 1]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// per-serial-class concurrency bound [default: 1]
    #[argh(option)]
    n_serial: Option<usize>,

    /// print the plan without executing anything
    #[argh(switch, short = 'n')]
    dry_run: bool,

    /// continue past failures (true/false) [default: true]
    #[argh(option, short = 'k', from_str_fn(parse_bool))]
    keep_going: Option<bool>,

    /// list registered targets with their descriptions
    #[argh(switch, short = 't')]
    targets: bool,

    /// override the default freshness policy (true/false)
    #[argh(option, from_str_fn(parse_bool))]
    use_hash: Option<bool>,

    /// log verbosity (error, warn, info, debug, trace)
    #[argh(option)]
    log: Option<String>,

    /// unlink the outputs of the resolved subgraph
    #[argh(switch)]
    clean: bool,

    /// print every registered rule with its dependencies
    #[argh(switch, short = 'P')]
    deps: bool,

    /// print every registered rule as JSON
    #[argh(switch)]
    deps_json: bool,

    /// hold back new jobs while the load average exceeds this
    #[argh(option, short = 'l')]
    load_average: Option<f64>,

    /// goal names [default: all]
    #[argh(positional)]
    goals: Vec<String>,
}

/// Entry point behind `Engine::main`: parse argv, run the selected mode,
/// map errors to exit codes.
pub(crate) fn main(engine: &Engine, argv: &[String]) -> i32 {
    let strs: Vec<&str> = argv.iter().map(String::as_str).collect();
    let (cmd, args) = match strs.split_first() {
        Some((cmd, args)) => (*cmd, args),
        None => ("bld", &[] as &[&str]),
    };
    let opts = match Opts::from_args(&[cmd], args) {
        Ok(opts) => opts,
        Err(early) => {
            if early.status.is_ok() {
                println!("{}", early.output);
                return 0;
            }
            eprintln!("{}", early.output);
            return 2;
        }
    };

    match run_mode(engine, &opts) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("bld: error: {err}");
            err.exit_code()
        }
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        None => log::LevelFilter::Warn,
        Some(s) => s
            .parse::<log::LevelFilter>()
            .map_err(|_| BuildError::BadArgument(format!("bad log level {s:?}")))?,
    };
    // Ignore double-init: hosts may call main() several times.
    let _ = env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp(None)
        .try_init();
    Ok(())
}

fn run_mode(engine: &Engine, opts: &Opts) -> Result<i32> {
    init_logging(opts.log.as_deref())?;

    let stdout = std::io::stdout();
    if opts.targets {
        print::descriptions(&engine.graph, &mut stdout.lock())
            .map_err(|err| print_error("targets", err))?;
        return Ok(0);
    }
    if opts.deps {
        print::dependencies(&engine.graph, &mut stdout.lock())
            .map_err(|err| print_error("deps", err))?;
        return Ok(0);
    }
    if opts.deps_json {
        print::dependencies_json(&engine.graph, &mut stdout.lock()).map_err(|err| {
            BuildError::ActionFailed {
                target: "deps-json".to_owned(),
                reason: format!("{err:#}"),
            }
        })?;
        return Ok(0);
    }

    if opts.dry_run {
        let fs = RealFileSystem::new();
        let plan = resolve(&engine.graph, &fs, &opts.goals)?;
        print::dry_run(&engine.graph, &plan, &mut stdout.lock())
            .map_err(|err| print_error("plan", err))?;
        return Ok(0);
    }
    if opts.clean {
        clean(engine, &opts.goals)?;
        return Ok(0);
    }

    let options = Options {
        parallelism: opts.jobs.unwrap_or(engine.config.n_jobs),
        n_serial: opts.n_serial.unwrap_or(engine.config.n_serial),
        keep_going: opts.keep_going.unwrap_or(engine.config.keep_going),
        use_hash: opts.use_hash.unwrap_or(engine.config.use_hash),
        load_average: opts.load_average.unwrap_or(f64::INFINITY),
    };
    if options.parallelism < 1 {
        return Err(BuildError::BadArgument("-j must be at least 1".to_owned()));
    }
    if options.n_serial < 1 {
        return Err(BuildError::BadArgument(
            "--n-serial must be at least 1".to_owned(),
        ));
    }
    if !(options.load_average > 0.0) {
        return Err(BuildError::BadArgument(
            "-l must be positive".to_owned(),
        ));
    }

    signal::install();
    let summary = execute(engine, &opts.goals, options, &ConsoleProgress::new())?;

    // Replay collected failures at the end, where they are visible.
    for (target, reason) in &summary.failures {
        eprintln!("bld: failed: {target}: {reason}");
    }
    if !summary.failures.is_empty() {
        let n = summary.failures.len();
        eprintln!("bld: {n} target{} failed", if n == 1 { "" } else { "s" });
        return Ok(1);
    }
    if !summary.success() {
        eprintln!("bld: interrupted");
        return Ok(1);
    }
    if summary.ran == 0 {
        println!("bld: no work to do");
    } else {
        println!(
            "bld: ran {} task{}, now up to date",
            summary.ran,
            if summary.ran == 1 { "" } else { "s" }
        );
    }
    Ok(0)
}

/// Resolve and execute one build.  Shared by the CLI path and the
/// programmatic `Engine::build`.
pub(crate) fn execute(
    engine: &Engine,
    goals: &[String],
    options: Options,
    progress: &dyn Progress,
) -> Result<Summary> {
    let fs = RealFileSystem::new();
    let plan = resolve(&engine.graph, &fs, goals)?;

    // The digest store is only materialized when some target wants hashing;
    // a pure-mtime build leaves the working directory untouched.
    let needs_db = plan.iter().any(|(_, node)| match engine.graph.target(node.target) {
        Target::File(f) => f.use_hash.unwrap_or(options.use_hash),
        Target::Phony(_) => false,
    });
    let db = if needs_db {
        let path = engine.db_path();
        Some(Db::open(&path).map_err(|err| BuildError::ActionFailed {
            target: path.display().to_string(),
            reason: format!("{err:#}"),
        })?)
    } else {
        None
    };

    let work = Work::new(
        &engine.graph,
        &plan,
        &fs,
        db.as_ref(),
        &engine.shell,
        progress,
        options,
    );
    Ok(work.run())
}

/// Unlink every file output in the resolved subgraph, ignoring absent
/// files.  Source leaves and the digest store are never touched.
pub(crate) fn clean(engine: &Engine, goals: &[String]) -> Result<()> {
    let fs = RealFileSystem::new();
    let plan = resolve(&engine.graph, &fs, goals)?;
    for (_, node) in plan.iter() {
        if let Target::File(f) = engine.graph.target(node.target) {
            for t in &f.ts {
                match unlink_if_exists(&fs, t) {
                    Ok(true) => log::info!("rm {t}"),
                    Ok(false) => {}
                    Err(err) => {
                        return Err(BuildError::ActionFailed {
                            target: f.ts[0].clone(),
                            reason: format!("rm {t:?}: {err}"),
                        })
                    }
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn print_error(what: &str, err: std::io::Error) -> BuildError {
    BuildError::ActionFailed {
        target: what.to_owned(),
        reason: err.to_string(),
    }
}
