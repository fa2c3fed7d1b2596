//! Shell command execution and the job context handed to actions.
//!
//! The engine never interprets command strings; it hands them to the
//! configured shell and inspects the exit status.  Output is captured so the
//! scheduler can report it without interleaving across parallel jobs.

use std::cell::RefCell;
use std::process::Command;

use anyhow::bail;

/// The external shell, configured once per engine from the environment:
/// `$SHELL` names the executable (default `/bin/sh`), `$SHELLOPTS` is a
/// colon-separated list of `set -o` option names enabled via `-o` before
/// `-c`.  No other environment variables are consulted.
pub struct Shell {
    program: String,
    opts: Vec<String>,
}

impl Shell {
    pub fn from_env() -> Shell {
        let program = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_owned());
        let opts = std::env::var("SHELLOPTS")
            .map(|s| {
                s.split(':')
                    .filter(|opt| !opt.is_empty())
                    .flat_map(|opt| ["-o".to_owned(), opt.to_owned()])
                    .collect()
            })
            .unwrap_or_default();
        Shell { program, opts }
    }

    fn run(&self, cmd: &str) -> std::io::Result<std::process::Output> {
        Command::new(&self.program)
            .args(&self.opts)
            .arg("-c")
            .arg(cmd)
            .output()
    }
}

/// Execution context passed to an action: the resolved outputs and inputs of
/// its target, plus a handle to the shell executor.
pub struct Job<'a> {
    pub ts: &'a [String],
    pub ds: &'a [String],
    shell: &'a Shell,
    output: RefCell<Vec<u8>>,
}

impl<'a> Job<'a> {
    pub(crate) fn new(ts: &'a [String], ds: &'a [String], shell: &'a Shell) -> Job<'a> {
        Job {
            ts,
            ds,
            shell,
            output: RefCell::new(Vec::new()),
        }
    }

    /// Run one command line under the configured shell.  A non-zero exit
    /// fails the containing action.
    pub fn sh(&self, cmd: &str) -> anyhow::Result<()> {
        log::debug!("sh: {cmd}");
        let out = self.shell.run(cmd)?;
        {
            let mut buf = self.output.borrow_mut();
            buf.extend_from_slice(&out.stdout);
            buf.extend_from_slice(&out.stderr);
        }
        if !out.status.success() {
            bail!("command failed ({}): {}", out.status, cmd);
        }
        Ok(())
    }

    pub(crate) fn take_output(self) -> Vec<u8> {
        self.output.into_inner()
    }
}

/// Run one command outside any job context, e.g. from host setup code.
/// Output goes straight to the console.
pub fn sh(cmd: &str) -> anyhow::Result<()> {
    use std::io::Write;

    let out = Shell::from_env().run(cmd)?;
    let stdout = std::io::stdout();
    let mut w = stdout.lock();
    let _ = w.write_all(&out.stdout);
    let _ = w.write_all(&out.stderr);
    if !out.status.success() {
        bail!("command failed ({}): {}", out.status, cmd);
    }
    Ok(())
}

/// Unlink the given paths, ignoring ones that are already absent.
pub fn rm<I, P>(paths: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = P>,
    P: AsRef<std::path::Path>,
{
    for p in paths {
        let p = p.as_ref();
        match std::fs::remove_file(p) {
            Ok(()) => log::debug!("rm {}", p.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => bail!("rm {}: {}", p.display(), err),
        }
    }
    Ok(())
}
