//! Reporting execution to the user.  Indirected as a trait so embedders and
//! tests can swap the console for their own sink.

use std::io::Write;

/// Notifications from the executor.  Implementations are called from worker
/// threads and must serialize their own output.
pub trait Progress: Sync {
    /// An action is about to run (fresh targets are skipped silently).
    fn task_started(&self, name: &str, desc: Option<&str>);

    /// An action finished; `output` is the captured shell output.
    fn task_finished(&self, name: &str, failed: bool, output: &[u8]);

    /// A line to show the user regardless of task state.
    fn log(&self, msg: &str);
}

/// Plain console reporting: one line per started task (its description when
/// present), task output replayed on completion.
#[derive(Default)]
pub struct ConsoleProgress {}

impl ConsoleProgress {
    pub fn new() -> Self {
        ConsoleProgress {}
    }
}

impl Progress for ConsoleProgress {
    fn task_started(&self, name: &str, desc: Option<&str>) {
        println!("{}", desc.unwrap_or(name));
    }

    fn task_finished(&self, name: &str, failed: bool, output: &[u8]) {
        // Lock once so a task's output lands contiguously.
        let stdout = std::io::stdout();
        let mut w = stdout.lock();
        if failed {
            let _ = writeln!(w, "failed: {name}");
        }
        if !output.is_empty() {
            let _ = w.write_all(output);
            if !output.ends_with(b"\n") {
                let _ = writeln!(w);
            }
        }
    }

    fn log(&self, msg: &str) {
        println!("{msg}");
    }
}

/// Progress that reports nothing, for embedders that do their own reporting.
#[derive(Default)]
pub struct SilentProgress {}

impl Progress for SilentProgress {
    fn task_started(&self, _name: &str, _desc: Option<&str>) {}
    fn task_finished(&self, _name: &str, _failed: bool, _output: &[u8]) {}
    fn log(&self, _msg: &str) {}
}
