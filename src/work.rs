//! The parallel executor: brings a resolved plan up to date, honoring
//! dependency order, the global parallelism bound, and per-serial-class
//! admission.
//!
//! A fixed pool of workers pulls from a shared ready set.  All scheduling
//! state lives behind one coarse mutex; actions run with the lock released.
//! Where several ready targets compete, the lexicographically smallest
//! primary output wins, so a `-j1` run has a unique, reproducible order.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::db::Db;
use crate::error::BuildError;
use crate::fresh::{Freshness, Oracle};
use crate::fs::{unlink_if_exists, FileSystem};
use crate::graph::{FileTarget, Graph, Target};
use crate::progress::Progress;
use crate::resolve::{NodeId, Plan};
use crate::shell::{Job, Shell};
use crate::signal;

/// Scheduling knobs, resolved from engine config and flags by the driver.
pub struct Options {
    /// Global parallelism bound J.
    pub parallelism: usize,
    /// Per-serial-class bound S.
    pub n_serial: usize,
    /// Keep building targets unrelated to a failure.
    pub keep_going: bool,
    /// Freshness policy for targets that did not choose one explicitly.
    pub use_hash: bool,
    /// Hold back new dispatch while the 1-minute load average exceeds this.
    /// Infinite disables the gate.
    pub load_average: f64,
}

/// Lifecycle of one target during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// Waiting for predecessors.
    Pending,
    /// All predecessors done, not yet dispatched.
    Ready,
    /// Action in flight.
    Running,
    /// Success, or skipped as fresh.
    Done,
    /// Action raised or outputs missing.
    Failed,
    /// Will not run because a predecessor failed.
    Cancelled,
}

/// What one run did.
#[derive(Debug)]
pub struct Summary {
    /// Actions actually executed.
    pub ran: usize,
    /// File targets skipped as up to date.
    pub fresh: usize,
    /// (primary output, reason) per failed target.
    pub failures: Vec<(String, String)>,
    /// Final state of every target in the plan, by primary output name.
    pub states: HashMap<String, BuildState>,
}

impl Summary {
    /// True when every requested target reached `Done`.
    pub fn success(&self) -> bool {
        self.states.values().all(|&s| s == BuildState::Done)
    }
}

struct ExecState {
    states: Vec<BuildState>,
    unfinished_preds: Vec<usize>,
    /// Whether the target produced new state this run: a file target that
    /// ran its action, or a phony with a dirty predecessor.  Dirty phonies
    /// force their dependents stale, since a phony has nothing on disk for
    /// the freshness policies to compare.
    dirty: Vec<bool>,
    /// Dispatch candidates, ordered by primary output name.
    ready: BTreeSet<(String, NodeId)>,
    class_running: HashMap<String, usize>,
    running: usize,
    /// Targets not yet in a terminal state.
    remaining: usize,
    /// Set on SIGINT or on failure without keep-going: nothing new is
    /// dispatched, running actions drain.
    no_new_work: bool,
    ran: usize,
    fresh: usize,
    failures: Vec<(String, String)>,
}

enum Outcome {
    Done { ran: bool, fresh: bool },
    Failed(BuildError),
}

enum Pick {
    Node(NodeId),
    /// Candidates exist but the load-average gate is closed.
    LoadGated,
    None,
}

pub struct Work<'a> {
    graph: &'a Graph,
    plan: &'a Plan,
    fs: &'a dyn FileSystem,
    db: Option<&'a Db>,
    oracle: Oracle<'a>,
    shell: &'a Shell,
    progress: &'a dyn Progress,
    options: Options,
    state: Mutex<ExecState>,
    cond: Condvar,
}

impl<'a> Work<'a> {
    pub fn new(
        graph: &'a Graph,
        plan: &'a Plan,
        fs: &'a dyn FileSystem,
        db: Option<&'a Db>,
        shell: &'a Shell,
        progress: &'a dyn Progress,
        options: Options,
    ) -> Work<'a> {
        let n = plan.len();
        Work {
            graph,
            plan,
            fs,
            db,
            oracle: Oracle::new(graph, fs, db),
            shell,
            progress,
            options,
            state: Mutex::new(ExecState {
                states: vec![BuildState::Pending; n],
                unfinished_preds: vec![0; n],
                dirty: vec![false; n],
                ready: BTreeSet::new(),
                class_running: HashMap::new(),
                running: 0,
                remaining: n,
                no_new_work: false,
                ran: 0,
                fresh: 0,
                failures: Vec::new(),
            }),
            cond: Condvar::new(),
        }
    }

    fn primary(&self, id: NodeId) -> &str {
        self.graph.target(self.plan.node(id).target).primary()
    }

    fn serial_class(&self, id: NodeId) -> Option<&str> {
        match self.graph.target(self.plan.node(id).target) {
            Target::File(f) => f.serial_class.as_deref(),
            Target::Phony(_) => None,
        }
    }

    /// Run the plan to quiescence and report what happened.
    pub fn run(self) -> Summary {
        {
            let mut st = self.state.lock().unwrap();
            for (id, node) in self.plan.iter() {
                st.unfinished_preds[id.index()] = node.preds.len();
                if node.preds.is_empty() {
                    st.states[id.index()] = BuildState::Ready;
                    st.ready.insert((self.primary(id).to_owned(), id));
                }
            }
        }

        // More workers than plan nodes can never be used.
        let workers = self.options.parallelism.min(self.plan.len()).max(1);
        let this = &self;
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(move || this.worker());
            }
        });

        let st = self.state.into_inner().unwrap();
        let mut states = HashMap::new();
        for (id, node) in self.plan.iter() {
            states.insert(
                self.graph.target(node.target).primary().to_owned(),
                st.states[id.index()],
            );
        }
        Summary {
            ran: st.ran,
            fresh: st.fresh,
            failures: st.failures,
            states,
        }
    }

    fn worker(&self) {
        loop {
            let (id, forced) = {
                let mut st = self.state.lock().unwrap();
                loop {
                    if st.remaining == 0 {
                        self.cond.notify_all();
                        return;
                    }
                    if signal::interrupted() && !st.no_new_work {
                        self.progress
                            .log("interrupted, waiting for running actions");
                        st.no_new_work = true;
                    }
                    if st.no_new_work {
                        self.drain(&mut st);
                        if st.remaining == 0 {
                            self.cond.notify_all();
                            return;
                        }
                        st = self.cond.wait(st).unwrap();
                        continue;
                    }
                    match self.pick(&mut st) {
                        Pick::Node(id) => break (id, self.forced_dirty(&st, id)),
                        Pick::LoadGated => {
                            // Re-check the load average after a beat.
                            st = self
                                .cond
                                .wait_timeout(st, Duration::from_secs(1))
                                .unwrap()
                                .0;
                        }
                        Pick::None => {
                            assert!(
                                st.running > 0 || !st.ready.is_empty(),
                                "no work ready but {} targets remain",
                                st.remaining
                            );
                            st = self.cond.wait(st).unwrap();
                        }
                    }
                }
            };

            let outcome = self.run_node(id, forced);

            let mut st = self.state.lock().unwrap();
            self.finish(&mut st, id, forced, outcome);
            self.cond.notify_all();
        }
    }

    /// Choose the next dispatchable ready target, honoring the serial-class
    /// bound and the load-average gate.  Ties break lexicographically.
    fn pick(&self, st: &mut ExecState) -> Pick {
        if st.ready.is_empty() {
            return Pick::None;
        }
        // The gate only applies when something is already running, so the
        // build can always make progress.
        if st.running > 0
            && self.options.load_average.is_finite()
            && load_average() > self.options.load_average
        {
            return Pick::LoadGated;
        }

        let mut chosen = None;
        for (name, id) in st.ready.iter() {
            if let Some(class) = self.serial_class(*id) {
                let used = st.class_running.get(class).copied().unwrap_or(0);
                if used >= self.options.n_serial {
                    continue;
                }
            }
            chosen = Some((name.clone(), *id));
            break;
        }
        let Some((name, id)) = chosen else {
            return Pick::None;
        };

        st.ready.remove(&(name, id));
        st.states[id.index()] = BuildState::Running;
        st.running += 1;
        if let Some(class) = self.serial_class(id) {
            *st.class_running.entry(class.to_owned()).or_insert(0) += 1;
        }
        Pick::Node(id)
    }

    /// Decide whether a target must run regardless of what freshness says:
    /// any dirty phony predecessor forces it.  Phonies inherit dirtiness
    /// from every predecessor kind.
    fn forced_dirty(&self, st: &ExecState, id: NodeId) -> bool {
        let node = self.plan.node(id);
        match self.graph.target(node.target) {
            Target::Phony(_) => node.preds.iter().any(|p| st.dirty[p.index()]),
            Target::File(_) => node.preds.iter().any(|p| {
                st.dirty[p.index()]
                    && matches!(
                        self.graph.target(self.plan.node(*p).target),
                        Target::Phony(_)
                    )
            }),
        }
    }

    /// Execute one target with the lock released.
    fn run_node(&self, id: NodeId, forced: bool) -> Outcome {
        match self.graph.target(self.plan.node(id).target) {
            Target::Phony(p) => {
                // Phonies are never fresh; their action is empty.
                log::debug!("phony {}", p.name);
                Outcome::Done {
                    ran: false,
                    fresh: false,
                }
            }
            Target::File(f) => self.run_file(f, forced),
        }
    }

    fn run_file(&self, f: &FileTarget, forced: bool) -> Outcome {
        let primary = &f.ts[0];
        let use_hash = f.use_hash.unwrap_or(self.options.use_hash);

        let records = match self.oracle.check(f, use_hash) {
            Ok(Freshness::Fresh { refresh }) if !forced => {
                if let Some(db) = self.db {
                    // Only sentinel maintenance; a failure here costs a
                    // rehash next run, not correctness.
                    if let Err(err) = db.write_records(&refresh) {
                        log::warn!("digest store: {err:#}");
                    }
                }
                log::debug!("{primary} is up to date");
                return Outcome::Done {
                    ran: false,
                    fresh: true,
                };
            }
            // Forced by a dirty phony: the stored digests stay valid, only
            // stale sentinels are worth rewriting after the action.
            Ok(Freshness::Fresh { refresh }) => refresh,
            Ok(Freshness::Stale { records }) => records,
            Err(err) => return Outcome::Failed(err),
        };

        self.progress.task_started(primary, f.desc.as_deref());
        let job = Job::new(&f.ts, &f.ds, self.shell);
        // A panicking action must not take the worker pool down with it;
        // convert it to a plain failure at the boundary.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (f.action)(&job)))
            .unwrap_or_else(|payload| Err(anyhow::anyhow!("action panicked: {}", panic_message(&payload))));
        let output = job.take_output();

        let outcome = match result {
            Ok(()) => self.verify_outputs(f, use_hash, &records),
            Err(err) => Outcome::Failed(BuildError::ActionFailed {
                target: primary.clone(),
                reason: format!("{err:#}"),
            }),
        };
        if matches!(outcome, Outcome::Failed(_)) {
            // Drop whatever the action left behind so a half-written output
            // cannot pass the next freshness check.
            self.remove_outputs(f);
            self.progress.task_finished(primary, true, &output);
        } else {
            self.progress.task_finished(primary, false, &output);
        }
        outcome
    }

    /// Output honesty: after a successful action every declared output must
    /// exist.  Then persist the input digests if the hash policy applies.
    fn verify_outputs(&self, f: &FileTarget, use_hash: bool, records: &[crate::db::Record]) -> Outcome {
        for t in &f.ts {
            match self.fs.stat(t) {
                Ok(m) if m.exists() => {}
                Ok(_) => {
                    return Outcome::Failed(BuildError::OutputMissing {
                        target: f.ts[0].clone(),
                        output: t.clone(),
                    })
                }
                Err(err) => {
                    return Outcome::Failed(BuildError::ActionFailed {
                        target: f.ts[0].clone(),
                        reason: format!("stat {t:?}: {err}"),
                    })
                }
            }
        }
        if use_hash {
            if let Some(db) = self.db {
                if let Err(err) = db.write_records(records) {
                    return Outcome::Failed(BuildError::ActionFailed {
                        target: f.ts[0].clone(),
                        reason: format!("digest store: {err:#}"),
                    });
                }
            }
        }
        Outcome::Done {
            ran: true,
            fresh: false,
        }
    }

    fn remove_outputs(&self, f: &FileTarget) {
        for t in &f.ts {
            if let Err(err) = unlink_if_exists(self.fs, t) {
                log::warn!("rm {t:?}: {err}");
            }
        }
    }

    /// Apply a finished target's outcome and wake dependents.
    fn finish(&self, st: &mut ExecState, id: NodeId, forced: bool, outcome: Outcome) {
        st.running -= 1;
        if let Some(class) = self.serial_class(id) {
            if let Some(count) = st.class_running.get_mut(class) {
                *count -= 1;
            }
        }

        match outcome {
            Outcome::Done { ran, fresh } => {
                st.states[id.index()] = BuildState::Done;
                st.remaining -= 1;
                st.dirty[id.index()] = match self.graph.target(self.plan.node(id).target) {
                    Target::File(_) => ran,
                    Target::Phony(_) => forced,
                };
                if ran {
                    st.ran += 1;
                }
                if fresh {
                    st.fresh += 1;
                }
                for &succ in &self.plan.node(id).succs {
                    if st.states[succ.index()] != BuildState::Pending {
                        continue;
                    }
                    st.unfinished_preds[succ.index()] -= 1;
                    if st.unfinished_preds[succ.index()] == 0 {
                        st.states[succ.index()] = BuildState::Ready;
                        st.ready.insert((self.primary(succ).to_owned(), succ));
                    }
                }
            }
            Outcome::Failed(err) => {
                st.states[id.index()] = BuildState::Failed;
                st.remaining -= 1;
                st.failures
                    .push((self.primary(id).to_owned(), err.to_string()));
                if !self.options.keep_going {
                    st.no_new_work = true;
                }
                self.cancel_downstream(st, id);
            }
        }
    }

    /// Transitively cancel everything waiting on `id`.
    fn cancel_downstream(&self, st: &mut ExecState, id: NodeId) {
        let mut stack = vec![id];
        while let Some(at) = stack.pop() {
            for &succ in &self.plan.node(at).succs {
                match st.states[succ.index()] {
                    BuildState::Pending => {}
                    BuildState::Ready => {
                        st.ready.remove(&(self.primary(succ).to_owned(), succ));
                    }
                    _ => continue,
                }
                st.states[succ.index()] = BuildState::Cancelled;
                st.remaining -= 1;
                stack.push(succ);
            }
        }
    }

    /// In no-new-work mode: cancel the ready set, and once nothing is
    /// running, everything else still pending.
    fn drain(&self, st: &mut ExecState) {
        let ready: Vec<NodeId> = st.ready.iter().map(|(_, id)| *id).collect();
        st.ready.clear();
        for id in ready {
            st.states[id.index()] = BuildState::Cancelled;
            st.remaining -= 1;
            self.cancel_downstream(st, id);
        }
        if st.running == 0 {
            for (id, _) in self.plan.iter() {
                if matches!(st.states[id.index()], BuildState::Pending) {
                    st.states[id.index()] = BuildState::Cancelled;
                    st.remaining -= 1;
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(unix)]
fn load_average() -> f64 {
    let mut loads = [0f64; 1];
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 1) };
    if n < 1 {
        0.0
    } else {
        loads[0]
    }
}

#[cfg(not(unix))]
fn load_average() -> f64 {
    0.0
}
