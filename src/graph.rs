//! The target registry: the data model for rules and the construction-time
//! invariants over their names.
//!
//! A registry is built single-threaded by the host program and is immutable
//! once the driver starts; everything downstream (resolver, executor,
//! printers) borrows it.

use std::collections::HashMap;

use crate::error::{BuildError, Result};
use crate::shell::Job;

/// The work a file target performs, supplied by the host program.  The engine
/// treats it as an opaque value with a single invocation method receiving the
/// job context.
pub type Action = Box<dyn Fn(&Job) -> anyhow::Result<()> + Send + Sync>;

/// Registered targets are represented as dense indices into the registry,
/// stable for the lifetime of the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TargetId(usize);

impl TargetId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A rule producing one or more file outputs from its inputs.
pub struct FileTarget {
    /// Output names, declaration order; `ts[0]` is the primary output.
    pub ts: Vec<String>,
    /// Input names, declaration order.
    pub ds: Vec<String>,
    pub action: Action,
    pub desc: Option<String>,
    /// Targets sharing a class never exceed the per-class concurrency bound.
    pub serial_class: Option<String>,
    /// Explicit freshness policy; `None` inherits the engine default.
    pub use_hash: Option<bool>,
}

/// A named alias with dependencies and no file output.  Never fresh.
pub struct PhonyTarget {
    pub name: String,
    pub ds: Vec<String>,
    pub desc: Option<String>,
}

pub enum Target {
    File(FileTarget),
    Phony(PhonyTarget),
}

impl Target {
    /// The name the target is principally known by: first output for file
    /// targets, the alias for phonies.  Used for dispatch tie-breaking and
    /// all user-facing output.
    pub fn primary(&self) -> &str {
        match self {
            Target::File(f) => &f.ts[0],
            Target::Phony(p) => &p.name,
        }
    }

    pub fn deps(&self) -> &[String] {
        match self {
            Target::File(f) => &f.ds,
            Target::Phony(p) => &p.ds,
        }
    }

    /// File outputs; empty for phonies.
    pub fn outputs(&self) -> &[String] {
        match self {
            Target::File(f) => &f.ts,
            Target::Phony(_) => &[],
        }
    }

    pub fn desc(&self) -> Option<&str> {
        match self {
            Target::File(f) => f.desc.as_deref(),
            Target::Phony(p) => p.desc.as_deref(),
        }
    }
}

/// What a dependency name resolves to: a registered target, an on-disk
/// source leaf, or nothing.
pub enum Lookup {
    Target(TargetId),
    /// No rule produces the name, but it exists on disk: an input-only leaf.
    Source,
    NotFound,
}

pub struct Graph {
    targets: Vec<Target>,
    by_name: HashMap<String, TargetId>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph {
            targets: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn add_file(&mut self, file: FileTarget) -> Result<TargetId> {
        if file.ts.is_empty() {
            return Err(BuildError::BadArgument(
                "file target with no outputs".to_owned(),
            ));
        }
        for (i, t) in file.ts.iter().enumerate() {
            if t.is_empty() {
                return Err(BuildError::BadArgument("empty output name".to_owned()));
            }
            if file.ts[..i].contains(t) {
                return Err(BuildError::BadArgument(format!(
                    "output {t:?} repeated within one rule"
                )));
            }
            if self.by_name.contains_key(t) {
                return Err(BuildError::DuplicateTarget(t.clone()));
            }
        }
        let id = TargetId(self.targets.len());
        for t in &file.ts {
            self.by_name.insert(t.clone(), id);
        }
        self.targets.push(Target::File(file));
        Ok(id)
    }

    pub fn add_phony(&mut self, phony: PhonyTarget) -> Result<TargetId> {
        if phony.name.is_empty() {
            return Err(BuildError::BadArgument("empty phony name".to_owned()));
        }
        if self.by_name.contains_key(&phony.name) {
            return Err(BuildError::DuplicateTarget(phony.name.clone()));
        }
        let id = TargetId(self.targets.len());
        self.by_name.insert(phony.name.clone(), id);
        self.targets.push(Target::Phony(phony));
        Ok(id)
    }

    /// Registry-only lookup; never reports `Source`.
    pub fn lookup(&self, name: &str) -> Lookup {
        match self.by_name.get(name) {
            Some(&id) => Lookup::Target(id),
            None => Lookup::NotFound,
        }
    }

    /// Full lookup as the resolver sees names: unregistered names that
    /// exist on disk are source leaves.  A failing stat counts as absent.
    pub fn lookup_with_disk(&self, fs: &dyn crate::fs::FileSystem, name: &str) -> Lookup {
        match self.lookup(name) {
            Lookup::Target(id) => Lookup::Target(id),
            _ => {
                if fs.stat(name).map(|m| m.exists()).unwrap_or(false) {
                    Lookup::Source
                } else {
                    Lookup::NotFound
                }
            }
        }
    }

    pub fn target(&self, id: TargetId) -> &Target {
        &self.targets[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (TargetId, &Target)> {
        self.targets
            .iter()
            .enumerate()
            .map(|(i, t)| (TargetId(i), t))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
