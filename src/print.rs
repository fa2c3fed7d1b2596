//! Plan and registry listings.  All writers are injected so tests can
//! capture the bytes.

use std::io::Write;

use serde::Serialize;

use crate::graph::{Graph, Target};
use crate::resolve::Plan;

/// The dry-run plan: each target of the resolved subgraph in dependency
/// order, primary output first, each dependency tab-indented, then a blank
/// line.  Deterministic and side-effect free.
pub fn dry_run<W: Write>(graph: &Graph, plan: &Plan, w: &mut W) -> std::io::Result<()> {
    for (_, node) in plan.iter() {
        let target = graph.target(node.target);
        writeln!(w, "{}", target.primary())?;
        for d in target.deps() {
            writeln!(w, "\t{d}")?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// `-t`: every registered name with its description, sorted by name.
pub fn descriptions<W: Write>(graph: &Graph, w: &mut W) -> std::io::Result<()> {
    let mut entries: Vec<(&str, Option<&str>)> = Vec::new();
    for (_, target) in graph.iter() {
        match target {
            Target::File(f) => {
                for name in &f.ts {
                    entries.push((name, f.desc.as_deref()));
                }
            }
            Target::Phony(p) => entries.push((&p.name, p.desc.as_deref())),
        }
    }
    entries.sort();
    for (name, desc) in entries {
        writeln!(w, "{name}")?;
        if let Some(desc) = desc {
            for line in desc.lines() {
                writeln!(w, "\t{line}")?;
            }
        }
    }
    Ok(())
}

fn sorted_rules(graph: &Graph) -> Vec<&Target> {
    let mut targets: Vec<&Target> = graph.iter().map(|(_, t)| t).collect();
    targets.sort_by_key(|t| t.primary());
    targets
}

/// `-P`: every registered rule with its outputs and dependencies, sorted by
/// primary output name.
pub fn dependencies<W: Write>(graph: &Graph, w: &mut W) -> std::io::Result<()> {
    for target in sorted_rules(graph) {
        match target {
            Target::File(f) => {
                for name in &f.ts {
                    writeln!(w, "{name}")?;
                }
            }
            Target::Phony(p) => writeln!(w, "{}", p.name)?,
        }
        for d in target.deps() {
            writeln!(w, "\t{d}")?;
        }
        writeln!(w)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct RuleEntry<'a> {
    ts: Vec<&'a str>,
    ds: Vec<&'a str>,
}

/// The same listing as JSON, one entry per rule.  Phonies appear with their
/// alias as the sole output.
pub fn dependencies_json<W: Write>(graph: &Graph, w: &mut W) -> anyhow::Result<()> {
    let entries: Vec<RuleEntry> = sorted_rules(graph)
        .into_iter()
        .map(|target| RuleEntry {
            ts: match target {
                Target::File(f) => f.ts.iter().map(String::as_str).collect(),
                Target::Phony(p) => vec![p.name.as_str()],
            },
            ds: target.deps().iter().map(String::as_str).collect(),
        })
        .collect();
    serde_json::to_writer(&mut *w, &entries)?;
    writeln!(w)?;
    Ok(())
}
