//! Resolving requested goals into an executable subgraph: reachability,
//! cycle detection, and a deterministic topological order.
//!
//! The traversal is an iterative three-color depth-first search so that
//! pathological dependency chains cannot exhaust the call stack.  The
//! resulting node order (dependencies before dependents) doubles as the
//! dry-run print order.

use std::collections::HashMap;

use crate::error::{BuildError, Result};
use crate::fs::FileSystem;
use crate::graph::{Graph, Lookup, TargetId};

/// Index of a node within one resolved plan.  Plans are per-invocation and
/// discarded after the run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct Node {
    pub target: TargetId,
    /// Nodes this one waits for, deduplicated, in declaration order of the
    /// dependencies that produced them.
    pub preds: Vec<NodeId>,
    /// Nodes waiting for this one.
    pub succs: Vec<NodeId>,
}

/// The reachable subgraph for one set of goals, in topological order.
#[derive(Debug)]
pub struct Plan {
    nodes: Vec<Node>,
    by_target: HashMap<TargetId, NodeId>,
}

impl Plan {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Nodes in dependency order: every predecessor appears before its
    /// dependents.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn lookup(&self, target: TargetId) -> Option<NodeId> {
        self.by_target.get(&target).copied()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    /// Currently on the DFS stack; reaching it again closes a cycle.
    OnStack,
    /// Fully visited and assigned a node.
    Done,
}

struct Frame {
    id: TargetId,
    /// Next dependency to examine.
    next_dep: usize,
    preds: Vec<NodeId>,
}

/// Resolve `goals` against the registry.  An empty goal list requests the
/// default target `"all"`.
pub fn resolve(graph: &Graph, fs: &dyn FileSystem, goals: &[String]) -> Result<Plan> {
    let default = ["all".to_owned()];
    let goals: &[String] = if goals.is_empty() { &default } else { goals };

    let mut plan = Plan {
        nodes: Vec::new(),
        by_target: HashMap::new(),
    };
    let mut colors: HashMap<TargetId, Color> = HashMap::new();

    for goal in goals {
        // Goals must be registered; a bare file on disk is not a goal.
        let id = match graph.lookup(goal) {
            Lookup::Target(id) => id,
            _ => return Err(BuildError::UnknownGoal(goal.clone())),
        };
        if colors.get(&id) == Some(&Color::Done) {
            continue;
        }
        visit(graph, fs, id, &mut plan, &mut colors)?;
    }

    // Reverse edges once the node set is final.
    for i in 0..plan.nodes.len() {
        for p in plan.nodes[i].preds.clone() {
            plan.nodes[p.index()].succs.push(NodeId(i));
        }
    }

    Ok(plan)
}

fn visit(
    graph: &Graph,
    fs: &dyn FileSystem,
    root: TargetId,
    plan: &mut Plan,
    colors: &mut HashMap<TargetId, Color>,
) -> Result<()> {
    let mut stack = vec![Frame {
        id: root,
        next_dep: 0,
        preds: Vec::new(),
    }];
    colors.insert(root, Color::OnStack);

    loop {
        let Some(frame) = stack.last_mut() else {
            break;
        };
        let id = frame.id;
        let deps = graph.target(id).deps();

        if frame.next_dep >= deps.len() {
            let frame = stack.pop().unwrap();
            let node = NodeId(plan.nodes.len());
            plan.nodes.push(Node {
                target: frame.id,
                preds: frame.preds,
                succs: Vec::new(),
            });
            plan.by_target.insert(frame.id, node);
            colors.insert(frame.id, Color::Done);
            if let Some(parent) = stack.last_mut() {
                if !parent.preds.contains(&node) {
                    parent.preds.push(node);
                }
            }
            continue;
        }

        let name = &deps[frame.next_dep];
        frame.next_dep += 1;
        match graph.lookup_with_disk(fs, name) {
            Lookup::Target(dep) => match colors.get(&dep) {
                None => {
                    colors.insert(dep, Color::OnStack);
                    stack.push(Frame {
                        id: dep,
                        next_dep: 0,
                        preds: Vec::new(),
                    });
                }
                Some(Color::OnStack) => {
                    return Err(cycle_error(graph, &stack, dep));
                }
                Some(Color::Done) => {
                    let node = plan.by_target[&dep];
                    let frame = stack.last_mut().unwrap();
                    if !frame.preds.contains(&node) {
                        frame.preds.push(node);
                    }
                }
            },
            // Source leaves carry no node; freshness stats them directly.
            Lookup::Source => {}
            Lookup::NotFound => {
                return Err(BuildError::MissingInput(name.clone()));
            }
        }
    }

    Ok(())
}

/// Reconstruct the on-stack path that closed the cycle, starting and ending
/// at the repeated target.
fn cycle_error(graph: &Graph, stack: &[Frame], repeat: TargetId) -> BuildError {
    let start = stack
        .iter()
        .position(|f| f.id == repeat)
        .unwrap_or(0);
    let mut path: Vec<String> = stack[start..]
        .iter()
        .map(|f| graph.target(f.id).primary().to_owned())
        .collect();
    path.push(graph.target(repeat).primary().to_owned());
    BuildError::Cycle { path }
}
