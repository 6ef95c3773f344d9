//! Plan computation: the ordered, deduplicated dependency closure of one
//! requested target.
//!
//! `DependsOn` edges pull targets into the plan; `Before`/`After` hints are
//! advisory and only reorder targets the closure already includes. Ordering
//! is depth-first postorder (dependencies emitted before dependents, the
//! requested target last), with declared-edge order and then registration
//! order as the tie-break, so identical graphs always plan identically.

use std::collections::{HashMap, HashSet};

use crate::error::{CapstanError, Result};
use crate::target::{Target, TargetRegistry};

/// Ordered sequence of distinct target names, computed fresh per invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    targets: Vec<String>,
}

impl ExecutionPlan {
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Compute the execution plan for `requested`.
///
/// Fails with [`CapstanError::UnknownTarget`] when the requested target or
/// any transitive dependency is not registered, and with
/// [`CapstanError::CyclicDependency`] (naming every target on the cycle)
/// when the dependency relation, hints included, is not acyclic. No target
/// executes on failure; planning happens entirely up front.
pub fn compute_plan(registry: &TargetRegistry, requested: &str) -> Result<ExecutionPlan> {
    let root = registry.lookup(requested)?;

    let included = dependency_closure(registry, root)?;
    let edges = fold_hint_edges(registry, &included);

    let mut walk = OrderWalk {
        edges: &edges,
        state: HashMap::new(),
        stack: Vec::new(),
        ordered: Vec::new(),
    };
    walk.visit(root.name())?;

    Ok(ExecutionPlan {
        targets: walk.ordered,
    })
}

/// Canonical names reachable from `root` over `DependsOn` edges only
fn dependency_closure<'a>(
    registry: &'a TargetRegistry,
    root: &'a Target,
) -> Result<HashSet<&'a str>> {
    let mut included: HashSet<&str> = HashSet::new();
    let mut pending = vec![root];
    while let Some(target) = pending.pop() {
        if !included.insert(target.name()) {
            continue;
        }
        for dep in target.depends_on() {
            pending.push(registry.lookup(dep)?);
        }
    }
    Ok(included)
}

/// Dependency edges per included target: declared `DependsOn` first, then
/// `After` hints, then reversed `Before` hints from other targets in
/// registration order. Hints referencing targets outside the closure are
/// dropped.
fn fold_hint_edges<'a>(
    registry: &'a TargetRegistry,
    included: &HashSet<&'a str>,
) -> HashMap<&'a str, Vec<&'a str>> {
    let canonical = |name: &str| -> Option<&'a str> {
        registry
            .lookup(name)
            .ok()
            .map(Target::name)
            .filter(|n| included.contains(n))
    };

    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for target in registry.iter() {
        if !included.contains(target.name()) {
            continue;
        }
        let deps = edges.entry(target.name()).or_default();
        for dep in target.depends_on() {
            if let Some(name) = canonical(dep) {
                deps.push(name);
            }
        }
        for hint in target.after() {
            if let Some(name) = canonical(hint) {
                deps.push(name);
            }
        }
    }

    // x.before(y): y must wait for x. Registry iteration keeps these in
    // registration order.
    for target in registry.iter() {
        if !included.contains(target.name()) {
            continue;
        }
        for hint in target.before() {
            if let Some(name) = canonical(hint) {
                edges.entry(name).or_default().push(target.name());
            }
        }
    }

    edges
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    InProgress,
    Done,
}

struct OrderWalk<'a> {
    edges: &'a HashMap<&'a str, Vec<&'a str>>,
    state: HashMap<&'a str, VisitState>,
    stack: Vec<&'a str>,
    ordered: Vec<String>,
}

impl<'a> OrderWalk<'a> {
    fn visit(&mut self, name: &'a str) -> Result<()> {
        match self.state.get(name) {
            Some(VisitState::Done) => return Ok(()),
            Some(VisitState::InProgress) => return Err(self.cycle_from(name)),
            None => {}
        }

        self.state.insert(name, VisitState::InProgress);
        self.stack.push(name);

        if let Some(deps) = self.edges.get(name) {
            // Duplicate edges are harmless; the memoized state skips them
            for dep in deps.clone() {
                self.visit(dep)?;
            }
        }

        self.stack.pop();
        self.state.insert(name, VisitState::Done);
        self.ordered.push(name.to_string());
        Ok(())
    }

    /// Slice of the active walk from the first occurrence of `name`,
    /// closed back on itself
    fn cycle_from(&self, name: &str) -> CapstanError {
        let start = self
            .stack
            .iter()
            .position(|&n| n == name)
            .unwrap_or_default();
        let mut cycle: Vec<String> = self.stack[start..].iter().map(|n| n.to_string()).collect();
        cycle.push(name.to_string());
        CapstanError::CyclicDependency { cycle }
    }
}
