use std::collections::{BTreeMap, HashSet};

#[derive(Clone, Debug, Default)]
pub struct PackageNode {
    pub name: String,
    pub version: String,
    pub deps: Vec<String>,
    pub dependents: Vec<String>,
    pub optional: bool,
    pub installed: bool,
}

/// Dependency graph over package nodes. `add_dep` is the sole edge
/// mutator and keeps both edge directions consistent: for every
/// `b ∈ deps(a)` with a known node, `a ∈ dependents(b)`.
///
/// Traversals are iterative with explicit stacks; chain depth is
/// bounded by memory, not by the host stack.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, PackageNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PackageNode> {
        self.nodes.get(name)
    }

    /// Idempotent: a second add of the same name is a no-op.
    pub fn add_package(&mut self, name: &str, version: &str) {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| PackageNode {
                name: name.to_string(),
                version: version.to_string(),
                ..Default::default()
            });
    }

    /// Record `a` depends on `b`. The reverse edge is added when `b`'s
    /// node exists; `add_package(b)` later re-links nothing, so callers
    /// add nodes before edges when they want both directions.
    pub fn add_dep(&mut self, a: &str, b: &str) {
        self.add_package(a, "");
        if let Some(node) = self.nodes.get_mut(a)
            && !node.deps.iter().any(|d| d == b)
        {
            node.deps.push(b.to_string());
        }
        if let Some(node) = self.nodes.get_mut(b)
            && !node.dependents.iter().any(|d| d == a)
        {
            node.dependents.push(a.to_string());
        }
    }

    /// Depth-first post-order over every node: each package appears
    /// exactly once and precedes all of its dependents. Only meaningful
    /// when `detect_cycles` returns `None`.
    pub fn install_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited: HashSet<&str> = HashSet::with_capacity(self.nodes.len());

        for start in self.nodes.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }
            visited.insert(start);
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            while let Some(&(current, next_dep)) = stack.last() {
                let node = &self.nodes[current];
                if next_dep < node.deps.len() {
                    let top = stack.len() - 1;
                    stack[top].1 += 1;
                    let dep = node.deps[next_dep].as_str();
                    if self.nodes.contains_key(dep) && visited.insert(dep) {
                        stack.push((dep, 0));
                    }
                } else {
                    order.push(current.to_string());
                    stack.pop();
                }
            }
        }
        order
    }

    /// Depth-first search with a recursion-stack set. A back edge to a
    /// node still on the stack is a cycle; the returned names are the
    /// stack slice from that node to the top.
    pub fn detect_cycles(&self) -> Option<Vec<String>> {
        let mut done: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();

        for start in self.nodes.keys() {
            if done.contains(start.as_str()) {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            on_stack.insert(start);
            while let Some(&(current, next_dep)) = stack.last() {
                let node = &self.nodes[current];
                if next_dep < node.deps.len() {
                    let top = stack.len() - 1;
                    stack[top].1 += 1;
                    let dep = node.deps[next_dep].as_str();
                    if !self.nodes.contains_key(dep) || done.contains(dep) {
                        continue;
                    }
                    if on_stack.contains(dep) {
                        let pos = stack
                            .iter()
                            .position(|&(name, _)| name == dep)
                            .unwrap_or(0);
                        return Some(
                            stack[pos..]
                                .iter()
                                .map(|&(name, _)| name.to_string())
                                .collect(),
                        );
                    }
                    on_stack.insert(dep);
                    stack.push((dep, 0));
                } else {
                    on_stack.remove(current);
                    done.insert(current);
                    stack.pop();
                }
            }
        }
        None
    }

    /// Every dependency name that has no node of its own.
    pub fn missing_dependencies(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .nodes
            .values()
            .flat_map(|n| n.deps.iter())
            .filter(|d| !self.nodes.contains_key(d.as_str()))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    pub fn mark_installed(&mut self, name: &str) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.installed = true;
        }
    }
}
