//! Dependency graph over the declared services.
//!
//! `deps[a] = [b, c]` means a depends on b and c. A reverse map is kept so
//! Kahn's algorithm can walk dependents without rescanning. Cycle
//! detection runs a colored DFS and reconstructs the offending cycle from
//! its parent map, so boot errors can name the services involved.

use crate::config::Manifest;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    OnStack,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// `deps[a] = [b, c]`: a depends on b and c.
    deps: BTreeMap<String, Vec<String>>,
    /// `dependents[b] = [a]`: a depends on b.
    dependents: BTreeMap<String, Vec<String>>,
}

impl Graph {
    /// Build the adjacency from a validated manifest. Every declared
    /// service appears as a node even when it has no edges.
    pub fn build(manifest: &Manifest) -> Self {
        let mut graph = Graph::default();
        for name in manifest.names() {
            graph.add_node(name.clone());
        }
        for (name, spec) in &manifest.services {
            for dep in &spec.deps {
                graph.add_edge(name.clone(), dep.clone());
            }
        }
        graph
    }

    fn add_node(&mut self, name: String) {
        self.deps.entry(name.clone()).or_default();
        self.dependents.entry(name).or_default();
    }

    /// Record that `from` depends on `to`.
    fn add_edge(&mut self, from: String, to: String) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        self.deps.entry(from.clone()).or_default().push(to.clone());
        self.dependents.entry(to).or_default().push(from);
    }

    pub fn direct_deps(&self, name: &str) -> &[String] {
        self.deps.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.deps.keys()
    }

    /// Detect a dependency cycle.
    ///
    /// DFS with unvisited / on-stack / done coloring; an edge into an
    /// on-stack node is a back-edge. The witness is reconstructed by
    /// walking the DFS parent map from the back-edge source until the
    /// target is revisited, then sorted lexicographically so error
    /// output is deterministic.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut colors: HashMap<&str, Color> = self
            .deps
            .keys()
            .map(|name| (name.as_str(), Color::Unvisited))
            .collect();
        let mut parents: HashMap<&str, &str> = HashMap::new();

        for start in self.deps.keys() {
            if colors[start.as_str()] != Color::Unvisited {
                continue;
            }
            if let Some(witness) = self.cycle_dfs(start, &mut colors, &mut parents) {
                return Some(witness);
            }
        }
        None
    }

    fn cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        colors: &mut HashMap<&'a str, Color>,
        parents: &mut HashMap<&'a str, &'a str>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::OnStack);

        for dep in self.direct_deps(node) {
            match colors[dep.as_str()] {
                Color::Unvisited => {
                    parents.insert(dep, node);
                    if let Some(witness) = self.cycle_dfs(dep, colors, parents) {
                        return Some(witness);
                    }
                }
                Color::OnStack => {
                    // Back-edge node -> dep: walk parents from the edge
                    // source until dep reappears.
                    let mut witness = vec![dep.to_string()];
                    let mut cursor = node;
                    while cursor != dep.as_str() {
                        witness.push(cursor.to_string());
                        cursor = parents[cursor];
                    }
                    witness.sort();
                    return Some(witness);
                }
                Color::Done => {}
            }
        }

        colors.insert(node, Color::Done);
        None
    }

    /// Topological order via Kahn's algorithm: repeatedly emit a node
    /// with no unresolved dependencies. The ready set is ordered
    /// lexicographically so the result is deterministic.
    pub fn topo_sort(&self) -> Result<Vec<String>> {
        if let Some(witness) = self.find_cycle() {
            return Err(Error::DependencyCycle(witness));
        }

        let mut pending: BTreeMap<&str, usize> = self
            .deps
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&name, _)| name)
            .collect();

        let mut order = Vec::with_capacity(self.deps.len());

        loop {
            let Some(next) = ready.iter().next().copied() else {
                break;
            };
            ready.remove(next);
            order.push(next.to_string());

            for dependent in self.dependents_of(next) {
                if let Some(count) = pending.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        Ok(order)
    }
}
