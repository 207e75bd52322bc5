// src/resolver/graph.rs

//! Ordering graph over a batch of updates
//!
//! Nodes are input indices. Conflict edges are undirected and mark two
//! updates that touch the same package; order edges point from the update
//! carrying the older build to the one carrying the newer build.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::warn;

#[derive(Debug, Default)]
pub struct UpdateGraph {
    /// Undirected conflict adjacency
    conflicts: BTreeMap<usize, BTreeSet<usize>>,
    /// Directed order edges, older -> newer
    order: BTreeMap<usize, BTreeSet<usize>>,
}

impl UpdateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conflict(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.conflicts.entry(a).or_default().insert(b);
        self.conflicts.entry(b).or_default().insert(a);
    }

    /// Record that `older` must be composed before `newer`
    pub fn add_order(&mut self, older: usize, newer: usize) {
        if older == newer {
            return;
        }
        self.add_conflict(older, newer);
        self.order.entry(older).or_default().insert(newer);
    }

    /// Connected components among `nodes`, each sorted, ordered by their
    /// lowest index
    pub fn components(&self, nodes: &[usize]) -> Vec<Vec<usize>> {
        let allowed: HashSet<usize> = nodes.iter().copied().collect();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut components = Vec::new();

        let mut sorted: Vec<usize> = nodes.to_vec();
        sorted.sort_unstable();

        for &start in &sorted {
            if !seen.insert(start) {
                continue;
            }
            let mut component = vec![start];
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                for &next in self.conflicts.get(&node).into_iter().flatten() {
                    if allowed.contains(&next) && seen.insert(next) {
                        component.push(next);
                        stack.push(next);
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }

        components
    }

    /// Total order over `members` honouring the order edges
    ///
    /// Kahn's algorithm, always taking the lowest ready index. If the edges
    /// form a cycle, the lowest remaining index is taken regardless of its
    /// unmet predecessors, so the result is total and deterministic.
    pub fn order(&self, members: &[usize]) -> Vec<usize> {
        let allowed: BTreeSet<usize> = members.iter().copied().collect();
        let mut in_degree: BTreeMap<usize, usize> = allowed.iter().map(|&n| (n, 0)).collect();

        for &from in &allowed {
            for &to in self.order.get(&from).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(&to) {
                    *degree += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut remaining = allowed;
        let mut result = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let next = match ready.pop_first() {
                Some(n) => n,
                None => {
                    // Only a cycle can leave nodes without a ready one
                    let Some(&n) = remaining.first() else { break };
                    warn!(
                        "Conflicting version ordering among updates {:?}; breaking cycle at input {}",
                        remaining, n
                    );
                    n
                }
            };
            if !remaining.remove(&next) {
                continue;
            }
            result.push(next);

            for &to in self.order.get(&next).into_iter().flatten() {
                if !remaining.contains(&to) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(&to) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(to);
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components() {
        let mut graph = UpdateGraph::new();
        graph.add_conflict(0, 3);
        graph.add_conflict(3, 4);

        assert_eq!(
            graph.components(&[0, 1, 2, 3, 4]),
            vec![vec![0, 3, 4], vec![1], vec![2]]
        );
        // Excluded nodes break the chain
        assert_eq!(graph.components(&[0, 4]), vec![vec![0], vec![4]]);
    }

    #[test]
    fn test_order_follows_edges() {
        let mut graph = UpdateGraph::new();
        graph.add_order(2, 0);
        graph.add_order(0, 1);
        assert_eq!(graph.order(&[0, 1, 2]), vec![2, 0, 1]);
    }

    #[test]
    fn test_cycle_is_broken_deterministically() {
        let mut graph = UpdateGraph::new();
        graph.add_order(0, 1);
        graph.add_order(1, 2);
        graph.add_order(2, 0);

        let first = graph.order(&[0, 1, 2]);
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(graph.order(&[0, 1, 2]), first);
    }
}
