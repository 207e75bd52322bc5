// src/resolver/mod.rs

//! Update dependency sorting
//!
//! Splits a batch of updates into those that must be composed one after
//! another and those that may be composed in any order. Two updates that
//! touch the same package are connected; every connected group of two or
//! more goes into the ordered `sync` list, older builds first. Updates that
//! share no package with any other go into `parallel`.
//!
//! The sorter is a pure function over its input and returns indices into
//! the slice it was given.

mod graph;

pub use graph::UpdateGraph;

use crate::db::models::Update;
use crate::version::RpmVersion;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Something that contributes package versions to a compose
pub trait PackageSet {
    /// Label used in log messages
    fn label(&self) -> String;

    /// (package name, version) pairs contributed by this item
    fn packages(&self) -> Vec<(String, RpmVersion)>;
}

impl PackageSet for Update {
    fn label(&self) -> String {
        self.alias.clone()
    }

    fn packages(&self) -> Vec<(String, RpmVersion)> {
        self.builds
            .iter()
            .filter_map(|b| match b.label() {
                Ok(label) => Some((b.package_name.clone(), label)),
                Err(e) => {
                    warn!("Cannot order build {} of {}: {}", b.nvr, self.alias, e);
                    None
                }
            })
            .collect()
    }
}

/// Result of [`sorted_updates`]; every input index appears in exactly one list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedUpdates {
    /// Must be composed one at a time, in this order
    pub sync: Vec<usize>,
    /// Independent of everything else in the batch (the async group)
    pub parallel: Vec<usize>,
    /// Contributed no packages and were left out
    pub skipped: Vec<usize>,
}

impl SortedUpdates {
    /// `sync` followed by `parallel`
    pub fn ordered(&self) -> impl Iterator<Item = usize> + '_ {
        self.sync.iter().chain(self.parallel.iter()).copied()
    }
}

/// Newest version per package for one item
fn newest_per_package(packages: Vec<(String, RpmVersion)>) -> BTreeMap<String, RpmVersion> {
    let mut newest: BTreeMap<String, RpmVersion> = BTreeMap::new();
    for (name, version) in packages {
        match newest.get(&name) {
            Some(current) if current.compare(&version) != Ordering::Less => {}
            _ => {
                newest.insert(name, version);
            }
        }
    }
    newest
}

/// Partition `items` into an ordered sync list and an unordered parallel list
pub fn sorted_updates<T: PackageSet>(items: &[T]) -> SortedUpdates {
    let mut result = SortedUpdates::default();
    let mut graph = UpdateGraph::new();

    let packages: Vec<BTreeMap<String, RpmVersion>> = items
        .iter()
        .map(|item| newest_per_package(item.packages()))
        .collect();

    let mut candidates = Vec::new();
    for (index, pkgs) in packages.iter().enumerate() {
        if pkgs.is_empty() {
            warn!("{} has no builds to compose; skipping it", items[index].label());
            result.skipped.push(index);
        } else {
            candidates.push(index);
        }
    }

    for (pos, &a) in candidates.iter().enumerate() {
        for &b in &candidates[pos + 1..] {
            for (name, version_a) in &packages[a] {
                let Some(version_b) = packages[b].get(name) else {
                    continue;
                };
                match version_a.compare(version_b) {
                    Ordering::Less => graph.add_order(a, b),
                    Ordering::Greater => graph.add_order(b, a),
                    Ordering::Equal => graph.add_conflict(a, b),
                }
            }
        }
    }

    for component in graph.components(&candidates) {
        if component.len() == 1 {
            result.parallel.push(component[0]);
        } else {
            let ordered = graph.order(&component);
            debug!(
                "Sequential group: {}",
                ordered
                    .iter()
                    .map(|&i| items[i].label())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            result.sync.extend(ordered);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        name: &'static str,
        builds: Vec<&'static str>,
    }

    impl PackageSet for Fake {
        fn label(&self) -> String {
            self.name.to_string()
        }

        fn packages(&self) -> Vec<(String, RpmVersion)> {
            self.builds
                .iter()
                .map(|nvr| {
                    let parsed = crate::version::Nvr::parse(nvr).unwrap();
                    (parsed.name.clone(), parsed.label(0))
                })
                .collect()
        }
    }

    fn fake(name: &'static str, builds: &[&'static str]) -> Fake {
        Fake {
            name,
            builds: builds.to_vec(),
        }
    }

    #[test]
    fn test_shared_package_goes_to_sync() {
        let items = vec![
            fake("A", &["foo-1.0-1"]),
            fake("B", &["foo-1.0-2", "bar-2.0-1"]),
            fake("C", &["baz-3.0-1"]),
        ];
        let sorted = sorted_updates(&items);
        assert_eq!(sorted.sync, vec![0, 1]);
        assert_eq!(sorted.parallel, vec![2]);
        assert!(sorted.skipped.is_empty());
    }

    #[test]
    fn test_older_version_sorts_first_regardless_of_input_order() {
        let items = vec![fake("new", &["pkg-1.0-2"]), fake("old", &["pkg-1.0-1"])];
        assert_eq!(sorted_updates(&items).sync, vec![1, 0]);

        let items = vec![fake("new", &["pkg-1.10-1"]), fake("old", &["pkg-1.9-1"])];
        assert_eq!(sorted_updates(&items).sync, vec![1, 0]);
    }

    #[test]
    fn test_transitive_group() {
        // A and C share nothing directly but are joined through B
        let items = vec![
            fake("A", &["foo-2-1"]),
            fake("B", &["foo-1-1", "bar-1-1"]),
            fake("C", &["bar-2-1"]),
            fake("D", &["qux-1-1"]),
        ];
        let sorted = sorted_updates(&items);
        assert_eq!(sorted.sync, vec![1, 0, 2]);
        assert_eq!(sorted.parallel, vec![3]);
    }

    #[test]
    fn test_contradictory_ordering_is_total_and_deterministic() {
        let items = vec![
            fake("A", &["foo-1-1", "bar-2-1"]),
            fake("B", &["foo-2-1", "bar-1-1"]),
        ];
        let first = sorted_updates(&items);
        assert_eq!(first.sync.len(), 2);
        assert_eq!(first, sorted_updates(&items));
        assert_eq!(first.sync, vec![0, 1]);
    }

    #[test]
    fn test_empty_updates_are_skipped() {
        let items = vec![fake("A", &[]), fake("B", &["foo-1-1"])];
        let sorted = sorted_updates(&items);
        assert_eq!(sorted.skipped, vec![0]);
        assert_eq!(sorted.parallel, vec![1]);
        assert_eq!(sorted.ordered().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_every_index_appears_once() {
        let items = vec![
            fake("A", &["a-1-1"]),
            fake("B", &["a-1-2", "b-1-1"]),
            fake("C", &[]),
            fake("D", &["b-1-1"]),
            fake("E", &["e-1-1"]),
        ];
        let sorted = sorted_updates(&items);
        let mut all: Vec<usize> = sorted
            .sync
            .iter()
            .chain(&sorted.parallel)
            .chain(&sorted.skipped)
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }
}
