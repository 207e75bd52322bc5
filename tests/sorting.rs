// tests/sorting.rs

//! Integration tests for update dependency sorting

use bodhi::resolver::{PackageSet, sorted_updates};
use bodhi::version::{Nvr, RpmVersion};

struct Batch {
    name: &'static str,
    nvrs: Vec<&'static str>,
}

impl Batch {
    fn new(name: &'static str, nvrs: &[&'static str]) -> Self {
        Self {
            name,
            nvrs: nvrs.to_vec(),
        }
    }
}

impl PackageSet for Batch {
    fn label(&self) -> String {
        self.name.to_string()
    }

    fn packages(&self) -> Vec<(String, RpmVersion)> {
        self.nvrs
            .iter()
            .map(|nvr| {
                let nvr = Nvr::parse(nvr).unwrap();
                (nvr.name.clone(), nvr.label(0))
            })
            .collect()
    }
}

#[test]
fn test_shared_package_goes_to_sync() {
    let items = vec![
        Batch::new("A", &["foo-1.0-1"]),
        Batch::new("B", &["foo-1.0-2", "bar-2.0-1"]),
        Batch::new("C", &["baz-3.0-1"]),
    ];

    let sorted = sorted_updates(&items);
    assert_eq!(sorted.sync, vec![0, 1]);
    assert_eq!(sorted.parallel, vec![2]);
    assert!(sorted.skipped.is_empty());
}

#[test]
fn test_older_build_ordered_first() {
    let items = vec![
        Batch::new("new", &["pkg-1.0-2"]),
        Batch::new("old", &["pkg-1.0-1"]),
    ];

    let sorted = sorted_updates(&items);
    assert_eq!(sorted.sync, vec![1, 0]);
}

#[test]
fn test_chain_through_shared_packages() {
    let items = vec![
        Batch::new("C", &["bar-2.0-2", "qux-1-1"]),
        Batch::new("A", &["foo-1.0-1"]),
        Batch::new("B", &["foo-1.0-2", "bar-2.0-1"]),
        Batch::new("D", &["lonely-1-1"]),
    ];

    let sorted = sorted_updates(&items);
    assert_eq!(sorted.sync, vec![1, 2, 0]);
    assert_eq!(sorted.parallel, vec![3]);
}

#[test]
fn test_partition_is_total_and_deterministic() {
    let items = vec![
        Batch::new("A", &["foo-1.0-1"]),
        Batch::new("B", &[]),
        Batch::new("C", &["foo-1.0-1"]),
        Batch::new("D", &["bar-1-1", "foo-2-1"]),
        Batch::new("E", &["baz-1-1"]),
        Batch::new("F", &["bar-0.9-1"]),
    ];

    let first = sorted_updates(&items);
    let second = sorted_updates(&items);
    assert_eq!(first, second);

    let mut seen: Vec<usize> = first
        .sync
        .iter()
        .chain(&first.parallel)
        .chain(&first.skipped)
        .copied()
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..items.len()).collect::<Vec<_>>());
    assert_eq!(first.skipped, vec![1]);
    assert_eq!(first.parallel, vec![4]);

    // F's bar is older than D's, and D's foo is newer than A's and C's
    let position = |i: usize| first.sync.iter().position(|&x| x == i).unwrap();
    assert!(position(5) < position(3));
    assert!(position(0) < position(3));
    assert!(position(2) < position(3));
}
