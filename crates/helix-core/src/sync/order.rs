//! Application ordering for planned operations.
//!
//! Three dependency rules make an ordering legal:
//!
//! - an add waits for the add of its parent directory;
//! - an add waits for any remove of the same path under the tree's case
//!   rule (a case-only rename must vacate the old name first);
//! - a remove waits for the removes of its children.
//!
//! Everything else is unordered, and the sorter deliberately picks among
//! ready items uniformly at random: equivalent orderings come out
//! unpredictably, which surfaces hidden order dependence in tests and
//! spreads load across runs. The randomness source is injected by the
//! caller, so tests can pin a deterministic generator.

use std::collections::HashMap;

use rand::Rng;

use crate::fs::path::{CaseSensitivity, SyncPath};

use super::item::{DisplayOperation, PreSync};
use super::SyncError;

/// Order `items` so that every dependency is applied before its
/// dependents, picking uniformly at random among unblocked items.
///
/// # Errors
///
/// Returns `SyncError::CyclicDependency` if the dependency graph has a
/// cycle. The three rules cannot form one for valid inputs, so this
/// signals a bug upstream.
pub(crate) fn order_items<R: Rng>(
    items: Vec<PreSync>,
    case: CaseSensitivity,
    rng: &mut R,
) -> Result<Vec<PreSync>, SyncError> {
    let n = items.len();

    fn path_of(item: &PreSync) -> Option<&SyncPath> {
        item.decr_name.as_ref()
    }

    let mut adds_by_path: HashMap<String, Vec<usize>> = HashMap::new();
    let mut removes_by_fold: HashMap<String, Vec<usize>> = HashMap::new();
    let mut removes_by_parent: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        let Some(path) = path_of(item) else { continue };
        match item.operation {
            DisplayOperation::Add => {
                adds_by_path
                    .entry(path.as_str().to_string())
                    .or_default()
                    .push(i);
            }
            DisplayOperation::Remove => {
                removes_by_fold
                    .entry(case.fold(path.as_str()))
                    .or_default()
                    .push(i);
                if let Some(parent) = path.parent() {
                    removes_by_parent
                        .entry(parent.as_str().to_string())
                        .or_default()
                        .push(i);
                }
            }
            _ => {}
        }
    }

    // prerequisite -> dependents, plus per-item prerequisite counts.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut blockers: Vec<usize> = vec![0; n];
    let add_edge = |from: usize, to: usize, dependents: &mut Vec<Vec<usize>>, blockers: &mut Vec<usize>| {
        if from != to {
            dependents[from].push(to);
            blockers[to] += 1;
        }
    };

    for (i, item) in items.iter().enumerate() {
        let Some(path) = path_of(item) else { continue };
        match item.operation {
            DisplayOperation::Add => {
                if let Some(parent) = path.parent() {
                    if let Some(parents) = adds_by_path.get(parent.as_str()) {
                        for &j in parents {
                            add_edge(j, i, &mut dependents, &mut blockers);
                        }
                    }
                }
                if let Some(removes) = removes_by_fold.get(&case.fold(path.as_str())) {
                    for &j in removes {
                        add_edge(j, i, &mut dependents, &mut blockers);
                    }
                }
            }
            DisplayOperation::Remove => {
                if let Some(children) = removes_by_parent.get(path.as_str()) {
                    for &j in children {
                        add_edge(j, i, &mut dependents, &mut blockers);
                    }
                }
            }
            _ => {}
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| blockers[i] == 0).collect();
    let mut slots: Vec<Option<PreSync>> = items.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(n);

    while !ready.is_empty() {
        let pick = rng.gen_range(0..ready.len());
        let current = ready.swap_remove(pick);
        ordered.push(slots[current].take().expect("item emitted twice"));
        for &dependent in &dependents[current] {
            blockers[dependent] -= 1;
            if blockers[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if ordered.len() != n {
        return Err(SyncError::CyclicDependency);
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::entry::EntryKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn op_item(path: &str, operation: DisplayOperation) -> PreSync {
        let mut item = PreSync::empty();
        item.decr_name = Some(SyncPath::new(path));
        item.operation = operation;
        item.display_kind = EntryKind::File;
        item
    }

    fn positions(ordered: &[PreSync]) -> HashMap<(String, DisplayOperation), usize> {
        ordered
            .iter()
            .enumerate()
            .map(|(i, item)| {
                (
                    (
                        item.decr_name.as_ref().unwrap().as_str().to_string(),
                        item.operation,
                    ),
                    i,
                )
            })
            .collect()
    }

    #[test]
    fn test_parent_add_before_child_add() {
        for seed in 0..50 {
            let items = vec![
                op_item("a/b/c.txt", DisplayOperation::Add),
                op_item("a", DisplayOperation::Add),
                op_item("a/b", DisplayOperation::Add),
            ];
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let ordered = order_items(items, CaseSensitivity::Sensitive, &mut rng).unwrap();
            let pos = positions(&ordered);
            assert!(
                pos[&("a".to_string(), DisplayOperation::Add)]
                    < pos[&("a/b".to_string(), DisplayOperation::Add)]
            );
            assert!(
                pos[&("a/b".to_string(), DisplayOperation::Add)]
                    < pos[&("a/b/c.txt".to_string(), DisplayOperation::Add)]
            );
        }
    }

    #[test]
    fn test_child_remove_before_parent_remove() {
        for seed in 0..50 {
            let items = vec![
                op_item("d", DisplayOperation::Remove),
                op_item("d/e", DisplayOperation::Remove),
                op_item("d/e/f.txt", DisplayOperation::Remove),
            ];
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let ordered = order_items(items, CaseSensitivity::Sensitive, &mut rng).unwrap();
            let pos = positions(&ordered);
            assert!(
                pos[&("d/e/f.txt".to_string(), DisplayOperation::Remove)]
                    < pos[&("d/e".to_string(), DisplayOperation::Remove)]
            );
            assert!(
                pos[&("d/e".to_string(), DisplayOperation::Remove)]
                    < pos[&("d".to_string(), DisplayOperation::Remove)]
            );
        }
    }

    #[test]
    fn test_case_only_rename_removes_old_name_first() {
        for seed in 0..50 {
            let items = vec![
                op_item("Readme.md", DisplayOperation::Add),
                op_item("readme.md", DisplayOperation::Remove),
            ];
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let ordered = order_items(items, CaseSensitivity::Insensitive, &mut rng).unwrap();
            let pos = positions(&ordered);
            assert!(
                pos[&("readme.md".to_string(), DisplayOperation::Remove)]
                    < pos[&("Readme.md".to_string(), DisplayOperation::Add)]
            );
        }
    }

    #[test]
    fn test_case_rule_sensitive_means_no_ordering_edge() {
        // On a case-sensitive tree the two names are unrelated; over many
        // seeds both orders must show up.
        let mut saw_add_first = false;
        let mut saw_remove_first = false;
        for seed in 0..100 {
            let items = vec![
                op_item("Readme.md", DisplayOperation::Add),
                op_item("readme.md", DisplayOperation::Remove),
            ];
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let ordered = order_items(items, CaseSensitivity::Sensitive, &mut rng).unwrap();
            match ordered[0].operation {
                DisplayOperation::Add => saw_add_first = true,
                DisplayOperation::Remove => saw_remove_first = true,
                _ => unreachable!(),
            }
        }
        assert!(saw_add_first && saw_remove_first);
    }

    #[test]
    fn test_unrelated_items_are_shuffled() {
        let mut distinct = std::collections::HashSet::new();
        for seed in 0..20 {
            let items = vec![
                op_item("one", DisplayOperation::Change),
                op_item("two", DisplayOperation::Change),
                op_item("three", DisplayOperation::Change),
                op_item("four", DisplayOperation::Change),
            ];
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let ordered = order_items(items, CaseSensitivity::Sensitive, &mut rng).unwrap();
            let names: Vec<String> = ordered
                .iter()
                .map(|i| i.decr_name.as_ref().unwrap().as_str().to_string())
                .collect();
            distinct.insert(names);
        }
        assert!(distinct.len() > 1, "sorter never varied the order");
    }

    #[test]
    fn test_items_without_names_pass_through() {
        let mut nameless = PreSync::empty();
        nameless.operation = DisplayOperation::Error;
        let items = vec![nameless, op_item("a", DisplayOperation::Add)];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let ordered = order_items(items, CaseSensitivity::Sensitive, &mut rng).unwrap();
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn test_empty_input() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let ordered = order_items(Vec::new(), CaseSensitivity::Sensitive, &mut rng).unwrap();
        assert!(ordered.is_empty());
    }
}
