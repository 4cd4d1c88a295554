//! Pure assignment function: `(actors, resources) -> {actor -> resources}`.
//!
//! Deliberately stateless. Earlier generations of this kind of balancer (see
//! `StickyBalancedStrategy` in the coordination crate's ancestry) minimize
//! movement against a remembered current assignment, which requires a
//! central authority to hold that state. This core instead has every actor
//! recompute its share from scratch, independently, every epoch — so the
//! function here takes no "current assignment" argument at all: round-robin
//! by index over the sorted inputs is enough to be balanced and
//! deterministic without shared state.

use actor_common::Assignment;

/// Compute the share of every actor in `actors` over `resources`.
///
/// Both inputs are sorted internally before assigning, so callers do not
/// need to pre-sort — the same two sets always produce the same mapping
/// regardless of the order they were collected in.
pub fn compute_assignment(actors: &[String], resources: &[String]) -> Assignment {
    let mut assignment: Assignment = actors.iter().map(|a| (a.clone(), Vec::new())).collect();

    if actors.is_empty() {
        return assignment;
    }

    let mut sorted_actors: Vec<&String> = actors.iter().collect();
    sorted_actors.sort();
    let mut sorted_resources: Vec<&String> = resources.iter().collect();
    sorted_resources.sort();

    for (i, resource) in sorted_resources.into_iter().enumerate() {
        let actor = sorted_actors[i % sorted_actors.len()];
        assignment.get_mut(actor).unwrap().push(resource.clone());
    }

    assignment
}

/// This actor's share from a full assignment, or an empty slice if it has none.
pub fn share_of<'a>(assignment: &'a Assignment, actor: &str) -> &'a [String] {
    assignment.get(actor).map(Vec::as_slice).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_actors_yields_empty_assignment() {
        let assignment = compute_assignment(&[], &strs(&["w1", "w2"]));
        assert!(assignment.is_empty());
    }

    #[test]
    fn no_resources_gives_every_actor_an_empty_share() {
        let actors = strs(&["a", "b"]);
        let assignment = compute_assignment(&actors, &[]);
        assert_eq!(assignment.len(), 2);
        assert!(share_of(&assignment, "a").is_empty());
        assert!(share_of(&assignment, "b").is_empty());
    }

    #[test]
    fn balanced_even_split() {
        let actors = strs(&["A", "B", "C"]);
        let resources = strs(&["w1", "w2", "w3", "w4", "w5", "w6"]);
        let assignment = compute_assignment(&actors, &resources);

        assert_eq!(share_of(&assignment, "A"), strs(&["w1", "w4"]).as_slice());
        assert_eq!(share_of(&assignment, "B"), strs(&["w2", "w5"]).as_slice());
        assert_eq!(share_of(&assignment, "C"), strs(&["w3", "w6"]).as_slice());
    }

    #[test]
    fn balanced_uneven_split_stays_within_one() {
        let actors = strs(&["A", "B", "C"]);
        let resources = strs(&["w1", "w2", "w3", "w4", "w5"]);
        let assignment = compute_assignment(&actors, &resources);

        let sizes: Vec<usize> = assignment.values().map(Vec::len).collect();
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        assert!(max - min <= 1);
        assert_eq!(sizes.iter().sum::<usize>(), resources.len());
    }

    #[test]
    fn deterministic_across_repeated_calls() {
        let actors = strs(&["C", "A", "B"]);
        let resources = strs(&["w3", "w1", "w2", "w6", "w5", "w4"]);
        let first = compute_assignment(&actors, &resources);
        let second = compute_assignment(&actors, &resources);
        assert_eq!(first, second);
    }

    #[test]
    fn idempotent_order_of_inputs_does_not_matter() {
        let a = compute_assignment(&strs(&["A", "B", "C"]), &strs(&["w1", "w2", "w3"]));
        let b = compute_assignment(&strs(&["C", "B", "A"]), &strs(&["w3", "w2", "w1"]));
        assert_eq!(a, b);
    }

    #[test]
    fn every_resource_assigned_exactly_once() {
        let actors = strs(&["A", "B", "C", "D"]);
        let resources = strs(&["w1", "w2", "w3", "w4", "w5", "w6", "w7"]);
        let assignment = compute_assignment(&actors, &resources);

        let mut seen: Vec<&String> = assignment.values().flatten().collect();
        seen.sort();
        let mut expected: Vec<&String> = resources.iter().collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn removing_one_actor_reassigns_a_bounded_share() {
        let resources = strs(&["w1", "w2", "w3", "w4", "w5", "w6"]);
        let before = compute_assignment(&strs(&["A", "B", "C"]), &resources);
        let after = compute_assignment(&strs(&["A", "C"]), &resources);

        let moved = resources
            .iter()
            .filter(|r| {
                let owner_before = before
                    .iter()
                    .find(|(_, share)| share.contains(r))
                    .map(|(a, _)| a);
                let owner_after = after
                    .iter()
                    .find(|(_, share)| share.contains(r))
                    .map(|(a, _)| a);
                owner_before != owner_after
            })
            .count();

        // Only B's former share (2 of 6) should need to move.
        assert!(moved <= resources.len() / 2 + 1);
    }

    #[test]
    fn scenario_three_actors_six_webhooks() {
        let actors = strs(&["A", "B", "C"]);
        let resources = strs(&["w1", "w2", "w3", "w4", "w5", "w6"]);
        let assignment = compute_assignment(&actors, &resources);
        assert_eq!(share_of(&assignment, "A"), strs(&["w1", "w4"]).as_slice());
        assert_eq!(share_of(&assignment, "B"), strs(&["w2", "w5"]).as_slice());
        assert_eq!(share_of(&assignment, "C"), strs(&["w3", "w6"]).as_slice());

        let after_b_removed = compute_assignment(&strs(&["A", "C"]), &resources);
        assert_eq!(
            share_of(&after_b_removed, "A"),
            strs(&["w1", "w3", "w5"]).as_slice()
        );
        assert_eq!(
            share_of(&after_b_removed, "C"),
            strs(&["w2", "w4", "w6"]).as_slice()
        );
    }
}
