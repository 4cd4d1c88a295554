use std::collections::HashMap;

pub fn now_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Compare two resource->owner maps (e.g. this epoch's share against the
/// previous one) to find resources that changed owner, for audit logging
/// on rebalance. Assignments are never negotiated between actors, so this
/// is purely informational: each actor uses it to log what moved locally,
/// not to coordinate a handoff.
///
/// Returns `(resource, old_owner, new_owner)` for each resource whose owner
/// changed. Resources present in `desired` but not `current` are not
/// included — those are new claims, not moves.
pub fn diff_owners(
    current: &HashMap<String, String>,
    desired: &HashMap<String, String>,
) -> Vec<(String, String, String)> {
    let mut moves = Vec::new();
    for (resource, new_owner) in desired {
        if let Some(old_owner) = current.get(resource) {
            if old_owner != new_owner {
                moves.push((resource.clone(), old_owner.clone(), new_owner.clone()));
            }
        }
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_change() {
        let mut current = HashMap::new();
        current.insert("w1".to_string(), "a".to_string());
        current.insert("w2".to_string(), "b".to_string());
        let desired = current.clone();
        assert!(diff_owners(&current, &desired).is_empty());
    }

    #[test]
    fn detects_moves() {
        let mut current = HashMap::new();
        current.insert("w1".to_string(), "a".to_string());
        current.insert("w2".to_string(), "a".to_string());

        let mut desired = HashMap::new();
        desired.insert("w1".to_string(), "a".to_string());
        desired.insert("w2".to_string(), "b".to_string());

        let moves = diff_owners(&current, &desired);
        assert_eq!(moves.len(), 1);
        assert_eq!(
            moves[0],
            ("w2".to_string(), "a".to_string(), "b".to_string())
        );
    }

    #[test]
    fn new_resources_not_included() {
        let current = HashMap::new();
        let mut desired = HashMap::new();
        desired.insert("w1".to_string(), "a".to_string());
        assert!(diff_owners(&current, &desired).is_empty());
    }
}
