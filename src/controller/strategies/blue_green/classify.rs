use crate::crd::rollout::POD_TEMPLATE_HASH_LABEL;
use k8s_openapi::api::apps::v1::ReplicaSet;
use std::cmp::Ordering;

/// ReplicaSets of one rollout split by pod template fingerprint
#[derive(Debug, Default)]
pub struct Classified<'a> {
    /// The ReplicaSet running the current pod template, if it exists yet
    pub new: Option<&'a ReplicaSet>,
    /// Every other ReplicaSet, newest first
    pub old: Vec<&'a ReplicaSet>,
}

/// Fingerprint label of a ReplicaSet (empty values count as unlabelled)
pub fn replicaset_hash(rs: &ReplicaSet) -> Option<&str> {
    rs.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(POD_TEMPLATE_HASH_LABEL))
        .map(String::as_str)
        .filter(|hash| !hash.is_empty())
}

/// Split ReplicaSets into the new group and the old groups
///
/// Old groups are ordered by creation time descending; ReplicaSets created in the
/// same second are ordered by name so the result never depends on list order.
pub fn classify<'a>(groups: &'a [ReplicaSet], current_hash: &str) -> Classified<'a> {
    let mut ordered: Vec<&ReplicaSet> = groups.iter().collect();
    ordered.sort_by(|a, b| newest_first(a, b));

    let mut classified = Classified::default();
    for rs in ordered {
        if classified.new.is_none() && replicaset_hash(rs) == Some(current_hash) {
            classified.new = Some(rs);
        } else {
            classified.old.push(rs);
        }
    }
    classified
}

fn newest_first(a: &ReplicaSet, b: &ReplicaSet) -> Ordering {
    b.metadata
        .creation_timestamp
        .cmp(&a.metadata.creation_timestamp)
        .then_with(|| a.metadata.name.cmp(&b.metadata.name))
}

#[cfg(test)]
mod tests {
    use super::super::testing::replicaset;
    use super::*;

    #[test]
    fn test_classify_picks_matching_hash_as_new() {
        let groups = vec![
            replicaset("app-aaa", "aaa", "2024-01-01T00:00:00Z", 3, 3),
            replicaset("app-bbb", "bbb", "2024-01-02T00:00:00Z", 3, 3),
        ];

        let classified = classify(&groups, "bbb");

        assert_eq!(
            classified.new.and_then(|rs| rs.metadata.name.as_deref()),
            Some("app-bbb")
        );
        assert_eq!(classified.old.len(), 1);
        assert_eq!(classified.old[0].metadata.name.as_deref(), Some("app-aaa"));
    }

    #[test]
    fn test_classify_without_match_has_no_new_group() {
        let groups = vec![replicaset("app-aaa", "aaa", "2024-01-01T00:00:00Z", 3, 3)];

        let classified = classify(&groups, "zzz");

        assert!(classified.new.is_none());
        assert_eq!(classified.old.len(), 1);
    }

    #[test]
    fn test_old_groups_are_newest_first_with_name_tiebreak() {
        let groups = vec![
            replicaset("app-old", "h1", "2024-01-01T00:00:00Z", 1, 1),
            replicaset("app-b", "h3", "2024-01-03T00:00:00Z", 1, 1),
            replicaset("app-a", "h2", "2024-01-03T00:00:00Z", 1, 1),
        ];

        let classified = classify(&groups, "new");
        let names: Vec<_> = classified
            .old
            .iter()
            .filter_map(|rs| rs.metadata.name.as_deref())
            .collect();

        assert_eq!(names, vec!["app-a", "app-b", "app-old"]);
    }

    #[test]
    fn test_empty_hash_label_is_unlabelled() {
        let mut rs = replicaset("app-x", "", "2024-01-01T00:00:00Z", 1, 1);
        assert_eq!(replicaset_hash(&rs), None);

        rs.metadata.labels = None;
        assert_eq!(replicaset_hash(&rs), None);
    }
}
