use std::collections::HashSet;

use proptest::prelude::*;
use unify_core::{group, normalize, score, CandidateRecord, DuplicateGrouper, RecordId};

/// Small vocabulary so that near and exact duplicates are common.
fn corpus() -> impl Strategy<Value = Vec<CandidateRecord>> {
    prop::collection::vec("(abc|abd|waste|wastes|ltd|kasarani|depot)( (abc|waste|ltd|depot|co)){0,2}", 0..30)
        .prop_map(|names| {
            names
                .into_iter()
                .enumerate()
                .map(|(i, name)| CandidateRecord::new(i as i64 + 1, name))
                .collect()
        })
}

fn threshold() -> impl Strategy<Value = f64> {
    (40u32..=100).prop_map(|t| f64::from(t) / 100.0)
}

proptest! {
    #[test]
    fn test_groups_are_disjoint_and_never_singletons(records in corpus(), t in threshold()) {
        let groups = group(&records, t).unwrap();
        let mut seen = HashSet::new();
        for g in &groups {
            prop_assert!(!g.similar_candidates.is_empty());
            for id in g.member_ids() {
                prop_assert!(seen.insert(id.clone()), "{} appears twice", id);
            }
        }
    }

    #[test]
    fn test_groups_are_numbered_and_anchored_on_lowest_id(records in corpus(), t in threshold()) {
        let groups = group(&records, t).unwrap();
        for (i, g) in groups.iter().enumerate() {
            prop_assert_eq!(g.group_id as usize, i + 1);
            let lowest = g.member_ids().min().unwrap();
            prop_assert_eq!(lowest, &g.main_candidate.id);
        }
    }

    #[test]
    fn test_similar_candidates_clear_threshold_in_score_order(records in corpus(), t in threshold()) {
        let groups = group(&records, t).unwrap();
        for g in &groups {
            for s in &g.similar_candidates {
                prop_assert!(s.score >= t);
                prop_assert_eq!(s.score, score(&g.main_candidate.display_name, &s.record.display_name));
            }
            for pair in g.similar_candidates.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }

    #[test]
    fn test_regrouping_is_idempotent_and_order_independent(records in corpus(), t in threshold()) {
        let first = group(&records, t).unwrap();
        let second = group(&records, t).unwrap();
        prop_assert_eq!(&first, &second);

        let mut reversed = records.clone();
        reversed.reverse();
        prop_assert_eq!(&first, &group(&reversed, t).unwrap());
    }

    #[test]
    fn test_links_at_a_stricter_threshold_clear_a_looser_one(
        records in corpus(),
        low in threshold(),
        raise in 0u32..=30,
    ) {
        let high = (low + f64::from(raise) / 100.0).min(1.0);
        for g in group(&records, high).unwrap() {
            for s in &g.similar_candidates {
                prop_assert!(s.score >= low);
            }
        }
    }

    #[test]
    fn test_identical_names_always_share_a_group(records in corpus(), t in threshold()) {
        let groups = group(&records, t).unwrap();
        let group_of = |id: &RecordId| groups.iter().find(|g| g.contains(id)).map(|g| g.group_id);

        for a in &records {
            for b in &records {
                if a.id < b.id && normalize(&a.display_name) == normalize(&b.display_name) {
                    prop_assert!(group_of(&a.id).is_some());
                    prop_assert_eq!(group_of(&a.id), group_of(&b.id));
                }
            }
        }
    }

    #[test]
    fn test_bucketing_only_narrows_comparisons(records in corpus(), t in threshold()) {
        let bucketed = DuplicateGrouper::new(t).with_bucketing(true).group(&records).unwrap();
        for g in &bucketed {
            let first = normalize(&g.main_candidate.display_name)
                .split_whitespace()
                .next()
                .map(str::to_string);
            for s in &g.similar_candidates {
                let other = normalize(&s.record.display_name)
                    .split_whitespace()
                    .next()
                    .map(str::to_string);
                prop_assert_eq!(&first, &other);
            }
        }
    }
}
