use proptest::prelude::*;
use unify_core::{normalize, Scorer, SimilarityMetric};

fn metric() -> impl Strategy<Value = SimilarityMetric> {
    prop_oneof![
        Just(SimilarityMetric::TokenSortRatio),
        Just(SimilarityMetric::Levenshtein),
        Just(SimilarityMetric::JaroWinkler),
    ]
}

proptest! {
    #[test]
    fn test_score_is_symmetric(a in ".{0,40}", b in ".{0,40}", metric in metric()) {
        let scorer = Scorer::new(metric);
        prop_assert_eq!(scorer.score(&a, &b), scorer.score(&b, &a));
    }

    #[test]
    fn test_score_is_reflexive(a in ".{1,40}", metric in metric()) {
        prop_assert_eq!(Scorer::new(metric).score(&a, &a), 1.0);
    }

    #[test]
    fn test_score_stays_in_unit_range(a in ".{0,40}", b in ".{0,40}", metric in metric()) {
        let s = Scorer::new(metric).score(&a, &b);
        prop_assert!((0.0..=1.0).contains(&s), "score {} out of range", s);
    }

    #[test]
    fn test_word_order_does_not_matter(words in prop::collection::vec("[a-z]{1,8}", 1..5)) {
        let forward = words.join(" ");
        let backward = words.iter().rev().cloned().collect::<Vec<_>>().join(" ");
        prop_assert_eq!(unify_core::score(&forward, &backward), 1.0);
    }

    #[test]
    fn test_case_and_punctuation_are_ignored(name in "[A-Za-z]{1,10}( [A-Za-z]{1,10}){0,3}") {
        let shouted = format!("  {}!!", name.to_uppercase());
        prop_assert_eq!(unify_core::score(&name, &shouted), 1.0);
    }

    #[test]
    fn test_normalize_is_idempotent(a in ".{0,60}") {
        let once = normalize(&a);
        prop_assert_eq!(normalize(&once), once.clone());
        prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
        prop_assert!(!once.contains("  "));
    }
}
