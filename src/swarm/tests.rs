use super::choker::select_preferred;
use super::optimistic::optimistic_candidates;
use crate::peer::PeerId;
use std::collections::HashSet;

#[test]
fn test_preferred_set_size_is_min_of_k_and_interested() {
    let candidates: Vec<(PeerId, u64)> = (1..=5).map(|id| (id, id as u64 * 10)).collect();

    assert_eq!(select_preferred(candidates.clone(), 3, false).len(), 3);
    assert_eq!(select_preferred(candidates.clone(), 10, false).len(), 5);
    assert_eq!(select_preferred(Vec::new(), 3, false).len(), 0);
}

#[test]
fn test_downloaders_are_ranked_by_rate() {
    let candidates = vec![(1, 100u64), (2, 500), (3, 300), (4, 50)];

    let selected: HashSet<PeerId> = select_preferred(candidates, 2, false).into_iter().collect();
    assert_eq!(selected, HashSet::from([2, 3]));
}

#[test]
fn test_rate_ties_break_randomly() {
    let candidates = vec![(1, 7u64), (2, 7), (3, 7)];

    let mut seen = HashSet::new();
    for _ in 0..200 {
        let selected = select_preferred(candidates.clone(), 1, false);
        seen.insert(selected[0]);
    }
    assert_eq!(seen, HashSet::from([1, 2, 3]));
}

#[test]
fn test_seed_mode_ignores_rates() {
    // Peer 3 delivered everything, but a seed picks uniformly.
    let candidates = vec![(1, 0u64), (2, 0), (3, 100_000)];

    let mut seen = HashSet::new();
    for _ in 0..200 {
        let selected = select_preferred(candidates.clone(), 1, true);
        seen.insert(selected[0]);
    }
    assert_eq!(seen, HashSet::from([1, 2, 3]));
}

#[test]
fn test_ranking_still_prefers_higher_rates_with_mixed_ties() {
    let candidates = vec![(1, 10u64), (2, 99), (3, 10), (4, 99)];

    for _ in 0..50 {
        let selected: HashSet<PeerId> =
            select_preferred(candidates.clone(), 2, false).into_iter().collect();
        assert_eq!(selected, HashSet::from([2, 4]));
    }
}

#[test]
fn test_optimistic_candidates_require_choked_and_interested() {
    let preferred = HashSet::from([4]);
    let states = vec![
        // (id, peer_choked, peer_interested)
        (1, true, true),   // eligible
        (2, false, true),  // already unchoked
        (3, true, false),  // not interested
        (4, true, true),   // preferred, excluded
    ];

    assert_eq!(optimistic_candidates(states, &preferred), vec![1]);
}

#[test]
fn test_optimistic_candidates_empty_when_everyone_served() {
    let preferred = HashSet::from([1, 2]);
    let states = vec![(1, true, true), (2, true, true), (3, false, true)];

    assert!(optimistic_candidates(states, &preferred).is_empty());
}
