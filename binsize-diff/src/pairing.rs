//! Greedy pairing of before items with after items. The first match wins and a matched after item
//! is removed from the pool, so it can't be matched twice. This is deliberately not an optimal
//! bipartite matching.

use tracing::trace;

pub struct Pairing<T> {
    pub pairs: Vec<(Option<T>, Option<T>)>,

    /// Before items that had more than one heuristic candidate. The first candidate was used.
    pub ambiguous: Vec<T>,
}

/// Pairs `before` with `after`, trying `exact` against every remaining after item first and
/// falling back to `heuristic`. After items left over at the end are emitted as additions, in
/// their original order.
pub fn pair_greedily<T: Copy + std::fmt::Debug>(
    before: impl IntoIterator<Item = T>,
    after: impl IntoIterator<Item = T>,
    exact: impl Fn(T, T) -> bool,
    heuristic: impl Fn(T, T) -> bool,
) -> Pairing<T> {
    let mut remaining: Vec<T> = after.into_iter().collect();
    let mut pairs = Vec::new();
    let mut ambiguous = Vec::new();

    for b in before {
        if let Some(pos) = remaining.iter().position(|a| exact(b, *a)) {
            pairs.push((Some(b), Some(remaining.remove(pos))));
            continue;
        }

        let mut candidates = remaining
            .iter()
            .enumerate()
            .filter(|(_, a)| heuristic(b, **a))
            .map(|(i, _)| i);
        let Some(first) = candidates.next() else {
            trace!(item = ?b, "No match in after");
            pairs.push((Some(b), None));
            continue;
        };
        if candidates.next().is_some() {
            ambiguous.push(b);
        }
        let matched = remaining.remove(first);
        trace!(before = ?b, after = ?matched, "Paired heuristically");
        pairs.push((Some(b), Some(matched)));
    }

    pairs.extend(remaining.into_iter().map(|a| (None, Some(a))));

    Pairing { pairs, ambiguous }
}

/// Pairs items by `exact` alone.
pub fn pair_exactly<T: Copy + std::fmt::Debug>(
    before: impl IntoIterator<Item = T>,
    after: impl IntoIterator<Item = T>,
    exact: impl Fn(T, T) -> bool,
) -> Vec<(Option<T>, Option<T>)> {
    pair_greedily(before, after, exact, |_, _| false).pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_wins_over_earlier_heuristic_match() {
        let before = ["abc"];
        let after = ["abd", "abc"];
        let pairing = pair_greedily(
            before,
            after,
            |b, a| b == a,
            |b, a| b.starts_with(&a[..2]),
        );
        assert_eq!(
            pairing.pairs,
            vec![(Some("abc"), Some("abc")), (None, Some("abd"))]
        );
        assert!(pairing.ambiguous.is_empty());
    }

    #[test]
    fn test_matched_items_are_removed() {
        let pairs = pair_exactly([1, 1, 2], [1, 3], |b, a| b == a);
        assert_eq!(
            pairs,
            vec![
                (Some(1), Some(1)),
                (Some(1), None),
                (Some(2), None),
                (None, Some(3))
            ]
        );
    }

    #[test]
    fn test_ambiguous_heuristic_matches_are_reported() {
        let pairing = pair_greedily(
            ["x1"],
            ["x2", "x3"],
            |b, a| b == a,
            |b, a| b.as_bytes()[0] == a.as_bytes()[0],
        );
        assert_eq!(pairing.pairs, vec![(Some("x1"), Some("x2")), (None, Some("x3"))]);
        assert_eq!(pairing.ambiguous, vec!["x1"]);
    }
}
