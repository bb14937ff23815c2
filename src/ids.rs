//! Identity allocation for new ledger rows.
//!
//! The row store has no atomic counter, so identities are recomputed from the
//! maximum id present in a fresh read. Two processes allocating against the
//! same ledger at the same time can collide; the run lease narrows that window
//! for processes sharing a state file but does not close it across hosts.

/// One plus the largest positive id in `existing`; 1 for an empty ledger.
pub fn next_id<I>(existing: I) -> i64
where
    I: IntoIterator<Item = i64>,
{
    existing
        .into_iter()
        .filter(|id| *id > 0)
        .max()
        .map_or(1, |max| max + 1)
}

/// `count` consecutive ids following the current maximum.
pub fn allocate<I>(existing: I, count: usize) -> Vec<i64>
where
    I: IntoIterator<Item = i64>,
{
    let first = next_id(existing);
    (0..count as i64).map(|offset| first + offset).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_ledger_starts_at_one() {
        assert_eq!(next_id(Vec::new()), 1);
        assert_eq!(next_id(vec![0, -3]), 1);
    }

    #[test]
    fn gaps_do_not_matter() {
        assert_eq!(next_id(vec![3, 9, 4]), 10);
    }

    proptest! {
        #[test]
        fn allocations_are_distinct_and_consecutive(
            existing in proptest::collection::vec(1i64..10_000, 0..50),
            count in 0usize..40,
        ) {
            let ids = allocate(existing.clone(), count);
            prop_assert_eq!(ids.len(), count);
            for pair in ids.windows(2) {
                prop_assert_eq!(pair[1], pair[0] + 1);
            }
            if let Some(first) = ids.first() {
                prop_assert!(existing.iter().all(|id| id < first));
            }
        }
    }
}
