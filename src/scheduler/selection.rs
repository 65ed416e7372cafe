//! Content selection
//!
//! Picks the next item to forward from a freshly fetched pool.
//!
//! - [`SelectionMode::Random`] draws uniformly and leaves the cursor alone.
//! - [`SelectionMode::Sequential`] walks the pool in order, wrapping around.
//!   The stored cursor is reduced modulo the current pool size before use,
//!   so a pool that shrank between cycles never indexes out of range.

use rand::Rng;

use super::error::{SchedulerError, SchedulerResult};
use crate::models::{ContentItem, SelectionMode};

/// Outcome of a single selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<'a> {
    pub item: &'a ContentItem,

    /// Position of `item` in the pool
    pub index: usize,

    /// Cursor to store after a successful delivery
    pub next_cursor: usize,
}

/// Stateless selection policy
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionPolicy;

impl SelectionPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Select with the thread-local RNG
    pub fn next<'a>(
        &self,
        pool: &'a [ContentItem],
        mode: SelectionMode,
        cursor: usize,
    ) -> SchedulerResult<Selection<'a>> {
        self.next_with(pool, mode, cursor, &mut rand::thread_rng())
    }

    /// Select with a caller-supplied RNG
    pub fn next_with<'a, R: Rng + ?Sized>(
        &self,
        pool: &'a [ContentItem],
        mode: SelectionMode,
        cursor: usize,
        rng: &mut R,
    ) -> SchedulerResult<Selection<'a>> {
        if pool.is_empty() {
            return Err(SchedulerError::EmptyPool);
        }

        let len = pool.len();
        let (index, next_cursor) = match mode {
            SelectionMode::Random => (rng.gen_range(0..len), cursor),
            SelectionMode::Sequential => {
                let index = cursor % len;
                (index, (index + 1) % len)
            }
        };

        Ok(Selection {
            item: &pool[index],
            index,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn pool(len: usize) -> Vec<ContentItem> {
        (0..len as i64)
            .map(|id| ContentItem::text(id, format!("item {id}")))
            .collect()
    }

    #[test]
    fn test_empty_pool_fails_in_every_mode() {
        let policy = SelectionPolicy::new();
        for mode in [SelectionMode::Random, SelectionMode::Sequential] {
            assert!(matches!(
                policy.next(&[], mode, 0),
                Err(SchedulerError::EmptyPool)
            ));
        }
    }

    #[test]
    fn test_sequential_wraps() {
        let policy = SelectionPolicy::new();
        let items = pool(3);

        let selection = policy.next(&items, SelectionMode::Sequential, 2).unwrap();
        assert_eq!(selection.item.id, 2);
        assert_eq!(selection.next_cursor, 0);
    }

    #[test]
    fn test_sequential_reduces_stale_cursor() {
        let policy = SelectionPolicy::new();
        let items = pool(4);

        // Cursor left behind by a larger pool
        let selection = policy.next(&items, SelectionMode::Sequential, 9).unwrap();
        assert_eq!(selection.index, 1);
        assert_eq!(selection.next_cursor, 2);
    }

    #[test]
    fn test_random_keeps_cursor() {
        let policy = SelectionPolicy::new();
        let items = pool(5);
        let mut rng = StdRng::seed_from_u64(7);

        let selection = policy
            .next_with(&items, SelectionMode::Random, 3, &mut rng)
            .unwrap();
        assert_eq!(selection.next_cursor, 3);
        assert!(selection.index < 5);
    }

    #[test]
    fn test_random_reaches_every_item() {
        let policy = SelectionPolicy::new();
        let items = pool(4);
        let mut rng = StdRng::seed_from_u64(42);

        let seen: HashSet<usize> = (0..200)
            .map(|_| {
                policy
                    .next_with(&items, SelectionMode::Random, 0, &mut rng)
                    .unwrap()
                    .index
            })
            .collect();
        assert_eq!(seen.len(), 4);
    }

    proptest! {
        #[test]
        fn prop_sequential_visits_each_item_once_per_lap(len in 1usize..50, start in 0usize..200) {
            let policy = SelectionPolicy::new();
            let items = pool(len);

            let mut cursor = start;
            let mut seen = HashSet::new();
            for _ in 0..len {
                let selection = policy.next(&items, SelectionMode::Sequential, cursor).unwrap();
                prop_assert!(selection.next_cursor < len);
                prop_assert!(seen.insert(selection.item.id));
                cursor = selection.next_cursor;
            }
            prop_assert_eq!(seen.len(), len);
        }

        #[test]
        fn prop_random_index_in_range(len in 1usize..50, seed in any::<u64>(), cursor in any::<usize>()) {
            let policy = SelectionPolicy::new();
            let items = pool(len);
            let mut rng = StdRng::seed_from_u64(seed);

            let selection = policy.next_with(&items, SelectionMode::Random, cursor, &mut rng).unwrap();
            prop_assert!(selection.index < len);
            prop_assert_eq!(selection.next_cursor, cursor);
        }
    }
}
