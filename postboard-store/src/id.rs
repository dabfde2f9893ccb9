//! Allocation of fresh post ids.

use postboard_common::model::{Id, post::PostMarker};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::ops::Range;

pub const RANDOM_ID_RANGE: Range<i64> = 0..1_000_000;
pub const RANDOM_ID_MAX_ATTEMPTS: usize = 1024;

pub trait IdAllocator: Send + Sync {
    /// Returns an id for which `is_taken` is false, or `None` if none could be found.
    fn allocate(&mut self, is_taken: &dyn Fn(Id<PostMarker>) -> bool) -> Option<Id<PostMarker>>;
}

/// Draws ids uniformly from [`RANDOM_ID_RANGE`], retrying on collision.
#[derive(Clone, Debug)]
pub struct RandomIdAllocator {
    rng: StdRng,
}

impl RandomIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    #[must_use]
    pub fn from_rng(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl Default for RandomIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator for RandomIdAllocator {
    fn allocate(&mut self, is_taken: &dyn Fn(Id<PostMarker>) -> bool) -> Option<Id<PostMarker>> {
        (0..RANDOM_ID_MAX_ATTEMPTS)
            .map(|_| Id::new(self.rng.random_range(RANDOM_ID_RANGE)))
            .find(|&id| !is_taken(id))
    }
}

/// Hands out strictly increasing ids. An id is never handed out twice, even after
/// the post holding it is deleted.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct SequentialIdAllocator {
    next: i64,
}

impl SequentialIdAllocator {
    #[must_use]
    pub fn starting_at(next: i64) -> Self {
        Self { next }
    }
}

impl IdAllocator for SequentialIdAllocator {
    fn allocate(&mut self, is_taken: &dyn Fn(Id<PostMarker>) -> bool) -> Option<Id<PostMarker>> {
        while is_taken(Id::new(self.next)) {
            self.next = self.next.checked_add(1)?;
        }

        let id = Id::new(self.next);
        self.next = self.next.checked_add(1)?;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use crate::id::{IdAllocator, RANDOM_ID_RANGE, RandomIdAllocator, SequentialIdAllocator};
    use postboard_common::model::{Id, post::PostMarker};
    use rand::{SeedableRng, rngs::StdRng};
    use std::collections::HashSet;

    #[test]
    fn sequential_is_monotonic() {
        let mut allocator = SequentialIdAllocator::default();
        let taken = [Id::<PostMarker>::new(1), Id::new(2)];
        let is_taken = |id| taken.contains(&id);

        let ids: Vec<_> = (0..4)
            .map(|_| allocator.allocate(&is_taken).unwrap().get())
            .collect();

        assert_eq!(ids, [0, 3, 4, 5]);
    }

    #[test]
    fn sequential_does_not_reuse_freed_ids() {
        let mut allocator = SequentialIdAllocator::starting_at(10);
        let nothing_taken = |_: Id<PostMarker>| false;

        assert_eq!(allocator.allocate(&nothing_taken), Some(Id::new(10)));
        assert_eq!(allocator.allocate(&nothing_taken), Some(Id::new(11)));
    }

    #[test]
    fn sequential_stops_at_overflow() {
        let mut allocator = SequentialIdAllocator::starting_at(i64::MAX);
        let nothing_taken = |_: Id<PostMarker>| false;

        assert_eq!(allocator.allocate(&nothing_taken), None);
    }

    #[test]
    fn random_stays_in_range_and_avoids_taken() {
        let mut allocator = RandomIdAllocator::from_rng(StdRng::seed_from_u64(7));
        let mut seen: HashSet<Id<PostMarker>> = HashSet::new();

        for _ in 0..500 {
            let id = allocator
                .allocate(&|id: Id<PostMarker>| seen.contains(&id))
                .unwrap();
            assert!(RANDOM_ID_RANGE.contains(&id.get()));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn random_gives_up_when_everything_is_taken() {
        let mut allocator = RandomIdAllocator::from_rng(StdRng::seed_from_u64(7));

        assert_eq!(allocator.allocate(&|_| true), None);
    }
}
