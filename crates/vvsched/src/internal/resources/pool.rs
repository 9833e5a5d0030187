use crate::internal::common::ids::ResourceIndex;
use smallvec::SmallVec;

pub type ResourceIndices = SmallVec<[ResourceIndex; 4]>;

/// Pool of interchangeable resource units (processors or devices).
///
/// `total` units are distributed over `max_available` slot indices. Each slot keeps a signed
/// count of how many units it still offers; counts are created lazily on the first acquisition.
/// Acquisition always prefers the slots with the highest remaining count, so repeated
/// acquire/release cycles spread load evenly over the slots.
///
/// Counts may go negative: the pool never refuses a request, the caller is expected to
/// consult [`ResourcePool::available`] first.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    total: u32,
    max_available: u32,
    counts: Option<Vec<i64>>,
}

impl ResourcePool {
    pub fn new(total: u32, max_available: u32) -> Self {
        ResourcePool {
            total,
            max_available: max_available.max(1),
            counts: None,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.total
    }

    #[inline]
    pub fn max_available(&self) -> u32 {
        self.max_available
    }

    /// Number of units that can be acquired without oversubscribing any slot.
    pub fn available(&self) -> u32 {
        match &self.counts {
            None => self.total,
            Some(counts) => counts.iter().map(|c| (*c).max(0) as u32).sum(),
        }
    }

    pub fn acquire(&mut self, n: u32) -> ResourceIndices {
        let mut result = ResourceIndices::new();
        if n == 0 {
            return result;
        }
        let counts = self.counts();

        let mut order: Vec<usize> = (0..counts.len()).collect();
        while result.len() < n as usize {
            order.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));
            for &index in &order {
                counts[index] -= 1;
                result.push(index as ResourceIndex);
                if result.len() == n as usize {
                    break;
                }
            }
        }
        result
    }

    pub fn release(&mut self, indices: &[ResourceIndex]) {
        let counts = self.counts();
        for &index in indices {
            debug_assert!((index as usize) < counts.len());
            counts[index as usize] += 1;
        }
    }

    fn counts(&mut self) -> &mut Vec<i64> {
        let max_available = self.max_available as usize;
        let total = self.total as usize;
        self.counts.get_or_insert_with(|| {
            let mut counts = vec![0; max_available];
            for i in 0..total {
                counts[i % max_available] += 1;
            }
            counts
        })
    }

    #[cfg(test)]
    pub(crate) fn slot_counts(&self) -> Option<&[i64]> {
        self.counts.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::ResourcePool;

    #[test]
    fn test_pool_available_before_first_acquire() {
        let pool = ResourcePool::new(10, 3);
        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.max_available(), 3);
        assert_eq!(pool.available(), 10);
        assert!(pool.slot_counts().is_none());
    }

    #[test]
    fn test_pool_round_robin_init() {
        let mut pool = ResourcePool::new(10, 3);
        assert!(pool.acquire(0).is_empty());
        assert_eq!(pool.slot_counts(), Some(&[4, 3, 3][..]));
    }

    #[test]
    fn test_pool_prefers_most_available() {
        let mut pool = ResourcePool::new(10, 3);
        assert_eq!(pool.acquire(1).as_slice(), &[0]);
        assert_eq!(pool.acquire(3).as_slice(), &[0, 1, 2]);
        assert_eq!(pool.slot_counts(), Some(&[2, 2, 2][..]));
        assert_eq!(pool.available(), 6);
    }

    #[test]
    fn test_pool_oversubscription() {
        let mut pool = ResourcePool::new(2, 2);
        assert_eq!(pool.acquire(5).as_slice(), &[0, 1, 0, 1, 0]);
        assert_eq!(pool.slot_counts(), Some(&[-2, -1][..]));
        assert_eq!(pool.available(), 0);
        pool.release(&[0, 1, 0, 1, 0]);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_pool_balance_after_acquire_release() {
        let mut pool = ResourcePool::new(10, 3);
        for n in 1..=10 {
            let taken = pool.acquire(n);
            let counts = pool.slot_counts().unwrap();
            assert!(counts.iter().max().unwrap() - counts.iter().min().unwrap() <= 1);
            pool.release(&taken);
            let counts = pool.slot_counts().unwrap();
            assert!(counts.iter().max().unwrap() - counts.iter().min().unwrap() <= 1);
            assert_eq!(pool.available(), 10);
        }
    }

    #[test]
    fn test_pool_no_index_reused_before_equal_ones() {
        let mut pool = ResourcePool::new(10, 3);
        let taken = pool.acquire(2);
        assert_eq!(taken.as_slice(), &[0, 1]);
        let taken = pool.acquire(2);
        assert_eq!(taken.as_slice(), &[0, 2]);
        assert_eq!(pool.slot_counts(), Some(&[2, 2, 2][..]));
    }

    #[test]
    fn test_pool_max_available_clamped() {
        let mut pool = ResourcePool::new(3, 0);
        assert_eq!(pool.max_available(), 1);
        assert_eq!(pool.acquire(2).as_slice(), &[0, 0]);
        assert_eq!(pool.available(), 1);
    }
}
