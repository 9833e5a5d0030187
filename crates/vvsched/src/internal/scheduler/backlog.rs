use crate::internal::common::ids::TestId;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Tests that were not started yet, bucketed by processor count.
#[derive(Default, Debug)]
pub(crate) struct Backlog {
    buckets: BTreeMap<u32, Vec<TestId>>,
    len: usize,
}

impl Backlog {
    pub fn insert(&mut self, np: u32, id: TestId) {
        self.buckets.entry(np).or_default().push(id);
        self.len += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: TestId) -> bool {
        self.buckets.values().any(|bucket| bucket.contains(&id))
    }

    pub fn sort_buckets<F>(&mut self, mut compare: F)
    where
        F: FnMut(TestId, TestId) -> Ordering,
    {
        for bucket in self.buckets.values_mut() {
            bucket.sort_by(|a, b| compare(*a, *b));
        }
    }

    /// Removes the first test accepted by `accept_test`, visiting buckets from the largest
    /// processor count down and skipping buckets rejected by `accept_size`.
    pub fn take_first<S, T>(&mut self, mut accept_size: S, mut accept_test: T) -> Option<TestId>
    where
        S: FnMut(u32) -> bool,
        T: FnMut(TestId) -> bool,
    {
        let mut found = None;
        for (&np, bucket) in self.buckets.iter().rev() {
            if !accept_size(np) {
                continue;
            }
            if let Some(position) = bucket.iter().position(|id| accept_test(*id)) {
                found = Some((np, position));
                break;
            }
        }
        let (np, position) = found?;
        let bucket = self.buckets.get_mut(&np)?;
        let id = bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.remove(&np);
        }
        self.len -= 1;
        Some(id)
    }

    pub fn drain(&mut self) -> Vec<TestId> {
        self.len = 0;
        std::mem::take(&mut self.buckets)
            .into_values()
            .rev()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Backlog;
    use crate::TestId;

    fn ids(values: &[u32]) -> Vec<TestId> {
        values.iter().map(|v| TestId::new(*v)).collect()
    }

    #[test]
    fn test_backlog_take_largest_first() {
        let mut backlog = Backlog::default();
        backlog.insert(1, TestId::new(1));
        backlog.insert(8, TestId::new(2));
        backlog.insert(4, TestId::new(3));
        assert_eq!(backlog.take_first(|_| true, |_| true), Some(TestId::new(2)));
        assert_eq!(backlog.take_first(|np| np < 4, |_| true), Some(TestId::new(1)));
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog.take_first(|np| np < 4, |_| true), None);
        assert_eq!(backlog.drain(), ids(&[3]));
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_backlog_skips_rejected_tests() {
        let mut backlog = Backlog::default();
        backlog.insert(2, TestId::new(1));
        backlog.insert(2, TestId::new(2));
        backlog.insert(1, TestId::new(3));
        assert_eq!(
            backlog.take_first(|_| true, |id| id != TestId::new(1)),
            Some(TestId::new(2))
        );
        assert!(backlog.contains(TestId::new(1)));
        assert!(!backlog.contains(TestId::new(2)));
        assert_eq!(backlog.drain(), ids(&[1, 3]));
    }
}
