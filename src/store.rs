use std::cmp::Ordering;

use parking_lot::Mutex;

use crate::model::{ClusterResult, PatternType};

/// Deduplicating result set shared by all workers.
///
/// One lock covers both mutation and reads. Insertion scans the current
/// contents, which is fine while discoveries number in the hundreds.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: Mutex<Vec<ClusterResult>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_results(results: impl IntoIterator<Item = ClusterResult>) -> Self {
        let store = Self::new();
        let batch: Vec<ClusterResult> = results.into_iter().collect();
        store.insert_batch(&batch);
        store
    }

    /// Append every result not already present. Returns how many were added.
    pub fn insert_batch(&self, batch: &[ClusterResult]) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let mut results = self.results.lock();
        let before = results.len();
        for candidate in batch {
            if !results.contains(candidate) {
                results.push(*candidate);
            }
        }
        results.len() - before
    }

    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&ClusterResult, &ClusterResult) -> Ordering,
    {
        self.results.lock().sort_by(compare);
    }

    pub fn sort_by_distance(&self, ascending: bool) {
        self.sort_by(|a, b| {
            let ord = a.distance_squared().cmp(&b.distance_squared());
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });
    }

    /// Remove every result matching `predicate`. Returns how many were removed.
    pub fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&ClusterResult) -> bool,
    {
        let mut results = self.results.lock();
        let before = results.len();
        results.retain(|r| !predicate(r));
        before - results.len()
    }

    /// Drop results from scratch scans, keeping sweep discoveries.
    pub fn clear_transient(&self) -> usize {
        self.remove_where(|r| !r.is_permanent())
    }

    /// Remove a single transient result. Permanent results are kept.
    pub fn remove(&self, result: &ClusterResult) -> bool {
        self.remove_where(|r| r == result && !r.is_permanent()) > 0
    }

    /// Copy of the current contents, in store order.
    pub fn snapshot(&self) -> Vec<ClusterResult> {
        self.results.lock().clone()
    }

    /// Up to `limit` results of one pattern plus the total count of that pattern.
    pub fn by_pattern(&self, pattern: PatternType, limit: usize) -> (Vec<ClusterResult>, usize) {
        let results = self.results.lock();
        let mut total = 0;
        let mut shown = Vec::with_capacity(limit.min(64));
        for r in results.iter().filter(|r| r.pattern() == pattern) {
            total += 1;
            if shown.len() < limit {
                shown.push(*r);
            }
        }
        (shown, total)
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
