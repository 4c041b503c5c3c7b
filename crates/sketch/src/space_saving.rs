// SPDX-License-Identifier: Apache-2.0

//! Space-Saving heavy-hitter summary over weighted resource keys.

use crate::error::Error;
use phoenix_pdata::ResourceKey;
use std::collections::HashMap;

/// One reported heavy hitter.
#[derive(Debug, Clone, PartialEq)]
pub struct TopEntry {
    /// The key.
    pub key: ResourceKey,
    /// Estimated total weight. Never below the true weight.
    pub count: f64,
    /// Upper bound on the overestimation of `count`.
    pub error: f64,
}

#[derive(Debug, Clone)]
struct Counter {
    key: ResourceKey,
    count: f64,
    error: f64,
    // Monotonic insertion/update tick, used to break count ties by recency.
    touched: u64,
}

/// Space-Saving summary with exactly `k` counters.
///
/// Insertion rule: a tracked key accumulates weight; an untracked key takes a
/// free slot when one exists, otherwise it evicts the minimum counter and
/// inherits its count as error. Reported counts therefore satisfy
/// `true <= count <= true + total_weight / k`.
#[derive(Debug)]
pub struct SpaceSaving {
    counters: Vec<Counter>,
    index: HashMap<ResourceKey, usize>,
    k: usize,
    tick: u64,
}

impl SpaceSaving {
    /// Creates a summary with `k` counter slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] when `k == 0`.
    pub fn new(k: usize) -> Result<Self, Error> {
        if k == 0 {
            return Err(Error::ZeroCapacity);
        }
        Ok(Self {
            counters: Vec::with_capacity(k),
            index: HashMap::with_capacity(k),
            k,
            tick: 0,
        })
    }

    /// Current counter budget.
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// True when no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Feeds one weighted observation.
    pub fn add(&mut self, key: ResourceKey, weight: f64) {
        self.tick += 1;
        if let Some(&idx) = self.index.get(&key) {
            self.counters[idx].count += weight;
            self.counters[idx].touched = self.tick;
            return;
        }
        if self.counters.len() < self.k {
            self.index.insert(key.clone(), self.counters.len());
            self.counters.push(Counter {
                key,
                count: weight,
                error: 0.0,
                touched: self.tick,
            });
            return;
        }
        // Replace the minimum counter; its count becomes the newcomer's error.
        let min_idx = self.min_index();
        let evicted = self.counters[min_idx].key.clone();
        let min_count = self.counters[min_idx].count;
        let _ = self.index.remove(&evicted);
        self.index.insert(key.clone(), min_idx);
        self.counters[min_idx] = Counter {
            key,
            count: min_count + weight,
            error: min_count,
            touched: self.tick,
        };
    }

    /// Tracked keys ordered by count descending, recency breaking ties.
    #[must_use]
    pub fn top_k(&self) -> Vec<TopEntry> {
        let mut entries: Vec<&Counter> = self.counters.iter().collect();
        entries.sort_by(|a, b| {
            b.count
                .partial_cmp(&a.count)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.touched.cmp(&a.touched))
        });
        entries
            .into_iter()
            .map(|c| TopEntry {
                key: c.key.clone(),
                count: c.count,
                error: c.error,
            })
            .collect()
    }

    /// Changes the counter budget.
    ///
    /// Shrinking discards the lowest counters; growing keeps existing ones.
    /// A request of `0` is ignored.
    pub fn set_k(&mut self, k: usize) {
        if k == 0 || k == self.k {
            return;
        }
        if k < self.counters.len() {
            let mut order: Vec<usize> = (0..self.counters.len()).collect();
            order.sort_by(|&a, &b| {
                let (ca, cb) = (&self.counters[a], &self.counters[b]);
                cb.count
                    .partial_cmp(&ca.count)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(cb.touched.cmp(&ca.touched))
            });
            order.truncate(k);
            let keep: Vec<Counter> = order.iter().map(|&i| self.counters[i].clone()).collect();
            self.counters = keep;
            self.index = self
                .counters
                .iter()
                .enumerate()
                .map(|(i, c)| (c.key.clone(), i))
                .collect();
        }
        self.k = k;
    }

    /// Drops all tracked keys, keeping the budget.
    pub fn clear(&mut self) {
        self.counters.clear();
        self.index.clear();
    }

    fn min_index(&self) -> usize {
        let mut min_idx = 0;
        for (idx, counter) in self.counters.iter().enumerate().skip(1) {
            let min = &self.counters[min_idx];
            if counter.count < min.count
                || (counter.count == min.count && counter.touched < min.touched)
            {
                min_idx = idx;
            }
        }
        min_idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ResourceKey {
        ResourceKey::from(s)
    }

    #[test]
    fn tracks_up_to_k_without_error() {
        let mut ss = SpaceSaving::new(3).unwrap();
        ss.add(key("a"), 5.0);
        ss.add(key("b"), 3.0);
        ss.add(key("a"), 2.0);
        let top = ss.top_k();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key, key("a"));
        assert!((top[0].count - 7.0).abs() < f64::EPSILON);
        assert!(top.iter().all(|e| e.error == 0.0));
    }

    #[test]
    fn eviction_inherits_min_count_as_error() {
        let mut ss = SpaceSaving::new(2).unwrap();
        ss.add(key("a"), 10.0);
        ss.add(key("b"), 1.0);
        ss.add(key("c"), 2.0);
        let top = ss.top_k();
        assert_eq!(top.len(), 2);
        let c = top.iter().find(|e| e.key == key("c")).unwrap();
        assert!((c.count - 3.0).abs() < f64::EPSILON);
        assert!((c.error - 1.0).abs() < f64::EPSILON);
        assert!(!top.iter().any(|e| e.key == key("b")));
    }

    #[test]
    fn overestimate_is_bounded_by_total_weight_over_k() {
        let k = 10;
        let mut ss = SpaceSaving::new(k).unwrap();
        let mut total = 0.0;
        let mut true_counts: std::collections::HashMap<String, f64> =
            std::collections::HashMap::new();
        // Skewed stream: key i gets weight proportional to 1/i.
        for _round in 0..200 {
            for i in 1..=50u32 {
                let w = 100.0 / f64::from(i);
                let name = format!("k{i}");
                ss.add(key(&name), w);
                *true_counts.entry(name).or_default() += w;
                total += w;
            }
        }
        let bound = total / k as f64;
        for entry in ss.top_k() {
            let truth = true_counts[&entry.key.0];
            assert!(entry.count >= truth - 1e-9, "count below truth");
            assert!(entry.count <= truth + bound + 1e-9, "count above bound");
        }
    }

    #[test]
    fn shrink_keeps_heaviest_grow_keeps_all() {
        let mut ss = SpaceSaving::new(4).unwrap();
        for (name, w) in [("a", 4.0), ("b", 3.0), ("c", 2.0), ("d", 1.0)] {
            ss.add(key(name), w);
        }
        ss.set_k(2);
        let kept: Vec<_> = ss.top_k().into_iter().map(|e| e.key).collect();
        assert_eq!(kept, vec![key("a"), key("b")]);

        ss.set_k(5);
        assert_eq!(ss.len(), 2);
        ss.add(key("e"), 1.0);
        assert_eq!(ss.len(), 3);
    }

    #[test]
    fn ties_break_by_recency() {
        let mut ss = SpaceSaving::new(3).unwrap();
        ss.add(key("old"), 2.0);
        ss.add(key("new"), 2.0);
        let top = ss.top_k();
        assert_eq!(top[0].key, key("new"));
        assert_eq!(top[1].key, key("old"));
    }
}
