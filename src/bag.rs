//! A counting bag keyed by tuples of up to five components.
//!
//! Queries take [`KeyPattern`]s, where a wildcard stands for every value the bag has seen at that
//! position. Wildcards are expanded against per-component indexes of the values present, so
//! counting never adds entries to the bag.
//!
//! ```
//! use cohort_covariates::{key, pattern, MultiKeyBag};
//!
//! let mut bag = MultiKeyBag::new();
//! bag.add(key!["M", 2020, "A"]).unwrap();
//! bag.add(key!["M", 2020, "A"]).unwrap();
//! bag.add(key!["M", 2021, "A"]).unwrap();
//! assert_eq!(bag.count(&pattern!["M", _, "A"]), 3);
//! ```
mod key;
mod stats;

pub use self::{
    key::{KeyPart, KeyPattern, KeyValue, MultiKey},
    stats::{Histogram, HistogramStats},
};

use crate::error::BagError;
use std::{
    cell::{Cell, Ref, RefCell},
    collections::{BTreeMap, BTreeSet},
};

/// The maximum number of components in a key.
pub const MAX_COMPONENTS: usize = 5;

/// Not thread safe: give each worker its own bag and [`merge`](MultiKeyBag::merge) them after.
#[derive(Debug, Clone, Default)]
pub struct MultiKeyBag {
    counts: BTreeMap<MultiKey, u64>,
    max_arity: usize,
    /// The distinct values seen at each position. Rebuilt on demand after inserts.
    index: RefCell<Vec<BTreeSet<KeyValue>>>,
    dirty: Cell<bool>,
}

impl MultiKeyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: MultiKey) -> Result<(), BagError> {
        self.add_n(key, 1)
    }

    /// Add `n` occurrences of `key`.
    pub fn add_n(&mut self, key: MultiKey, n: u64) -> Result<(), BagError> {
        if key.arity() > MAX_COMPONENTS {
            return Err(BagError::TooManyComponents {
                max: MAX_COMPONENTS,
                found: key.arity(),
            });
        }
        if n == 0 {
            return Ok(());
        }
        self.max_arity = self.max_arity.max(key.arity());
        *self.counts.entry(key).or_default() += n;
        self.dirty.set(true);
        Ok(())
    }

    /// Add every key of `other`, with its count.
    pub fn merge(&mut self, other: &MultiKeyBag) {
        for (key, count) in other.counts.iter() {
            *self.counts.entry(key.clone()).or_default() += count;
        }
        self.max_arity = self.max_arity.max(other.max_arity);
        self.dirty.set(true);
    }

    /// The largest number of components of any key added so far.
    pub fn max_arity(&self) -> usize {
        self.max_arity
    }

    /// The number of distinct keys.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// The number of occurrences of all keys.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Distinct keys with their counts, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&MultiKey, u64)> + '_ {
        self.counts.iter().map(|(key, count)| (key, *count))
    }

    /// Distinct keys, in key order.
    pub fn unique_keys(&self) -> impl Iterator<Item = &MultiKey> + '_ {
        self.counts.keys()
    }

    /// Distinct keys ordered by the component at `first_by`, then by the whole key. Keys too short
    /// to have that component come first.
    pub fn sorted_keys(&self, first_by: usize) -> Vec<&MultiKey> {
        let mut keys: Vec<&MultiKey> = self.counts.keys().collect();
        keys.sort_by(|left, right| {
            left.get(first_by)
                .cmp(&right.get(first_by))
                .then_with(|| left.cmp(right))
        });
        keys
    }

    /// The number of occurrences of keys matching the pattern.
    pub fn count(&self, pattern: &KeyPattern) -> u64 {
        if let Some(key) = pattern.to_key() {
            return self.counts.get(&key).copied().unwrap_or(0);
        }
        let mut total = 0;
        self.expand(pattern, |count| {
            total += count;
            true
        });
        total
    }

    /// Whether any key matches the pattern.
    pub fn contains(&self, pattern: &KeyPattern) -> bool {
        if let Some(key) = pattern.to_key() {
            return self.counts.contains_key(&key);
        }
        let mut found = false;
        self.expand(pattern, |_| {
            found = true;
            false
        });
        found
    }

    /// The keys whose component at `component` is `value`, with that component removed.
    pub fn sub_bag(&self, component: usize, value: &KeyValue) -> MultiKeyBag {
        let mut out = MultiKeyBag::new();
        for (key, count) in self.counts.iter() {
            if key.get(component) == Some(value) {
                let sub_key = key.without(component);
                out.max_arity = out.max_arity.max(sub_key.arity());
                *out.counts.entry(sub_key).or_default() += count;
            }
        }
        out.dirty.set(true);
        out
    }

    /// The frequencies of the values of one free component.
    ///
    /// The free component is the last position of the longest keys. `pattern` fixes every other
    /// component, so it has either one component fewer than [`max_arity`](Self::max_arity), or
    /// exactly as many with a wildcard last. Fixed components may themselves be wildcards, which
    /// sums over them.
    pub fn histogram(&self, pattern: &KeyPattern) -> Result<Histogram, BagError> {
        let arity = self.max_arity;
        if arity == 0 {
            return Ok(Histogram::default());
        }
        let fixed = if pattern.len() == arity - 1 {
            pattern.clone()
        } else if pattern.len() == arity && pattern[arity - 1].is_any() {
            KeyPattern::new(pattern[..arity - 1].to_vec())
        } else {
            return Err(BagError::HistogramShape {
                expected: arity - 1,
                arity,
                found: pattern.len(),
            });
        };
        let free_values: Vec<KeyValue> = match self.indexes().get(arity - 1) {
            Some(values) => values.iter().cloned().collect(),
            None => vec![],
        };
        let mut counts = BTreeMap::new();
        for value in free_values {
            let count = self.count(&fixed.with(KeyPart::Value(value.clone())));
            if count > 0 {
                counts.insert(value, count);
            }
        }
        Ok(Histogram::new(counts))
    }

    /// Summary statistics of [`histogram`](Self::histogram), which must be numeric.
    pub fn statistics(&self, pattern: &KeyPattern) -> Result<HistogramStats, BagError> {
        self.histogram(pattern)?.statistics()
    }

    fn indexes(&self) -> Ref<'_, Vec<BTreeSet<KeyValue>>> {
        if self.dirty.get() {
            let mut index = self.index.borrow_mut();
            index.clear();
            index.resize_with(self.max_arity, BTreeSet::new);
            for key in self.counts.keys() {
                for (position, value) in key.iter().enumerate() {
                    index[position].insert(value.clone());
                }
            }
            self.dirty.set(false);
        }
        self.index.borrow()
    }

    /// Call `visit` with the count of every present key the pattern expands to, until it returns
    /// `false`.
    ///
    /// Expansion is depth first with an explicit stack of partial keys.
    fn expand(&self, pattern: &KeyPattern, mut visit: impl FnMut(u64) -> bool) {
        let index = self.indexes();
        let mut stack: Vec<Vec<KeyValue>> = vec![Vec::with_capacity(pattern.len())];
        while let Some(partial) = stack.pop() {
            let position = partial.len();
            if position == pattern.len() {
                if let Some(count) = self.counts.get(&MultiKey::new(partial)) {
                    if !visit(*count) {
                        return;
                    }
                }
                continue;
            }
            match &pattern[position] {
                KeyPart::Value(value) => {
                    let mut next = partial;
                    next.push(value.clone());
                    stack.push(next);
                }
                KeyPart::Any => {
                    let values = match index.get(position) {
                        Some(values) => values,
                        None => continue,
                    };
                    for value in values.iter().rev() {
                        let mut next = partial.clone();
                        next.push(value.clone());
                        stack.push(next);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::MultiKeyBag;
    use crate::{
        bag::{KeyValue, MAX_COMPONENTS},
        error::BagError,
        key, pattern,
    };
    use noisy_float::prelude::*;
    use pretty_assertions::assert_eq;

    fn sample() -> MultiKeyBag {
        let mut bag = MultiKeyBag::new();
        bag.add(key!["M", 2020, "A"]).unwrap();
        bag.add(key!["M", 2020, "A"]).unwrap();
        bag.add(key!["M", 2021, "A"]).unwrap();
        bag.add(key!["F", 2021, "B"]).unwrap();
        bag
    }

    #[test]
    fn counts_with_wildcards() {
        let bag = sample();
        assert_eq!(bag.count(&pattern!["M", _, "A"]), 3);
        assert_eq!(bag.count(&pattern!["M", 2020, "A"]), 2);
        assert_eq!(bag.count(&pattern![_, 2021, _]), 2);
        assert_eq!(bag.count(&pattern![_, _, _]), 4);
        assert_eq!(bag.count(&pattern!["F", _, "A"]), 0);
        assert_eq!(bag.count(&pattern!["M", _]), 0);
        // counting doesn't make up keys
        assert_eq!(bag.len(), 3);
        assert_eq!(bag.total(), 4);
    }

    #[test]
    fn contains_with_wildcards() {
        let bag = sample();
        assert!(bag.contains(&pattern!["F", _, _]));
        assert!(!bag.contains(&pattern!["F", 2020, _]));
        assert!(!bag.contains(&pattern!["X", _, _]));
    }

    #[test]
    fn index_is_refreshed_after_inserts() {
        let mut bag = sample();
        assert_eq!(bag.count(&pattern![_, 2022, _]), 0);
        bag.add_n(key!["F", 2022, "C"], 4).unwrap();
        assert_eq!(bag.count(&pattern![_, 2022, _]), 4);
        assert_eq!(bag.count(&pattern!["F", _, _]), 5);
    }

    #[test]
    fn rejects_long_keys() {
        let mut bag = MultiKeyBag::new();
        assert_eq!(
            bag.add(key![1, 2, 3, 4, 5, 6]),
            Err(BagError::TooManyComponents {
                max: MAX_COMPONENTS,
                found: 6
            })
        );
        assert!(bag.is_empty());
    }

    #[test]
    fn sorted_by_component() {
        let bag = sample();
        let keys: Vec<String> = bag.sorted_keys(1).iter().map(|k| k.to_string()).collect();
        assert_eq!(
            keys,
            vec!["(M, 2020, A)", "(F, 2021, B)", "(M, 2021, A)"]
        );
    }

    #[test]
    fn sub_bags_drop_the_component() {
        let bag = sample();
        let males = bag.sub_bag(0, &KeyValue::from("M"));
        assert_eq!(males.max_arity(), 2);
        assert_eq!(males.count(&pattern![_, "A"]), 3);
        assert_eq!(males.count(&pattern![2021, "A"]), 1);
        assert_eq!(males.count(&pattern![_, "B"]), 0);
    }

    #[test]
    fn histograms_and_statistics() {
        let mut bag = MultiKeyBag::new();
        for (sex, label, value) in [
            ("M", "A", 1.),
            ("M", "A", 2.),
            ("M", "A", 2.),
            ("M", "A", 7.),
            ("M", "B", 100.),
            ("F", "A", 50.),
        ] {
            bag.add(key![sex, label, r64(value)]).unwrap();
        }
        let histogram = bag.histogram(&pattern!["M", "A"]).unwrap();
        assert_eq!(histogram.total(), 4);
        assert_eq!(histogram.get(&KeyValue::from(r64(2.))), 2);
        assert_eq!(histogram.get(&KeyValue::from(r64(100.))), 0);

        let stats = bag.statistics(&pattern!["M", "A", _]).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 3.);
        assert_eq!(stats.std_dev, (58f64 / 4. - 9.).sqrt());
        assert_eq!(stats.median(), 2.);
        assert_eq!(stats.min, 1.);
        assert_eq!(stats.max, 7.);

        // summed over sex
        let stats = bag.statistics(&pattern![_, "A"]).unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.max, 50.);

        assert_eq!(
            bag.histogram(&pattern!["M"]),
            Err(BagError::HistogramShape {
                expected: 2,
                arity: 3,
                found: 1
            })
        );
        assert!(bag.histogram(&pattern!["M", "A", (r64(1.))]).is_err());
    }

    #[test]
    fn merging() {
        let mut left = sample();
        let mut right = MultiKeyBag::new();
        right.add(key!["M", 2020, "A"]).unwrap();
        right.add(key!["X"]).unwrap();
        left.merge(&right);
        assert_eq!(left.count(&pattern!["M", 2020, "A"]), 3);
        assert_eq!(left.count(&pattern![_]), 1);
        assert_eq!(left.total(), 6);
    }
}
