use super::KeyValue;
use crate::error::BagError;
use noisy_float::prelude::*;
use std::collections::{btree_map, BTreeMap};

/// Frequencies of the values of one key component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram(BTreeMap<KeyValue, u64>);

impl Histogram {
    pub(crate) fn new(counts: BTreeMap<KeyValue, u64>) -> Self {
        Self(counts)
    }

    pub fn get(&self, value: &KeyValue) -> u64 {
        self.0.get(value).copied().unwrap_or(0)
    }

    /// The number of distinct values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The sum of all frequencies.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, KeyValue, u64> {
        self.0.iter()
    }

    /// Fails if any value is not a number.
    pub fn statistics(&self) -> Result<HistogramStats, BagError> {
        let values = self
            .0
            .iter()
            .map(|(value, count)| match value.as_f64() {
                Some(v) => Ok((v, *count)),
                None => Err(BagError::NonNumeric(value.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HistogramStats::from_frequencies(values))
    }
}

impl<'a> IntoIterator for &'a Histogram {
    type Item = (&'a KeyValue, &'a u64);
    type IntoIter = btree_map::Iter<'a, KeyValue, u64>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Summary statistics of a numeric histogram. Everything is NaN when the histogram is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Distinct values in ascending order, with their frequencies.
    values: Vec<(R64, u64)>,
}

impl HistogramStats {
    /// Values must be finite.
    pub fn from_frequencies(frequencies: impl IntoIterator<Item = (f64, u64)>) -> Self {
        let mut values: BTreeMap<R64, u64> = BTreeMap::new();
        for (value, count) in frequencies {
            if count > 0 {
                *values.entry(r64(value)).or_default() += count;
            }
        }
        let values: Vec<(R64, u64)> = values.into_iter().collect();

        let count: u64 = values.iter().map(|(_, c)| c).sum();
        if count == 0 {
            return Self {
                count: 0,
                sum: f64::NAN,
                mean: f64::NAN,
                std_dev: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
                values,
            };
        }
        let (mut sum, mut sum_squared) = (0., 0.);
        for (value, c) in values.iter() {
            let (value, c) = (value.raw(), *c as f64);
            sum += value * c;
            sum_squared += value * value * c;
        }
        let denom = count as f64;
        let mean = sum / denom;
        let square_mean = sum_squared / denom;
        // rounding can push this slightly below 0 when all values are equal
        let std_dev = (square_mean - mean * mean).max(0.).sqrt();
        Self {
            count,
            sum,
            mean,
            std_dev,
            min: values[0].0.raw(),
            max: values[values.len() - 1].0.raw(),
            values,
        }
    }

    /// The `p`th percentile (`0 <= p <= 100`).
    ///
    /// Uses the value at rank `floor(p / 100 * (n + 1))`, clamped to `1..=n`, in the sorted list of
    /// all `n` observations.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 || !(0. ..=100.).contains(&p) {
            return f64::NAN;
        }
        let rank = percentile_to_rank(p / 100., self.count);
        let mut seen = 0;
        for (value, c) in self.values.iter() {
            seen += c;
            if seen >= rank {
                return value.raw();
            }
        }
        self.max
    }

    pub fn percentiles(&self, ps: &[f64]) -> Vec<f64> {
        ps.iter().map(|p| self.percentile(*p)).collect()
    }

    pub fn median(&self) -> f64 {
        self.percentile(50.)
    }
}

/// 1-based rank, never outside `1..=n` for `n > 0`.
fn percentile_to_rank(proportion: f64, n: u64) -> u64 {
    let rank = (proportion * (n as f64 + 1.)) as u64;
    rank.clamp(1, n)
}
