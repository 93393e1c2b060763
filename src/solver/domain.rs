//! Finite integer domains represented as sorted, disjoint interval sets.
//!
//! A [`IntDomain`] is an immutable value: every narrowing operation returns a
//! new domain, which keeps the store's backtracking trail trivial (it just
//! holds the replaced values).

use serde::{Deserialize, Serialize};

/// A finite set of `i64` values, stored as sorted, disjoint, non-adjacent
/// closed intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntDomain {
    intervals: Vec<(i64, i64)>,
}

impl IntDomain {
    /// The empty domain.
    pub fn empty() -> Self {
        Self { intervals: Vec::new() }
    }

    /// A contiguous interval `[min, max]`. Empty if `min > max`.
    pub fn bounds(min: i64, max: i64) -> Self {
        if min > max {
            Self::empty()
        } else {
            Self { intervals: vec![(min, max)] }
        }
    }

    /// A singleton domain `{value}`.
    pub fn singleton(value: i64) -> Self {
        Self::bounds(value, value)
    }

    /// Builds a domain from an arbitrary collection of values.
    pub fn from_values<I: IntoIterator<Item = i64>>(values: I) -> Self {
        let mut vals: Vec<i64> = values.into_iter().collect();
        vals.sort_unstable();
        vals.dedup();

        let mut intervals: Vec<(i64, i64)> = Vec::new();
        for v in vals {
            match intervals.last_mut() {
                Some((_, hi)) if *hi + 1 == v => *hi = v,
                _ => intervals.push((v, v)),
            }
        }
        Self { intervals }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The number of values in the domain.
    pub fn size(&self) -> u64 {
        self.intervals
            .iter()
            .map(|(lo, hi)| hi.abs_diff(*lo) + 1)
            .sum()
    }

    pub fn is_singleton(&self) -> bool {
        self.intervals.len() == 1 && self.intervals[0].0 == self.intervals[0].1
    }

    /// The single value, if the domain is a singleton.
    pub fn singleton_value(&self) -> Option<i64> {
        if self.is_singleton() {
            Some(self.intervals[0].0)
        } else {
            None
        }
    }

    pub fn min(&self) -> Option<i64> {
        self.intervals.first().map(|(lo, _)| *lo)
    }

    pub fn max(&self) -> Option<i64> {
        self.intervals.last().map(|(_, hi)| *hi)
    }

    pub fn contains(&self, value: i64) -> bool {
        self.intervals
            .binary_search_by(|(lo, hi)| {
                if value < *lo {
                    std::cmp::Ordering::Greater
                } else if value > *hi {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// A new domain restricted to `[lo, hi]`.
    pub fn clamped(&self, lo: i64, hi: i64) -> Self {
        let mut out = Vec::new();
        for &(a, b) in &self.intervals {
            let (a, b) = (a.max(lo), b.min(hi));
            if a <= b {
                out.push((a, b));
            }
        }
        Self { intervals: out }
    }

    /// A new domain with `value` removed.
    pub fn without(&self, value: i64) -> Self {
        let mut out = Vec::with_capacity(self.intervals.len() + 1);
        for &(a, b) in &self.intervals {
            if value < a || value > b {
                out.push((a, b));
            } else {
                if a < value {
                    out.push((a, value - 1));
                }
                if value < b {
                    out.push((value + 1, b));
                }
            }
        }
        Self { intervals: out }
    }

    /// The intersection of two domains.
    pub fn intersection(&self, other: &IntDomain) -> Self {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let (a1, b1) = self.intervals[i];
            let (a2, b2) = other.intervals[j];
            let (lo, hi) = (a1.max(a2), b1.min(b2));
            if lo <= hi {
                out.push((lo, hi));
            }
            if b1 < b2 {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self { intervals: out }
    }

    /// The union of two domains.
    pub fn union(&self, other: &IntDomain) -> Self {
        let mut merged: Vec<(i64, i64)> = Vec::with_capacity(self.intervals.len() + other.intervals.len());
        merged.extend_from_slice(&self.intervals);
        merged.extend_from_slice(&other.intervals);
        merged.sort_unstable();

        let mut out: Vec<(i64, i64)> = Vec::new();
        for (lo, hi) in merged {
            match out.last_mut() {
                Some((_, prev_hi)) if *prev_hi >= lo.saturating_sub(1) => {
                    *prev_hi = (*prev_hi).max(hi);
                }
                _ => out.push((lo, hi)),
            }
        }
        Self { intervals: out }
    }

    /// Iterates over all values, in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.intervals.iter().flat_map(|&(lo, hi)| lo..=hi)
    }

    /// All values, in increasing order.
    pub fn values(&self) -> Vec<i64> {
        self.iter().collect()
    }
}

/// Iterates over the cross product of a list of domains in lexicographic
/// order. A zero-arity product yields a single empty tuple.
#[derive(Debug)]
pub struct CrossProduct {
    values: Vec<Vec<i64>>,
    indices: Vec<usize>,
    done: bool,
}

pub fn cross_product(domains: &[IntDomain]) -> CrossProduct {
    let values: Vec<Vec<i64>> = domains.iter().map(|d| d.values()).collect();
    let done = values.iter().any(|v| v.is_empty());
    CrossProduct {
        indices: vec![0; values.len()],
        values,
        done,
    }
}

impl Iterator for CrossProduct {
    type Item = Vec<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let tuple: Vec<i64> = self
            .indices
            .iter()
            .zip(&self.values)
            .map(|(&i, vals)| vals[i])
            .collect();

        // Advance the odometer, last position fastest.
        self.done = true;
        for i in (0..self.indices.len()).rev() {
            if self.indices[i] + 1 < self.values[i].len() {
                self.indices[i] += 1;
                self.done = false;
                break;
            }
            self.indices[i] = 0;
        }
        Some(tuple)
    }
}

impl std::fmt::Display for IntDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (lo, hi)) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if lo == hi {
                write!(f, "{}", lo)?;
            } else {
                write!(f, "{}..{}", lo, hi)?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn from_values_coalesces_adjacent_runs() {
        let dom = IntDomain::from_values([3, 1, 2, 7, 5, 7]);
        assert_eq!(dom.values(), vec![1, 2, 3, 5, 7]);
        assert_eq!(dom.size(), 5);
        assert_eq!(dom.min(), Some(1));
        assert_eq!(dom.max(), Some(7));
    }

    #[test]
    fn contains_checks_interval_membership() {
        let dom = IntDomain::from_values([1, 2, 3, 8]);
        assert!(dom.contains(2));
        assert!(dom.contains(8));
        assert!(!dom.contains(5));
        assert!(!dom.contains(0));
    }

    #[test]
    fn clamped_restricts_bounds() {
        let dom = IntDomain::from_values([1, 2, 3, 8, 9]);
        assert_eq!(dom.clamped(2, 8).values(), vec![2, 3, 8]);
        assert!(dom.clamped(4, 7).is_empty());
    }

    #[test]
    fn without_splits_intervals() {
        let dom = IntDomain::bounds(1, 5);
        assert_eq!(dom.without(3).values(), vec![1, 2, 4, 5]);
        assert_eq!(dom.without(1).values(), vec![2, 3, 4, 5]);
        assert_eq!(dom.without(9).values(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn intersection_and_union_agree_with_value_sets() {
        let a = IntDomain::from_values([1, 2, 3, 6, 7]);
        let b = IntDomain::from_values([2, 3, 4, 7, 10]);
        assert_eq!(a.intersection(&b).values(), vec![2, 3, 7]);
        assert_eq!(a.union(&b).values(), vec![1, 2, 3, 4, 6, 7, 10]);
    }

    #[test]
    fn singleton_detection() {
        assert_eq!(IntDomain::singleton(4).singleton_value(), Some(4));
        assert_eq!(IntDomain::bounds(4, 5).singleton_value(), None);
        assert!(IntDomain::bounds(5, 4).is_empty());
    }

    mod properties {
        use proptest::prelude::*;

        use super::super::IntDomain;

        fn value_set(values: &[i64]) -> std::collections::BTreeSet<i64> {
            values.iter().copied().collect()
        }

        proptest! {
            #[test]
            fn intersection_matches_value_sets(
                a in prop::collection::vec(-20i64..20, 0..12),
                b in prop::collection::vec(-20i64..20, 0..12),
            ) {
                let da = IntDomain::from_values(a.iter().copied());
                let db = IntDomain::from_values(b.iter().copied());
                let expected: Vec<i64> = value_set(&a)
                    .intersection(&value_set(&b))
                    .copied()
                    .collect();
                prop_assert_eq!(da.intersection(&db).values(), expected);
            }

            #[test]
            fn union_matches_value_sets(
                a in prop::collection::vec(-20i64..20, 0..12),
                b in prop::collection::vec(-20i64..20, 0..12),
            ) {
                let da = IntDomain::from_values(a.iter().copied());
                let db = IntDomain::from_values(b.iter().copied());
                let expected: Vec<i64> = value_set(&a)
                    .union(&value_set(&b))
                    .copied()
                    .collect();
                prop_assert_eq!(da.union(&db).values(), expected);
            }

            #[test]
            fn without_then_contains_is_false(
                a in prop::collection::vec(-20i64..20, 1..12),
                v in -25i64..25,
            ) {
                let dom = IntDomain::from_values(a.iter().copied());
                let removed = dom.without(v);
                prop_assert!(!removed.contains(v));
                prop_assert_eq!(removed.size() + u64::from(dom.contains(v)), dom.size());
            }
        }
    }
}
