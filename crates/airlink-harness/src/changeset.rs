//! Sweep axes and their combinatorial enumeration.
//!
//! Implements:
//! - `ChangeItem`: one named integer axis `[start, end]` walked by `step`
//! - `ChangeSet`: an ordered set of axes enumerated like an odometer
//! - Range containment used to match excluded combinations
//!
//! The first item added varies fastest. `init` followed by repeated
//! `iter` visits every combination exactly once in the same order on
//! every run.

use core::fmt;

/// Parameter values of one combination, in item order.
pub type Snapshot = Vec<(String, i32)>;

/// One sweep axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeItem {
    name: String,
    start: i32,
    end: i32,
    step: i32,
    current: i32,
}

impl ChangeItem {
    /// New axis positioned at `start`.
    ///
    /// A zero `step` pins the axis to `start`. A negative `step` walks
    /// down from `start` to `end`.
    pub fn new(name: impl Into<String>, start: i32, end: i32, step: i32) -> Self {
        Self {
            name: name.into(),
            start,
            end: if step == 0 { start } else { end },
            step,
            current: start,
        }
    }

    /// Axis name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    pub fn current(&self) -> i32 {
        self.current
    }

    /// First value.
    pub fn start(&self) -> i32 {
        self.start
    }

    /// Last value bound (inclusive).
    pub fn end(&self) -> i32 {
        self.end
    }

    /// Increment.
    pub fn step(&self) -> i32 {
        self.step
    }

    /// Back to `start`.
    pub fn reset(&mut self) {
        self.current = self.start;
    }

    /// Step once; false if the next value would leave the range.
    pub fn advance(&mut self) -> bool {
        let (lower, upper) = match self.step {
            s if s > 0 => (self.start, self.end),
            s if s < 0 => (self.end, self.start),
            _ => return false,
        };
        match self.current.checked_add(self.step) {
            Some(next) if (lower..=upper).contains(&next) => {
                self.current = next;
                true
            }
            _ => false,
        }
    }

    /// Number of values the axis takes.
    pub fn count(&self) -> u64 {
        let span = i64::from(self.end) - i64::from(self.start);
        let step = i64::from(self.step);
        if step == 0 || span.signum() * step.signum() < 0 {
            return 1;
        }
        (span / step) as u64 + 1
    }

    /// Whether `value` lies within this item's range, in either direction.
    pub fn contains(&self, value: i32) -> bool {
        let lower = self.start.min(self.end);
        let upper = self.start.max(self.end);
        (lower..=upper).contains(&value)
    }
}

impl fmt::Display for ChangeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<28} : {:4} [{:4}:{:4},{:4}]",
            self.name, self.current, self.start, self.end, self.step
        )
    }
}

/// Ordered set of sweep axes plus the index of the current combination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    items: Vec<ChangeItem>,
    curidx: u64,
}

impl ChangeSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an axis. Later axes vary slower.
    pub fn add(&mut self, name: impl Into<String>, start: i32, end: i32, step: i32) {
        self.items.push(ChangeItem::new(name, start, end, step));
    }

    /// Append an axis used only for range matching (exclusions).
    ///
    /// `end = None` leaves the range open above `start`.
    pub fn add_range(&mut self, name: impl Into<String>, start: i32, end: Option<i32>) {
        let end = end.unwrap_or(i32::MAX);
        let step = if end >= start { 1 } else { -1 };
        self.add(name, start, end, step);
    }

    /// Drop every axis.
    pub fn clear(&mut self) {
        self.items.clear();
        self.curidx = 0;
    }

    /// Rewind every axis to its start.
    ///
    /// Returns false if there is nothing to sweep.
    pub fn init(&mut self) -> bool {
        self.items.iter_mut().for_each(ChangeItem::reset);
        self.curidx = 0;
        !self.items.is_empty()
    }

    /// Move to the next combination.
    ///
    /// Returns false once every combination has been visited, leaving the
    /// set rewound to its first combination.
    pub fn iter(&mut self) -> bool {
        for item in &mut self.items {
            if item.advance() {
                self.curidx += 1;
                return true;
            }
            item.reset();
        }
        false
    }

    /// Axis by name.
    pub fn find(&self, name: &str) -> Option<&ChangeItem> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Current value of an axis.
    pub fn value(&self, name: &str) -> Option<i32> {
        self.find(name).map(ChangeItem::current)
    }

    /// Whether the current combination falls inside `other`'s ranges.
    ///
    /// Every axis of `other` must exist here and hold a value within its
    /// range. Axes only present here are unconstrained. An empty `other`
    /// never matches.
    pub fn is_subset(&self, other: &ChangeSet) -> bool {
        !other.items.is_empty()
            && other.items.iter().all(|range| {
                self.find(&range.name)
                    .is_some_and(|mine| range.contains(mine.current))
            })
    }

    /// Index of the current combination since `init`.
    pub fn curidx(&self) -> u64 {
        self.curidx
    }

    /// Axes in insertion order.
    pub fn items(&self) -> &[ChangeItem] {
        &self.items
    }

    /// Number of axes.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set has no axes.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of combinations.
    pub fn combinations(&self) -> u64 {
        if self.items.is_empty() {
            return 0;
        }
        self.items
            .iter()
            .map(ChangeItem::count)
            .fold(1u64, u64::saturating_mul)
    }

    /// Current parameter values.
    pub fn snapshot(&self) -> Snapshot {
        self.items
            .iter()
            .map(|item| (item.name.clone(), item.current))
            .collect()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn collect(cs: &mut ChangeSet) -> Vec<Vec<i32>> {
        let mut seen = Vec::new();
        let mut more = cs.init();
        while more {
            seen.push(cs.items().iter().map(ChangeItem::current).collect());
            more = cs.iter();
        }
        seen
    }

    #[test]
    fn test_two_axis_order() {
        let mut cs = ChangeSet::new();
        cs.add("power", 0, 2, 1);
        cs.add("channel", 1, 3, 1);

        let seen = collect(&mut cs);
        let expected: Vec<Vec<i32>> = [
            (0, 1),
            (1, 1),
            (2, 1),
            (0, 2),
            (1, 2),
            (2, 2),
            (0, 3),
            (1, 3),
            (2, 3),
        ]
        .iter()
        .map(|&(p, c)| vec![p, c])
        .collect();
        assert_eq!(seen, expected);
        assert_eq!(cs.combinations(), 9);
    }

    #[test]
    fn test_empty_set() {
        let mut cs = ChangeSet::new();
        assert!(!cs.init());
        assert!(!cs.iter());
        assert_eq!(cs.combinations(), 0);
    }

    #[test]
    fn test_zero_step_pins_value() {
        let mut cs = ChangeSet::new();
        cs.add("mcs", 7, 100, 0);
        assert_eq!(cs.find("mcs").unwrap().end(), 7);
        assert_eq!(collect(&mut cs), vec![vec![7]]);
    }

    #[test]
    fn test_negative_step() {
        let mut cs = ChangeSet::new();
        cs.add("power", 20, 10, -5);
        assert_eq!(collect(&mut cs), vec![vec![20], vec![15], vec![10]]);
        assert_eq!(cs.find("power").unwrap().count(), 3);
    }

    #[test]
    fn test_step_not_dividing_range() {
        let item = ChangeItem::new("len", 0, 10, 4);
        assert_eq!(item.count(), 3);
        let mut cs = ChangeSet::new();
        cs.add("len", 0, 10, 4);
        assert_eq!(collect(&mut cs), vec![vec![0], vec![4], vec![8]]);
    }

    #[test]
    fn test_curidx_counts_combinations() {
        let mut cs = ChangeSet::new();
        cs.add("a", 0, 1, 1);
        cs.add("b", 0, 1, 1);
        cs.init();
        let mut last = 0;
        while cs.iter() {
            last = cs.curidx();
        }
        assert_eq!(last, 3);
        // Exhaustion rewinds to the first combination.
        assert_eq!(cs.value("a"), Some(0));
        assert_eq!(cs.value("b"), Some(0));
    }

    #[test]
    fn test_is_subset() {
        let mut cs = ChangeSet::new();
        cs.add("power", 0, 10, 1);
        cs.add("channel", 1, 11, 1);
        cs.init();
        cs.iter();
        cs.iter(); // power = 2

        let mut ex = ChangeSet::new();
        ex.add_range("power", 1, Some(3));
        assert!(cs.is_subset(&ex));

        ex.add_range("channel", 5, None);
        assert!(!cs.is_subset(&ex));

        let mut other_axis = ChangeSet::new();
        other_axis.add_range("rate", 0, None);
        assert!(!cs.is_subset(&other_axis));

        assert!(!cs.is_subset(&ChangeSet::new()));
    }

    #[test]
    fn test_display() {
        let mut cs = ChangeSet::new();
        cs.add("power", 0, 2, 1);
        let text = cs.to_string();
        assert!(text.starts_with("power"));
        assert!(text.contains("[   0:   2,   1]"));
    }

    fn axis() -> impl Strategy<Value = (i32, i32, i32)> {
        (-5i32..5, 0i32..4, prop_oneof![Just(-2), Just(-1), Just(1), Just(2), Just(3)])
            .prop_map(|(start, len, step): (i32, i32, i32)| (start, start + len * step.signum(), step))
    }

    proptest! {
        #[test]
        fn prop_enumerates_each_combination_once(axes in prop::collection::vec(axis(), 1..4)) {
            let mut cs = ChangeSet::new();
            for (i, (start, end, step)) in axes.iter().enumerate() {
                cs.add(format!("axis{i}"), *start, *end, *step);
            }

            let first = collect(&mut cs);
            let expected: u64 = axes
                .iter()
                .map(|(start, end, step)| ChangeItem::new("x", *start, *end, *step).count())
                .product();
            prop_assert_eq!(first.len() as u64, expected);
            prop_assert_eq!(cs.combinations(), expected);

            let unique: HashSet<_> = first.iter().cloned().collect();
            prop_assert_eq!(unique.len(), first.len());

            let second = collect(&mut cs);
            prop_assert_eq!(first, second);
        }
    }
}
