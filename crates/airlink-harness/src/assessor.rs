//! Pruning of known-bad combinations.

use crate::changeset::ChangeSet;
use tracing::trace;

/// Set of excluded parameter ranges.
///
/// A combination is skipped when it falls inside any excluded set
/// (see [`ChangeSet::is_subset`]).
#[derive(Debug, Clone, Default)]
pub struct Assessor {
    excluded: Vec<ChangeSet>,
}

impl Assessor {
    /// Assessor that passes everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude every combination inside `ranges`.
    pub fn exclude(&mut self, ranges: ChangeSet) {
        self.excluded.push(ranges);
    }

    /// Forget all exclusions.
    pub fn clear(&mut self) {
        self.excluded.clear();
    }

    /// Number of exclusions.
    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    /// Whether nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    /// Whether the current combination of `cs` should run.
    pub fn assess(&self, cs: &ChangeSet) -> bool {
        match self.excluded.iter().position(|ex| cs.is_subset(ex)) {
            Some(rule) => {
                trace!(combination = cs.curidx(), rule, "Combination excluded");
                false
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_assess_skips_excluded() {
        let mut cs = ChangeSet::new();
        cs.add("power", 0, 2, 1);
        cs.add("channel", 1, 3, 1);

        let mut ex = ChangeSet::new();
        ex.add_range("power", 1, Some(1));
        ex.add_range("channel", 2, None);
        let mut assessor = Assessor::new();
        assessor.exclude(ex);

        let mut passed = Vec::new();
        let mut more = cs.init();
        while more {
            if assessor.assess(&cs) {
                passed.push((cs.value("power").unwrap(), cs.value("channel").unwrap()));
            }
            more = cs.iter();
        }
        assert_eq!(passed.len(), 7);
        assert!(!passed.contains(&(1, 2)));
        assert!(!passed.contains(&(1, 3)));
    }

    #[test]
    fn test_empty_assessor_passes_all() {
        let mut cs = ChangeSet::new();
        cs.add("x", 0, 0, 0);
        cs.init();
        assert!(Assessor::new().assess(&cs));
    }

    #[test]
    fn test_unknown_axis_never_excludes() {
        let mut cs = ChangeSet::new();
        cs.add("power", 0, 2, 1);
        cs.init();
        let mut ex = ChangeSet::new();
        ex.add_range("power", 0, None);
        ex.add_range("bandwidth", 0, None);
        let mut assessor = Assessor::new();
        assessor.exclude(ex);
        assert!(assessor.assess(&cs));
    }

    proptest! {
        #[test]
        fn prop_superset_of_exclusion_is_rejected(
            power in 0i32..10,
            channel in 1i32..14,
            lo in 0i32..10,
            width in 0i32..5,
        ) {
            let mut cs = ChangeSet::new();
            cs.add("power", power, power, 0);
            cs.add("channel", channel, channel, 0);
            cs.init();

            let mut ex = ChangeSet::new();
            ex.add_range("power", lo, Some(lo + width));
            let mut assessor = Assessor::new();
            assessor.exclude(ex);

            let inside = (lo..=lo + width).contains(&power);
            prop_assert_eq!(assessor.assess(&cs), !inside);
        }
    }
}
