//! Classifies the differences between two label maps. Every key ends up in at most one of
//! three buckets: added, updated or removed. A key whose value changed is always "updated", and
//! never shows up as removed-and-added. Keys with equal values in both maps are not reported.
//!
//! These are pure functions over `BTreeMap`s, so the results don't depend on the order in which
//! the halves are computed, and iterating them always yields keys in sorted order.
use crate::resource::StringMap;

use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// The old and new value of a label whose value changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelDiff {
    /// key and new value of each label that's only present in the current labels
    pub added: StringMap,
    pub updated: BTreeMap<String, ValueChange>,
    /// key and old value of each label that's only present in the previous labels
    pub removed: StringMap,
}

impl LabelDiff {
    /// Compares `current` against `previous`. Neither map is modified.
    pub fn between(current: &StringMap, previous: &StringMap) -> LabelDiff {
        let added = added_labels(current, previous);
        let (updated, removed) = removed_or_updated_labels(current, previous);
        LabelDiff {
            added,
            updated,
            removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

impl Display for LabelDiff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("<no label changes>");
        }
        write!(
            f,
            "{} added, {} updated, {} removed",
            self.added.len(),
            self.updated.len(),
            self.removed.len()
        )
    }
}

/// Returns the labels that are present in `current` but not in `previous`
pub fn added_labels(current: &StringMap, previous: &StringMap) -> StringMap {
    current
        .iter()
        .filter(|(key, _)| !previous.contains_key(key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Walks the `previous` labels and returns the ones whose value changed, along with the ones
/// that no longer exist in `current`.
pub fn removed_or_updated_labels(
    current: &StringMap,
    previous: &StringMap,
) -> (BTreeMap<String, ValueChange>, StringMap) {
    let mut updated = BTreeMap::new();
    let mut removed = StringMap::new();

    for (key, old_value) in previous.iter() {
        match current.get(key) {
            Some(new_value) if new_value != old_value => {
                updated.insert(
                    key.clone(),
                    ValueChange {
                        old: old_value.clone(),
                        new: new_value.clone(),
                    },
                );
            }
            Some(_) => {}
            None => {
                removed.insert(key.clone(), old_value.clone());
            }
        }
    }
    (updated, removed)
}

#[cfg(test)]
mod test {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> StringMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn changed_value_is_updated_and_new_key_is_added() {
        let previous = labels(&[("env", "dev")]);
        let current = labels(&[("env", "prod"), ("tier", "web")]);

        let diff = LabelDiff::between(&current, &previous);

        assert_eq!(labels(&[("tier", "web")]), diff.added);
        assert_eq!(1, diff.updated.len());
        assert_eq!(
            Some(&ValueChange {
                old: "dev".to_owned(),
                new: "prod".to_owned()
            }),
            diff.updated.get("env")
        );
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn missing_key_is_removed_with_its_old_value() {
        let previous = labels(&[("a", "1"), ("b", "2")]);
        let current = labels(&[("a", "1")]);

        let diff = LabelDiff::between(&current, &previous);

        assert_eq!(labels(&[("b", "2")]), diff.removed);
        assert!(diff.added.is_empty());
        assert!(diff.updated.is_empty());
    }

    #[test]
    fn equal_maps_produce_an_empty_diff() {
        let both = labels(&[("a", "1"), ("b", "2")]);
        let diff = LabelDiff::between(&both, &both.clone());
        assert!(diff.is_empty());
        assert_eq!(0, diff.len());

        assert!(LabelDiff::between(&StringMap::new(), &StringMap::new()).is_empty());
    }

    #[test]
    fn empty_string_values_are_still_compared() {
        let previous = labels(&[("flag", "")]);
        let current = labels(&[("flag", "on"), ("other", "")]);

        let diff = LabelDiff::between(&current, &previous);

        assert_eq!(labels(&[("other", "")]), diff.added);
        assert!(diff.updated.contains_key("flag"));
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn classes_are_disjoint_and_updated_keys_differ_in_both_maps() {
        let previous = labels(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        let current = labels(&[("a", "1"), ("b", "20"), ("e", "5"), ("d", "40")]);

        let diff = LabelDiff::between(&current, &previous);

        for (key, change) in diff.updated.iter() {
            assert_eq!(Some(&change.old), previous.get(key));
            assert_eq!(Some(&change.new), current.get(key));
            assert_ne!(change.old, change.new);
            assert!(!diff.added.contains_key(key));
            assert!(!diff.removed.contains_key(key));
        }
        for key in diff.added.keys() {
            assert!(!diff.removed.contains_key(key));
        }
        assert_eq!(labels(&[("e", "5")]), diff.added);
        assert_eq!(labels(&[("c", "3")]), diff.removed);
        assert_eq!(vec!["b", "d"], diff.updated.keys().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn inputs_are_not_modified() {
        let previous = labels(&[("a", "1")]);
        let current = labels(&[("b", "2")]);
        let _ = LabelDiff::between(&current, &previous);
        assert_eq!(labels(&[("a", "1")]), previous);
        assert_eq!(labels(&[("b", "2")]), current);
    }
}
