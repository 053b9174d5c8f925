use crate::error::ClassifierError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bijection between class labels and dense indices `0..n_classes`.
///
/// Indices follow the sorted order of the unique labels, so for labels
/// `[8, 8, 9, 5, 7, 6]` the classes are `[5, 6, 7, 8, 9]` and `8` maps to `3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMapping<L: Ord> {
    classes: Vec<L>,
    indices: BTreeMap<L, usize>,
}

impl<L: Ord + Clone> LabelMapping<L> {
    pub fn fit(labels: &[L]) -> Self {
        let mut classes = labels.to_vec();
        classes.sort();
        classes.dedup();
        let indices = classes
            .iter()
            .enumerate()
            .map(|(index, label)| (label.clone(), index))
            .collect();
        Self { classes, indices }
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Sorted unique labels.
    pub fn classes(&self) -> &[L] {
        &self.classes
    }

    pub fn index_of(&self, label: &L) -> Option<usize> {
        self.indices.get(label).copied()
    }

    pub fn label_of(&self, index: usize) -> Option<&L> {
        self.classes.get(index)
    }

    /// Maps every label to its index, failing on a label never seen in `fit`.
    pub fn encode(&self, labels: &[L]) -> Result<Vec<usize>, ClassifierError> {
        labels
            .iter()
            .map(|label| {
                self.index_of(label).ok_or_else(|| {
                    ClassifierError::InvalidInput("label not seen during fit".to_string())
                })
            })
            .collect()
    }

    pub fn decode(&self, indices: &[usize]) -> Result<Vec<L>, ClassifierError> {
        indices
            .iter()
            .map(|&index| {
                self.label_of(index).cloned().ok_or_else(|| {
                    ClassifierError::InvalidInput(format!(
                        "class index {index} out of range for {} classes",
                        self.n_classes()
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_dense_indices() {
        let labels = [8, 8, 9, 5, 7, 6, 6, 6];
        let mapping = LabelMapping::fit(&labels);

        assert_eq!(mapping.classes(), &[5, 6, 7, 8, 9]);
        assert_eq!(mapping.encode(&labels).unwrap(), vec![3, 3, 4, 0, 2, 1, 1, 1]);
    }

    #[test]
    fn test_bijection_round_trip() {
        let labels = ["cat", "dog", "ant", "dog", "eel"];
        let mapping = LabelMapping::fit(&labels);

        let indices = mapping.encode(&labels).unwrap();
        assert!(indices.iter().all(|&i| i < mapping.n_classes()));
        assert_eq!(mapping.decode(&indices).unwrap(), labels.to_vec());

        for index in 0..mapping.n_classes() {
            let label = mapping.label_of(index).unwrap();
            assert_eq!(mapping.index_of(label), Some(index));
        }
    }

    #[test]
    fn test_unknown_label_and_index() {
        let mapping = LabelMapping::fit(&[1u8, 2]);
        assert!(matches!(
            mapping.encode(&[3]),
            Err(ClassifierError::InvalidInput(_))
        ));
        assert!(mapping.decode(&[2]).is_err());
    }
}
