//! The shared taxon universe and trees bound to it.
//!
//! A [`TaxonUniverse`] is an immutable value passed explicitly to every
//! operation. Labels are kept sorted, so identical taxa always map to the
//! same bit position no matter in which order a file or a tree lists them.

use crate::error::UniverseError;
use phylotree::tree::Tree as PhyloTree;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Ordered, immutable set of leaf labels shared by one validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonUniverse {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl TaxonUniverse {
    /// Build a universe from labels in any order.
    ///
    /// # Errors
    /// Fails on a repeated or empty label.
    ///
    /// # Example
    /// ```
    /// # use phylo_topology_validator::taxa::TaxonUniverse;
    /// let universe = TaxonUniverse::from_labels(["C", "A", "B"]).unwrap();
    /// assert_eq!(universe.labels(), ["A", "B", "C"]);
    /// assert_eq!(universe.index_of("C"), Some(2));
    /// ```
    pub fn from_labels<I, S>(labels: I) -> Result<Self, UniverseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.iter().any(|l| l.is_empty()) {
            return Err(UniverseError::EmptyLabel);
        }
        labels.sort();
        if let Some(pair) = labels.windows(2).find(|w| w[0] == w[1]) {
            return Err(UniverseError::DuplicateLabel(pair[0].clone()));
        }

        let index = labels
            .iter()
            .enumerate()
            .map(|(idx, label)| (label.clone(), idx))
            .collect();

        Ok(TaxonUniverse { labels, index })
    }

    /// Number of taxa (N).
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in bit order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn label(&self, idx: usize) -> Option<&str> {
        self.labels.get(idx).map(String::as_str)
    }

    /// Label used to orient bipartitions: the side without it is canonical.
    pub fn reference_label(&self) -> Option<&str> {
        self.label(0)
    }
}

/// A parsed tree bound to the universe its source declared.
///
/// The universe handle lets a validation run refuse trees that were bound to
/// a different namespace.
pub struct BoundTree {
    pub name: String,
    pub tree: PhyloTree,
    universe: Arc<TaxonUniverse>,
}

impl BoundTree {
    pub fn new(name: impl Into<String>, tree: PhyloTree, universe: Arc<TaxonUniverse>) -> Self {
        BoundTree { name: name.into(), tree, universe }
    }

    pub fn universe(&self) -> &Arc<TaxonUniverse> {
        &self.universe
    }

    /// True if this tree was bound to `universe` (same handle or equal labels).
    pub fn is_bound_to(&self, universe: &TaxonUniverse) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.universe), universe) || *self.universe == *universe
    }
}

impl fmt::Debug for BoundTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundTree")
            .field("name", &self.name)
            .field("taxa", &self.universe.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_sorted() {
        let universe = TaxonUniverse::from_labels(vec!["Human", "Chimp", "Gorilla"]).unwrap();
        assert_eq!(universe.labels(), ["Chimp", "Gorilla", "Human"]);
        assert_eq!(universe.reference_label(), Some("Chimp"));
        assert_eq!(universe.index_of("Human"), Some(2));
        assert_eq!(universe.index_of("Orangutan"), None);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = TaxonUniverse::from_labels(["A", "B", "C"]).unwrap();
        let b = TaxonUniverse::from_labels(["C", "A", "B"]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let err = TaxonUniverse::from_labels(["A", "B", "A"]).unwrap_err();
        assert_eq!(err, UniverseError::DuplicateLabel("A".to_string()));
    }

    #[test]
    fn test_empty_label_rejected() {
        let err = TaxonUniverse::from_labels(["A", ""]).unwrap_err();
        assert_eq!(err, UniverseError::EmptyLabel);
    }

    #[test]
    fn test_bound_tree_universe_identity() {
        let shared = Arc::new(TaxonUniverse::from_labels(["A", "B", "C"]).unwrap());
        let tree = PhyloTree::from_newick("((A,B),C);").unwrap();
        let bound = BoundTree::new("T0", tree, Arc::clone(&shared));

        assert!(bound.is_bound_to(&shared));
        assert!(bound.is_bound_to(&TaxonUniverse::from_labels(["B", "C", "A"]).unwrap()));
        assert!(!bound.is_bound_to(&TaxonUniverse::from_labels(["A", "B", "D"]).unwrap()));
    }
}
