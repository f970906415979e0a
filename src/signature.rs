//! Canonical topology signatures for rooted trees.
//!
//! # Overview
//! Every internal edge of a tree splits the taxon universe in two. The set of
//! these splits is the tree's [`TopologySignature`]: two trees over the same
//! universe have the same topology exactly when their signatures are equal,
//! however their children happen to be ordered.
//!
//! ```text
//!        root
//!       /    \
//!     n1      C        n1 induces {A,B} | {C}
//!    /  \
//!   A    B
//! ```
//!
//! # Canonicalization
//! A split {A,B}|{C} can be recorded from either side. With
//! [`SplitEncoding::Bipartition`] we always store the side that does NOT
//! contain universe label 0, so both orientations produce one bitset.
//! [`SplitEncoding::Clade`] keeps the raw leaf set below the edge, which also
//! tells apart rooted trees whose splits only differ by orientation.
//!
//! # Why labels and not node ids
//! Node ids are assigned while parsing and differ between trees. Leaf labels
//! are looked up in the shared [`TaxonUniverse`], so the same taxon maps to
//! the same bit in every tree.

use crate::bitset::Bitset;
use crate::error::TaxonError;
use crate::taxa::TaxonUniverse;
use itertools::Itertools;
use phylotree::tree::Tree as PhyloTree;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

/// How an internal edge is turned into a signature entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SplitEncoding {
    /// Side of the bipartition without the reference label (unrooted splits).
    #[default]
    Bipartition,
    /// Leaf set below the edge, as is (rooted clades).
    Clade,
}

/// Structural facts about a tree that do not depend on its labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    /// Number of nodes without children.
    pub leaf_count: usize,
    /// True iff every node has exactly 0 or 2 children.
    pub bifurcating: bool,
}

/// Canonical, order-independent identity of a tree topology.
///
/// Splits are sorted and de-duplicated, so the derived `Eq`, `Ord` and `Hash`
/// compare topologies directly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopologySignature {
    splits: Vec<Bitset>,
}

impl TopologySignature {
    fn from_splits(mut splits: Vec<Bitset>) -> Self {
        splits.sort_unstable();
        splits.dedup();
        TopologySignature { splits }
    }

    pub fn splits(&self) -> &[Bitset] {
        &self.splits
    }

    pub fn len(&self) -> usize {
        self.splits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    /// 64-bit grouping key. Equal signatures always share a fingerprint;
    /// equal fingerprints must still be confirmed with `==`.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Human readable form, e.g. `{B,C} {D,E}`.
    pub fn describe(&self, universe: &TaxonUniverse) -> String {
        self.splits
            .iter()
            .map(|split| {
                let labels = split.ones().filter_map(|idx| universe.label(idx)).join(",");
                format!("{{{labels}}}")
            })
            .join(" ")
    }
}

/// Result of one walk over a tree.
///
/// The shape is known whenever the tree could be walked; the signature is
/// missing when the leaves do not match the universe.
#[derive(Debug, Clone)]
pub struct TreeInspection {
    pub shape: TreeShape,
    pub signature: Result<TopologySignature, TaxonError>,
}

/// Node ids of `tree` in post-order (children before parents).
///
/// Uses an explicit stack so very deep trees cannot overflow the call stack.
///
/// # Errors
/// Returns [`TaxonError::Malformed`] if the tree has no root or references a
/// missing node.
pub fn post_order(tree: &PhyloTree) -> Result<Vec<usize>, TaxonError> {
    let root = tree.get_root().map_err(malformed)?;

    let mut order = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((node_id, expanded)) = stack.pop() {
        if expanded {
            order.push(node_id);
            continue;
        }
        stack.push((node_id, true));
        let node = tree.get(&node_id).map_err(malformed)?;
        stack.extend(node.children.iter().rev().map(|&child_id| (child_id, false)));
    }

    Ok(order)
}

/// Owned copy of a tree's structure, nodes in post-order.
///
/// `phylotree` trees keep lazily filled `RefCell` caches and are not `Sync`.
/// A view is, so views can be inspected on the rayon pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeView {
    nodes: Vec<ViewNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewNode {
    /// Positions in `TreeView::nodes`, always lower than this node's own.
    children: Vec<usize>,
    name: Option<String>,
}

impl TreeView {
    /// Walk `tree` once and copy child lists and names.
    ///
    /// # Errors
    /// Returns [`TaxonError::Malformed`] if the tree cannot be walked.
    pub fn from_tree(tree: &PhyloTree) -> Result<Self, TaxonError> {
        let order = post_order(tree)?;
        let position: HashMap<usize, usize> = order.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();

        let nodes = order
            .iter()
            .map(|node_id| {
                let node = tree.get(node_id).map_err(malformed)?;
                let children = node
                    .children
                    .iter()
                    .map(|child_id| {
                        position.get(child_id).copied().ok_or_else(|| {
                            TaxonError::Malformed(format!("node {child_id} is not reachable from the root"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ViewNode { children, name: node.name.clone() })
            })
            .collect::<Result<Vec<_>, TaxonError>>()?;

        Ok(TreeView { nodes })
    }

    /// Number of nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn shape(&self) -> TreeShape {
        let mut leaf_count = 0;
        let mut bifurcating = true;
        for node in &self.nodes {
            match node.children.len() {
                0 => leaf_count += 1,
                2 => {}
                _ => bifurcating = false,
            }
        }
        TreeShape { leaf_count, bifurcating }
    }

    pub fn signature(
        &self,
        universe: &TaxonUniverse,
        encoding: SplitEncoding,
    ) -> Result<TopologySignature, TaxonError> {
        let num_leaves = universe.len();
        let words = Bitset::words_for(num_leaves);

        // Leaf set below every node, filled bottom-up and indexed like `nodes`
        let mut below: Vec<Bitset> = Vec::with_capacity(self.nodes.len());
        let mut seen = Bitset::zeros(words);

        for node in &self.nodes {
            let mut bitset = Bitset::zeros(words);

            if node.children.is_empty() {
                let label = node
                    .name
                    .as_deref()
                    .filter(|name| !name.is_empty())
                    .ok_or(TaxonError::UnlabeledLeaf)?;
                let idx = universe
                    .index_of(label)
                    .ok_or_else(|| TaxonError::ForeignLabel(label.to_string()))?;
                if seen.contains(idx) {
                    return Err(TaxonError::RepeatedLabel(label.to_string()));
                }
                seen.set(idx);
                bitset.set(idx);
            } else {
                for &child in &node.children {
                    let child_set = below.get(child).ok_or_else(|| {
                        TaxonError::Malformed(format!("node at {child} visited after its parent"))
                    })?;
                    bitset.or_assign(child_set);
                }
            }

            below.push(bitset);
        }

        if seen.count_ones() != num_leaves {
            let missing = seen
                .complement(num_leaves)
                .ones()
                .filter_map(|idx| universe.label(idx).map(str::to_string))
                .collect();
            return Err(TaxonError::MissingLabels(missing));
        }

        // The root is last in post-order and induces no split
        let internal = self.nodes.len().saturating_sub(1);

        let splits = self.nodes[..internal]
            .iter()
            .zip(below)
            .filter(|(node, _)| !node.children.is_empty())
            .map(|(_, bitset)| bitset)
            // Unary nodes above a single leaf or below the root add no split
            .filter(|bitset| {
                let size = bitset.count_ones();
                size > 1 && size < num_leaves
            })
            .map(|bitset| match encoding {
                SplitEncoding::Bipartition if bitset.contains(0) => bitset.complement(num_leaves),
                _ => bitset,
            })
            .collect();

        Ok(TopologySignature::from_splits(splits))
    }

    /// Shape and signature; the shape survives label errors.
    pub fn inspect(&self, universe: &TaxonUniverse, encoding: SplitEncoding) -> TreeInspection {
        TreeInspection {
            shape: self.shape(),
            signature: self.signature(universe, encoding),
        }
    }
}

/// Leaf count and bifurcation flag of a tree.
///
/// Every node is checked, at every depth.
pub fn tree_shape(tree: &PhyloTree) -> Result<TreeShape, TaxonError> {
    Ok(TreeView::from_tree(tree)?.shape())
}

/// True iff every node of `tree` has exactly 0 or 2 children.
pub fn is_bifurcating(tree: &PhyloTree) -> Result<bool, TaxonError> {
    Ok(tree_shape(tree)?.bifurcating)
}

/// Signature of `tree` with the default [`SplitEncoding::Bipartition`].
pub fn encode(tree: &PhyloTree, universe: &TaxonUniverse) -> Result<TopologySignature, TaxonError> {
    encode_with(tree, universe, SplitEncoding::default())
}

/// Signature of `tree` with the given encoding.
///
/// # Errors
/// Any leaf that is unlabeled, outside the universe or repeated, or any
/// universe label absent from the tree, makes the tree unusable for
/// comparison.
pub fn encode_with(
    tree: &PhyloTree,
    universe: &TaxonUniverse,
    encoding: SplitEncoding,
) -> Result<TopologySignature, TaxonError> {
    TreeView::from_tree(tree)?.signature(universe, encoding)
}

/// Shape and signature from a single traversal.
pub fn inspect(
    tree: &PhyloTree,
    universe: &TaxonUniverse,
    encoding: SplitEncoding,
) -> Result<TreeInspection, TaxonError> {
    Ok(TreeView::from_tree(tree)?.inspect(universe, encoding))
}

fn malformed(err: impl std::fmt::Display) -> TaxonError {
    TaxonError::Malformed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(newick: &str) -> PhyloTree {
        PhyloTree::from_newick(newick).unwrap()
    }

    fn universe(labels: &[&str]) -> TaxonUniverse {
        TaxonUniverse::from_labels(labels.iter().copied()).unwrap()
    }

    fn bits(universe: &TaxonUniverse, labels: &[&str]) -> Bitset {
        let mut bs = Bitset::zeros(Bitset::words_for(universe.len()));
        for label in labels {
            bs.set(universe.index_of(label).unwrap());
        }
        bs
    }

    /// ```text
    ///     ((A,B),C)        (A,(B,C))
    ///      {A,B}|{C}        {A}|{B,C}
    /// ```
    /// Stored as the side without A: `{C}` and `{B,C}`.
    #[test]
    fn test_three_taxon_rooted_trees_differ() {
        let u = universe(&["A", "B", "C"]);
        let ab_c = encode(&tree("((A,B),C);"), &u).unwrap();
        let a_bc = encode(&tree("(A,(B,C));"), &u).unwrap();

        assert_eq!(ab_c.splits(), [bits(&u, &["C"])]);
        assert_eq!(a_bc.splits(), [bits(&u, &["B", "C"])]);
        assert_ne!(ab_c, a_bc);
    }

    #[test]
    fn test_child_order_does_not_matter() {
        let u = universe(&["A", "B", "C", "D", "E"]);
        let reference = encode(&tree("(((A,B),C),(D,E));"), &u).unwrap();

        for newick in [
            "((D,E),(C,(B,A)));",
            "((E,D),((A,B),C));",
            "((C,(A,B)),(E,D));",
        ] {
            assert_eq!(encode(&tree(newick), &u).unwrap(), reference, "{newick}");
        }
    }

    #[test]
    fn test_encoding_is_idempotent() {
        let u = universe(&["A", "B", "C", "D"]);
        let t = tree("((A,C),(B,D));");
        let first = encode(&t, &u).unwrap();
        let second = encode(&t, &u).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    /// Both sides of the root induce the same bipartition {A,B}|{C,D}.
    #[test]
    fn test_balanced_tree_has_one_bipartition() {
        let u = universe(&["A", "B", "C", "D"]);
        let sig = encode(&tree("((A,B),(C,D));"), &u).unwrap();
        assert_eq!(sig.splits(), [bits(&u, &["C", "D"])]);
        assert_eq!(sig.describe(&u), "{C,D}");
    }

    #[test]
    fn test_caterpillar_bipartitions() {
        let u = universe(&["A", "B", "C", "D", "E"]);
        let sig = encode(&tree("((((A,B),C),D),E);"), &u).unwrap();
        // {A,B}, {A,B,C}, {A,B,C,D} flipped to the side without A
        assert_eq!(sig.describe(&u), "{E} {D,E} {C,D,E}");
        assert_eq!(sig.len(), 3);
    }

    #[test]
    fn test_clade_encoding_keeps_root_side() {
        let u = universe(&["A", "B", "C", "D"]);
        let left = tree("((A,B),C,D);");
        let right = tree("(A,B,(C,D));");

        assert_eq!(encode(&left, &u).unwrap(), encode(&right, &u).unwrap());
        assert_ne!(
            encode_with(&left, &u, SplitEncoding::Clade).unwrap(),
            encode_with(&right, &u, SplitEncoding::Clade).unwrap()
        );
    }

    #[test]
    fn test_star_tree_has_empty_signature() {
        let u = universe(&["A", "B", "C", "D"]);
        let sig = encode(&tree("(A,B,C,D);"), &u).unwrap();
        assert!(sig.is_empty());
        assert_eq!(sig, encode(&tree("(D,C,B,A);"), &u).unwrap());
    }

    #[test]
    fn test_unary_nodes_add_no_split() {
        let u = universe(&["A", "B", "C"]);
        let plain = encode(&tree("(A,B,C);"), &u).unwrap();
        assert_eq!(encode(&tree("((A),B,C);"), &u).unwrap(), plain);
        assert_eq!(encode(&tree("((A,B,C));"), &u).unwrap(), plain);
    }

    #[test]
    fn test_bifurcation_checks_every_depth() {
        assert!(is_bifurcating(&tree("(((A,B),C),D);")).unwrap());
        assert!(is_bifurcating(&tree("((A,B),(C,D));")).unwrap());

        // Root is binary, the violation is three levels down
        assert!(!is_bifurcating(&tree("((A,B),(C,(D,E,F)));")).unwrap());
        assert!(!is_bifurcating(&tree("(A,B,C);")).unwrap());
        assert!(!is_bifurcating(&tree("((A),B);")).unwrap());
    }

    #[test]
    fn test_tree_shape_counts_leaves() {
        let shape = tree_shape(&tree("((A,B),(C,(D,E,F)));")).unwrap();
        assert_eq!(shape, TreeShape { leaf_count: 6, bifurcating: false });
    }

    #[test]
    fn test_foreign_label() {
        let u = universe(&["A", "B", "C"]);
        let err = encode(&tree("((A,B),X);"), &u).unwrap_err();
        assert_eq!(err, TaxonError::ForeignLabel("X".to_string()));
    }

    #[test]
    fn test_repeated_label() {
        let u = universe(&["A", "B", "C"]);
        let err = encode(&tree("((A,A),(B,C));"), &u).unwrap_err();
        assert_eq!(err, TaxonError::RepeatedLabel("A".to_string()));
    }

    #[test]
    fn test_missing_labels() {
        let u = universe(&["A", "B", "C", "D"]);
        let err = encode(&tree("(A,B);"), &u).unwrap_err();
        assert_eq!(err, TaxonError::MissingLabels(vec!["C".to_string(), "D".to_string()]));
    }

    #[test]
    fn test_inspect_keeps_shape_on_label_error() {
        let u = universe(&["A", "B", "C"]);
        let inspection = inspect(&tree("((A,B),(C,Z));"), &u, SplitEncoding::Bipartition).unwrap();
        assert_eq!(inspection.shape.leaf_count, 4);
        assert!(inspection.shape.bifurcating);
        assert!(inspection.signature.is_err());
    }

    #[test]
    fn test_unlabeled_leaf() {
        let u = universe(&["A", "B", "C"]);
        let err = encode(&tree("((A,B),(C,));"), &u).unwrap_err();
        assert_eq!(err, TaxonError::UnlabeledLeaf);
    }

    #[test]
    fn test_tree_without_root_is_malformed() {
        let empty = PhyloTree::new();
        assert!(matches!(post_order(&empty), Err(TaxonError::Malformed(_))));
        assert!(matches!(TreeView::from_tree(&empty), Err(TaxonError::Malformed(_))));
        assert!(matches!(is_bifurcating(&empty), Err(TaxonError::Malformed(_))));
    }

    #[test]
    fn test_view_is_post_order() {
        let view = TreeView::from_tree(&tree("((A,B),C);")).unwrap();
        assert_eq!(view.len(), 5);
        let names: Vec<_> = view.nodes.iter().map(|n| n.name.as_deref()).collect();
        assert_eq!(names, [Some("A"), Some("B"), None, Some("C"), None]);
        assert_eq!(view.nodes[4].children, [2, 3]);
    }

    #[test]
    fn test_view_can_cross_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TreeView>();
        assert_send_sync::<TreeInspection>();
    }

    /// Spans two bitset words.
    #[test]
    fn test_large_caterpillar() {
        let labels: Vec<String> = (0..70).map(|i| format!("T{i:02}")).collect();
        let u = TaxonUniverse::from_labels(labels.clone()).unwrap();

        let mut forward = labels[0].clone();
        let mut backward = labels[0].clone();
        for label in &labels[1..] {
            forward = format!("({forward},{label})");
            backward = format!("({label},{backward})");
        }

        let sig = encode(&tree(&format!("{forward};")), &u).unwrap();
        assert_eq!(sig.len(), 68);
        assert_eq!(sig, encode(&tree(&format!("{backward};")), &u).unwrap());
    }
}
