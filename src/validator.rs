//! Validation of a tree catalog against one taxon universe.
//!
//! # Overview
//! [`validate`] walks every tree once (in parallel by default), then reduces
//! the per-tree results in input order into a [`ValidationReport`]:
//!
//! 1. leaf counts are collected and compared with the universe size,
//! 2. every tree is classified as bifurcating or multifurcating,
//! 3. trees are grouped by [`TopologySignature`]; any group with two or more
//!    members is a [`DuplicateGroup`].
//!
//! # Duplicate detection
//! Instead of comparing all T² pairs, each tree is fingerprinted once and
//! bucketed by fingerprint. Inside a bucket signatures are compared exactly,
//! so a fingerprint collision cannot merge two different topologies.
//! Signature equality is transitive, so every pair inside a group is a
//! duplicate pair without a second pass.

use crate::error::{TaxonError, ValidationError};
use crate::signature::{SplitEncoding, TopologySignature, TreeInspection, TreeView};
use crate::taxa::{BoundTree, TaxonUniverse};
use itertools::Itertools;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Knobs for a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorConfig {
    pub encoding: SplitEncoding,
    /// Inspect trees on the rayon pool.
    pub parallel: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig { encoding: SplitEncoding::Bipartition, parallel: true }
    }
}

/// Trees sharing one topology signature, as ascending input indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    members: Vec<usize>,
}

impl DuplicateGroup {
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Every unordered pair of members, lower index first.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.members.iter().copied().tuple_combinations()
    }
}

/// Trees whose leaf count differs from the universe size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCountAnomaly {
    /// Universe size.
    pub expected: usize,
    /// Every distinct leaf count seen in the run.
    pub observed: BTreeSet<usize>,
    /// Input indices of trees with a leaf count other than `expected`.
    pub offending: Vec<usize>,
}

/// A tree left out of duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTree {
    pub index: usize,
    pub reason: TaxonError,
}

/// Outcome of one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub total_count: usize,
    pub bifurcating_count: usize,
    pub multifurcating_count: usize,
    pub universe_size: usize,
    pub observed_leaf_counts: BTreeSet<usize>,
    pub leaf_count_anomaly: Option<LeafCountAnomaly>,
    pub rejected: Vec<RejectedTree>,
    pub duplicate_groups: Vec<DuplicateGroup>,
}

impl ValidationReport {
    /// No duplicates, no anomaly, no rejected trees.
    pub fn is_clean(&self) -> bool {
        self.duplicate_groups.is_empty() && self.leaf_count_anomaly.is_none() && self.rejected.is_empty()
    }

    /// Every duplicate pair across all groups, in group order.
    pub fn duplicate_pairs(&self) -> Vec<(usize, usize)> {
        self.duplicate_groups.iter().flat_map(DuplicateGroup::pairs).collect()
    }
}

/// Validate `trees` against `universe` with the default configuration.
///
/// # Errors
/// Fails fast when a tree is bound to a different universe, or when trees
/// are given with an empty universe. Problems with single trees are reported,
/// not returned.
pub fn validate(trees: &[BoundTree], universe: &TaxonUniverse) -> Result<ValidationReport, ValidationError> {
    validate_with(trees, universe, &ValidatorConfig::default())
}

/// Validate `trees` against `universe`.
pub fn validate_with(
    trees: &[BoundTree],
    universe: &TaxonUniverse,
    config: &ValidatorConfig,
) -> Result<ValidationReport, ValidationError> {
    if universe.is_empty() && !trees.is_empty() {
        return Err(ValidationError::EmptyUniverse { trees: trees.len() });
    }
    if let Some(index) = trees.iter().position(|t| !t.is_bound_to(universe)) {
        return Err(ValidationError::UniverseConflict { index });
    }

    debug!(trees = trees.len(), taxa = universe.len(), encoding = ?config.encoding, "validating tree collection");

    // phylotree trees are not Sync: copy them into views here, inspect on the pool
    let views: Vec<Result<TreeView, TaxonError>> = trees.iter().map(|t| TreeView::from_tree(&t.tree)).collect();
    let inspect_view = |view: Result<TreeView, TaxonError>| view.map(|v| v.inspect(universe, config.encoding));

    // Per-tree work is independent; collect keeps input order
    let inspections: Vec<Result<TreeInspection, TaxonError>> = if config.parallel {
        views.into_par_iter().map(inspect_view).collect()
    } else {
        views.into_iter().map(inspect_view).collect()
    };

    let expected = universe.len();
    let mut report = ValidationReport {
        total_count: trees.len(),
        universe_size: expected,
        ..Default::default()
    };
    let mut offending = Vec::new();
    let mut signed = Vec::with_capacity(trees.len());

    for (index, inspection) in inspections.into_iter().enumerate() {
        let inspection = match inspection {
            Ok(inspection) => inspection,
            Err(reason) => {
                reject(&mut report, trees, index, reason);
                continue;
            }
        };

        let shape = inspection.shape;
        report.observed_leaf_counts.insert(shape.leaf_count);
        if shape.leaf_count != expected {
            offending.push(index);
        }
        if shape.bifurcating {
            report.bifurcating_count += 1;
        } else {
            report.multifurcating_count += 1;
        }

        match inspection.signature {
            Ok(signature) => signed.push((index, signature)),
            Err(reason) => reject(&mut report, trees, index, reason),
        }
    }

    if !offending.is_empty() {
        warn!(
            expected,
            observed = ?report.observed_leaf_counts,
            trees = offending.len(),
            "leaf count anomaly"
        );
        report.leaf_count_anomaly = Some(LeafCountAnomaly {
            expected,
            observed: report.observed_leaf_counts.clone(),
            offending,
        });
    }

    report.duplicate_groups = group_duplicates(signed, TopologySignature::fingerprint);

    if config.encoding == SplitEncoding::Bipartition
        && report.multifurcating_count > 0
        && !report.duplicate_groups.is_empty()
    {
        warn!(
            groups = report.duplicate_groups.len(),
            "multifurcating trees grouped by unrooted bipartitions; rooted trees that differ only at the root \
             share a group, use the clade encoding to keep them apart"
        );
    }

    debug!(
        bifurcating = report.bifurcating_count,
        multifurcating = report.multifurcating_count,
        duplicate_groups = report.duplicate_groups.len(),
        rejected = report.rejected.len(),
        "validation finished"
    );

    Ok(report)
}

fn reject(report: &mut ValidationReport, trees: &[BoundTree], index: usize, reason: TaxonError) {
    warn!(index, tree = %trees[index].name, error = %reason, "tree rejected");
    report.rejected.push(RejectedTree { index, reason });
}

/// Group `(index, signature)` pairs by exact signature equality.
///
/// `fingerprint` only picks the bucket; members of a bucket are compared with
/// `==`. Input must be in ascending index order.
fn group_duplicates<F>(signed: Vec<(usize, TopologySignature)>, fingerprint: F) -> Vec<DuplicateGroup>
where
    F: Fn(&TopologySignature) -> u64,
{
    let mut buckets: HashMap<u64, Vec<(TopologySignature, Vec<usize>)>> = HashMap::new();

    for (index, signature) in signed {
        let bucket = buckets.entry(fingerprint(&signature)).or_default();
        match bucket.iter_mut().find(|(known, _)| *known == signature) {
            Some((_, members)) => members.push(index),
            None => {
                if !bucket.is_empty() {
                    debug!(index, "fingerprint collision resolved by exact comparison");
                }
                bucket.push((signature, vec![index]));
            }
        }
    }

    buckets
        .into_values()
        .flatten()
        .filter(|(_, members)| members.len() >= 2)
        .map(|(_, members)| DuplicateGroup { members })
        .sorted_by_key(|group| group.members[0])
        .collect()
}
