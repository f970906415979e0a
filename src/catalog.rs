//! Expected size of an exhaustive rooted topology catalog.
//!
//! The number of rooted bifurcating topologies on n labelled leaves is
//! (2n-3)!! = (2n-3)! / (2^(n-2) (n-2)!). Multifurcating counts have no
//! simple closed form and are tabulated up to n = 10.

use crate::validator::ValidationReport;

/// Rooted multifurcating topologies on n labelled leaves, indexed by n.
const MULTIFURCATING_COUNTS: [u128; 11] = [
    0,
    0,
    0,
    1,
    11,
    131,
    1807,
    28813,
    524897,
    10791887,
    247678399,
];

/// Expected topology counts for one catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogExpectation {
    pub leaves: usize,
    pub bifurcating: u128,
    pub multifurcating: u128,
}

/// Expected versus observed counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogCheck {
    pub expected: CatalogExpectation,
    pub observed_bifurcating: usize,
    pub observed_multifurcating: usize,
}

impl CatalogExpectation {
    /// Expectation for a catalog on `leaves` taxa.
    ///
    /// With `multifurcating` false the catalog is expected to hold binary
    /// trees only. Returns `None` for fewer than two leaves, when the count
    /// is not tabulated, or on overflow.
    ///
    /// # Example
    /// ```
    /// # use phylo_topology_validator::catalog::CatalogExpectation;
    /// let n4 = CatalogExpectation::for_leaves(4, true).unwrap();
    /// assert_eq!(n4.bifurcating, 15);
    /// assert_eq!(n4.multifurcating, 11);
    /// assert_eq!(n4.total(), 26);
    /// ```
    pub fn for_leaves(leaves: usize, multifurcating: bool) -> Option<Self> {
        let bifurcating = rooted_binary_count(leaves)?;
        let multifurcating = if multifurcating {
            *MULTIFURCATING_COUNTS.get(leaves)?
        } else {
            0
        };
        Some(CatalogExpectation { leaves, bifurcating, multifurcating })
    }

    pub fn total(&self) -> u128 {
        self.bifurcating + self.multifurcating
    }

    pub fn check(&self, report: &ValidationReport) -> CatalogCheck {
        CatalogCheck {
            expected: *self,
            observed_bifurcating: report.bifurcating_count,
            observed_multifurcating: report.multifurcating_count,
        }
    }
}

impl CatalogCheck {
    pub fn is_complete(&self) -> bool {
        self.observed_bifurcating as u128 == self.expected.bifurcating
            && self.observed_multifurcating as u128 == self.expected.multifurcating
    }
}

/// (2n-3)!! for n >= 2.
fn rooted_binary_count(leaves: usize) -> Option<u128> {
    if leaves < 2 {
        return None;
    }
    (1..=(2 * leaves as u128 - 3))
        .step_by(2)
        .try_fold(1u128, |acc, k| acc.checked_mul(k))
}
