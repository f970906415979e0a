//! Python binding layer for catalog validation.
//!
//! Provides Python functions for validating NEXUS tree catalogs.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::io::read_nexus_trees;
use crate::signature::SplitEncoding;
use crate::validator::{validate_with, ValidationReport, ValidatorConfig};

/// Validation result of one tree file.
#[pyclass(name = "ValidationReport", get_all, frozen)]
#[derive(Clone)]
struct PyValidationReport {
    path: String,
    tree_names: Vec<String>,
    total_count: usize,
    bifurcating_count: usize,
    multifurcating_count: usize,
    universe_size: usize,
    observed_leaf_counts: Vec<usize>,
    leaf_count_anomaly: bool,
    rejected: Vec<(usize, String)>,
    duplicate_groups: Vec<Vec<usize>>,
}

impl PyValidationReport {
    fn new(path: &str, tree_names: Vec<String>, report: ValidationReport) -> Self {
        PyValidationReport {
            path: path.to_string(),
            tree_names,
            total_count: report.total_count,
            bifurcating_count: report.bifurcating_count,
            multifurcating_count: report.multifurcating_count,
            universe_size: report.universe_size,
            observed_leaf_counts: report.observed_leaf_counts.into_iter().collect(),
            leaf_count_anomaly: report.leaf_count_anomaly.is_some(),
            rejected: report
                .rejected
                .into_iter()
                .map(|r| (r.index, r.reason.to_string()))
                .collect(),
            duplicate_groups: report
                .duplicate_groups
                .iter()
                .map(|g| g.members().to_vec())
                .collect(),
        }
    }
}

#[pymethods]
impl PyValidationReport {
    /// True when no duplicates, anomalies or rejected trees were found.
    fn is_clean(&self) -> bool {
        self.duplicate_groups.is_empty() && !self.leaf_count_anomaly && self.rejected.is_empty()
    }
}

/// Validate one or more NEXUS tree catalogs.
///
/// Args:
///     paths: List of file paths to NEXUS tree files (.gz accepted)
///     encoding: "bipartition" (unrooted splits) or "clade" (rooted clades)
///     parallel: Compute tree signatures on all cores (default: True)
///
/// Returns:
///     A list with one ValidationReport per file, in input order.
///
/// Raises:
///     ValueError: If a file cannot be read or parsed, or the encoding is unknown
#[pyfunction]
#[pyo3(signature = (paths, encoding="bipartition", parallel=true))]
fn validate_nexus(paths: Vec<String>, encoding: &str, parallel: bool) -> PyResult<Vec<PyValidationReport>> {
    let encoding = match encoding {
        "bipartition" => SplitEncoding::Bipartition,
        "clade" => SplitEncoding::Clade,
        other => {
            return Err(PyValueError::new_err(format!(
                "Unknown encoding '{}', expected 'bipartition' or 'clade'",
                other
            )));
        }
    };
    let config = ValidatorConfig { encoding, parallel };

    paths
        .iter()
        .map(|path| {
            let collection = read_nexus_trees(path)
                .map_err(|e| PyValueError::new_err(format!("Failed to read '{}': {}", path, e)))?;
            let report = validate_with(&collection.trees, &collection.universe, &config)
                .map_err(|e| PyValueError::new_err(format!("Failed to validate '{}': {}", path, e)))?;
            Ok(PyValidationReport::new(path, collection.names(), report))
        })
        .collect()
}

/// Python module definition
#[pymodule]
fn phylo_topology_validator(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyValidationReport>()?;
    m.add_function(wrap_pyfunction!(validate_nexus, m)?)?;
    Ok(())
}
