//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `bitset`: compact bitset representation for leaf sets.
//! - `taxa`: the shared taxon universe and trees bound to it.
//! - `signature`: canonical topology signatures and tree shape checks.
//! - `validator`: bifurcation, leaf-count and duplicate checks over a catalog.
//! - `catalog`: expected topology counts for exhaustive catalogs.
//! - `io`: reading NEXUS tree lists and writing duplicate reports.
//! - `error`: error types for every layer.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod catalog;
pub mod error;
pub mod io;
pub mod signature;
pub mod taxa;
pub mod validator;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use bitset::Bitset;
pub use catalog::{CatalogCheck, CatalogExpectation};
pub use error::{ReadError, TaxonError, UniverseError, ValidationError};
pub use io::{read_nexus_trees, write_report_tsv, TreeCollection};
pub use signature::{encode, encode_with, is_bifurcating, SplitEncoding, TopologySignature, TreeView};
pub use taxa::{BoundTree, TaxonUniverse};
pub use validator::{validate, validate_with, DuplicateGroup, ValidationReport, ValidatorConfig};
