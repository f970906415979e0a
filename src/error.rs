//! Error types for each layer of the validator.
//!
//! Per-tree problems ([`TaxonError`]) never abort a run; they end up in the
//! report. Problems that make a whole run meaningless ([`ValidationError`])
//! fail fast.

use std::path::PathBuf;
use thiserror::Error;

/// Building a [`TaxonUniverse`](crate::taxa::TaxonUniverse) failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniverseError {
    #[error("taxon label '{0}' appears more than once in the universe")]
    DuplicateLabel(String),

    #[error("taxon labels must not be empty")]
    EmptyLabel,
}

/// A single tree does not fit the shared taxon universe.
///
/// Fatal for that tree only: the tree is listed as rejected and skipped by
/// duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonError {
    #[error("leaf label '{0}' is not part of the taxon universe")]
    ForeignLabel(String),

    #[error("leaf label '{0}' occurs more than once")]
    RepeatedLabel(String),

    #[error("tree is missing {} universe label(s): {}", .0.len(), .0.join(", "))]
    MissingLabels(Vec<String>),

    #[error("tree has a leaf without a label")]
    UnlabeledLeaf,

    #[error("tree structure is unreadable: {0}")]
    Malformed(String),
}

/// A validation call cannot produce a meaningful report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("tree {index} is bound to a different taxon universe than the run")]
    UniverseConflict { index: usize },

    #[error("cannot validate {trees} tree(s) against an empty taxon universe")]
    EmptyUniverse { trees: usize },
}

/// Reading a tree-list file failed.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tree '{name}': {message}")]
    Newick { name: String, message: String },

    #[error("invalid taxon universe: {0}")]
    Universe(#[from] UniverseError),
}
