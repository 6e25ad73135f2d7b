//! Error types for the seam-merge and geocoding transforms.

use thiserror::Error;

/// Errors produced by the mapstitch transforms.
///
/// Only two variants abort a call: `Config` (a bad descriptor or merge
/// configuration, raised before any feature is touched) and `EmptyGeometry`
/// (a ring with no usable extremes reached the seam scan). `SkippedFeature`
/// and `MergeConflict` are per-feature conditions: the transforms log them,
/// keep the originals, and continue with the rest of the batch.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing descriptor/configuration fields. Fatal, reported
    /// before processing starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A single feature is malformed or of an unsupported geometry type.
    #[error("feature {index} skipped: {reason}")]
    SkippedFeature { index: usize, reason: String },

    /// A pair of seam polygons failed validity repair; both originals are
    /// retained unmerged.
    #[error("cannot merge features {seed} and {partner}: {reason}")]
    MergeConflict {
        seed: usize,
        partner: usize,
        reason: String,
    },

    /// A polygon ring with no vertices at all.
    #[error("feature {index} has an empty polygon ring")]
    EmptyGeometry { index: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
