//! Error types for cruller.
//!
//! This module defines all error types used throughout the library.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`RemeshError`].
pub type Result<T> = std::result::Result<T, RemeshError>;

/// Errors that can occur during remeshing.
#[derive(Error, Debug)]
pub enum RemeshError {
    /// The mesh has no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// The input mesh is too broken to parameterize.
    #[error("malformed input: {details}")]
    InputMalformed {
        /// Description of the defect.
        details: String,
    },

    /// The integer-constraint solver could not satisfy loop closure.
    #[error("integer flow infeasible at edge-graph level {level}")]
    FlowInfeasible {
        /// Edge-graph level on which the solve failed (0 = finest).
        level: usize,
    },

    /// Two edges merged into one class but no rotation makes their
    /// lattice differences agree.
    #[error("no rotation reconciles merged edges {edge0} and {edge1}")]
    OrientationMismatch {
        /// Surviving edge class root.
        edge0: usize,
        /// Edge that failed to join the class.
        edge1: usize,
    },

    /// Flip repair did not settle within its iteration budget.
    #[error("flip repair exceeded {iterations} iterations")]
    RepairDivergent {
        /// Number of accepted moves attempted.
        iterations: usize,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error loading mesh from file.
    #[error("failed to load mesh from {path}: {message}")]
    LoadError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Error saving mesh to file.
    #[error("failed to save mesh to {path}: {message}")]
    SaveError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Unsupported file format.
    #[error("unsupported file format: {extension}")]
    UnsupportedFormat {
        /// The file extension.
        extension: String,
    },

    /// A snapshot stream did not decode.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl RemeshError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        RemeshError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}
