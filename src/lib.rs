//! # Cruller
//!
//! Field-aligned quad remeshing for triangle meshes.
//!
//! Cruller converts an arbitrary triangular surface mesh into a
//! semi-regular quadrilateral mesh whose edges follow a smooth cross
//! field at a user-chosen resolution. The pipeline optimizes a 4-RoSy
//! orientation field and a lattice position field over a multigrid
//! hierarchy, then runs an integer-constrained parameterization that
//! collapses the lattice into quad cells.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cruller::param::{ParamOptions, Parametrizer};
//!
//! let mesh = cruller::io::load("model.obj").unwrap();
//! let options = ParamOptions::default().with_target_faces(5000);
//! let mut param = Parametrizer::initialize(mesh, &options).unwrap();
//! param.optimize_fields();
//! param.compute_index_map().unwrap();
//! cruller::io::save_quads(&param, "quads.obj").unwrap();
//! ```
//!
//! ## Driving the core with your own fields
//!
//! The parameterization core only needs per-vertex normals, cross
//! directions, and position samples; use
//! [`Parametrizer::with_fields`](param::Parametrizer::with_fields) to
//! skip the built-in field optimization:
//!
//! ```
//! use cruller::mesh::TriMesh;
//! use cruller::param::{ParamOptions, Parametrizer};
//! use nalgebra::{Point3, Vector3};
//!
//! let mesh = TriMesh::new(
//!     vec![
//!         Point3::new(0.0, 0.0, 0.0),
//!         Point3::new(1.0, 0.0, 0.0),
//!         Point3::new(1.0, 1.0, 0.0),
//!         Point3::new(0.0, 1.0, 0.0),
//!     ],
//!     vec![[0, 1, 2], [0, 2, 3]],
//! )
//! .unwrap();
//! let o = mesh.positions.clone();
//! let mut param = Parametrizer::with_fields(
//!     mesh,
//!     vec![Vector3::z(); 4],
//!     vec![Vector3::x(); 4],
//!     o,
//!     1.0,
//!     &ParamOptions::default(),
//! )
//! .unwrap();
//! param.compute_index_map().unwrap();
//! assert_eq!(param.f_compact.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod field;
pub mod io;
pub mod mesh;
pub mod param;

/// Prelude module for convenient imports.
///
/// ```
/// use cruller::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{RemeshError, Result};
    pub use crate::mesh::{DirectedGraph, MeshStatus, TriMesh};
    pub use crate::param::{DEdge, ParamOptions, Parametrizer};
}

// Re-export nalgebra types for convenience
pub use nalgebra;
