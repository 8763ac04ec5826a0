//! Input surface representation and topology.
//!
//! The remesher operates on parallel index arrays rather than linked
//! structures: a [`TriMesh`] holds positions and face triples, and a
//! [`DirectedGraph`] provides half-edge adjacency addressed as
//! `3 * face + corner`. Attribute passes (normals, areas, statistics)
//! and long-edge subdivision complete the input pipeline.

mod subdivide;
mod surface;
mod topology;

pub use subdivide::split_long_edges;
pub use surface::{
    face_normals, smooth_vertex_normals, triangle_spaces, vertex_areas, MeshStatus, TriMesh,
};
pub use topology::{
    adjacency_uniform, compute_direct_graph, next_he, prev_he, DirectedGraph, INVALID,
};
