//! Triangle surface container and per-element attributes.
//!
//! The remesher consumes a plain indexed triangle soup. This module owns
//! the container plus the attribute passes that run before field
//! optimization: unit-box normalization, close-vertex welding, mesh
//! statistics, face/vertex normals, vertex areas, and the per-face
//! tangent-space matrices used by scale estimation.

use std::collections::HashMap;

use nalgebra::{Matrix2x3, Matrix3, Point3, Vector3};
use rayon::prelude::*;

use crate::error::{RemeshError, Result};
use crate::field::math::fast_acos;
use crate::mesh::topology::{next_he, prev_he, DirectedGraph, INVALID};

/// Norms below this are treated as zero.
const RCP_OVERFLOW: f64 = 2.93873587705571876e-39;

/// An indexed triangle mesh.
#[derive(Debug, Clone, Default)]
pub struct TriMesh {
    /// Vertex positions.
    pub positions: Vec<Point3<f64>>,
    /// Vertex index triples, counter-clockwise.
    pub faces: Vec<[usize; 3]>,
}

/// Aggregate edge/area statistics of a mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshStatus {
    /// Total surface area.
    pub surface_area: f64,
    /// Mean length over all face edges.
    pub average_edge_length: f64,
    /// Longest face edge.
    pub max_edge_length: f64,
}

impl TriMesh {
    /// Create a mesh, validating face indices.
    pub fn new(positions: Vec<Point3<f64>>, faces: Vec<[usize; 3]>) -> Result<Self> {
        if faces.is_empty() {
            return Err(RemeshError::EmptyMesh);
        }
        for (fi, f) in faces.iter().enumerate() {
            for &v in f {
                if v >= positions.len() {
                    return Err(RemeshError::InvalidVertexIndex { face: fi, vertex: v });
                }
            }
        }
        Ok(TriMesh { positions, faces })
    }

    /// Number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.positions.len()
    }

    /// Number of faces.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Axis-aligned bounding box, or `None` for an empty mesh.
    pub fn bounding_box(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.positions.first()?;
        let mut min = first;
        let mut max = first;
        for p in &self.positions {
            for k in 0..3 {
                min[k] = min[k].min(p[k]);
                max[k] = max[k].max(p[k]);
            }
        }
        Some((min, max))
    }

    /// Translate and scale the mesh into the `[-1, 1]` box.
    pub fn normalize_unit_box(&mut self) {
        let Some((min, max)) = self.bounding_box() else {
            return;
        };
        let extent = (max - min).amax();
        let scale = if extent > 0.0 { extent * 0.5 } else { 1.0 };
        let center = nalgebra::center(&min, &max);
        for p in self.positions.iter_mut() {
            *p = Point3::from((*p - center) / scale);
        }
    }

    /// Weld vertices closer than `eps` and drop faces made degenerate.
    pub fn merge_close(&mut self, eps: f64) {
        let quantize = |p: &Point3<f64>| {
            (
                (p.x / eps).round() as i64,
                (p.y / eps).round() as i64,
                (p.z / eps).round() as i64,
            )
        };
        let mut cells: HashMap<(i64, i64, i64), usize> = HashMap::new();
        let mut remap = vec![0usize; self.positions.len()];
        for (i, p) in self.positions.iter().enumerate() {
            let key = quantize(p);
            remap[i] = *cells.entry(key).or_insert(i);
        }
        // Compact surviving vertices.
        let mut compact = vec![INVALID; self.positions.len()];
        let mut positions = Vec::new();
        let mut faces = Vec::new();
        for f in &self.faces {
            let mut out = [0usize; 3];
            for (k, &v) in f.iter().enumerate() {
                let rep = remap[v];
                if compact[rep] == INVALID {
                    compact[rep] = positions.len();
                    positions.push(self.positions[rep]);
                }
                out[k] = compact[rep];
            }
            if out[0] != out[1] && out[1] != out[2] && out[2] != out[0] {
                faces.push(out);
            }
        }
        self.positions = positions;
        self.faces = faces;
    }

    /// Compute surface area and edge length statistics.
    pub fn status(&self) -> MeshStatus {
        let mut status = MeshStatus::default();
        for f in &self.faces {
            let v = [
                self.positions[f[0]],
                self.positions[f[1]],
                self.positions[f[2]],
            ];
            status.surface_area += 0.5 * (v[1] - v[0]).cross(&(v[2] - v[0])).norm();
            for i in 0..3 {
                let len = (v[(i + 1) % 3] - v[i]).norm();
                status.average_edge_length += len;
                status.max_edge_length = status.max_edge_length.max(len);
            }
        }
        if !self.faces.is_empty() {
            status.average_edge_length /= (self.faces.len() * 3) as f64;
        }
        status
    }
}

/// Unit normals per face. Degenerate faces get the x axis.
pub fn face_normals(mesh: &TriMesh) -> Vec<Vector3<f64>> {
    mesh.faces
        .par_iter()
        .map(|f| {
            let v0 = mesh.positions[f[0]];
            let n = (mesh.positions[f[1]] - v0).cross(&(mesh.positions[f[2]] - v0));
            let norm = n.norm();
            if norm < RCP_OVERFLOW {
                Vector3::x()
            } else {
                n / norm
            }
        })
        .collect()
}

/// Angle-weighted smooth vertex normals.
///
/// Walks the one-ring via the directed-edge graph and accumulates face
/// normals weighted by the corner angle ("Computing Vertex Normals from
/// Polygonal Facets", Thuermer and Wuethrich, JGT 1998). Nonmanifold or
/// isolated vertices get the x axis.
pub fn smooth_vertex_normals(
    mesh: &TriMesh,
    graph: &DirectedGraph,
    face_normals: &[Vector3<f64>],
) -> Vec<Vector3<f64>> {
    (0..mesh.num_vertices())
        .into_par_iter()
        .map(|i| {
            let start = graph.v2e[i];
            if graph.nonmanifold[i] || start == INVALID {
                return Vector3::x();
            }
            let mut normal = Vector3::zeros();
            let mut he = start;
            loop {
                let f = he / 3;
                let c = he % 3;
                let d0 = mesh.positions[mesh.faces[f][(c + 1) % 3]] - mesh.positions[i];
                let d1 = mesh.positions[mesh.faces[f][(c + 2) % 3]] - mesh.positions[i];
                let angle =
                    fast_acos(d0.dot(&d1) / (d0.norm_squared() * d1.norm_squared()).sqrt());
                if angle.is_finite() {
                    normal += face_normals[f] * angle;
                }
                let opp = graph.e2e[prev_he(he)];
                if opp == INVALID {
                    break;
                }
                he = opp;
                if he == start {
                    break;
                }
            }
            let norm = normal.norm();
            if norm > RCP_OVERFLOW {
                normal / norm
            } else {
                Vector3::x()
            }
        })
        .collect()
}

/// Barycentric-cell vertex areas.
///
/// For every corner, the quad spanned by the vertex, the two adjacent edge
/// midpoints, and the face centroid contributes its two triangle halves.
pub fn vertex_areas(mesh: &TriMesh, graph: &DirectedGraph) -> Vec<f64> {
    (0..mesh.num_vertices())
        .into_par_iter()
        .map(|i| {
            let start = graph.v2e[i];
            if graph.nonmanifold[i] || start == INVALID {
                return 0.0;
            }
            let mut area = 0.0;
            let mut he = start;
            loop {
                let f = he / 3;
                let v = mesh.positions[mesh.faces[f][he % 3]];
                let vn = mesh.positions[mesh.faces[f][next_he(he) % 3]];
                let vp = mesh.positions[mesh.faces[f][prev_he(he) % 3]];

                let face_center = Point3::from((v.coords + vp.coords + vn.coords) / 3.0);
                let prev = Point3::from((v.coords + vp.coords) * 0.5);
                let next = Point3::from((v.coords + vn.coords) * 0.5);

                area += 0.5
                    * ((v - prev).cross(&(v - face_center)).norm()
                        + (v - next).cross(&(v - face_center)).norm());

                let opp = graph.e2e[prev_he(he)];
                if opp == INVALID {
                    break;
                }
                he = opp;
                if he == start {
                    break;
                }
            }
            area
        })
        .collect()
}

/// Per-face tangent-space matrices.
///
/// Row-major 2x3 blocks: the first two rows of the inverse of
/// `[e1 | e2 | n]`, mapping a world vector into barycentric edge
/// coordinates of the face.
pub fn triangle_spaces(mesh: &TriMesh, face_normals: &[Vector3<f64>]) -> Vec<Matrix2x3<f64>> {
    mesh.faces
        .par_iter()
        .enumerate()
        .map(|(i, f)| {
            let v0 = mesh.positions[f[0]];
            let mut p = Matrix3::zeros();
            p.set_column(0, &(mesh.positions[f[1]] - v0));
            p.set_column(1, &(mesh.positions[f[2]] - v0));
            p.set_column(2, &face_normals[i]);
            let q = p.try_inverse().unwrap_or_else(Matrix3::zeros);
            q.fixed_view::<2, 3>(0, 0).into_owned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::topology::compute_direct_graph;
    use approx::assert_relative_eq;

    fn square() -> TriMesh {
        TriMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn test_status() {
        let status = square().status();
        assert_relative_eq!(status.surface_area, 1.0, epsilon = 1e-12);
        assert_relative_eq!(status.max_edge_length, 2f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_unit_box() {
        let mut mesh = square();
        mesh.normalize_unit_box();
        let (min, max) = mesh.bounding_box().unwrap();
        assert_relative_eq!(min.x, -1.0, epsilon = 1e-12);
        assert_relative_eq!(max.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_merge_close_welds_duplicates() {
        let mut mesh = TriMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.5, 1.0, 0.0),
                // Duplicate of vertex 1 within tolerance.
                Point3::new(1.0 + 1e-9, 0.0, 0.0),
                Point3::new(1.5, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [3, 4, 2]],
        )
        .unwrap();
        mesh.merge_close(1e-6);
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_faces(), 2);
    }

    #[test]
    fn test_face_normals_flat() {
        let mesh = square();
        for n in face_normals(&mesh) {
            assert_relative_eq!(n.z, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_vertex_areas_sum_to_surface() {
        let mesh = square();
        let graph = compute_direct_graph(&mesh).unwrap();
        let total: f64 = vertex_areas(&mesh, &graph).iter().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }
}
