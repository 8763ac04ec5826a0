//! Anisotropic scale estimation.
//!
//! The adaptive-scale path stretches the lattice independently along the
//! two cross directions. Per face we build a combined cross frame and
//! estimate the relative scale gradient from the one-ring normal
//! derivative, accumulate the gradients into a per-vertex curvature field,
//! and integrate that field into per-vertex scale factors over the
//! hierarchy.

use nalgebra::{Matrix2x3, Vector2, Vector3};
use rayon::prelude::*;

use crate::field::hierarchy::Hierarchy;
use crate::field::math::{
    compat_orientation_extrinsic_4, compat_orientation_extrinsic_index_4, project_tangent,
};
use crate::mesh::TriMesh;

/// Per-face frame and scale-gradient estimates.
#[derive(Debug, Clone, Default)]
pub struct FaceScale {
    /// Combined cross representative per face.
    pub fq: Vec<Vector3<f64>>,
    /// Relative scale gradient per face, in the face frame.
    pub fs: Vec<Vector2<f64>>,
}

/// Estimate per-face frames and scale gradients, then accumulate them
/// into the hierarchy's curvature field and integrate the scale field.
pub fn estimate_scale(
    mesh: &TriMesh,
    face_normals: &[Vector3<f64>],
    triangle_spaces: &[Matrix2x3<f64>],
    hierarchy: &mut Hierarchy,
) -> FaceScale {
    let level = &hierarchy.levels[0];

    // Combined per-face cross: merge the three corner crosses pairwise,
    // weighting the running combination like the original does.
    let fq: Vec<Vector3<f64>> = mesh
        .faces
        .par_iter()
        .enumerate()
        .map(|(i, f)| {
            let n = face_normals[i];
            let q1 = rotate_into_plane(&level.q[f[0]], &level.normals[f[0]], &n);
            let q2 = rotate_into_plane(&level.q[f[1]], &level.normals[f[1]], &n);
            let q3 = rotate_into_plane(&level.q[f[2]], &level.normals[f[2]], &n);
            let (a, b) = compat_orientation_extrinsic_4(&q1, &n, &q2, &n);
            let q = (a + b).normalize();
            let (a, b) = compat_orientation_extrinsic_4(&q, &n, &q3, &n);
            let q = a * 2.0 + b;
            project_tangent(&q, &n)
        })
        .collect();

    // Scale gradient from the normal derivative: curvature along each
    // frame axis, expressed per lattice step.
    let step = hierarchy.scale;
    let fs: Vec<Vector2<f64>> = mesh
        .faces
        .par_iter()
        .enumerate()
        .map(|(i, f)| {
            let n = face_normals[i];
            let q_x = fq[i];
            let q_y = n.cross(&q_x);
            let dn1 = level.normals[f[1]] - level.normals[f[0]];
            let dn2 = level.normals[f[2]] - level.normals[f[0]];
            let ts = &triangle_spaces[i];
            let deriv = |dir: &Vector3<f64>| {
                let b = ts * dir;
                dn1 * b.x + dn2 * b.y
            };
            let k_x = -deriv(&q_x).dot(&q_x);
            let k_y = -deriv(&q_y).dot(&q_y);
            Vector2::new(k_x * step, k_y * step)
        })
        .collect();

    // Area-weighted accumulation into per-vertex curvature, rotating each
    // face estimate into the vertex frame (parity swap, sign flip).
    let level = &mut hierarchy.levels[0];
    let mut areas = vec![0.0f64; level.len()];
    for (i, f) in mesh.faces.iter().enumerate() {
        let p1 = mesh.positions[f[1]] - mesh.positions[f[0]];
        let p2 = mesh.positions[f[2]] - mesh.positions[f[0]];
        let area = p1.cross(&p2).norm();
        for &v in f {
            let (fi, vi) = compat_orientation_extrinsic_index_4(
                &fq[i],
                &face_normals[i],
                &level.q[v],
                &level.normals[v],
            );
            let mut scale_x = fs[i].x;
            let mut scale_y = fs[i].y;
            if fi != vi % 2 {
                std::mem::swap(&mut scale_x, &mut scale_y);
            }
            if vi >= 2 {
                scale_x = -scale_x;
                scale_y = -scale_y;
            }
            level.k[v] += area * Vector2::new(scale_x, scale_y);
            areas[v] += area;
        }
    }
    for (k, &area) in level.k.iter_mut().zip(&areas) {
        if area != 0.0 {
            *k /= area;
        }
    }

    hierarchy.propagate_k();
    integrate_scale(hierarchy);

    FaceScale { fq, fs }
}

/// Rotate `q` from the tangent plane of `source` into the plane of
/// `target` about their common axis.
pub fn rotate_into_plane(
    q: &Vector3<f64>,
    source: &Vector3<f64>,
    target: &Vector3<f64>,
) -> Vector3<f64> {
    let cos_theta = source.dot(target);
    if cos_theta > 0.9999 {
        return *q;
    }
    let axis = source.cross(target);
    let norm = axis.norm();
    if norm < 1e-12 {
        return *q;
    }
    let axis = axis / norm;
    let sin_theta = norm.min(1.0);
    // Rodrigues rotation by the angle between the two normals.
    q * cos_theta + axis.cross(q) * sin_theta + axis * axis.dot(q) * (1.0 - cos_theta)
}

/// Maximum relative stretch of the integrated scale field.
const SCALE_CLAMP: f64 = 4.0;
/// Gauss–Seidel sweeps per level during integration.
const INTEGRATE_SWEEPS: usize = 10;

/// Integrate the curvature (gradient) field into per-vertex scales.
///
/// Each neighbor predicts this vertex's scale from its own plus its
/// gradient times the lattice displacement; sweeps average the
/// predictions, coarsest level first.
fn integrate_scale(hierarchy: &mut Hierarchy) {
    let scale = hierarchy.scale;
    for l in (0..hierarchy.num_levels()).rev() {
        let level = &mut hierarchy.levels[l];
        let n = level.len();
        for _ in 0..INTEGRATE_SWEEPS {
            for i in 0..n {
                let mut acc = Vector2::zeros();
                let mut weight = 0.0;
                for k in 0..level.adj[i].len() {
                    let link = level.adj[i][k];
                    let j = link.id;
                    if j == i {
                        continue;
                    }
                    let q_j = level.q[j];
                    let t_j = level.normals[j].cross(&q_j);
                    let d = level.positions[i] - level.positions[j];
                    let steps = Vector2::new(d.dot(&q_j) / scale, d.dot(&t_j) / scale);
                    // Neighbor's scale grown by its gradient over the
                    // displacement, rotated into this vertex's frame.
                    let mut pred = Vector2::new(
                        level.s[j].x * (1.0 + level.k[j].x * steps.x),
                        level.s[j].y * (1.0 + level.k[j].y * steps.y),
                    );
                    let (ii, jj) = compat_orientation_extrinsic_index_4(
                        &level.q[i],
                        &level.normals[i],
                        &q_j,
                        &level.normals[j],
                    );
                    if ii != jj % 2 {
                        pred = Vector2::new(pred.y, pred.x);
                    }
                    acc += pred * link.weight;
                    weight += link.weight;
                }
                if weight > 0.0 {
                    let s = acc / weight;
                    level.s[i] = Vector2::new(
                        s.x.clamp(1.0 / SCALE_CLAMP, SCALE_CLAMP),
                        s.y.clamp(1.0 / SCALE_CLAMP, SCALE_CLAMP),
                    );
                }
            }
        }
        if l > 0 {
            let (lower, upper) = hierarchy.levels.split_at_mut(l);
            let fine = &mut lower[l - 1];
            let coarse = &upper[0];
            for (ci, up) in hierarchy.to_upper[l - 1].iter().enumerate() {
                for &fi in up {
                    if fi != crate::mesh::INVALID {
                        fine.s[fi] = coarse.s[ci];
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{
        adjacency_uniform, compute_direct_graph, face_normals, triangle_spaces, TriMesh,
    };
    use nalgebra::Point3;

    #[test]
    fn test_flat_mesh_has_unit_scale() {
        let mut positions = Vec::new();
        let mut faces = Vec::new();
        let n = 4;
        for j in 0..=n {
            for i in 0..=n {
                positions.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        for j in 0..n {
            for i in 0..n {
                let v00 = j * (n + 1) + i;
                faces.push([v00, v00 + 1, v00 + n + 2]);
                faces.push([v00, v00 + n + 2, v00 + n + 1]);
            }
        }
        let mesh = TriMesh::new(positions.clone(), faces.clone()).unwrap();
        let graph = compute_direct_graph(&mesh).unwrap();
        let adj = adjacency_uniform(&mesh, &graph);
        let nf = face_normals(&mesh);
        let ts = triangle_spaces(&mesh, &nf);
        let mut hierarchy = Hierarchy::new(
            positions,
            vec![Vector3::z(); mesh.num_vertices()],
            vec![1.0; mesh.num_vertices()],
            adj,
            faces,
            graph.e2e,
            1.0,
        );
        let fs = estimate_scale(&mesh, &nf, &ts, &mut hierarchy);
        // No curvature: gradients vanish and the scale field stays 1.
        for g in &fs.fs {
            assert!(g.norm() < 1e-9);
        }
        for s in &hierarchy.levels[0].s {
            assert!((s.x - 1.0).abs() < 1e-6 && (s.y - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rotate_into_plane_preserves_length() {
        let q = Vector3::x();
        let n0 = Vector3::z();
        let n1 = Vector3::new(0.0, 1.0, 1.0).normalize();
        let r = rotate_into_plane(&q, &n0, &n1);
        assert!((r.norm() - 1.0).abs() < 1e-9);
        assert!(r.dot(&n1).abs() < 1e-9);
    }
}
