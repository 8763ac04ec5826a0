//! Cross-field and position-field relaxation.
//!
//! Both fields are optimized coarse-to-fine over the [`Hierarchy`]:
//! Gauss–Seidel sweeps on each level combine every vertex with its
//! neighbors under the extrinsic compatibility rules, then the solution is
//! prolonged to the next finer level with tangent-plane reprojection.

use nalgebra::Point3;

use crate::field::hierarchy::Hierarchy;
use crate::field::math::{
    compat_orientation_extrinsic_4, compat_position_extrinsic_4, position_round_4,
    project_tangent, PosScale,
};
use crate::mesh::INVALID;

/// Options for field relaxation.
#[derive(Debug, Clone)]
pub struct FieldOptions {
    /// Gauss–Seidel sweeps per level.
    pub sweeps: usize,
    /// Use the anisotropic scale field during position smoothing.
    pub with_scale: bool,
}

impl Default for FieldOptions {
    fn default() -> Self {
        FieldOptions {
            sweeps: 6,
            with_scale: false,
        }
    }
}

/// Relax the orientation field over all levels, coarsest first.
pub fn optimize_orientations(hierarchy: &mut Hierarchy, options: &FieldOptions) {
    for l in (0..hierarchy.num_levels()).rev() {
        smooth_orientations_level(hierarchy, l, options.sweeps);
        if l > 0 {
            prolong_orientations(hierarchy, l);
        }
    }
}

fn smooth_orientations_level(hierarchy: &mut Hierarchy, l: usize, sweeps: usize) {
    let level = &mut hierarchy.levels[l];
    let n = level.len();
    for _ in 0..sweeps {
        for i in 0..n {
            let normal = level.normals[i];
            let mut sum = level.q[i];
            let mut weight_sum = 0.0;
            for k in 0..level.adj[i].len() {
                let link = level.adj[i][k];
                if link.id == i {
                    continue;
                }
                let (a, b) = compat_orientation_extrinsic_4(
                    &sum,
                    &normal,
                    &level.q[link.id],
                    &level.normals[link.id],
                );
                sum = a * weight_sum + b * link.weight;
                weight_sum += link.weight;
                sum = project_tangent(&sum, &normal);
            }
            level.q[i] = sum;
        }
    }
}

fn prolong_orientations(hierarchy: &mut Hierarchy, l: usize) {
    let (lower, upper) = hierarchy.levels.split_at_mut(l);
    let fine = &mut lower[l - 1];
    let coarse = &upper[0];
    for (ci, up) in hierarchy.to_upper[l - 1].iter().enumerate() {
        for &fi in up {
            if fi == INVALID {
                continue;
            }
            fine.q[fi] = project_tangent(&coarse.q[ci], &fine.normals[fi]);
        }
    }
}

/// Relax the position field over all levels, coarsest first.
///
/// The orientation field must already be optimized; each sweep keeps
/// samples in the tangent plane through their vertex and snaps them to
/// the local lattice.
pub fn optimize_positions(hierarchy: &mut Hierarchy, options: &FieldOptions) {
    for l in (0..hierarchy.num_levels()).rev() {
        smooth_positions_level(hierarchy, l, options);
        if l > 0 {
            prolong_positions(hierarchy, l);
        }
    }
}

fn smooth_positions_level(hierarchy: &mut Hierarchy, l: usize, options: &FieldOptions) {
    let scale = hierarchy.scale;
    let level = &mut hierarchy.levels[l];
    let n = level.len();
    for _ in 0..options.sweeps {
        for i in 0..n {
            let v_i = level.positions[i];
            let n_i = level.normals[i];
            let q_i = level.q[i];
            let s_i = vertex_scale(scale, options.with_scale, &level.s, i);
            let mut sum = level.o[i];
            let mut weight_sum = 0.0;
            for k in 0..level.adj[i].len() {
                let link = level.adj[i][k];
                if link.id == i {
                    continue;
                }
                let j = link.id;
                let s_j = vertex_scale(scale, options.with_scale, &level.s, j);
                let (oa, ob) = compat_position_extrinsic_4(
                    &v_i,
                    &n_i,
                    &q_i,
                    &sum,
                    &level.positions[j],
                    &level.normals[j],
                    &level.q[j],
                    &level.o[j],
                    s_i,
                    s_j,
                );
                sum = Point3::from(
                    (oa.coords * weight_sum + ob.coords * link.weight)
                        / (weight_sum + link.weight),
                );
                weight_sum += link.weight;
                sum -= n_i * n_i.dot(&(sum - v_i));
            }
            let t_i = n_i.cross(&q_i);
            level.o[i] =
                position_round_4(&sum, &q_i, &t_i, &v_i, s_i.x, s_i.y, 1.0 / s_i.x, 1.0 / s_i.y);
        }
    }
}

fn prolong_positions(hierarchy: &mut Hierarchy, l: usize) {
    let (lower, upper) = hierarchy.levels.split_at_mut(l);
    let fine = &mut lower[l - 1];
    let coarse = &upper[0];
    for (ci, up) in hierarchy.to_upper[l - 1].iter().enumerate() {
        for &fi in up {
            if fi == INVALID {
                continue;
            }
            let v = fine.positions[fi];
            let n = fine.normals[fi];
            let o = coarse.o[ci];
            fine.o[fi] = o - n * n.dot(&(o - v));
        }
    }
}

#[inline]
fn vertex_scale(
    scale: f64,
    with_scale: bool,
    s: &[nalgebra::Vector2<f64>],
    i: usize,
) -> PosScale {
    if with_scale {
        PosScale {
            x: scale * s[i].x,
            y: scale * s[i].y,
        }
    } else {
        PosScale::uniform(scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{adjacency_uniform, compute_direct_graph, TriMesh};
    use nalgebra::{Point3, Vector3};

    fn flat_grid(n: usize) -> Hierarchy {
        let mut positions = Vec::new();
        let mut faces = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                positions.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        for j in 0..n {
            for i in 0..n {
                let v00 = j * (n + 1) + i;
                let v10 = v00 + 1;
                let v01 = v00 + (n + 1);
                let v11 = v01 + 1;
                faces.push([v00, v10, v11]);
                faces.push([v00, v11, v01]);
            }
        }
        let mesh = TriMesh::new(positions.clone(), faces.clone()).unwrap();
        let graph = compute_direct_graph(&mesh).unwrap();
        let adj = adjacency_uniform(&mesh, &graph);
        Hierarchy::new(
            positions,
            vec![Vector3::z(); mesh.num_vertices()],
            vec![1.0; mesh.num_vertices()],
            adj,
            faces,
            graph.e2e,
            1.0,
        )
    }

    #[test]
    fn test_orientations_converge_on_plane() {
        let mut h = flat_grid(6);
        optimize_orientations(&mut h, &FieldOptions::default());
        // On a flat grid every cross must agree up to a quarter turn.
        let q0 = h.levels[0].q[0];
        for q in &h.levels[0].q {
            let d = q.dot(&q0).abs().max(q.dot(&Vector3::z().cross(&q0)).abs());
            assert!(d > 0.999, "cross not aligned: {d}");
        }
    }

    #[test]
    fn test_positions_form_unit_lattice() {
        let mut h = flat_grid(6);
        optimize_orientations(&mut h, &FieldOptions::default());
        optimize_positions(&mut h, &FieldOptions::default());
        // With grid spacing equal to the lattice scale, samples stay
        // within one cell of their vertex and on the plane.
        for (o, v) in h.levels[0].o.iter().zip(&h.levels[0].positions) {
            assert!((o - v).norm() < 1.5);
            assert!(o.z.abs() < 1e-9);
        }
    }
}
