//! Singularity detection (orientation and position).
//!
//! A face is an orientation singularity when the cross field cannot be
//! combed around it: the quarter-turn index differences around the
//! triangle sum to 1 or 3 mod 4. Position singularities are faces whose
//! integer lattice jumps do not close even under the best corner
//! rotations.

use nalgebra::{Vector2, Vector3};

use crate::field::math::{
    compat_orientation_extrinsic_index_4, compat_position_extrinsic_index_4, modulo, rotate90_by,
    rshift90, PosScale,
};
use crate::param::Parametrizer;

/// Detect orientation singularities.
///
/// Consumes the optimized cross field; produces `state.singularities`.
/// Faces whose raw index falls outside `[0, 4)` get the cross at their
/// first corner flipped so later phases see a canonical field.
pub fn compute_orientation_singularities(state: &mut Parametrizer) {
    let faces = state.hierarchy.faces.clone();
    let level = &mut state.hierarchy.levels[0];
    state.singularities.clear();
    for (f, face) in faces.iter().enumerate() {
        let mut index = 0;
        for k in 0..3 {
            let i = face[k];
            let j = face[(k + 1) % 3];
            let (a, b) = compat_orientation_extrinsic_index_4(
                &level.q[i],
                &level.normals[i],
                &level.q[j],
                &level.normals[j],
            );
            index += b - a;
        }
        let index_mod = modulo(index, 4);
        if index_mod == 1 || index_mod == 3 {
            if !(0..4).contains(&index) {
                level.q[face[0]] = -level.q[face[0]];
            }
            state.singularities.insert(f, index_mod);
        }
    }
}

/// Detect position singularities and record per-corner jumps.
///
/// For every non-orientation-singular face, searches the 64 corner
/// rotation assignments for the one maximizing mutual cross alignment,
/// stores it in `pos_rank`, computes the integer lattice jump across each
/// corner pair into `pos_index`, and records any nonzero loop sum in
/// `pos_sing` (rotated into the first corner's frame).
pub fn compute_position_singularities(state: &mut Parametrizer) {
    let faces = &state.hierarchy.faces;
    let level = &state.hierarchy.levels[0];
    let with_scale = state.options.with_scale;
    let base_scale = state.hierarchy.scale;

    state.pos_sing.clear();
    state.pos_rank = vec![[0; 3]; faces.len()];
    state.pos_index = vec![[0; 6]; faces.len()];

    for (f, face) in faces.iter().enumerate() {
        if state.singularities.contains_key(&f) {
            continue;
        }

        let v: [_; 3] = std::array::from_fn(|k| level.positions[face[k]]);
        let n: [_; 3] = std::array::from_fn(|k| level.normals[face[k]]);
        let o: [_; 3] = std::array::from_fn(|k| level.o[face[k]]);
        let mut q: [Vector3<f64>; 3] = std::array::from_fn(|k| level.q[face[k]].normalize());

        let mut best = [0i32; 3];
        let mut best_dp = f64::NEG_INFINITY;
        for i in 0..4 {
            let v0 = rotate90_by(&q[0], &n[0], i);
            for j in 0..4 {
                let v1 = rotate90_by(&q[1], &n[1], j);
                for k in 0..4 {
                    let v2 = rotate90_by(&q[2], &n[2], k);
                    let dp = v0.dot(&v1).min(v1.dot(&v2)).min(v2.dot(&v0));
                    if dp > best_dp {
                        best_dp = dp;
                        best = [i, j, k];
                    }
                }
            }
        }
        state.pos_rank[f] = best;
        for k in 0..3 {
            q[k] = rotate90_by(&q[k], &n[k], best[k]);
        }

        let mut index = Vector2::zeros();
        for k in 0..3 {
            let kn = (k + 1) % 3;
            let mut s0 = PosScale::uniform(base_scale);
            let mut s1 = PosScale::uniform(base_scale);
            if with_scale {
                s0.x *= level.s[face[k]].x;
                s0.y *= level.s[face[k]].y;
                s1.x *= level.s[face[kn]].x;
                s1.y *= level.s[face[kn]].y;
                if best[k] % 2 != 0 {
                    s0 = s0.swapped();
                }
                if best[kn] % 2 != 0 {
                    s1 = s1.swapped();
                }
            }
            let (a, b) = compat_position_extrinsic_index_4(
                &v[k], &n[k], &q[k], &o[k], &v[kn], &n[kn], &q[kn], &o[kn], s0, s1,
            );
            let diff = a - b;
            index += diff;
            state.pos_index[f][k * 2] = diff.x;
            state.pos_index[f][k * 2 + 1] = diff.y;
        }

        if index != Vector2::zeros() {
            state.pos_sing.insert(f, rshift90(index, best[0]));
        }
    }
}
