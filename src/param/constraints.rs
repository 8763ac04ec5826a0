//! Integer-constraint builder.
//!
//! Assembles, for every face, the two signed loop-closure equations over
//! flat edge-difference variables, unions faces into globally-oriented
//! components, chooses a branch cut per orientation singularity by
//! dynamic programming, and cancels part of the resulting net flow with
//! a seeded random perturbation. The remainder is left for the flow
//! optimizer.

use std::collections::BTreeMap;

use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::error::{RemeshError, Result};
use crate::field::math::{compat_orientation_extrinsic_index_4, modulo, rshift90};
use crate::mesh::INVALID;
use crate::param::{flat_diff, flat_diff_mut, DisjointOrientTree, Parametrizer};

/// The two face/orientation slots an edge participates in.
///
/// Slot 0 is the side traversing the edge from its smaller vertex id to
/// the larger, slot 1 the reverse side.
#[derive(Debug, Clone, Copy)]
struct EdgeSides {
    face: [usize; 2],
    orient: [i32; 2],
}

impl Default for EdgeSides {
    fn default() -> Self {
        EdgeSides {
            face: [INVALID; 2],
            orient: [0; 2],
        }
    }
}

/// Build the constraint rows, resolve global orientation, select
/// singularity branches, and seed the cut cancellation.
///
/// Consumes `face_edge_ids`, `edge_diff` (clamped), the fields, and the
/// singularity map; produces `face_edge_orients`, `constraints_index` /
/// `constraints_sign`, `cuts`, `edge_around_singularities`, and perturbs
/// `edge_diff` along the cuts.
pub fn build_integer_constraints(state: &mut Parametrizer) -> Result<()> {
    let faces = state.hierarchy.faces.clone();
    let ne = state.edge_values.len();

    state.face_edge_orients = vec![[0; 3]; faces.len()];
    let mut edge_to_constraints = vec![EdgeSides::default(); ne];
    let mut sign_indices: Vec<Vector2<i32>> = Vec::with_capacity(faces.len() * 3);

    // Signed 1-based variable pairs per corner, rotated into each face's
    // frame (the frame of its first vertex).
    {
        let level = &state.hierarchy.levels[0];
        for (i, face) in faces.iter().enumerate() {
            let [v0, v1, v2] = *face;
            let eid = state.face_edge_ids[i];
            let mut vid: [Vector2<i32>; 3] = std::array::from_fn(|k| {
                Vector2::new((eid[k] * 2 + 1) as i32, (eid[k] * 2 + 2) as i32)
            });
            let (a1, b1) = compat_orientation_extrinsic_index_4(
                &level.q[v0],
                &level.normals[v0],
                &level.q[v1],
                &level.normals[v1],
            );
            let (a2, b2) = compat_orientation_extrinsic_index_4(
                &level.q[v0],
                &level.normals[v0],
                &level.q[v2],
                &level.normals[v2],
            );
            let rank1 = modulo(a1 - b1, 4);
            let rank2 = modulo(a2 - b2, 4);
            let mut orients = [0i32; 3];
            if v1 < v0 {
                vid[0] = -rshift90(vid[0], rank1);
                orients[0] = (rank1 + 2) % 4;
            }
            if v2 < v1 {
                vid[1] = -rshift90(vid[1], rank2);
                orients[1] = (rank2 + 2) % 4;
            } else {
                vid[1] = rshift90(vid[1], rank1);
                orients[1] = rank1;
            }
            if v2 < v0 {
                vid[2] = rshift90(vid[2], rank2);
                orients[2] = rank2;
            } else {
                vid[2] = -vid[2];
                orients[2] = 2;
            }
            state.face_edge_orients[i] = orients;

            let corners = [(v0, v1, eid[0], 0), (v1, v2, eid[1], 1), (v2, v0, eid[2], 2)];
            for (a, b, e, k) in corners {
                let side = (a > b) as usize;
                edge_to_constraints[e].face[side] = i;
                edge_to_constraints[e].orient[side] = orients[k];
            }
            sign_indices.extend_from_slice(&vid);
        }
    }

    // Union faces across edges where both sides are regular; the +2
    // accounts for the edge being traversed in opposite directions.
    let mut orient_tree = DisjointOrientTree::new(faces.len());
    for sides in &edge_to_constraints {
        let [f0, f1] = sides.face;
        if f0 == INVALID || f1 == INVALID {
            continue;
        }
        if state.singularities.contains_key(&f0) || state.singularities.contains_key(&f1) {
            continue;
        }
        orient_tree.merge(f0, f1, (sides.orient[1] + 2) % 4, sides.orient[0]);
    }

    // Extract constraint rows in the global frame; measure, for each
    // singular face, the residual each of its three branch-cut entries
    // would induce.
    state.constraints_index.clear();
    state.constraints_sign.clear();
    let mut sing_diff: Vec<[i32; 3]> = Vec::new();
    let mut sing_orients: Vec<[i32; 3]> = Vec::new();
    for f in 0..faces.len() {
        let base = f * 3;
        let orient = orient_tree.orient(f);
        for j in 0..3 {
            sign_indices[base + j] = rshift90(sign_indices[base + j], orient);
        }
        for j in 0..2 {
            let mut ind = [0usize; 3];
            let mut sign = [0i32; 3];
            for k in 0..3 {
                let v = sign_indices[base + k][j];
                if v == 0 {
                    return Err(RemeshError::InputMalformed {
                        details: format!("degenerate constraint index on face {f}"),
                    });
                }
                sign[k] = v.signum();
                ind[k] = (v.abs() - 1) as usize;
            }
            state.constraints_index.push(ind);
            state.constraints_sign.push(sign);
        }
        if let Some(&orient_base) = state.singularities.get(&f) {
            let mut diffs = [0i32; 3];
            let mut orient_diffs = [0i32; 3];
            for j in 0..3 {
                let eid = state.face_edge_ids[f][(j + 1) % 3];
                let sides = edge_to_constraints[eid];
                let [f0, f1] = sides.face;
                let orient_diff = if f0 == INVALID || f1 == INVALID {
                    0
                } else {
                    let orientp0 = orient_tree.orient(f0) + sides.orient[0];
                    let orientp1 = orient_tree.orient(f1) + sides.orient[1];
                    if f1 == f {
                        modulo(orientp0 - orientp1 + 2, 4)
                    } else {
                        modulo(orientp1 - orientp0 + 2, 4)
                    }
                };
                let sign_index = [
                    rshift90(sign_indices[base + j], (orient_base + orient_diff) % 4),
                    rshift90(sign_indices[base + (j + 1) % 3], orient_diff),
                    rshift90(sign_indices[base + (j + 2) % 3], orient_diff),
                ];
                let mut total_diff = 0;
                for k in 0..2 {
                    for si in &sign_index {
                        let v = si[k];
                        if v == 0 {
                            continue;
                        }
                        let var = (v.abs() - 1) as usize;
                        total_diff += v.signum() * flat_diff(&state.edge_diff, var);
                    }
                }
                orient_diffs[j] = orient_diff;
                diffs[j] = total_diff;
            }
            sing_diff.push(diffs);
            sing_orients.push(orient_diffs);
        }
    }

    // Net flow over the regular faces.
    let mut total_flow = 0;
    for i in 0..state.constraints_index.len() {
        if state.singularities.contains_key(&(i / 2)) {
            continue;
        }
        let ind = state.constraints_index[i];
        let sign = state.constraints_sign[i];
        for k in 0..3 {
            total_flow += sign[k] * flat_diff(&state.edge_diff, ind[k]);
        }
    }

    // Branch selection: DP over singularities with the accumulated
    // residual as state, minimizing total absolute extra flow.
    let mut sing_maps: Vec<BTreeMap<i32, (i32, usize)>> = vec![BTreeMap::new(); sing_diff.len() + 1];
    sing_maps[0].insert(total_flow, (0, 0));
    for i in 0..sing_diff.len() {
        let prev = sing_maps[i].clone();
        let next = &mut sing_maps[i + 1];
        for (&v, &(t, _)) in prev.iter() {
            for (j, &d) in sing_diff[i].iter().enumerate() {
                let nv = v + d;
                let nt = t + d.abs();
                match next.get(&nv) {
                    Some(&(ot, _)) if ot <= nt => {}
                    _ => {
                        next.insert(nv, (nt, j));
                    }
                }
            }
        }
    }
    let reach_limit = total_flow.abs()
        + sing_diff
            .iter()
            .map(|d| d.iter().map(|v| v.abs()).max().unwrap_or(0))
            .sum::<i32>()
        + 2;
    let mut target_flow = 0i32;
    {
        let back = sing_maps.last().unwrap();
        while !back.contains_key(&target_flow) && !back.contains_key(&-target_flow) {
            target_flow += 2;
            if target_flow > reach_limit {
                return Err(RemeshError::FlowInfeasible { level: 0 });
            }
        }
        if !back.contains_key(&target_flow) {
            target_flow = -target_flow;
        }
    }
    let mut selection = Vec::with_capacity(sing_diff.len());
    let mut remain = target_flow;
    for i in (1..=sing_diff.len()).rev() {
        let (_, j) = sing_maps[i][&remain];
        remain -= sing_diff[i - 1][j];
        selection.push(j);
    }
    selection.reverse();
    debug!(target_flow, singularities = sing_diff.len(), "branches selected");

    // Apply the chosen branch per singularity: rotate its constraint
    // rows through the cut, then union it into the orient tree across
    // the selected edge.
    let sing_list: Vec<(usize, i32)> = state.singularities.iter().map(|(&f, &s)| (f, s)).collect();
    for (count, &(f, defect)) in sing_list.iter().enumerate() {
        let select = selection[count];
        let orient_diff = sing_orients[count][select];
        let mut eid0 = INVALID;
        for i in 0..3 {
            let row1 = f * 2;
            let row2 = f * 2 + 1;
            let diff = Vector2::new(
                state.constraints_sign[row1][i] * (state.constraints_index[row1][i] as i32 + 1),
                state.constraints_sign[row2][i] * (state.constraints_index[row2][i] as i32 + 1),
            );
            let mut t = orient_diff;
            if i == select {
                t = (t + defect) % 4;
            }
            let v0 = faces[f][i];
            let v1 = faces[f][(i + 1) % 3];
            let eid = state.face_edge_ids[f][i];
            if (select + 1) % 3 == i {
                eid0 = eid;
            }
            let side = (v0 > v1) as usize;
            edge_to_constraints[eid].face[side] = f;
            edge_to_constraints[eid].orient[side] =
                (edge_to_constraints[eid].orient[side] + t) % 4;
            state.face_edge_orients[f][i] = (state.face_edge_orients[f][i] + t) % 4;

            let diff = rshift90(diff, t);
            if diff.x == 0 || diff.y == 0 {
                return Err(RemeshError::InputMalformed {
                    details: format!("degenerate branch rotation on face {f}"),
                });
            }
            state.constraints_index[row1][i] = (diff.x.abs() - 1) as usize;
            state.constraints_sign[row1][i] = diff.x.signum();
            state.constraints_index[row2][i] = (diff.y.abs() - 1) as usize;
            state.constraints_sign[row2][i] = diff.y.signum();
        }
        let sides = edge_to_constraints[eid0];
        if sides.face[0] != INVALID && sides.face[1] != INVALID {
            orient_tree.merge(
                sides.face[0],
                sides.face[1],
                (sides.orient[1] + 2) % 4,
                sides.orient[0],
            );
        }
    }

    // Net sign per variable; variables that do not cancel are the cuts.
    let mut net_sign = vec![0i32; state.edge_diff.len() * 2];
    for i in 0..state.constraints_index.len() {
        let ind = state.constraints_index[i];
        let sign = state.constraints_sign[i];
        for k in 0..3 {
            net_sign[ind[k]] += sign[k];
        }
    }
    state.cuts.clear();
    let mut modified: Vec<(usize, i32)> = Vec::new();
    for (v, &net) in net_sign.iter().enumerate() {
        if net == 0 {
            continue;
        }
        state.cuts.insert(state.edge_values[v / 2]);
        let d = flat_diff(&state.edge_diff, v);
        if target_flow > 0 {
            if net > 0 && d > -1 {
                modified.push((v, -1));
            }
            if net < 0 && d < 1 {
                modified.push((v, 1));
            }
        } else if target_flow < 0 {
            if net < 0 && d > -1 {
                modified.push((v, -1));
            }
            if net > 0 && d < 1 {
                modified.push((v, 1));
            }
        }
    }

    // Randomized partial cancellation; each perturbed cut variable moves
    // the net flow by two. Seeded so runs reproduce.
    let mut rng = StdRng::seed_from_u64(state.options.seed);
    modified.shuffle(&mut rng);
    let take = ((target_flow.abs() / 2) as usize).min(modified.len());
    for &(v, delta) in modified.iter().take(take) {
        *flat_diff_mut(&mut state.edge_diff, v) += delta;
    }

    // Fold the component orientation into every corner.
    for f in 0..faces.len() {
        let w = orient_tree.orient(f);
        for k in 0..3 {
            state.face_edge_orients[f][k] = (state.face_edge_orients[f][k] + w) % 4;
        }
    }

    state.edge_around_singularities.clear();
    for &f in state.singularities.keys() {
        for k in 0..3 {
            state.edge_around_singularities.insert(state.face_edge_ids[f][k]);
        }
    }
    Ok(())
}

/// Signed sum of one constraint row against the current differences.
pub fn row_residual(state: &Parametrizer, row: usize) -> i32 {
    let ind = state.constraints_index[row];
    let sign = state.constraints_sign[row];
    (0..3)
        .map(|k| sign[k] * flat_diff(&state.edge_diff, ind[k]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::TriMesh;
    use crate::param::{edges, sing, ParamOptions};
    use nalgebra::{Point3, Vector3};

    fn prepared_square() -> Parametrizer {
        let mesh = TriMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
        .unwrap();
        let n = mesh.num_vertices();
        let o = mesh.positions.clone();
        let mut state = Parametrizer::with_fields(
            mesh,
            vec![Vector3::z(); n],
            vec![Vector3::x(); n],
            o,
            1.0,
            &ParamOptions::default(),
        )
        .unwrap();
        sing::compute_orientation_singularities(&mut state);
        sing::compute_position_singularities(&mut state);
        edges::build_edge_info(&mut state).unwrap();
        state
    }

    #[test]
    fn test_rows_close_on_regular_field() {
        let mut state = prepared_square();
        build_integer_constraints(&mut state).unwrap();
        assert_eq!(state.constraints_index.len(), 4);
        for row in 0..state.constraints_index.len() {
            assert_eq!(row_residual(&state, row), 0, "row {row}");
        }
        assert!(state.cuts.is_empty());
        assert!(state.edge_around_singularities.is_empty());
    }

    #[test]
    fn test_diff_clamp_preserved() {
        let mut state = prepared_square();
        for d in state.edge_diff.iter_mut() {
            d.x = d.x.clamp(-1, 1);
            d.y = d.y.clamp(-1, 1);
        }
        build_integer_constraints(&mut state).unwrap();
        for d in &state.edge_diff {
            assert!((-1..=1).contains(&d.x) && (-1..=1).contains(&d.y));
        }
    }

    #[test]
    fn test_variable_indices_in_range() {
        let mut state = prepared_square();
        build_integer_constraints(&mut state).unwrap();
        let nvars = state.edge_diff.len() * 2;
        for row in &state.constraints_index {
            for &v in row {
                assert!(v < nvars);
            }
        }
        for row in &state.constraints_sign {
            for &s in row {
                assert!(s == 1 || s == -1);
            }
        }
    }
}
