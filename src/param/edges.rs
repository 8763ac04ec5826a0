//! Edge-graph builder.
//!
//! Canonicalizes the per-face directed edges into undirected edge records
//! and lifts the per-corner lattice jumps into per-edge translations,
//! expressed in the frame of each edge's lower-id endpoint.

use nalgebra::Vector2;

use crate::error::Result;
use crate::field::math::rshift90;
use crate::mesh::INVALID;
use crate::param::{DEdge, Parametrizer};

/// Build `edge_values`, `edge_diff`, and `face_edge_ids`.
///
/// Paired half-edges share one edge id (stable under `E2E`); boundary
/// half-edges get their own. Singular faces do not define the field:
/// when both sides of an edge have been seen, the non-singular side's
/// translation wins.
pub fn build_edge_info(state: &mut Parametrizer) -> Result<()> {
    let faces = &state.hierarchy.faces;
    let e2e = &state.hierarchy.e2e;

    state.edge_diff.clear();
    state.edge_values.clear();
    state.face_edge_ids = vec![[INVALID; 3]; faces.len()];

    for (i, face) in faces.iter().enumerate() {
        for k1 in 0..3 {
            let k2 = (k1 + 1) % 3;
            let v1 = face[k1];
            let v2 = face[k2];
            // The edge frame belongs to the smaller endpoint; traversing
            // against it negates the jump.
            let jump = Vector2::new(state.pos_index[i][k1 * 2], state.pos_index[i][k1 * 2 + 1]);
            let diff = if v1 > v2 {
                rshift90(-jump, state.pos_rank[i][k2])
            } else {
                rshift90(jump, state.pos_rank[i][k1])
            };

            let he = 3 * i + k1;
            let opp = e2e[he];
            let existing = if opp != INVALID {
                state.face_edge_ids[opp / 3][opp % 3]
            } else {
                INVALID
            };
            if existing == INVALID {
                let id = state.edge_values.len();
                state.edge_values.push(DEdge::new(v1, v2));
                state.edge_diff.push(diff);
                state.face_edge_ids[i][k1] = id;
                if opp != INVALID {
                    state.face_edge_ids[opp / 3][opp % 3] = id;
                }
            } else {
                state.face_edge_ids[i][k1] = existing;
                if !state.singularities.contains_key(&i) {
                    state.edge_diff[existing] = diff;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::TriMesh;
    use crate::param::{sing, ParamOptions};
    use nalgebra::{Point3, Vector3};

    fn aligned_square() -> Parametrizer {
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
        state
    }

    #[test]
    fn test_edge_ids_stable_under_e2e() {
        let mut state = aligned_square();
        build_edge_info(&mut state).unwrap();
        // 5 undirected edges: 4 boundary + 1 diagonal.
        assert_eq!(state.edge_values.len(), 5);
        let e2e = &state.hierarchy.e2e;
        for he in 0..state.hierarchy.faces.len() * 3 {
            let opp = e2e[he];
            if opp != INVALID {
                assert_eq!(
                    state.face_edge_ids[he / 3][he % 3],
                    state.face_edge_ids[opp / 3][opp % 3]
                );
            }
        }
    }

    #[test]
    fn test_unit_square_diffs() {
        let mut state = aligned_square();
        build_edge_info(&mut state).unwrap();
        // Each edge's translation equals the lattice offset between its
        // endpoints' position samples, in the lower endpoint's frame.
        for (e, diff) in state.edge_values.iter().zip(&state.edge_diff) {
            let expect = state.hierarchy.levels[0].o[e.y] - state.hierarchy.levels[0].o[e.x];
            assert_eq!(diff.x, expect.x.round() as i32, "edge {e:?}");
            assert_eq!(diff.y, expect.y.round() as i32, "edge {e:?}");
        }
    }

    #[test]
    fn test_loop_closure_per_face() {
        let mut state = aligned_square();
        build_edge_info(&mut state).unwrap();
        // Walking each face's corners sums the (sign-adjusted) edge
        // translations to zero on a singularity-free field.
        for (f, face) in state.hierarchy.faces.iter().enumerate() {
            let mut sum = Vector2::zeros();
            for k in 0..3 {
                let v1 = face[k];
                let v2 = face[(k + 1) % 3];
                let d = state.edge_diff[state.face_edge_ids[f][k]];
                sum += if v1 < v2 { d } else { -d };
            }
            assert_eq!(sum, Vector2::zeros(), "face {f}");
        }
    }
}
