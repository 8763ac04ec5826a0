//! Directed-edge (half-edge) topology over index arrays.
//!
//! A half-edge is addressed as `3 * face + corner`; no linked structures
//! are kept. `E2E` pairs each half-edge with its reversal in the adjacent
//! face (or [`INVALID`] on the boundary), and `V2E` stores one outgoing
//! half-edge per vertex, rotated so that boundary fans start at the
//! boundary and can be walked to completion.

use std::collections::HashMap;

use crate::error::{RemeshError, Result};
use crate::mesh::surface::TriMesh;

/// Sentinel for a missing half-edge, face, or vertex slot.
pub const INVALID: usize = usize::MAX;

/// Next half-edge around the face (counter-clockwise).
#[inline]
pub fn next_he(he: usize) -> usize {
    3 * (he / 3) + (he + 1) % 3
}

/// Previous half-edge around the face.
#[inline]
pub fn prev_he(he: usize) -> usize {
    3 * (he / 3) + (he + 2) % 3
}

/// Directed-edge adjacency of a triangle mesh.
#[derive(Debug, Clone, Default)]
pub struct DirectedGraph {
    /// One outgoing half-edge per vertex ([`INVALID`] when isolated).
    pub v2e: Vec<usize>,
    /// Opposite half-edge per half-edge ([`INVALID`] at boundary).
    pub e2e: Vec<usize>,
    /// True for vertices on a mesh boundary.
    pub boundary: Vec<bool>,
    /// True for vertices whose star is not a single fan.
    pub nonmanifold: Vec<bool>,
}

impl DirectedGraph {
    /// Number of nonmanifold vertices.
    pub fn num_nonmanifold(&self) -> usize {
        self.nonmanifold.iter().filter(|&&b| b).count()
    }
}

/// Build the directed-edge arrays for a triangle mesh.
///
/// Duplicate directed edges (an edge traversed twice in the same
/// direction) mark their endpoints nonmanifold and stay unpaired, as do
/// vertices whose incident faces do not form a single fan.
pub fn compute_direct_graph(mesh: &TriMesh) -> Result<DirectedGraph> {
    let nv = mesh.num_vertices();
    let nh = mesh.num_faces() * 3;

    let mut v2e = vec![INVALID; nv];
    let mut e2e = vec![INVALID; nh];
    let mut boundary = vec![false; nv];
    let mut nonmanifold = vec![false; nv];

    let mut directed: HashMap<(usize, usize), usize> = HashMap::with_capacity(nh);
    for (f, face) in mesh.faces.iter().enumerate() {
        for c in 0..3 {
            let he = 3 * f + c;
            let v0 = face[c];
            let v1 = face[(c + 1) % 3];
            if v0 == v1 {
                return Err(RemeshError::InputMalformed {
                    details: format!("face {f} repeats vertex {v0}"),
                });
            }
            if directed.insert((v0, v1), he).is_some() {
                nonmanifold[v0] = true;
                nonmanifold[v1] = true;
            }
            if v2e[v0] == INVALID {
                v2e[v0] = he;
            }
        }
    }

    for (&(v0, v1), &he) in &directed {
        if let Some(&opp) = directed.get(&(v1, v0)) {
            e2e[he] = opp;
        }
    }
    // A duplicate directed edge leaves one of its instances paired both
    // ways; break such pairings so walks stop there.
    for he in 0..nh {
        let opp = e2e[he];
        if opp != INVALID && e2e[opp] != he {
            e2e[he] = INVALID;
        }
    }

    // Count incident corners so fans can be checked for completeness.
    let mut incident = vec![0usize; nv];
    for face in &mesh.faces {
        for &v in face {
            incident[v] += 1;
        }
    }

    for v in 0..nv {
        let start = v2e[v];
        if start == INVALID {
            continue;
        }
        // Rotate backwards to the fan start so forward walks cover the
        // whole star; hitting a boundary marks the vertex.
        let mut he = start;
        let mut steps = 0;
        loop {
            let pred = e2e[prev_he(he)];
            if pred == INVALID {
                boundary[v] = true;
                v2e[v] = he;
                break;
            }
            he = pred;
            if he == start {
                break;
            }
            steps += 1;
            if steps > incident[v] {
                nonmanifold[v] = true;
                break;
            }
        }
        if nonmanifold[v] {
            continue;
        }
        // Walk forward and require the fan to account for every corner.
        let start = v2e[v];
        let mut he = start;
        let mut seen = 0;
        loop {
            seen += 1;
            if seen > incident[v] {
                break;
            }
            let opp = e2e[he];
            if opp == INVALID {
                break;
            }
            he = next_he(opp);
            if he == start {
                break;
            }
        }
        if seen != incident[v] {
            nonmanifold[v] = true;
        }
    }

    Ok(DirectedGraph {
        v2e,
        e2e,
        boundary,
        nonmanifold,
    })
}

/// Uniform-weight vertex adjacency from the directed-edge arrays.
///
/// Each manifold vertex lists its one-ring neighbors once; nonmanifold
/// vertices get whatever their (possibly partial) fan reaches.
pub fn adjacency_uniform(mesh: &TriMesh, graph: &DirectedGraph) -> Vec<Vec<usize>> {
    let mut adj = vec![Vec::new(); mesh.num_vertices()];
    for (f, face) in mesh.faces.iter().enumerate() {
        for c in 0..3 {
            let he = 3 * f + c;
            let v0 = face[c];
            let v1 = face[(c + 1) % 3];
            // Emit each undirected edge from its interior pairing once.
            if graph.e2e[he] == INVALID || v0 < v1 {
                adj[v0].push(v1);
                adj[v1].push(v0);
            }
        }
    }
    for list in adj.iter_mut() {
        list.sort_unstable();
        list.dedup();
    }
    adj
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

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

    fn tetrahedron() -> TriMesh {
        TriMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.5, 1.0, 0.0),
                Point3::new(0.5, 0.5, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
        )
        .unwrap()
    }

    #[test]
    fn test_e2e_involution() {
        let mesh = tetrahedron();
        let graph = compute_direct_graph(&mesh).unwrap();
        for he in 0..mesh.num_faces() * 3 {
            let opp = graph.e2e[he];
            assert_ne!(opp, INVALID, "closed mesh must have no boundary");
            assert_eq!(graph.e2e[opp], he);
        }
        assert_eq!(graph.num_nonmanifold(), 0);
        assert!(!graph.boundary.iter().any(|&b| b));
    }

    #[test]
    fn test_boundary_detection() {
        let mesh = square();
        let graph = compute_direct_graph(&mesh).unwrap();
        // Every vertex of an open square patch is on the boundary.
        assert!(graph.boundary.iter().all(|&b| b));
        // The diagonal is interior.
        let mut interior = 0;
        for he in 0..6 {
            if graph.e2e[he] != INVALID {
                interior += 1;
            }
        }
        assert_eq!(interior, 2);
    }

    #[test]
    fn test_boundary_fan_walk_complete() {
        let mesh = square();
        let graph = compute_direct_graph(&mesh).unwrap();
        // V2E of vertex 0 must start at the boundary so the forward walk
        // reaches both incident faces.
        let start = graph.v2e[0];
        let mut seen = 1;
        let mut he = start;
        while graph.e2e[he] != INVALID {
            he = next_he(graph.e2e[he]);
            if he == start {
                break;
            }
            seen += 1;
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_adjacency_uniform() {
        let mesh = square();
        let graph = compute_direct_graph(&mesh).unwrap();
        let adj = adjacency_uniform(&mesh, &graph);
        assert_eq!(adj[0], vec![1, 2, 3]);
        assert_eq!(adj[1], vec![0, 2]);
    }
}
