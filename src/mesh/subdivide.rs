//! Long-edge subdivision.
//!
//! Midpoint-splits every edge longer than a target length, rebuilding the
//! face list per pass until no over-length edge remains. Run before field
//! optimization so the lattice spacing is resolvable on the mesh.

use std::collections::BTreeMap;

use nalgebra::center;

use crate::mesh::surface::TriMesh;
use crate::param::DEdge;

/// Split all edges longer than `max_length` at their midpoints.
///
/// Adjacent faces agree on split points (one midpoint per undirected
/// edge), so the result stays watertight. Returns the number of edges
/// split.
pub fn split_long_edges(mesh: &mut TriMesh, max_length: f64) -> usize {
    let mut total_splits = 0;
    loop {
        // Ordered so midpoint vertex ids do not depend on hash order.
        let mut midpoints: BTreeMap<DEdge, usize> = BTreeMap::new();
        for f in &mesh.faces {
            for k in 0..3 {
                let v0 = f[k];
                let v1 = f[(k + 1) % 3];
                let len = (mesh.positions[v1] - mesh.positions[v0]).norm();
                if len > max_length {
                    midpoints.entry(DEdge::new(v0, v1)).or_insert(usize::MAX);
                }
            }
        }
        if midpoints.is_empty() {
            return total_splits;
        }
        total_splits += midpoints.len();
        for (edge, idx) in midpoints.iter_mut() {
            *idx = mesh.positions.len();
            mesh.positions
                .push(center(&mesh.positions[edge.x], &mesh.positions[edge.y]));
        }

        let mut faces = Vec::with_capacity(mesh.faces.len() * 2);
        for f in &mesh.faces {
            let [a, b, c] = *f;
            let mab = midpoints.get(&DEdge::new(a, b)).copied();
            let mbc = midpoints.get(&DEdge::new(b, c)).copied();
            let mca = midpoints.get(&DEdge::new(c, a)).copied();
            split_face(&mesh.positions, [a, b, c], [mab, mbc, mca], &mut faces);
        }
        mesh.faces = faces;
    }
}

/// Rebuild one face against its (up to three) edge midpoints.
fn split_face(
    positions: &[nalgebra::Point3<f64>],
    [a, b, c]: [usize; 3],
    mids: [Option<usize>; 3],
    out: &mut Vec<[usize; 3]>,
) {
    match mids {
        [None, None, None] => out.push([a, b, c]),
        [Some(m), None, None] => {
            out.push([a, m, c]);
            out.push([m, b, c]);
        }
        // One-split cases rotate onto the first; two-split cases cut the
        // remaining quad along its shorter diagonal.
        [None, Some(m), None] => split_face(positions, [b, c, a], [Some(m), None, None], out),
        [None, None, Some(m)] => split_face(positions, [c, a, b], [Some(m), None, None], out),
        [Some(mab), Some(mbc), None] => {
            out.push([mab, b, mbc]);
            let d0 = (positions[mbc] - positions[a]).norm();
            let d1 = (positions[c] - positions[mab]).norm();
            if d0 < d1 {
                out.push([a, mab, mbc]);
                out.push([a, mbc, c]);
            } else {
                out.push([a, mab, c]);
                out.push([mab, mbc, c]);
            }
        }
        [None, Some(m0), Some(m1)] => {
            split_face(positions, [b, c, a], [Some(m0), Some(m1), None], out)
        }
        [Some(m0), None, Some(m1)] => {
            split_face(positions, [c, a, b], [Some(m1), Some(m0), None], out)
        }
        [Some(mab), Some(mbc), Some(mca)] => {
            out.push([a, mab, mca]);
            out.push([mab, b, mbc]);
            out.push([mca, mbc, c]);
            out.push([mab, mbc, mca]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_split_terminates_below_target() {
        let mut mesh = TriMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(4.0, 0.0, 0.0),
                Point3::new(0.0, 4.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
        .unwrap();
        split_long_edges(&mut mesh, 1.5);
        for f in &mesh.faces {
            for k in 0..3 {
                let len = (mesh.positions[f[(k + 1) % 3]] - mesh.positions[f[k]]).norm();
                assert!(len <= 1.5, "edge of length {len} survived");
            }
        }
    }

    #[test]
    fn test_shared_edge_split_consistently() {
        let mut mesh = TriMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(1.0, 0.4, 0.0),
                Point3::new(1.0, -0.4, 0.0),
            ],
            vec![[0, 1, 2], [1, 0, 3]],
        )
        .unwrap();
        split_long_edges(&mut mesh, 1.5);
        // The long shared edge is split once; each triangle becomes two.
        assert_eq!(mesh.num_faces(), 4);
        assert_eq!(mesh.num_vertices(), 5);
        // Watertight: every undirected edge is used at most twice.
        let mut counts = std::collections::BTreeMap::new();
        for f in &mesh.faces {
            for k in 0..3 {
                *counts.entry(DEdge::new(f[k], f[(k + 1) % 3])).or_insert(0) += 1;
            }
        }
        assert!(counts.values().all(|&c| c <= 2));
    }
}
