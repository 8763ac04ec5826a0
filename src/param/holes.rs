//! Hole filling.
//!
//! Quad extraction can leave boundary loops where cells were rejected.
//! Each loop is recovered by walking linked boundary edges, then closed
//! greedily: repeatedly emit the quad spanning the four consecutive loop
//! vertices whose diagonal is shortest, until at most a (possibly
//! degenerate) quad remains.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::param::{DEdge, Parametrizer};

/// Close the boundary loops of `f_compact` with additional quads.
///
/// Loops shorter than two edges are reported and skipped; everything
/// else is fatal-free. Emitted quads reuse existing quad vertices only.
pub fn fix_holes(state: &mut Parametrizer) {
    let mut edge_to_faces: BTreeMap<DEdge, [Option<usize>; 2]> = BTreeMap::new();
    let mut directed_edges: HashSet<(usize, usize)> = HashSet::new();
    for (i, quad) in state.f_compact.iter().enumerate() {
        for j in 0..4 {
            let v1 = quad[j];
            let v2 = quad[(j + 1) % 4];
            directed_edges.insert((v1, v2));
            let slots = edge_to_faces.entry(DEdge::new(v1, v2)).or_default();
            if v1 < v2 {
                slots[0] = Some(i * 4 + j);
            } else {
                slots[1] = Some(i * 4 + j);
            }
        }
    }

    let boundary_edges: Vec<DEdge> = edge_to_faces
        .iter()
        .filter(|(_, slots)| slots[0].is_none() || slots[1].is_none())
        .map(|(e, _)| *e)
        .collect();

    // Two boundary edges are linked when they share a quotient vertex.
    let nb = boundary_edges.len();
    let mut graph: Vec<Vec<usize>> = vec![Vec::new(); nb];
    for i in 0..nb {
        for j in (i + 1)..nb {
            let (e1, e2) = (boundary_edges[i], boundary_edges[j]);
            if e1.x == e2.x || e1.x == e2.y || e1.y == e2.x || e1.y == e2.y {
                graph[i].push(j);
                graph[j].push(i);
            }
        }
    }

    let mut visited = vec![false; nb];
    let mut filled = 0usize;
    for start in 0..nb {
        if visited[start] {
            continue;
        }
        let mut loop_edge = vec![start];
        visited[start] = true;
        loop {
            let mut advanced = false;
            let last = *loop_edge.last().unwrap();
            for &next in &graph[last] {
                if !visited[next] {
                    visited[next] = true;
                    loop_edge.push(next);
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                break;
            }
        }
        if loop_edge.len() < 2 {
            warn!(len = loop_edge.len(), "degenerate boundary loop skipped");
            continue;
        }
        // A loop running entirely along the input mesh boundary is the
        // surface's own border, not a hole.
        let on_boundary = |v: usize| state.boundary_compact.get(v).copied().unwrap_or(false);
        if loop_edge
            .iter()
            .all(|&e| on_boundary(boundary_edges[e].x) && on_boundary(boundary_edges[e].y))
        {
            continue;
        }

        // Ordered vertex loop: each edge contributes the endpoint it
        // does not share with its successor.
        let len = loop_edge.len();
        let mut loop_vertices = Vec::with_capacity(len);
        for k in 0..len {
            let e1 = boundary_edges[loop_edge[k]];
            let e2 = boundary_edges[loop_edge[(k + 1) % len]];
            if e1.x == e2.x || e1.x == e2.y {
                loop_vertices.push(e1.y);
            } else {
                loop_vertices.push(e1.x);
            }
        }

        while !loop_vertices.is_empty() {
            if loop_vertices.len() <= 4 {
                if loop_vertices.len() < 3 {
                    warn!(len = loop_vertices.len(), "degenerate boundary loop skipped");
                    break;
                }
                let quad = if loop_vertices.len() == 4 {
                    [
                        loop_vertices[0],
                        loop_vertices[1],
                        loop_vertices[2],
                        loop_vertices[3],
                    ]
                } else {
                    [
                        loop_vertices[0],
                        loop_vertices[1],
                        loop_vertices[2],
                        loop_vertices[2],
                    ]
                };
                push_quad(&mut state.f_compact, &directed_edges, quad);
                filled += 1;
                break;
            }
            // Shortest diagonal between vertices three apart closes the
            // best-shaped quad.
            let len = loop_vertices.len();
            let mut min_dis = f64::INFINITY;
            let mut v_start = 0;
            for i in 0..len {
                let v1 = loop_vertices[i];
                let v2 = loop_vertices[(i + 3) % len];
                let dis = (state.o_compact[v1] - state.o_compact[v2]).norm();
                if dis < min_dis {
                    min_dis = dis;
                    v_start = i;
                }
            }
            let quad = [
                loop_vertices[v_start],
                loop_vertices[(v_start + 1) % len],
                loop_vertices[(v_start + 2) % len],
                loop_vertices[(v_start + 3) % len],
            ];
            push_quad(&mut state.f_compact, &directed_edges, quad);
            filled += 1;
            let mut d1 = (v_start + 1) % len;
            let mut d2 = (v_start + 2) % len;
            if d1 > d2 {
                std::mem::swap(&mut d1, &mut d2);
            }
            loop_vertices.remove(d2);
            loop_vertices.remove(d1);
        }
    }
    if filled > 0 {
        debug!(filled, "holes closed");
    }
}

/// Append a quad, reversing its winding when the first directed edge
/// already exists with the same orientation.
fn push_quad(
    f_compact: &mut Vec<[usize; 4]>,
    directed_edges: &HashSet<(usize, usize)>,
    mut quad: [usize; 4],
) {
    if directed_edges.contains(&(quad[0], quad[1])) {
        quad.swap(1, 3);
    }
    f_compact.push(quad);
}
