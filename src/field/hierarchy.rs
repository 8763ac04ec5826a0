//! Multigrid hierarchy over the vertex graph.
//!
//! Field optimization runs coarse-to-fine: the vertex graph is repeatedly
//! coarsened by greedy edge matching, fields are relaxed on the coarsest
//! level, and solutions are prolonged down with tangent-plane
//! reprojection. The hierarchy also keeps the level-0 face and
//! directed-edge arrays so the parameterization core can address corners
//! without going back to the mesh.

use nalgebra::{Point3, Vector2, Vector3};

use crate::field::math::{any_tangent, project_tangent};
use crate::mesh::INVALID;

/// Weighted neighbor reference in a level's adjacency.
#[derive(Debug, Clone, Copy)]
pub struct Link {
    /// Neighbor vertex id on the same level.
    pub id: usize,
    /// Accumulated edge weight.
    pub weight: f64,
}

/// One resolution level of the vertex graph with its field samples.
#[derive(Debug, Clone, Default)]
pub struct Level {
    /// Vertex positions.
    pub positions: Vec<Point3<f64>>,
    /// Vertex normals.
    pub normals: Vec<Vector3<f64>>,
    /// Vertex areas.
    pub areas: Vec<f64>,
    /// Weighted adjacency.
    pub adj: Vec<Vec<Link>>,
    /// Orientation field (one cross representative per vertex).
    pub q: Vec<Vector3<f64>>,
    /// Position field.
    pub o: Vec<Point3<f64>>,
    /// Anisotropic scale field.
    pub s: Vec<Vector2<f64>>,
    /// Scale-gradient (curvature) field.
    pub k: Vec<Vector2<f64>>,
}

impl Level {
    /// Number of vertices on this level.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True when the level has no vertices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Multigrid vertex-graph hierarchy. Level 0 is the finest.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    /// Target lattice edge length at level 0.
    pub scale: f64,
    /// Level-0 faces.
    pub faces: Vec<[usize; 3]>,
    /// Level-0 directed-edge opposites.
    pub e2e: Vec<usize>,
    /// Levels, finest first.
    pub levels: Vec<Level>,
    /// `to_upper[l][coarse] = [fine a, fine b]` between levels `l` and
    /// `l + 1` ([`INVALID`] when the coarse vertex covers one fine one).
    pub to_upper: Vec<Vec<[usize; 2]>>,
    /// `to_lower[l][fine] = coarse` between levels `l` and `l + 1`.
    pub to_lower: Vec<Vec<usize>>,
}

/// Coarsening stops below this vertex count.
const MIN_LEVEL_SIZE: usize = 32;
/// Maximum number of levels.
const MAX_LEVELS: usize = 10;

impl Hierarchy {
    /// Build the hierarchy and seed the fields.
    ///
    /// The orientation field starts as the x axis projected into each
    /// tangent plane (deterministic); the position field starts at the
    /// vertex positions; the scale field starts uniform.
    pub fn new(
        positions: Vec<Point3<f64>>,
        normals: Vec<Vector3<f64>>,
        areas: Vec<f64>,
        adjacency: Vec<Vec<usize>>,
        faces: Vec<[usize; 3]>,
        e2e: Vec<usize>,
        scale: f64,
    ) -> Self {
        let adj = adjacency
            .into_iter()
            .map(|list| {
                list.into_iter()
                    .map(|id| Link { id, weight: 1.0 })
                    .collect()
            })
            .collect();
        let mut base = Level {
            positions,
            normals,
            areas,
            adj,
            ..Level::default()
        };
        seed_fields(&mut base);

        let mut hierarchy = Hierarchy {
            scale,
            faces,
            e2e,
            levels: vec![base],
            to_upper: Vec::new(),
            to_lower: Vec::new(),
        };
        while hierarchy.levels.len() < MAX_LEVELS {
            let finest = hierarchy.levels.last().unwrap();
            if finest.len() <= MIN_LEVEL_SIZE {
                break;
            }
            let (coarse, up, down) = coarsen(finest);
            if coarse.len() >= finest.len() {
                break;
            }
            hierarchy.levels.push(coarse);
            hierarchy.to_upper.push(up);
            hierarchy.to_lower.push(down);
        }
        hierarchy
    }

    /// Number of levels.
    #[inline]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Average the level-0 curvature samples up through every level.
    pub fn propagate_k(&mut self) {
        for l in 0..self.to_upper.len() {
            let (fine, coarse) = self.levels.split_at_mut(l + 1);
            let fine = &fine[l];
            let coarse = &mut coarse[0];
            for (i, up) in self.to_upper[l].iter().enumerate() {
                let mut k = fine.k[up[0]];
                if up[1] != INVALID {
                    k = 0.5 * (k + fine.k[up[1]]);
                }
                coarse.k[i] = k;
            }
        }
    }
}

/// Deterministic field seeds for one level.
fn seed_fields(level: &mut Level) {
    let n = level.len();
    level.q = level
        .normals
        .iter()
        .map(|normal| {
            let q = project_tangent(&Vector3::x(), normal);
            if q.norm() > 0.5 {
                q
            } else {
                any_tangent(normal)
            }
        })
        .collect();
    level.o = level.positions.clone();
    level.s = vec![Vector2::new(1.0, 1.0); n];
    level.k = vec![Vector2::zeros(); n];
}

/// One coarsening step: greedy maximal matching by edge weight.
#[allow(clippy::type_complexity)]
fn coarsen(fine: &Level) -> (Level, Vec<[usize; 2]>, Vec<usize>) {
    let n = fine.len();
    let mut to_lower = vec![INVALID; n];
    let mut to_upper = Vec::with_capacity(n / 2 + 1);

    for i in 0..n {
        if to_lower[i] != INVALID {
            continue;
        }
        // Heaviest unmatched neighbor; ties resolve to the lowest id so
        // coarsening is deterministic.
        let mut best = INVALID;
        let mut best_weight = 0.0;
        for link in &fine.adj[i] {
            if to_lower[link.id] == INVALID && link.id != i && link.weight > best_weight {
                best = link.id;
                best_weight = link.weight;
            }
        }
        let coarse_id = to_upper.len();
        if best != INVALID {
            to_lower[best] = coarse_id;
            to_upper.push([i, best]);
        } else {
            to_upper.push([i, INVALID]);
        }
        to_lower[i] = coarse_id;
    }

    let m = to_upper.len();
    let mut coarse = Level {
        positions: Vec::with_capacity(m),
        normals: Vec::with_capacity(m),
        areas: Vec::with_capacity(m),
        adj: vec![Vec::new(); m],
        ..Level::default()
    };

    for up in &to_upper {
        let a = up[0];
        if up[1] == INVALID {
            coarse.positions.push(fine.positions[a]);
            coarse.normals.push(fine.normals[a]);
            coarse.areas.push(fine.areas[a]);
        } else {
            let b = up[1];
            let (wa, wb) = (fine.areas[a].max(1e-20), fine.areas[b].max(1e-20));
            let w = wa + wb;
            coarse.positions.push(Point3::from(
                (fine.positions[a].coords * wa + fine.positions[b].coords * wb) / w,
            ));
            let normal = fine.normals[a] * wa + fine.normals[b] * wb;
            let norm = normal.norm();
            coarse.normals.push(if norm > 1e-20 {
                normal / norm
            } else {
                fine.normals[a]
            });
            coarse.areas.push(fine.areas[a] + fine.areas[b]);
        }
    }

    for (i, links) in fine.adj.iter().enumerate() {
        let ci = to_lower[i];
        for link in links {
            let cj = to_lower[link.id];
            if ci == cj {
                continue;
            }
            match coarse.adj[ci].iter_mut().find(|l| l.id == cj) {
                Some(existing) => existing.weight += link.weight,
                None => coarse.adj[ci].push(Link {
                    id: cj,
                    weight: link.weight,
                }),
            }
        }
    }
    for list in coarse.adj.iter_mut() {
        list.sort_unstable_by_key(|l| l.id);
    }

    seed_fields(&mut coarse);
    (coarse, to_upper, to_lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{adjacency_uniform, compute_direct_graph, TriMesh};

    fn grid(n: usize) -> (TriMesh, Vec<Vec<usize>>) {
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
        let mesh = TriMesh::new(positions, faces).unwrap();
        let graph = compute_direct_graph(&mesh).unwrap();
        let adj = adjacency_uniform(&mesh, &graph);
        (mesh, adj)
    }

    fn build(n: usize) -> Hierarchy {
        let (mesh, adj) = grid(n);
        let graph = compute_direct_graph(&mesh).unwrap();
        let normals = vec![Vector3::z(); mesh.num_vertices()];
        let areas = vec![1.0; mesh.num_vertices()];
        Hierarchy::new(
            mesh.positions.clone(),
            normals,
            areas,
            adj,
            mesh.faces.clone(),
            graph.e2e,
            1.0,
        )
    }

    #[test]
    fn test_levels_shrink() {
        let h = build(10);
        assert!(h.num_levels() > 1);
        for l in 1..h.num_levels() {
            assert!(h.levels[l].len() < h.levels[l - 1].len());
        }
    }

    #[test]
    fn test_to_upper_partitions_fine_level() {
        let h = build(8);
        for l in 0..h.to_upper.len() {
            let mut seen = vec![false; h.levels[l].len()];
            for up in &h.to_upper[l] {
                assert!(!seen[up[0]]);
                seen[up[0]] = true;
                if up[1] != INVALID {
                    assert!(!seen[up[1]]);
                    seen[up[1]] = true;
                }
            }
            assert!(seen.into_iter().all(|s| s));
        }
    }

    #[test]
    fn test_seeded_field_is_tangent() {
        let h = build(4);
        for level in &h.levels {
            for (q, n) in level.q.iter().zip(&level.normals) {
                assert!(q.dot(n).abs() < 1e-9);
                assert!((q.norm() - 1.0).abs() < 1e-9);
            }
        }
    }
}
