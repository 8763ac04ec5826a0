//! Final position solve and quad extraction.
//!
//! The per-vertex positions of the quad mesh come from a least-squares
//! system over tangent-frame unknowns (two per vertex), assembled from
//! the integer edge translations and solved with conjugate gradients on
//! a CSR matrix. Extraction then aggregates the input vertices into
//! quotient vertices and enumerates quad cells from pairs of triangles
//! sharing a diagonal.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use nalgebra::{DVector, Point3, Vector2, Vector3};
use tracing::debug;

use crate::field::math::{
    compat_orientation_extrinsic_4, compat_orientation_extrinsic_index_4, modulo, rotate90_by,
    rshift90,
};
use crate::param::{DEdge, Parametrizer};

/// Solve for the continuous position field consistent with `edge_diff`.
///
/// For every edge, the difference of the two endpoint samples must match
/// the integer translation expressed in the averaged edge frame; the
/// normal equations are solved per tangent component and written back
/// into the level-0 position field.
pub fn compute_positions(state: &mut Parametrizer) {
    let level = &state.hierarchy.levels[0];
    let n = level.len();
    let scale = state.hierarchy.scale;

    let mut entries: Vec<HashMap<usize, f64>> = vec![HashMap::new(); n * 2];
    let mut rhs = DVector::zeros(n * 2);
    for (e, diff) in state.edge_diff.iter().enumerate() {
        let v1 = state.edge_values[e].x;
        let v2 = state.edge_values[e].y;
        let q_1 = level.q[v1];
        let q_2 = level.q[v2];
        let n_1 = level.normals[v1];
        let n_2 = level.normals[v2];
        let q_1_y = n_1.cross(&q_1);
        let q_2_y = n_2.cross(&q_2);
        let weights = [q_2, q_2_y, -q_1, -q_1_y];
        let (a, b) = compat_orientation_extrinsic_index_4(&q_1, &n_1, &q_2, &n_2);
        let rank_diff = modulo(b - a, 4);
        let qd_x = 0.5 * (rotate90_by(&q_2, &n_2, rank_diff) + q_1);
        let qd_y = 0.5 * (rotate90_by(&q_2_y, &n_2, rank_diff) + q_1_y);
        let c = diff.x as f64 * scale * qd_x
            + diff.y as f64 * scale * qd_y
            + (level.positions[v1] - level.positions[v2]);
        let vid = [v2 * 2, v2 * 2 + 1, v1 * 2, v1 * 2 + 1];
        for i in 0..4 {
            for j in 0..4 {
                *entries[vid[i]].entry(vid[j]).or_insert(0.0) += weights[i].dot(&weights[j]);
            }
            rhs[vid[i]] += weights[i].dot(&c);
        }
    }

    let mut x = DVector::zeros(n * 2);
    for i in 0..n {
        let q = level.q[i];
        let q_y = level.normals[i].cross(&q);
        let d = level.o[i] - level.positions[i];
        x[i * 2] = d.dot(&q);
        x[i * 2 + 1] = d.dot(&q_y);
    }

    let mut triplets = Vec::new();
    for (row, cols) in entries.iter().enumerate() {
        for (&col, &w) in cols {
            triplets.push((row, col, w));
        }
    }
    let matrix = CsrMatrix::from_triplets(n * 2, n * 2, triplets);
    let x = solve_cg(&matrix, &rhs, x, 3 * n, 1e-10);

    let level = &mut state.hierarchy.levels[0];
    for i in 0..n {
        let q = level.q[i];
        let q_y = level.normals[i].cross(&q);
        level.o[i] = level.positions[i] + q * x[i * 2] + q_y * x[i * 2 + 1];
    }
}

/// Aggregate quotient vertices and enumerate quads.
///
/// Consumes the collapsed `edge_diff` and the quotient map; produces
/// `o_compact` / `n_compact` / `q_compact`, `bad_vertices`, and
/// `f_compact`.
pub fn extract_quad_mesh(state: &mut Parametrizer) {
    let num_v = state.disjoint_tree.compact_num();
    let level = &state.hierarchy.levels[0];
    let n = level.len();

    let mut o_compact = vec![Vector3::zeros(); num_v];
    let mut n_compact = vec![Vector3::zeros(); num_v];
    let mut q_compact = vec![Vector3::zeros(); num_v];
    let mut counter = vec![0u32; num_v];
    for i in 0..n {
        let c = state.disjoint_tree.index(i);
        o_compact[c] += level.o[i].coords;
        n_compact[c] = n_compact[c] * counter[c] as f64 + level.normals[i];
        let norm = n_compact[c].norm();
        if norm > 1e-20 {
            n_compact[c] /= norm;
        }
        if counter[c] == 0 {
            q_compact[c] = level.q[i];
        } else {
            let (a, b) = compat_orientation_extrinsic_4(
                &q_compact[c],
                &n_compact[c],
                &level.q[i],
                &level.normals[i],
            );
            q_compact[c] = (a * counter[c] as f64 + b).normalize();
        }
        counter[c] += 1;
    }
    for (o, &count) in o_compact.iter_mut().zip(&counter) {
        if count > 0 {
            *o /= count as f64;
        }
    }
    state.o_compact = o_compact.into_iter().map(Point3::from).collect();
    state.n_compact = n_compact;
    state.q_compact = q_compact;
    state.counter = counter;

    // Quotient vertices containing an input boundary vertex: they
    // legitimately anchor fewer quads than interior ones.
    let mut boundary_compact = vec![false; num_v];
    for (v, &b) in state.graph.boundary.iter().enumerate() {
        if b {
            boundary_compact[state.disjoint_tree.index(v)] = true;
        }
    }
    let fan_required = |v: usize| if boundary_compact[v] { 2 } else { 3 };

    // Axis-aligned neighbor relations per quotient vertex.
    let mut vertices: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); num_v];
    for (i, diff) in state.edge_diff.iter().enumerate() {
        let p1 = state.disjoint_tree.index(state.edge_values[i].x);
        let p2 = state.disjoint_tree.index(state.edge_values[i].y);
        if p1 == p2 {
            continue;
        }
        if diff.x.abs() + diff.y.abs() == 1 {
            vertices[p1].insert(p2);
            vertices[p2].insert(p1);
        }
    }

    // Iteratively mark vertices that cannot anchor a quad fan.
    let mut bad_vertices = vec![false; num_v];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for (i, set) in vertices.iter().enumerate() {
        if set.len() < fan_required(i) {
            queue.push_back(i);
            bad_vertices[i] = true;
        }
    }
    while let Some(v) = queue.pop_front() {
        let neighbors: Vec<usize> = vertices[v].iter().copied().collect();
        for v1 in neighbors {
            vertices[v1].remove(&v);
            if vertices[v1].len() < fan_required(v1) && !bad_vertices[v1] {
                bad_vertices[v1] = true;
                queue.push_back(v1);
            }
        }
    }

    // Quotient edges of flipped faces disqualify their cells.
    let faces = &state.hierarchy.faces;
    let mut bad_edges: BTreeSet<DEdge> = BTreeSet::new();
    for (i, face) in faces.iter().enumerate() {
        let p: [usize; 3] = std::array::from_fn(|k| state.disjoint_tree.index(face[k]));
        if p[0] == p[1] || p[1] == p[2] || p[2] == p[0] {
            continue;
        }
        let diff: [Vector2<i32>; 3] = std::array::from_fn(|j| {
            rshift90(
                state.edge_diff[state.face_edge_ids[i][j]],
                state.face_edge_orients[i][j],
            )
        });
        if -diff[0].x * diff[2].y + diff[0].y * diff[2].x < 0 {
            for j in 0..3 {
                if p[j] != p[(j + 1) % 3] {
                    bad_edges.insert(DEdge::new(p[j], p[(j + 1) % 3]));
                }
            }
        }
    }

    // Key each surviving triangle by the diagonal of its quad cell (the
    // corner whose translation is a full diagonal step).
    let mut quad_cells: BTreeMap<DEdge, ([usize; 3], Option<[usize; 3]>)> = BTreeMap::new();
    for (i, face) in faces.iter().enumerate() {
        let mut p0 = state.disjoint_tree.index(face[0]);
        let mut p1 = state.disjoint_tree.index(face[1]);
        let mut p2 = state.disjoint_tree.index(face[2]);
        if p0 == p1
            || p1 == p2
            || p2 == p0
            || bad_vertices[p0]
            || bad_vertices[p1]
            || bad_vertices[p2]
            || bad_edges.contains(&DEdge::new(p0, p1))
            || bad_edges.contains(&DEdge::new(p1, p2))
            || bad_edges.contains(&DEdge::new(p2, p0))
        {
            continue;
        }
        let diff1 = state.edge_diff[state.face_edge_ids[i][0]];
        let diff2 = state.edge_diff[state.face_edge_ids[i][1]];
        let diff3 = state.edge_diff[state.face_edge_ids[i][2]];
        let d1 = rshift90(diff1, state.face_edge_orients[i][0]);
        let d2 = rshift90(-diff3, state.face_edge_orients[i][2]);
        if d1.x * d2.y - d1.y * d2.x < 0 {
            continue;
        }
        let eid;
        if diff1.x.abs() == 1 && diff1.y.abs() == 1 {
            eid = DEdge::new(p0, p1);
        } else if diff2.x.abs() == 1 && diff2.y.abs() == 1 {
            let t = p0;
            p0 = p1;
            p1 = p2;
            p2 = t;
            eid = DEdge::new(p0, p1);
        } else if diff3.x.abs() == 1 && diff3.y.abs() == 1 {
            let t = p1;
            p1 = p0;
            p0 = p2;
            p2 = t;
            eid = DEdge::new(p0, p1);
        } else {
            continue;
        }
        match quad_cells.get_mut(&eid) {
            None => {
                quad_cells.insert(eid, ([p0, p1, p2], None));
            }
            Some(cell) => cell.1 = Some([p0, p1, p2]),
        }
    }

    state.f_compact.clear();
    for (a, b) in quad_cells.values() {
        if let Some(b) = b {
            state.f_compact.push([a[0], b[2], a[1], a[2]]);
        }
    }
    state.bad_vertices = bad_vertices;
    state.boundary_compact = boundary_compact;
    debug!(
        quads = state.f_compact.len(),
        vertices = num_v,
        "quad cells extracted"
    );
}

/// Optional tangential relaxation of the quad vertex positions.
///
/// Off by default; a few Laplacian sweeps constrained to each vertex's
/// tangent plane, leaving excluded vertices untouched.
pub fn relax_quad_positions(state: &mut Parametrizer) {
    let num_v = state.o_compact.len();
    let mut adj: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); num_v];
    for quad in &state.f_compact {
        for k in 0..4 {
            let a = quad[k];
            let b = quad[(k + 1) % 4];
            if a != b {
                adj[a].insert(b);
                adj[b].insert(a);
            }
        }
    }
    for _ in 0..3 {
        for i in 0..num_v {
            if state.bad_vertices[i] || adj[i].is_empty() {
                continue;
            }
            let mut centroid = Vector3::zeros();
            for &j in &adj[i] {
                centroid += state.o_compact[j].coords;
            }
            centroid /= adj[i].len() as f64;
            let delta = 0.5 * (centroid - state.o_compact[i].coords);
            let n = state.n_compact[i];
            let tangential = delta - n * n.dot(&delta);
            state.o_compact[i] += tangential;
        }
    }
}

/// Compressed sparse row matrix for the position solve.
struct CsrMatrix {
    rows: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Build from triplets; duplicates at the same position are summed.
    fn from_triplets(rows: usize, _cols: usize, mut triplets: Vec<(usize, usize, f64)>) -> Self {
        triplets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_idx = Vec::with_capacity(triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());
        let mut prev = (usize::MAX, usize::MAX);
        for (row, col, val) in triplets {
            if (row, col) == prev {
                *values.last_mut().unwrap() += val;
            } else {
                col_idx.push(col);
                values.push(val);
                prev = (row, col);
            }
            row_ptr[row + 1] = col_idx.len();
        }
        for r in 1..=rows {
            row_ptr[r] = row_ptr[r].max(row_ptr[r - 1]);
        }
        CsrMatrix {
            rows,
            row_ptr,
            col_idx,
            values,
        }
    }

    fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(self.rows);
        for i in 0..self.rows {
            let mut sum = 0.0;
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                sum += self.values[k] * x[self.col_idx[k]];
            }
            y[i] = sum;
        }
        y
    }
}

/// Conjugate gradients for the symmetric positive semidefinite system.
fn solve_cg(
    a: &CsrMatrix,
    b: &DVector<f64>,
    mut x: DVector<f64>,
    max_iter: usize,
    tol: f64,
) -> DVector<f64> {
    let mut r = b - a.mul_vec(&x);
    let mut p = r.clone();
    let mut rs = r.dot(&r);
    if rs.sqrt() < tol {
        return x;
    }
    for _ in 0..max_iter {
        let ap = a.mul_vec(&p);
        let denom = p.dot(&ap);
        if denom.abs() < 1e-300 {
            break;
        }
        let alpha = rs / denom;
        x += alpha * &p;
        r -= alpha * &ap;
        let rs_new = r.dot(&r);
        if rs_new.sqrt() < tol {
            break;
        }
        p = &r + (rs_new / rs) * p;
        rs = rs_new;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cg_solves_spd_system() {
        // 2x2 SPD system: [[4, 1], [1, 3]] x = [1, 2].
        let m = CsrMatrix::from_triplets(
            2,
            2,
            vec![(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)],
        );
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x = solve_cg(&m, &b, DVector::zeros(2), 50, 1e-12);
        let expect = [1.0 / 11.0, 7.0 / 11.0];
        assert!((x[0] - expect[0]).abs() < 1e-9);
        assert!((x[1] - expect[1]).abs() < 1e-9);
    }

    #[test]
    fn test_csr_duplicate_accumulation() {
        let m = CsrMatrix::from_triplets(2, 2, vec![(0, 0, 1.0), (0, 0, 2.0), (1, 1, 1.0)]);
        let y = m.mul_vec(&DVector::from_vec(vec![1.0, 1.0]));
        assert_eq!(y[0], 3.0);
        assert_eq!(y[1], 1.0);
    }

    #[test]
    fn test_csr_empty_rows() {
        let m = CsrMatrix::from_triplets(3, 3, vec![(2, 2, 5.0)]);
        let y = m.mul_vec(&DVector::from_vec(vec![1.0, 1.0, 2.0]));
        assert_eq!(y[0], 0.0);
        assert_eq!(y[1], 0.0);
        assert_eq!(y[2], 10.0);
    }
}
