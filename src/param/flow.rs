//! Integer flow optimizer.
//!
//! After constraint building, every face carries two signed equations
//! over flat edge-difference variables; each variable appears in at most
//! two equations, which makes the system a network matrix. Loop-closure
//! residuals are excesses on equation rows, adjustable variables are
//! arcs between them, and feasibility is a max-flow saturating all
//! supplies and demands.
//!
//! The edge graph is downsampled by merging face pairs across edges
//! whose variables cancel; levels are solved coarsest first, each
//! solution lifted by re-closing one fine face of every merged pair.
//! Singular faces stay out of the network: their rows carry the designed
//! residual plus whatever remainder of the randomized cut cancellation
//! drains into them through their edges, which act as bounded slack
//! arcs. Cut variables never cancel and stay fixed.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::error::{RemeshError, Result};
use crate::param::{flat_diff, flat_diff_mut, Parametrizer};

/// Hard cap on edge-graph levels.
const MAX_EDGE_LEVELS: usize = 8;
/// Stop coarsening below this face count.
const MIN_LEVEL_FACES: usize = 16;

/// Sparse signed row: `(flat variable, sign)` terms.
type Row = Vec<(usize, i32)>;

/// One level of the downsampled edge graph.
struct EdgeLevel {
    /// Two rows per (super-)face.
    rows: Vec<Row>,
    /// Faces containing an orientation singularity.
    sing: Vec<bool>,
}

/// One face-pair merge between adjacent levels.
struct MergeRec {
    /// The fine face whose rows are re-closed during lifting.
    fine_rows: [Row; 2],
    /// Variables cancelled by the merge (assignable during lifting).
    cancelled: Vec<usize>,
}

/// Satisfy the integer loop-closure constraints.
///
/// On return every non-singular face row sums to zero with `edge_diff`
/// still componentwise in `{-1, 0, 1}`; singular faces keep their
/// designed residual. Fails with [`RemeshError::FlowInfeasible`] carrying
/// the offending level.
pub fn compute_max_flow(state: &mut Parametrizer) -> Result<()> {
    let num_faces = state.hierarchy.faces.len();

    let base = EdgeLevel {
        rows: state
            .constraints_index
            .iter()
            .zip(&state.constraints_sign)
            .map(|(ind, sign)| (0..3).map(|k| (ind[k], sign[k])).collect())
            .collect(),
        sing: (0..num_faces)
            .map(|f| state.singularities.contains_key(&f))
            .collect(),
    };

    let mut levels = vec![base];
    let mut merges: Vec<Vec<MergeRec>> = Vec::new();
    while levels.len() < MAX_EDGE_LEVELS {
        let finest = levels.last().unwrap();
        if finest.sing.len() <= MIN_LEVEL_FACES {
            break;
        }
        let (coarse, recs) = coarsen(finest);
        if recs.is_empty() {
            break;
        }
        levels.push(coarse);
        merges.push(recs);
    }
    debug!(levels = levels.len(), "edge graph downsampled");

    for l in (0..levels.len()).rev() {
        solve_level(&levels[l], &mut state.edge_diff, l)?;
        if l > 0 {
            lift(&merges[l - 1], &mut state.edge_diff);
        }
    }
    Ok(())
}

/// Merge face pairs across edges whose variables cancel exactly.
fn coarsen(fine: &EdgeLevel) -> (EdgeLevel, Vec<MergeRec>) {
    let nf = fine.sing.len();
    // Variable incidence over faces.
    let mut incidence: BTreeMap<usize, Vec<(usize, usize, i32)>> = BTreeMap::new();
    for f in 0..nf {
        for r in 0..2 {
            for &(v, s) in &fine.rows[f * 2 + r] {
                incidence.entry(v).or_default().push((f, r, s));
            }
        }
    }

    let mut partner = vec![usize::MAX; nf];
    for f in 0..nf {
        if partner[f] != usize::MAX || fine.sing[f] {
            continue;
        }
        'search: for r in 0..2 {
            for &(v, s) in &fine.rows[f * 2 + r] {
                let inc = &incidence[&v];
                if inc.len() != 2 {
                    continue;
                }
                for &(g, gr, gs) in inc {
                    if g == f || partner[g] != usize::MAX || fine.sing[g] {
                        continue;
                    }
                    // Exact cancellation: same row slot, opposite sign.
                    if gr == r && gs == -s {
                        partner[f] = g;
                        partner[g] = f;
                        break 'search;
                    }
                }
            }
        }
    }

    let mut coarse = EdgeLevel {
        rows: Vec::new(),
        sing: Vec::new(),
    };
    let mut recs = Vec::new();
    for f in 0..nf {
        let g = partner[f];
        if g != usize::MAX && g < f {
            continue; // emitted with its partner
        }
        if g == usize::MAX {
            coarse.rows.push(fine.rows[f * 2].clone());
            coarse.rows.push(fine.rows[f * 2 + 1].clone());
            coarse.sing.push(fine.sing[f]);
        } else {
            let mut cancelled = Vec::new();
            for r in 0..2 {
                let merged = merge_rows(
                    &fine.rows[f * 2 + r],
                    &fine.rows[g * 2 + r],
                    &mut cancelled,
                );
                coarse.rows.push(merged);
            }
            coarse.sing.push(false);
            recs.push(MergeRec {
                fine_rows: [fine.rows[f * 2].clone(), fine.rows[f * 2 + 1].clone()],
                cancelled,
            });
        }
    }
    (coarse, recs)
}

/// Concatenate two rows, cancelling opposite-sign occurrences of shared
/// variables and recording them.
fn merge_rows(a: &Row, b: &Row, cancelled: &mut Vec<usize>) -> Row {
    let mut out: Row = a.clone();
    for &(v, s) in b {
        if let Some(pos) = out.iter().position(|&(ov, os)| ov == v && os == -s) {
            out.swap_remove(pos);
            cancelled.push(v);
        } else {
            out.push((v, s));
        }
    }
    out
}

/// Re-close one fine face of each merged pair.
///
/// The coarse solve zeroed the pair's row sums, so closing one member
/// closes the other. Assignments are clamped; any residue left by a
/// clamp is repaired by the finer level's own solve.
fn lift(recs: &[MergeRec], edge_diff: &mut [nalgebra::Vector2<i32>]) {
    for rec in recs {
        for row in &rec.fine_rows {
            let val: i32 = row.iter().map(|&(v, s)| s * flat_diff(edge_diff, v)).sum();
            if val == 0 {
                continue;
            }
            let Some(&(v, s)) = row.iter().find(|&&(v, _)| {
                rec.cancelled.contains(&v) && row.iter().filter(|&&(ov, _)| ov == v).count() == 1
            }) else {
                continue;
            };
            let slot = flat_diff_mut(edge_diff, v);
            *slot = (*slot - s * val).clamp(-1, 1);
        }
    }
}

/// Solve one level's feasibility flow and apply the adjustments.
fn solve_level(
    level: &EdgeLevel,
    edge_diff: &mut [nalgebra::Vector2<i32>],
    level_index: usize,
) -> Result<()> {
    let nf = level.sing.len();
    let num_rows = nf * 2;

    // Row excesses over regular faces.
    let mut excess = vec![0i64; num_rows];
    let mut any = false;
    for f in 0..nf {
        if level.sing[f] {
            continue;
        }
        for r in 0..2 {
            let row = f * 2 + r;
            excess[row] = level.rows[row]
                .iter()
                .map(|&(v, s)| (s * flat_diff(edge_diff, v)) as i64)
                .sum();
            any |= excess[row] != 0;
        }
    }
    if !any {
        return Ok(());
    }

    // Node layout: source, sink, rows, slack buffer. The buffer stands
    // for everything outside the network (singular faces, boundary):
    // excess parked there just shifts a residual nobody constrains.
    let source = 0;
    let sink = 1;
    let row_base = 2;
    let slack = row_base + num_rows;
    let mut net = Dinic::new(slack + 1);

    // Variable incidences over regular rows.
    let mut incidence: BTreeMap<usize, Vec<(usize, i32)>> = BTreeMap::new();
    for f in 0..nf {
        if level.sing[f] {
            continue;
        }
        for r in 0..2 {
            for &(v, s) in &level.rows[f * 2 + r] {
                incidence.entry(v).or_default().push((f * 2 + r, s));
            }
        }
    }

    // One arc per usable variable, leaving the row where it carries its
    // recorded tail sign; capacity in each direction is what the
    // `{-1, 0, 1}` clamp allows. A variable whose other side is a
    // singular face or the boundary reaches the slack buffer instead.
    let mut arcs: Vec<(usize, usize, i64)> = Vec::new(); // (variable, arc id, tail sign)
    for (&v, inc) in &incidence {
        // Combine duplicate (row, sign) incidences.
        let mut per_row: BTreeMap<usize, i32> = BTreeMap::new();
        for &(row, s) in inc {
            *per_row.entry(row).or_insert(0) += s;
        }
        per_row.retain(|_, net_sign| *net_sign != 0);
        let d = flat_diff(edge_diff, v) as i64;
        let entries: Vec<(usize, i32)> = per_row.into_iter().collect();
        match entries.as_slice() {
            [(row, s)] if s.abs() == 1 => {
                let s = *s as i64;
                let arc = net.add_arc(row_base + row, slack, 1 + s * d, 1 - s * d);
                arcs.push((v, arc, s));
            }
            [(r1, s1), (r2, s2)] if *s1 == -*s2 => {
                let (pos, neg) = if *s1 > 0 { (*r1, *r2) } else { (*r2, *r1) };
                let arc = net.add_arc(row_base + pos, row_base + neg, 1 + d, 1 - d);
                arcs.push((v, arc, 1));
            }
            _ => {} // inexpressible pattern (cut variable): stays fixed
        }
    }

    let mut supply = 0i64;
    let mut imbalance = 0i64;
    for (row, &e) in excess.iter().enumerate() {
        if e > 0 {
            net.add_arc(source, row_base + row, e, 0);
            supply += e;
        } else if e < 0 {
            net.add_arc(row_base + row, sink, -e, 0);
        }
        imbalance += e;
    }
    // The slack buffer must absorb (or emit) exactly the net imbalance
    // for every row to reach zero.
    if imbalance > 0 {
        net.add_arc(slack, sink, imbalance, 0);
    } else if imbalance < 0 {
        net.add_arc(source, slack, -imbalance, 0);
        supply -= imbalance;
    }

    let flow = net.max_flow(source, sink);
    if flow != supply {
        return Err(RemeshError::FlowInfeasible { level: level_index });
    }
    debug!(level = level_index, flow, "integer flow solved");

    // Flow leaving a row cancels that row's excess: the variable moves
    // against its tail sign by the net forward flow.
    for &(v, arc, tail_sign) in &arcs {
        let delta = -tail_sign * net.net_forward(arc);
        *flat_diff_mut(edge_diff, v) += delta as i32;
    }
    Ok(())
}

/// Dinic max-flow with real capacity in both arc directions.
struct Dinic {
    head: Vec<Vec<usize>>,
    to: Vec<usize>,
    cap: Vec<i64>,
    init: Vec<i64>,
    dist: Vec<i32>,
    iter: Vec<usize>,
}

impl Dinic {
    fn new(n: usize) -> Self {
        Dinic {
            head: vec![Vec::new(); n],
            to: Vec::new(),
            cap: Vec::new(),
            init: Vec::new(),
            dist: vec![0; n],
            iter: vec![0; n],
        }
    }

    /// Add a bidirectional arc; returns the forward arc id.
    fn add_arc(&mut self, u: usize, v: usize, cap_uv: i64, cap_vu: i64) -> usize {
        let id = self.to.len();
        self.to.push(v);
        self.cap.push(cap_uv.max(0));
        self.init.push(cap_uv.max(0));
        self.head[u].push(id);
        self.to.push(u);
        self.cap.push(cap_vu.max(0));
        self.init.push(cap_vu.max(0));
        self.head[v].push(id + 1);
        id
    }

    /// Signed flow pushed along the forward direction of `arc`.
    fn net_forward(&self, arc: usize) -> i64 {
        self.init[arc] - self.cap[arc]
    }

    fn bfs(&mut self, s: usize, t: usize) -> bool {
        self.dist.fill(-1);
        self.dist[s] = 0;
        let mut queue = VecDeque::from([s]);
        while let Some(u) = queue.pop_front() {
            for &a in &self.head[u] {
                let v = self.to[a];
                if self.cap[a] > 0 && self.dist[v] < 0 {
                    self.dist[v] = self.dist[u] + 1;
                    queue.push_back(v);
                }
            }
        }
        self.dist[t] >= 0
    }

    fn dfs(&mut self, u: usize, t: usize, limit: i64) -> i64 {
        if u == t {
            return limit;
        }
        while self.iter[u] < self.head[u].len() {
            let a = self.head[u][self.iter[u]];
            let v = self.to[a];
            if self.cap[a] > 0 && self.dist[v] == self.dist[u] + 1 {
                let pushed = self.dfs(v, t, limit.min(self.cap[a]));
                if pushed > 0 {
                    self.cap[a] -= pushed;
                    self.cap[a ^ 1] += pushed;
                    return pushed;
                }
            }
            self.iter[u] += 1;
        }
        0
    }

    fn max_flow(&mut self, s: usize, t: usize) -> i64 {
        let mut flow = 0;
        while self.bfs(s, t) {
            self.iter.fill(0);
            loop {
                let pushed = self.dfs(s, t, i64::MAX);
                if pushed == 0 {
                    break;
                }
                flow += pushed;
            }
        }
        flow
    }
}
