//! End-to-end scenarios for the quad remeshing pipeline.

use cruller::mesh::TriMesh;
use cruller::param::{holes, snapshot, DEdge, ParamOptions, Parametrizer};
use nalgebra::{Point3, Vector2, Vector3};
use std::collections::BTreeMap;

/// Two triangles over the unit square with an axis-aligned field.
fn square_state() -> Parametrizer {
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
    Parametrizer::with_fields(
        mesh,
        vec![Vector3::z(); n],
        vec![Vector3::x(); n],
        o,
        1.0,
        &ParamOptions::default(),
    )
    .unwrap()
}

/// A 2x8 vertex cylinder strip (16 triangles) with the cross field
/// along the axis and unit lattice spacing.
fn cylinder_state() -> Parametrizer {
    let rings = 2usize;
    let segments = 8usize;
    let radius = segments as f64 / std::f64::consts::TAU;
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    for j in 0..rings {
        for i in 0..segments {
            let a = std::f64::consts::TAU * i as f64 / segments as f64;
            positions.push(Point3::new(radius * a.cos(), radius * a.sin(), j as f64));
            normals.push(Vector3::new(a.cos(), a.sin(), 0.0));
        }
    }
    let mut faces = Vec::new();
    for i in 0..segments {
        let i1 = (i + 1) % segments;
        let (a, b) = (i, i1);
        let (c, d) = (segments + i1, segments + i);
        faces.push([a, b, c]);
        faces.push([a, c, d]);
    }
    let mesh = TriMesh::new(positions.clone(), faces).unwrap();
    let o = positions;
    Parametrizer::with_fields(
        mesh,
        normals,
        vec![Vector3::z(); rings * segments],
        o.clone(),
        1.0,
        &ParamOptions::default(),
    )
    .unwrap()
}

/// A regular tetrahedron for the full smoothing pipeline.
fn tetrahedron_mesh() -> TriMesh {
    TriMesh::new(
        vec![
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(1.0, -1.0, -1.0),
            Point3::new(-1.0, 1.0, -1.0),
            Point3::new(-1.0, -1.0, 1.0),
        ],
        vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
    )
    .unwrap()
}

fn edge_quad_counts(f_compact: &[[usize; 4]]) -> BTreeMap<DEdge, usize> {
    let mut counts = BTreeMap::new();
    for quad in f_compact {
        for k in 0..4 {
            let (a, b) = (quad[k], quad[(k + 1) % 4]);
            if a != b {
                *counts.entry(DEdge::new(a, b)).or_insert(0) += 1;
            }
        }
    }
    counts
}

#[test]
fn s1_unit_square_yields_one_quad() {
    let mut state = square_state();
    state.compute_index_map().unwrap();

    assert_eq!(state.f_compact.len(), 1);
    let quad = state.f_compact[0];
    let mut sorted = quad;
    sorted.sort_unstable();
    assert_eq!(sorted, [0, 1, 2, 3], "all four corners survive");
    assert!(state.bad_vertices.iter().all(|&b| !b));
    assert!(state.cuts.is_empty());
    // The quad is a cyclic rotation of the boundary, in either winding.
    let pos = quad.iter().position(|&v| v == 0).unwrap();
    let cycle: Vec<usize> = (0..4).map(|k| quad[(pos + k) % 4]).collect();
    assert!(cycle == [0, 1, 2, 3] || cycle == [0, 3, 2, 1]);
}

#[test]
fn s2_tetrahedron_full_pipeline() {
    let options = ParamOptions::default();
    let mut state = Parametrizer::initialize(tetrahedron_mesh(), &options).unwrap();
    state.optimize_fields();
    state.compute_index_map().unwrap();

    // Orientation defects are odd, and a tetrahedron carries at most
    // one per original face.
    assert!(state.singularities.values().all(|&s| s == 1 || s == 3));
    assert!(state.singularities.len() <= 4);

    assert!(state.f_compact.len() >= 2, "closed surface yields quads");
    // Diff clamp holds through the output.
    for d in &state.edge_diff {
        assert!((-1..=1).contains(&d.x) && (-1..=1).contains(&d.y));
    }
    // Hole closure on a closed surface: each edge borders 1..=2 quads.
    for (_, count) in edge_quad_counts(&state.f_compact) {
        assert!((1..=2).contains(&count));
    }
}

#[test]
fn s3_cylinder_ring_of_eight_quads() {
    let mut state = cylinder_state();
    state.compute_index_map().unwrap();

    assert_eq!(state.f_compact.len(), 8, "one quad per segment, no fills");
    assert!(state.bad_vertices.iter().all(|&b| !b));
    // Ring structure: each axial edge is shared by two quads, each rim
    // edge by one.
    let counts = edge_quad_counts(&state.f_compact);
    let shared = counts.values().filter(|&&c| c == 2).count();
    let rim = counts.values().filter(|&&c| c == 1).count();
    assert_eq!(shared, 8);
    assert_eq!(rim, 16);
    // Every quad uses two vertices from each ring.
    for quad in &state.f_compact {
        let lower = quad.iter().filter(|&&v| {
            state.o_compact[v].z < 0.5
        }).count();
        assert_eq!(lower, 2);
    }
}

#[test]
fn s4_pentagon_hole_closes_with_two_quads() {
    // A ring of five quads around a pentagonal hole, fed straight into
    // the hole filler.
    let mut positions = Vec::new();
    for i in 0..5 {
        let a = std::f64::consts::TAU * i as f64 / 5.0;
        positions.push(Point3::new(a.cos(), a.sin(), 0.0));
    }
    for i in 0..5 {
        let a = std::f64::consts::TAU * (i as f64 + 0.5) / 5.0;
        positions.push(Point3::new(2.0 * a.cos(), 2.0 * a.sin(), 0.0));
    }
    let quads: Vec<[usize; 4]> = (0..5)
        .map(|i| [i, 5 + i, 5 + (i + 4) % 5, (i + 4) % 5])
        .collect();
    let mut state = Parametrizer {
        n_compact: vec![Vector3::z(); positions.len()],
        bad_vertices: vec![false; positions.len()],
        // Mark the outer rim as surface boundary so only the inner
        // pentagon counts as a hole.
        boundary_compact: (0..positions.len()).map(|v| v >= 5).collect(),
        o_compact: positions,
        f_compact: quads,
        ..Parametrizer::default()
    };
    holes::fix_holes(&mut state);
    assert_eq!(state.f_compact.len(), 7, "pentagon closes with two quads");
    let added = &state.f_compact[5..];
    assert!(added.iter().any(|q| q[2] == q[3] || q[1] == q[2]), "one degenerate quad");
    for (_, count) in edge_quad_counts(&state.f_compact) {
        assert!((1..=2).contains(&count));
    }
}

#[test]
fn s5_snapshot_resume_matches_direct_run() {
    let options = ParamOptions::default();
    let mut direct = Parametrizer::initialize(tetrahedron_mesh(), &options).unwrap();
    direct.optimize_fields();

    let mut buf = Vec::new();
    snapshot::save(&direct, &mut buf).unwrap();
    let mut resumed = snapshot::load(&mut buf.as_slice(), &options).unwrap();

    direct.compute_index_map().unwrap();
    resumed.compute_index_map().unwrap();

    assert_eq!(direct.f_compact, resumed.f_compact);
    assert_eq!(direct.o_compact.len(), resumed.o_compact.len());
    for (a, b) in direct.o_compact.iter().zip(&resumed.o_compact) {
        assert!((a - b).norm() < 1e-12);
    }
}

#[test]
fn s6_fixed_seed_runs_are_identical() {
    let options = ParamOptions::default().with_seed(99);
    let run = |options: &ParamOptions| {
        let mut state = Parametrizer::initialize(tetrahedron_mesh(), options).unwrap();
        state.optimize_fields();
        state.compute_index_map().unwrap();
        (state.f_compact, state.cuts)
    };
    let (f1, c1) = run(&options);
    let (f2, c2) = run(&options);
    assert_eq!(f1, f2);
    assert_eq!(c1, c2);
}

#[test]
fn diff_clamp_holds_through_pipeline() {
    // P2 on the hand-built scenarios.
    for mut state in [square_state(), cylinder_state()] {
        state.compute_index_map().unwrap();
        for d in &state.edge_diff {
            assert!((-1..=1).contains(&d.x) && (-1..=1).contains(&d.y));
        }
    }
}

#[test]
fn quad_windings_are_consistent() {
    // P4: no directed edge appears twice across quads with distinct
    // vertices.
    let mut state = cylinder_state();
    state.compute_index_map().unwrap();
    let mut seen = std::collections::HashSet::new();
    for quad in &state.f_compact {
        if quad.iter().collect::<std::collections::HashSet<_>>().len() < 4 {
            continue;
        }
        for k in 0..4 {
            let e = (quad[k], quad[(k + 1) % 4]);
            assert!(seen.insert(e), "directed edge {e:?} repeated");
        }
    }
}

#[test]
fn vector2_reexport_is_usable() {
    // The crate re-exports nalgebra; integer lattice types line up.
    let v: Vector2<i32> = Vector2::new(1, -1);
    assert_eq!(v.x + v.y, 0);
}
