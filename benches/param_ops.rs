//! Benchmarks for the parameterization pipeline.

use criterion::{criterion_group, criterion_main, Criterion};
use cruller::mesh::TriMesh;
use cruller::param::{ParamOptions, Parametrizer};
use nalgebra::{Point3, Vector3};

fn grid_state(n: usize) -> Parametrizer {
    let mut positions = Vec::with_capacity((n + 1) * (n + 1));
    let mut faces = Vec::with_capacity(n * n * 2);
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
    let mesh = TriMesh::new(positions.clone(), faces).unwrap();
    let nv = mesh.num_vertices();
    Parametrizer::with_fields(
        mesh,
        vec![Vector3::z(); nv],
        vec![Vector3::x(); nv],
        positions,
        1.0,
        &ParamOptions::default(),
    )
    .unwrap()
}

fn bench_index_map(c: &mut Criterion) {
    c.bench_function("index_map_grid_20", |b| {
        b.iter(|| {
            let mut state = grid_state(20);
            state.compute_index_map().unwrap();
            state.f_compact.len()
        });
    });
}

fn bench_field_optimization(c: &mut Criterion) {
    c.bench_function("fields_tetrahedron", |b| {
        let mesh = TriMesh::new(
            vec![
                Point3::new(1.0, 1.0, 1.0),
                Point3::new(1.0, -1.0, -1.0),
                Point3::new(-1.0, 1.0, -1.0),
                Point3::new(-1.0, -1.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
        )
        .unwrap();
        b.iter(|| {
            let mut state =
                Parametrizer::initialize(mesh.clone(), &ParamOptions::default()).unwrap();
            state.optimize_fields();
            state.hierarchy.levels[0].q.len()
        });
    });
}

criterion_group!(benches, bench_index_map, bench_field_optimization);
criterion_main!(benches);
