//! Binary snapshot serializer.
//!
//! Persists the pipeline inputs (fields, topology, attributes, and the
//! hierarchy) as a stream of length-prefixed little-endian records in a
//! fixed order, for debugging and resume tests. The core-phase arrays
//! are not stored; a resumed run re-derives them, which is deterministic
//! under the seeded pipeline.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::{Matrix2x3, Point3, Vector2, Vector3};

use crate::error::{RemeshError, Result};
use crate::field::hierarchy::{Hierarchy, Level, Link};
use crate::field::FaceScale;
use crate::mesh::{DirectedGraph, MeshStatus, TriMesh, INVALID};
use crate::param::{ParamOptions, ParamOptionsState, Parametrizer};

/// Refuse to allocate for length prefixes beyond this.
const MAX_LEN: u64 = 1 << 32;

/// Write a snapshot of the pipeline inputs.
pub fn save<W: Write>(state: &Parametrizer, w: &mut W) -> Result<()> {
    // Singularity maps.
    w_u64(w, state.singularities.len() as u64)?;
    for (&f, &s) in &state.singularities {
        w_i32(w, f as i32)?;
        w_i32(w, s)?;
    }
    w_u64(w, state.pos_sing.len() as u64)?;
    for (&f, v) in &state.pos_sing {
        w_i32(w, f as i32)?;
        w_i32(w, v.x)?;
        w_i32(w, v.y)?;
    }
    w_u64(w, state.pos_rank.len() as u64)?;
    for r in &state.pos_rank {
        for &v in r {
            w_i32(w, v)?;
        }
    }
    w_u64(w, state.pos_index.len() as u64)?;
    for r in &state.pos_index {
        for &v in r {
            w_i32(w, v)?;
        }
    }

    // Input mesh and derived attributes.
    w_points(w, &state.mesh.positions)?;
    w_vectors(w, &state.hierarchy.levels[0].normals)?;
    w_vectors(w, &state.face_normals)?;
    w_u64(w, state.face_scale.fs.len() as u64)?;
    for v in &state.face_scale.fs {
        w_f64(w, v.x)?;
        w_f64(w, v.y)?;
    }
    w_vectors(w, &state.face_scale.fq)?;
    w_u64(w, state.mesh.faces.len() as u64)?;
    for f in &state.mesh.faces {
        for &v in f {
            w_i32(w, v as i32)?;
        }
    }
    w_u64(w, state.triangle_spaces.len() as u64)?;
    for m in &state.triangle_spaces {
        for r in 0..2 {
            for c in 0..3 {
                w_f64(w, m[(r, c)])?;
            }
        }
    }

    // Topology.
    w_index_vec(w, &state.graph.v2e)?;
    w_index_vec(w, &state.graph.e2e)?;
    w_bool_vec(w, &state.graph.boundary)?;
    w_bool_vec(w, &state.graph.nonmanifold)?;
    w_adj(w, &state.hierarchy.levels[0].adj)?;

    // Hierarchy.
    w_hierarchy(w, &state.hierarchy)?;

    // Mesh status and targets.
    w_f64(w, state.status.surface_area)?;
    w_f64(w, state.scale)?;
    w_f64(w, state.status.average_edge_length)?;
    w_f64(w, state.status.max_edge_length)?;
    w_u64(w, state.vertex_areas.len() as u64)?;
    for &a in &state.vertex_areas {
        w_f64(w, a)?;
    }
    w_i32(w, state.num_vertices as i32)?;
    w_i32(w, state.num_faces as i32)?;
    Ok(())
}

/// Write a snapshot to a file.
pub fn save_to_path<P: AsRef<Path>>(state: &Parametrizer, path: P) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    save(state, &mut w)
}

/// Read a snapshot back into fresh pipeline state.
///
/// The returned state is ready for
/// [`compute_index_map`](Parametrizer::compute_index_map); options that
/// are not part of the snapshot (seed, flags) come from `options`.
pub fn load<R: Read>(r: &mut R, options: &ParamOptions) -> Result<Parametrizer> {
    let mut singularities = std::collections::BTreeMap::new();
    for _ in 0..r_len(r)? {
        let f = r_i32(r)? as usize;
        let s = r_i32(r)?;
        singularities.insert(f, s);
    }
    let mut pos_sing = std::collections::BTreeMap::new();
    for _ in 0..r_len(r)? {
        let f = r_i32(r)? as usize;
        let x = r_i32(r)?;
        let y = r_i32(r)?;
        pos_sing.insert(f, Vector2::new(x, y));
    }
    let mut pos_rank = Vec::new();
    for _ in 0..r_len(r)? {
        let mut row = [0i32; 3];
        for v in row.iter_mut() {
            *v = r_i32(r)?;
        }
        pos_rank.push(row);
    }
    let mut pos_index = Vec::new();
    for _ in 0..r_len(r)? {
        let mut row = [0i32; 6];
        for v in row.iter_mut() {
            *v = r_i32(r)?;
        }
        pos_index.push(row);
    }

    let positions = r_points(r)?;
    let normals = r_vectors(r)?;
    let face_normals = r_vectors(r)?;
    let mut fs = Vec::new();
    for _ in 0..r_len(r)? {
        let x = r_f64(r)?;
        let y = r_f64(r)?;
        fs.push(Vector2::new(x, y));
    }
    let fq = r_vectors(r)?;
    let mut faces = Vec::new();
    for _ in 0..r_len(r)? {
        let mut f = [0usize; 3];
        for v in f.iter_mut() {
            *v = r_i32(r)? as usize;
        }
        faces.push(f);
    }
    let mut triangle_spaces = Vec::new();
    for _ in 0..r_len(r)? {
        let mut m = Matrix2x3::zeros();
        for row in 0..2 {
            for col in 0..3 {
                m[(row, col)] = r_f64(r)?;
            }
        }
        triangle_spaces.push(m);
    }

    let v2e = r_index_vec(r)?;
    let e2e = r_index_vec(r)?;
    let boundary = r_bool_vec(r)?;
    let nonmanifold = r_bool_vec(r)?;
    let adj = r_adj(r)?;
    let mut hierarchy = r_hierarchy(r)?;
    if hierarchy.levels.is_empty() {
        return Err(RemeshError::CorruptSnapshot("hierarchy has no levels".into()));
    }
    hierarchy.levels[0].adj = adj;

    let surface_area = r_f64(r)?;
    let scale = r_f64(r)?;
    let average_edge_length = r_f64(r)?;
    let max_edge_length = r_f64(r)?;
    let mut vertex_areas = Vec::new();
    for _ in 0..r_len(r)? {
        vertex_areas.push(r_f64(r)?);
    }
    let num_vertices = r_i32(r)? as usize;
    let num_faces = r_i32(r)? as usize;

    let mesh = TriMesh::new(positions, faces)?;
    hierarchy.levels[0].normals = normals;
    Ok(Parametrizer {
        options: ParamOptionsState {
            with_scale: options.with_scale,
            seed: options.seed,
            optimize_positions: options.optimize_positions,
            field_sweeps: options.field_sweeps,
        },
        mesh,
        graph: DirectedGraph {
            v2e,
            e2e,
            boundary,
            nonmanifold,
        },
        face_normals,
        vertex_areas,
        triangle_spaces,
        status: MeshStatus {
            surface_area,
            average_edge_length,
            max_edge_length,
        },
        scale,
        num_vertices,
        num_faces,
        face_scale: FaceScale { fq, fs },
        hierarchy,
        singularities,
        pos_sing,
        pos_rank,
        pos_index,
        ..Parametrizer::default()
    })
}

/// Read a snapshot from a file.
pub fn load_from_path<P: AsRef<Path>>(path: P, options: &ParamOptions) -> Result<Parametrizer> {
    let mut r = BufReader::new(File::open(path)?);
    load(&mut r, options)
}

fn w_hierarchy<W: Write>(w: &mut W, h: &Hierarchy) -> Result<()> {
    w_f64(w, h.scale)?;
    w_u64(w, h.faces.len() as u64)?;
    for f in &h.faces {
        for &v in f {
            w_i32(w, v as i32)?;
        }
    }
    w_index_vec(w, &h.e2e)?;
    w_u64(w, h.levels.len() as u64)?;
    for level in &h.levels {
        w_points(w, &level.positions)?;
        w_vectors(w, &level.normals)?;
        w_u64(w, level.areas.len() as u64)?;
        for &a in &level.areas {
            w_f64(w, a)?;
        }
        w_adj(w, &level.adj)?;
        w_vectors(w, &level.q)?;
        w_points(w, &level.o)?;
        w_u64(w, level.s.len() as u64)?;
        for v in &level.s {
            w_f64(w, v.x)?;
            w_f64(w, v.y)?;
        }
        w_u64(w, level.k.len() as u64)?;
        for v in &level.k {
            w_f64(w, v.x)?;
            w_f64(w, v.y)?;
        }
    }
    w_u64(w, h.to_upper.len() as u64)?;
    for map in &h.to_upper {
        w_u64(w, map.len() as u64)?;
        for pair in map {
            w_i32(w, to_i32(pair[0]))?;
            w_i32(w, to_i32(pair[1]))?;
        }
    }
    w_u64(w, h.to_lower.len() as u64)?;
    for map in &h.to_lower {
        w_index_vec(w, map)?;
    }
    Ok(())
}

fn r_hierarchy<R: Read>(r: &mut R) -> Result<Hierarchy> {
    let scale = r_f64(r)?;
    let mut faces = Vec::new();
    for _ in 0..r_len(r)? {
        let mut f = [0usize; 3];
        for v in f.iter_mut() {
            *v = r_i32(r)? as usize;
        }
        faces.push(f);
    }
    let e2e = r_index_vec(r)?;
    let mut levels = Vec::new();
    for _ in 0..r_len(r)? {
        let positions = r_points(r)?;
        let normals = r_vectors(r)?;
        let mut areas = Vec::new();
        for _ in 0..r_len(r)? {
            areas.push(r_f64(r)?);
        }
        let adj = r_adj(r)?;
        let q = r_vectors(r)?;
        let o = r_points(r)?;
        let mut s = Vec::new();
        for _ in 0..r_len(r)? {
            let x = r_f64(r)?;
            let y = r_f64(r)?;
            s.push(Vector2::new(x, y));
        }
        let mut k = Vec::new();
        for _ in 0..r_len(r)? {
            let x = r_f64(r)?;
            let y = r_f64(r)?;
            k.push(Vector2::new(x, y));
        }
        levels.push(Level {
            positions,
            normals,
            areas,
            adj,
            q,
            o,
            s,
            k,
        });
    }
    let mut to_upper = Vec::new();
    for _ in 0..r_len(r)? {
        let mut map = Vec::new();
        for _ in 0..r_len(r)? {
            let a = from_i32(r_i32(r)?);
            let b = from_i32(r_i32(r)?);
            map.push([a, b]);
        }
        to_upper.push(map);
    }
    let mut to_lower = Vec::new();
    for _ in 0..r_len(r)? {
        to_lower.push(r_index_vec(r)?);
    }
    Ok(Hierarchy {
        scale,
        faces,
        e2e,
        levels,
        to_upper,
        to_lower,
    })
}

#[inline]
fn to_i32(v: usize) -> i32 {
    if v == INVALID {
        -1
    } else {
        v as i32
    }
}

#[inline]
fn from_i32(v: i32) -> usize {
    if v < 0 {
        INVALID
    } else {
        v as usize
    }
}

fn w_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn w_i32<W: Write>(w: &mut W, v: i32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn w_f64<W: Write>(w: &mut W, v: f64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn w_points<W: Write>(w: &mut W, points: &[Point3<f64>]) -> Result<()> {
    w_u64(w, points.len() as u64)?;
    for p in points {
        for k in 0..3 {
            w_f64(w, p[k])?;
        }
    }
    Ok(())
}

fn w_vectors<W: Write>(w: &mut W, vectors: &[Vector3<f64>]) -> Result<()> {
    w_u64(w, vectors.len() as u64)?;
    for v in vectors {
        for k in 0..3 {
            w_f64(w, v[k])?;
        }
    }
    Ok(())
}

fn w_index_vec<W: Write>(w: &mut W, values: &[usize]) -> Result<()> {
    w_u64(w, values.len() as u64)?;
    for &v in values {
        w_i32(w, to_i32(v))?;
    }
    Ok(())
}

fn w_bool_vec<W: Write>(w: &mut W, values: &[bool]) -> Result<()> {
    w_u64(w, values.len() as u64)?;
    for &v in values {
        w_i32(w, v as i32)?;
    }
    Ok(())
}

fn w_adj<W: Write>(w: &mut W, adj: &[Vec<Link>]) -> Result<()> {
    w_u64(w, adj.len() as u64)?;
    for links in adj {
        w_u64(w, links.len() as u64)?;
        for link in links {
            w_i32(w, link.id as i32)?;
            w_f64(w, link.weight)?;
        }
    }
    Ok(())
}

fn r_len<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    let v = u64::from_le_bytes(buf);
    if v > MAX_LEN {
        return Err(RemeshError::CorruptSnapshot(format!(
            "length prefix {v} out of range"
        )));
    }
    Ok(v)
}

fn r_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn r_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn r_points<R: Read>(r: &mut R) -> Result<Vec<Point3<f64>>> {
    let len = r_len(r)?;
    let mut out = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let x = r_f64(r)?;
        let y = r_f64(r)?;
        let z = r_f64(r)?;
        out.push(Point3::new(x, y, z));
    }
    Ok(out)
}

fn r_vectors<R: Read>(r: &mut R) -> Result<Vec<Vector3<f64>>> {
    let len = r_len(r)?;
    let mut out = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let x = r_f64(r)?;
        let y = r_f64(r)?;
        let z = r_f64(r)?;
        out.push(Vector3::new(x, y, z));
    }
    Ok(out)
}

fn r_index_vec<R: Read>(r: &mut R) -> Result<Vec<usize>> {
    let len = r_len(r)?;
    let mut out = Vec::with_capacity(len as usize);
    for _ in 0..len {
        out.push(from_i32(r_i32(r)?));
    }
    Ok(out)
}

fn r_bool_vec<R: Read>(r: &mut R) -> Result<Vec<bool>> {
    let len = r_len(r)?;
    let mut out = Vec::with_capacity(len as usize);
    for _ in 0..len {
        out.push(r_i32(r)? != 0);
    }
    Ok(out)
}

fn r_adj<R: Read>(r: &mut R) -> Result<Vec<Vec<Link>>> {
    let len = r_len(r)?;
    let mut out = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let inner = r_len(r)?;
        let mut links = Vec::with_capacity(inner as usize);
        for _ in 0..inner {
            let id = r_i32(r)? as usize;
            let weight = r_f64(r)?;
            links.push(Link { id, weight });
        }
        out.push(links);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::TriMesh;
    use crate::param::sing;

    fn sample_state() -> Parametrizer {
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
    fn test_roundtrip_preserves_inputs() {
        let state = sample_state();
        let mut buf = Vec::new();
        save(&state, &mut buf).unwrap();
        let loaded = load(&mut buf.as_slice(), &ParamOptions::default()).unwrap();

        assert_eq!(state.mesh.faces, loaded.mesh.faces);
        assert_eq!(state.mesh.positions, loaded.mesh.positions);
        assert_eq!(state.graph.e2e, loaded.graph.e2e);
        assert_eq!(state.singularities, loaded.singularities);
        assert_eq!(state.pos_rank, loaded.pos_rank);
        assert_eq!(state.pos_index, loaded.pos_index);
        assert_eq!(state.scale, loaded.scale);
        assert_eq!(
            state.hierarchy.levels[0].o, loaded.hierarchy.levels[0].o,
        );
        assert_eq!(
            state.hierarchy.levels[0].q, loaded.hierarchy.levels[0].q,
        );
        assert_eq!(state.num_faces, loaded.num_faces);
    }

    #[test]
    fn test_truncated_stream_is_detected() {
        let state = sample_state();
        let mut buf = Vec::new();
        save(&state, &mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(load(&mut buf.as_slice(), &ParamOptions::default()).is_err());
    }
}
