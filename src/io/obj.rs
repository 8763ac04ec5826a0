//! Wavefront OBJ support.
//!
//! The loader reads `v` and `f` records (polygon faces are fan
//! triangulated, texture/normal references ignored); the writer emits
//! the extracted quad mesh, dropping excluded vertices and remapping
//! indices compactly.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Point3;

use crate::error::{RemeshError, Result};
use crate::mesh::TriMesh;
use crate::param::Parametrizer;

/// Load a triangle mesh from an OBJ file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<TriMesh> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut positions: Vec<Point3<f64>> = Vec::new();
    let mut faces: Vec<[usize; 3]> = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let mut coords = [0.0f64; 3];
                for c in coords.iter_mut() {
                    *c = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| RemeshError::LoadError {
                            path: path.to_path_buf(),
                            message: format!("bad vertex on line {}", lineno + 1),
                        })?;
                }
                positions.push(Point3::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let indices: Vec<usize> = tokens
                    .map(|t| parse_face_index(t, positions.len()))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|_| RemeshError::LoadError {
                        path: path.to_path_buf(),
                        message: format!("bad face on line {}", lineno + 1),
                    })?;
                if indices.len() < 3 {
                    return Err(RemeshError::LoadError {
                        path: path.to_path_buf(),
                        message: format!("face with fewer than 3 vertices on line {}", lineno + 1),
                    });
                }
                for k in 1..indices.len() - 1 {
                    faces.push([indices[0], indices[k], indices[k + 1]]);
                }
            }
            _ => {}
        }
    }

    if faces.is_empty() {
        return Err(RemeshError::LoadError {
            path: path.to_path_buf(),
            message: "no faces found".to_string(),
        });
    }
    TriMesh::new(positions, faces)
}

/// Parse one `f` token: `v`, `v/vt`, `v//vn`, or `v/vt/vn`, 1-based
/// (negative indices count from the end).
fn parse_face_index(token: &str, num_vertices: usize) -> Result<usize> {
    let first = token.split('/').next().unwrap_or("");
    let value: i64 = first.parse().map_err(|_| RemeshError::LoadError {
        path: Default::default(),
        message: String::new(),
    })?;
    let index = if value < 0 {
        num_vertices as i64 + value
    } else {
        value - 1
    };
    if index < 0 || index >= num_vertices as i64 {
        return Err(RemeshError::LoadError {
            path: Default::default(),
            message: String::new(),
        });
    }
    Ok(index as usize)
}

/// Save the extracted quad mesh to an OBJ file.
///
/// Vertices flagged in `bad_vertices` are skipped and the remaining
/// indices renumbered.
pub fn save_quads<P: AsRef<Path>>(state: &Parametrizer, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    // 1-based running index over surviving vertices.
    let mut compact = vec![0usize; state.bad_vertices.len()];
    let mut next = 0;
    for (i, &bad) in state.bad_vertices.iter().enumerate() {
        if !bad {
            next += 1;
        }
        compact[i] = next;
    }

    for (o, &bad) in state.o_compact.iter().zip(&state.bad_vertices) {
        if bad {
            continue;
        }
        writeln!(w, "v {} {} {}", o.x, o.y, o.z)?;
    }
    for quad in &state.f_compact {
        writeln!(
            w,
            "f {} {} {} {}",
            compact[quad[0]], compact[quad[1]], compact[quad[2]], compact[quad[3]]
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_triangulates_polygons() {
        let dir = std::env::temp_dir().join("cruller_obj_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("quad.obj");
        std::fs::write(
            &path,
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n",
        )
        .unwrap();
        let mesh = load(&path).unwrap();
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_faces(), 2);
    }

    #[test]
    fn test_load_accepts_slash_indices() {
        let dir = std::env::temp_dir().join("cruller_obj_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("slashes.obj");
        std::fs::write(
            &path,
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1/1 2/2/2 3//3\n",
        )
        .unwrap();
        let mesh = load(&path).unwrap();
        assert_eq!(mesh.num_faces(), 1);
    }

    #[test]
    fn test_save_skips_bad_vertices() {
        let state = Parametrizer {
            o_compact: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(9.0, 9.0, 9.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            bad_vertices: vec![false, true, false, false, false],
            f_compact: vec![[0, 2, 3, 4]],
            ..Parametrizer::default()
        };
        let dir = std::env::temp_dir().join("cruller_obj_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.obj");
        save_quads(&state, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let vertex_lines = text.lines().filter(|l| l.starts_with("v ")).count();
        assert_eq!(vertex_lines, 4);
        assert!(text.contains("f 1 2 3 4"));
    }
}
