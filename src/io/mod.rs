//! Mesh file I/O.
//!
//! The remesher consumes triangle meshes and emits quad meshes, both as
//! Wavefront OBJ. Format detection is by extension so additional formats
//! can slot in beside [`obj`].

pub mod obj;

use std::path::Path;

use crate::error::{RemeshError, Result};
use crate::mesh::TriMesh;
use crate::param::Parametrizer;

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Wavefront OBJ format.
    Obj,
}

impl Format {
    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.to_lowercase().as_str() {
            "obj" => Some(Format::Obj),
            _ => None,
        }
    }

    /// Detect format from file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Format> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Format::from_extension)
    }
}

fn detect<P: AsRef<Path>>(path: P) -> Result<Format> {
    let path = path.as_ref();
    Format::from_path(path).ok_or_else(|| RemeshError::UnsupportedFormat {
        extension: path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("(none)")
            .to_string(),
    })
}

/// Load a triangle mesh with automatic format detection.
pub fn load<P: AsRef<Path>>(path: P) -> Result<TriMesh> {
    match detect(&path)? {
        Format::Obj => obj::load(path),
    }
}

/// Save the extracted quad mesh with automatic format detection.
pub fn save_quads<P: AsRef<Path>>(state: &Parametrizer, path: P) -> Result<()> {
    match detect(&path)? {
        Format::Obj => obj::save_quads(state, path),
    }
}
